//! Application service registration file.
//!
//! The homeserver must load this file before it pushes any transaction to
//! the bridge. JSON is valid YAML, so the output can be dropped into the
//! homeserver's `app_service_config_files` as is.

use serde::Serialize;

use crate::config::MatrixConfig;

/// Appservice id known to the homeserver.
const APPSERVICE_ID: &str = "mandm-bridge";

/// Localpart the appservice itself acts as.
const SENDER_LOCALPART: &str = "mandm_bridge";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub exclusive: bool,
    pub regex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespaces {
    pub users: Vec<Namespace>,
    pub aliases: Vec<Namespace>,
    pub rooms: Vec<Namespace>,
}

/// Registration document for the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub id: String,
    pub url: String,
    pub as_token: String,
    pub hs_token: String,
    pub sender_localpart: String,
    pub rate_limited: bool,
    pub namespaces: Namespaces,
}

impl Registration {
    pub fn from_config(config: &MatrixConfig) -> Self {
        let server = escape(&config.server_name);
        Self {
            id: APPSERVICE_ID.to_string(),
            url: format!("http://{}", config.listen),
            as_token: config.as_token.clone(),
            hs_token: config.hs_token.clone(),
            sender_localpart: SENDER_LOCALPART.to_string(),
            // Shadow users speak for many people at once.
            rate_limited: false,
            namespaces: Namespaces {
                users: vec![Namespace {
                    exclusive: true,
                    regex: format!("@{}.*:{}", escape(&config.user_prefix), server),
                }],
                aliases: vec![Namespace {
                    exclusive: false,
                    regex: format!("#{}:{}", escape(&config.room), server),
                }],
                rooms: Vec::new(),
            },
        }
    }
}

/// Render the registration file for `config`.
pub fn registration(config: &MatrixConfig) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Registration::from_config(config))
}

/// Backslash-escape regex metacharacters.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if r"\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
