//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::common::RetryPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub murmur: MurmurConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Matrix application service settings (network A).
#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    pub address: String,
    /// Server name used in user ids and room aliases.
    pub server_name: String,
    /// Local part of the bridge room alias.
    pub room: String,
    /// Local part prefix of shadow users.
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,
    /// Token the appservice authenticates with.
    pub as_token: String,
    /// Token the homeserver authenticates with.
    pub hs_token: String,
    /// Listen address of the transaction endpoint.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Tag appended to relayed sender names.
    #[serde(default = "default_matrix_tag")]
    pub tag: String,
}

/// Murmur server settings (network B).
///
/// The bridge itself only reads `tag`. The connection fields are parsed and
/// validated for embedders that implement [`SessionNetwork`] against a
/// Murmur server.
///
/// [`SessionNetwork`]: crate::network::SessionNetwork
#[derive(Debug, Clone, Deserialize)]
pub struct MurmurConfig {
    pub address: String,
    pub port: u16,
    pub server_id: u32,
    pub secret: String,
    /// Channels whose messages are bridged (empty = all channels).
    #[serde(default)]
    pub bridged_channels: Vec<String>,
    /// Tag appended to relayed sender names.
    #[serde(default = "default_murmur_tag")]
    pub tag: String,
}

/// Message handler chains per direction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Handler names applied to Matrix -> Murmur messages, in order.
    pub a_to_b: Vec<String>,
    /// Handler names applied to Murmur -> Matrix messages, in order.
    pub b_to_a: Vec<String>,
    /// Sender names dropped by `sender-suppression`.
    pub ignored_senders: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            a_to_b: vec!["noresize-directive".to_string()],
            b_to_a: vec![
                "sender-suppression".to_string(),
                "markup-stripping".to_string(),
            ],
            ignored_senders: vec!["botamusique".to_string()],
        }
    }
}

/// Image relay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub fetch_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_width: 600,
            max_height: 450,
            fetch_timeout_secs: 10,
        }
    }
}

impl MediaConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound of events processed at the same time.
    pub max_concurrent_events: usize,
    pub retry: RetryConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_events: 32,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry settings for transient adapter failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay_ms: 200,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_user_prefix() -> String {
    "mumble_".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_matrix_tag() -> String {
    "A".to_string()
}

fn default_murmur_tag() -> String {
    "B".to_string()
}
