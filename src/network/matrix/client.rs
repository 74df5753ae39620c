//! Client-server API calls made with the application service token.

use std::time::Duration;

use rand::Rng;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::common::{AdapterError, AdapterResult};

/// Name given to a room the bridge creates itself.
const BRIDGE_ROOM_NAME: &str = "MandM-bridge";

/// Power level granted to every member of a bridge-created room.
const DEFAULT_USER_POWER: u32 = 50;

#[derive(Debug, Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

/// Thin wrapper over the homeserver's client-server API.
#[derive(Debug, Clone)]
pub struct MatrixClient {
    http: reqwest::Client,
    base: Url,
    as_token: String,
    server_name: String,
    user_prefix: String,
}

impl MatrixClient {
    pub fn new(
        address: &str,
        server_name: &str,
        user_prefix: &str,
        as_token: &str,
    ) -> AdapterResult<Self> {
        let base = Url::parse(address).map_err(|e| {
            AdapterError::Other(format!("invalid homeserver address '{}': {}", address, e))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base,
            as_token: as_token.to_string(),
            server_name: server_name.to_string(),
            user_prefix: user_prefix.to_string(),
        })
    }

    /// Localpart of the shadow user for `name`.
    pub fn localpart(&self, name: &str) -> String {
        format!("{}{}", self.user_prefix, name)
    }

    /// Full Matrix id of the shadow user for `name`.
    pub fn user_id(&self, name: &str) -> String {
        format!("@{}:{}", self.localpart(name), self.server_name)
    }

    /// `{address}/_matrix/client/v3/{segments...}` with each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["_matrix", "client", "v3"])
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(segments))
            .bearer_auth(&self.as_token)
    }

    /// Turn a non-success response into [`AdapterError::Status`].
    async fn check(operation: &'static str, response: Response) -> AdapterResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if !body.errcode.is_empty() => format!("{}: {}", body.errcode, body.error),
            _ => text,
        };
        Err(AdapterError::Status {
            operation,
            status: status.as_u16(),
            message,
        })
    }

    async fn room_id(operation: &'static str, response: Response) -> AdapterResult<String> {
        let body: RoomIdResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse {
                operation,
                message: e.to_string(),
            })?;
        Ok(body.room_id)
    }

    /// Look up `#{alias}:{server_name}`. `None` when the alias is unknown.
    pub async fn resolve_alias(&self, alias: &str) -> AdapterResult<Option<String>> {
        let full_alias = format!("#{}:{}", alias, self.server_name);
        let response = self
            .request(Method::GET, &["directory", "room", &full_alias])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check("resolve room alias", response).await?;
        Self::room_id("resolve room alias", response).await.map(Some)
    }

    /// Create a public, non-federated room published under `alias`.
    pub async fn create_room(&self, alias: &str) -> AdapterResult<String> {
        let response = self
            .request(Method::POST, &["createRoom"])
            .json(&json!({
                "room_alias_name": alias,
                "name": BRIDGE_ROOM_NAME,
                "preset": "public_chat",
                "creation_content": { "m.federate": false },
            }))
            .send()
            .await?;
        let response = Self::check("create room", response).await?;
        let room_id = Self::room_id("create room", response).await?;
        info!(room = %room_id, alias, "Created bridge room");

        // Lets shadow users post without further promotion.
        let levels: AdapterResult<()> = async {
            let response = self
                .request(
                    Method::PUT,
                    &["rooms", &room_id, "state", "m.room.power_levels"],
                )
                .json(&json!({ "users_default": DEFAULT_USER_POWER }))
                .send()
                .await?;
            Self::check("set power levels", response).await.map(drop)
        }
        .await;
        if let Err(e) = levels {
            warn!(room = %room_id, "Could not set default power level: {}", e);
        }

        Ok(room_id)
    }

    /// Whether the shadow user for `name` has a profile on the homeserver.
    pub async fn user_exists(&self, name: &str) -> AdapterResult<bool> {
        let user_id = self.user_id(name);
        let response = self
            .request(Method::GET, &["profile", &user_id])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check("fetch profile", response).await?;
        Ok(true)
    }

    /// Register the shadow user for `name`. An already taken name counts as
    /// success.
    pub async fn register(&self, name: &str) -> AdapterResult<()> {
        let response = self
            .request(Method::POST, &["register"])
            .json(&json!({
                "type": "m.login.application_service",
                "username": self.localpart(name),
            }))
            .send()
            .await?;
        match Self::check("register", response).await {
            Ok(_) => Ok(()),
            Err(AdapterError::Status { message, .. }) if message.starts_with("M_USER_IN_USE") => {
                debug!(user = name, "Shadow user already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn join(&self, user_id: &str, room_id: &str) -> AdapterResult<()> {
        let response = self
            .request(Method::POST, &["join", room_id])
            .query(&[("user_id", user_id)])
            .json(&json!({ "reason": "connected" }))
            .send()
            .await?;
        Self::check("join room", response).await.map(drop)
    }

    pub async fn leave(&self, user_id: &str, room_id: &str) -> AdapterResult<()> {
        let response = self
            .request(Method::POST, &["rooms", room_id, "leave"])
            .query(&[("user_id", user_id)])
            .json(&json!({ "reason": "disconnected" }))
            .send()
            .await?;
        Self::check("leave room", response).await.map(drop)
    }

    /// Post an `m.text` message into `room_id` as `user_id`.
    pub async fn send_text(&self, user_id: &str, room_id: &str, body: &str) -> AdapterResult<()> {
        let txn = transaction_id();
        let content: Value = json!({ "msgtype": "m.text", "body": body });
        let response = self
            .request(
                Method::PUT,
                &["rooms", room_id, "send", "m.room.message", &txn],
            )
            .query(&[("user_id", user_id)])
            .json(&content)
            .send()
            .await?;
        Self::check("send message", response).await.map(drop)
    }
}

/// Fresh client transaction id.
fn transaction_id() -> String {
    format!("mandm-{:016x}", rand::thread_rng().gen::<u64>())
}
