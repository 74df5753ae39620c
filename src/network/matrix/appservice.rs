//! Application service endpoints the homeserver pushes events to.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::{ImageRef, InboundEvent, InboundMessage, Side};
use crate::network::EventSink;

/// Transaction ids remembered for replay detection.
const REMEMBERED_TRANSACTIONS: usize = 256;

/// Body of `PUT /transactions/{txn}`.
#[derive(Debug, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RoomEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    room_id: String,
    #[serde(alias = "user_id")]
    sender: String,
    #[serde(default)]
    content: MessageContent,
}

#[derive(Debug, Default, Deserialize)]
struct MessageContent {
    msgtype: Option<String>,
    body: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    access_token: Option<String>,
}

/// Bounded set of recently handled transaction ids.
#[derive(Debug, Default)]
struct TransactionLog {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl TransactionLog {
    /// Record `txn`. Returns false if it was already recorded.
    fn insert(&mut self, txn: &str) -> bool {
        if self.seen.contains(txn) {
            return false;
        }
        if self.order.len() == REMEMBERED_TRANSACTIONS {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(txn.to_string());
        self.seen.insert(txn.to_string());
        true
    }
}

/// Shared state of the appservice endpoints.
pub struct AppService {
    hs_token: String,
    user_prefix: String,
    /// Homeserver base address used for media downloads.
    address: String,
    room_id: OnceLock<String>,
    sink: OnceLock<EventSink>,
    transactions: Mutex<TransactionLog>,
}

impl AppService {
    pub fn new(hs_token: &str, user_prefix: &str, address: &str) -> Self {
        Self {
            hs_token: hs_token.to_string(),
            user_prefix: user_prefix.to_string(),
            address: address.trim_end_matches('/').to_string(),
            room_id: OnceLock::new(),
            sink: OnceLock::new(),
            transactions: Mutex::new(TransactionLog::default()),
        }
    }

    pub fn set_room(&self, room_id: &str) {
        if self.room_id.set(room_id.to_string()).is_err() {
            warn!("Bridge room already set, keeping the first one");
        }
    }

    pub fn set_sink(&self, sink: EventSink) {
        if self.sink.set(sink).is_err() {
            warn!("Event sink already registered, keeping the first one");
        }
    }

    fn authorized(&self, headers: &HeaderMap, query: &AuthQuery) -> bool {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));
        let token = bearer.or(query.access_token.as_deref());
        token.is_some_and(|t| t == self.hs_token)
    }

    /// Map a homeserver event to an inbound event, or `None` if the bridge
    /// does not care about it.
    pub fn translate(&self, event: Value) -> Option<InboundEvent> {
        let event: RoomEvent = match serde_json::from_value(event) {
            Ok(event) => event,
            Err(e) => {
                debug!("Skipping unparseable event: {}", e);
                return None;
            }
        };
        if event.kind != "m.room.message" {
            return None;
        }
        if let Some(room) = self.room_id.get() {
            if !event.room_id.is_empty() && &event.room_id != room {
                return None;
            }
        }

        let sender = localpart(&event.sender);
        if sender.starts_with(&self.user_prefix) {
            // Our own shadow users.
            return None;
        }

        let content = event.content;
        let body = content.body.unwrap_or_default();
        match content.msgtype.as_deref() {
            Some("m.text") => Some(InboundEvent::Text(InboundMessage::text(
                Side::A,
                sender,
                event.room_id,
                body,
            ))),
            Some("m.image") => {
                let url = content.url.unwrap_or_default();
                Some(InboundEvent::Image(ImageRef::new(
                    Side::A,
                    sender,
                    self.download_url(&url),
                    body,
                )))
            }
            _ => None,
        }
    }

    /// Rewrite `mxc://{origin}/{media}` to the homeserver download URL.
    /// Other URLs are passed through.
    fn download_url(&self, url: &str) -> String {
        match url.strip_prefix("mxc://").and_then(|rest| rest.split_once('/')) {
            Some((origin, media)) => format!(
                "{}/_matrix/media/v3/download/{}/{}",
                self.address, origin, media
            ),
            None => url.to_string(),
        }
    }
}

/// `@local:server` to `local`.
fn localpart(user_id: &str) -> &str {
    let user_id = user_id.strip_prefix('@').unwrap_or(user_id);
    user_id.split(':').next().unwrap_or(user_id)
}

fn matrix_error(status: StatusCode, errcode: &str, error: &str) -> Response {
    (status, Json(json!({ "errcode": errcode, "error": error }))).into_response()
}

/// Routes for both the legacy and the versioned appservice paths.
pub fn create_router(state: Arc<AppService>) -> Router {
    Router::new()
        .route("/transactions/:txn", put(put_transaction))
        .route("/_matrix/app/v1/transactions/:txn", put(put_transaction))
        .route("/rooms/:alias", get(query_alias))
        .route("/_matrix/app/v1/rooms/:alias", get(query_alias))
        .with_state(state)
}

async fn put_transaction(
    State(state): State<Arc<AppService>>,
    Path(txn): Path<String>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
    Json(transaction): Json<Transaction>,
) -> Response {
    if !state.authorized(&headers, &auth) {
        warn!(txn = %txn, "Rejected transaction with bad homeserver token");
        return matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "Bad token");
    }
    let Some(sink) = state.sink.get() else {
        return matrix_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "M_UNKNOWN",
            "Bridge not ready",
        );
    };

    let fresh = state
        .transactions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(&txn);
    if !fresh {
        debug!(txn = %txn, "Replayed transaction acknowledged");
        return Json(json!({})).into_response();
    }

    debug!(txn = %txn, events = transaction.events.len(), "Received transaction");
    for event in transaction.events {
        if let Some(event) = state.translate(event) {
            if sink.send(event).is_err() {
                warn!(txn = %txn, "Event sink closed, dropping event");
            }
        }
    }
    Json(json!({})).into_response()
}

async fn query_alias(Path(alias): Path<String>) -> Json<Value> {
    debug!(alias = %alias, "Room alias query");
    Json(json!({}))
}

/// Serve the appservice API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("Appservice listening on {}", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Appservice stopped");
    Ok(())
}
