//! Network adapter contracts.
//!
//! The bridge holds one adapter per side behind these traits. Adapters push
//! inbound events into the [`EventSink`] the bridge registers with them and
//! expose the outbound operations the bridge drives. They keep no
//! cross-network state.

pub mod matrix;

#[cfg(test)]
pub mod fake;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::{AdapterResult, InboundEvent};

/// Channel inbound events are delivered through.
pub type EventSink = mpsc::UnboundedSender<InboundEvent>;

/// Resolved identifier of the bridged room on network A.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomRef(pub String);

impl fmt::Display for RoomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved identifier of the bridged server/session on network B.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionRef(pub String);

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room-oriented network (A): shadow users are provisioned here and join
/// the single bridged room.
#[async_trait]
pub trait RoomNetwork: Send + Sync {
    /// Acquire transport resources. Called once before anything else.
    async fn initialize(&self) -> AdapterResult<()>;

    /// Release transport resources. Called once at shutdown.
    async fn cleanup(&self);

    /// Resolve the bridge room alias, creating the room if it does not exist.
    async fn ensure_bridge_room(&self, alias: &str) -> AdapterResult<RoomRef>;

    /// Start delivering inbound events to `sink`.
    fn register(&self, sink: EventSink);

    /// Post `body` into `room` as the shadow identity of `identity`.
    async fn send_text(&self, identity: &str, room: &RoomRef, body: &str) -> AdapterResult<()>;

    /// Make sure a shadow identity exists for `name`. Safe to repeat.
    async fn ensure_identity(&self, name: &str) -> AdapterResult<()>;

    async fn join_room(&self, identity: &str, room: &RoomRef) -> AdapterResult<()>;

    async fn leave_room(&self, identity: &str, room: &RoomRef) -> AdapterResult<()>;
}

/// Session-oriented network (B): users connect and disconnect, messages are
/// broadcast into the bridged channel.
#[async_trait]
pub trait SessionNetwork: Send + Sync {
    async fn initialize(&self) -> AdapterResult<()>;

    async fn cleanup(&self);

    /// Select the server/session to bridge.
    async fn select_session(&self) -> AdapterResult<SessionRef>;

    fn register(&self, sink: EventSink);

    /// Broadcast `body` to the bridged channel.
    async fn send_to_channel(&self, body: &str) -> AdapterResult<()>;
}
