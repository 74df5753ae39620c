//! Canonical event types for bridge communication.
//!
//! Both adapters translate their native payloads into these shapes before
//! handing them to the bridge, so nothing downstream knows about Matrix
//! JSON or Murmur callbacks.

use std::fmt;

use reqwest::Url;

use crate::common::error::EventError;

/// One side of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Room-oriented network (Matrix).
    A,
    /// Session-oriented network (Murmur).
    B,
}

impl Side {
    /// The network on the other end of the bridge.
    pub fn opposite(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// A text message from either network.
///
/// Images travel as [`ImageRef`] instead, so the event variant carries the
/// message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub source: Side,
    /// Sender's name as known on the source network.
    pub sender: String,
    /// Room or channel the message was posted in.
    pub room: String,
    pub body: String,
}

impl InboundMessage {
    pub fn text(
        source: Side,
        sender: impl Into<String>,
        room: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sender: sender.into(),
            room: room.into(),
            body: body.into(),
        }
    }
}

/// Reference to an image posted on the source network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub source: Side,
    pub sender: String,
    /// Network-specific download URL.
    pub locator: String,
    /// File name shown by the source client, used for format detection.
    pub display_name: String,
}

impl ImageRef {
    pub fn new(
        source: Side,
        sender: impl Into<String>,
        locator: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sender: sender.into(),
            locator: locator.into(),
            display_name: display_name.into(),
        }
    }
}

/// Presence transition of a session user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Connected => f.write_str("connected"),
            Transition::Disconnected => f.write_str("disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub source: Side,
    pub identity: String,
    pub transition: Transition,
}

impl ConnectionEvent {
    pub fn new(source: Side, identity: impl Into<String>, transition: Transition) -> Self {
        Self {
            source,
            identity: identity.into(),
            transition,
        }
    }
}

/// Everything an adapter can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(InboundMessage),
    Image(ImageRef),
    Connection(ConnectionEvent),
}

impl InboundEvent {
    pub fn source(&self) -> Side {
        match self {
            InboundEvent::Text(msg) => msg.source,
            InboundEvent::Image(img) => img.source,
            InboundEvent::Connection(ev) => ev.source,
        }
    }

    /// The user this event is attributed to.
    pub fn sender(&self) -> &str {
        match self {
            InboundEvent::Text(msg) => &msg.sender,
            InboundEvent::Image(img) => &img.sender,
            InboundEvent::Connection(ev) => &ev.identity,
        }
    }

    /// Key used to serialize events of one user: events sharing a key are
    /// processed in arrival order.
    pub fn ordering_key(&self) -> (Side, String) {
        (self.source(), self.sender().to_string())
    }

    /// Shape check performed before any processing.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            InboundEvent::Text(msg) => {
                if msg.sender.trim().is_empty() {
                    return Err(EventError::EmptySender { kind: "text" });
                }
            }
            InboundEvent::Image(img) => {
                if img.sender.trim().is_empty() {
                    return Err(EventError::EmptySender { kind: "image" });
                }
                if Url::parse(&img.locator).is_err() {
                    return Err(EventError::BadLocator {
                        locator: img.locator.clone(),
                    });
                }
            }
            InboundEvent::Connection(ev) => {
                if ev.identity.trim().is_empty() {
                    return Err(EventError::EmptySender { kind: "connection" });
                }
            }
        }
        Ok(())
    }
}
