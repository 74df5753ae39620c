//! Common utilities and types shared across the bridge.

pub mod error;
pub mod events;
pub mod retry;

pub use error::{AdapterError, AdapterResult, ConfigError, EventError, MediaError, StartupError};
pub use events::{ConnectionEvent, ImageRef, InboundEvent, InboundMessage, Side, Transition};
pub use retry::RetryPolicy;
