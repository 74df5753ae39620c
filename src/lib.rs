//! MandM bridge - Matrix and Mumble chat bridging engine
//!
//! Relays text, images and presence between a Matrix room and a Murmur
//! server. Each side is reached through an adapter trait; the bridge keeps a
//! shadow identity on Matrix for every Mumble user it has seen and runs
//! configurable handler pipelines on messages in both directions.

pub mod bridge;
pub mod common;
pub mod config;
pub mod network;

pub use bridge::{start, BridgeSettings, MediaRelay, RunningBridge};
pub use common::{InboundEvent, Side, StartupError};
pub use config::{load_and_validate, load_from_env, Config};
pub use network::matrix::{registration, MatrixAdapter};
pub use network::{EventSink, RoomNetwork, SessionNetwork};

/// Install the global `tracing` subscriber.
///
/// Honours `RUST_LOG`, with INFO as the default level.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
