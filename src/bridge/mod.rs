//! Bridging engine between network A (Matrix) and network B (Murmur).
//!
//! ## Module Structure
//!
//! - `channels`: Per-sender event dispatch (`Dispatcher`)
//! - `filter`: Named handler pipelines (`Pipeline`, `MessageHandler`)
//! - `media`: Image fetch, downscale and inline encoding (`MediaRelay`)
//! - `orchestrator`: Event routing and startup (`Bridge`, `start`)
//! - `state`: Shadow identity and presence table (`IdentityManager`)

pub mod channels;
pub mod filter;
pub mod media;
pub mod orchestrator;
pub mod state;

pub use channels::{Dispatcher, EventProcessor};
pub use filter::{Direction, HandlerContext, MessageHandler, Pipeline, Verdict};
pub use media::{HttpFetcher, ImagePayload, MediaFetcher, MediaRelay, NoResizeSwitch};
pub use orchestrator::{start, Bridge, BridgeSettings, RunningBridge};
pub use state::{IdentityManager, Membership, ShadowIdentity};
