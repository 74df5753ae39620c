//! Bridge orchestrator that ties network A and network B together.
//!
//! The bridge is the only component that calls adapter operations. It owns
//! the handler pipelines, the shadow identity table and the media relay, and
//! turns every inbound event into at most one delivery on the other side.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::error::AdapterError;
use crate::common::{
    ConnectionEvent, ImageRef, InboundEvent, InboundMessage, RetryPolicy, Side, StartupError,
};
use crate::config::Config;
use crate::network::{RoomNetwork, RoomRef, SessionNetwork};

use super::channels::{Dispatcher, EventProcessor};
use super::filter::{Direction, HandlerContext, Pipeline, Verdict};
use super::media::MediaRelay;
use super::state::IdentityManager;

/// Longest body logged in full.
const MAX_LOGGED_BODY: usize = 500;

/// Startup parameters of the bridge, independent of any adapter.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Alias of the bridged room on network A.
    pub room_alias: String,
    /// Tag appended to names of senders from network A.
    pub a_tag: String,
    /// Tag appended to names of senders from network B.
    pub b_tag: String,
    /// Handler names for A to B, in execution order.
    pub a_to_b: Vec<String>,
    /// Handler names for B to A, in execution order.
    pub b_to_a: Vec<String>,
    pub ignored_senders: Vec<String>,
    pub retry: RetryPolicy,
    pub max_concurrent_events: usize,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            room_alias: config.matrix.room.clone(),
            a_tag: config.matrix.tag.clone(),
            b_tag: config.murmur.tag.clone(),
            a_to_b: config.pipeline.a_to_b.clone(),
            b_to_a: config.pipeline.b_to_a.clone(),
            ignored_senders: config.pipeline.ignored_senders.clone(),
            retry: config.bridge.retry.policy(),
            max_concurrent_events: config.bridge.max_concurrent_events,
        }
    }
}

/// The main bridge that routes events between the two networks.
pub struct Bridge {
    room_network: Arc<dyn RoomNetwork>,
    session_network: Arc<dyn SessionNetwork>,
    room: RoomRef,
    a_to_b: Pipeline,
    b_to_a: Pipeline,
    identities: IdentityManager,
    media: MediaRelay,
    retry: RetryPolicy,
    a_tag: String,
    b_tag: String,
}

impl Bridge {
    /// Shadow identity table.
    pub fn identities(&self) -> &IdentityManager {
        &self.identities
    }

    fn pipeline(&self, source: Side) -> &Pipeline {
        match Direction::from_source(source) {
            Direction::AToB => &self.a_to_b,
            Direction::BToA => &self.b_to_a,
        }
    }

    fn tag(&self, source: Side) -> &str {
        match source {
            Side::A => &self.a_tag,
            Side::B => &self.b_tag,
        }
    }

    /// Render a relayed line: `{sender} [{tag}]: {body}`.
    fn render(&self, source: Side, sender: &str, body: &str) -> String {
        format!("{} [{}]: {}", sender, self.tag(source), body)
    }

    async fn handle_text(&self, msg: InboundMessage) {
        let body = match self.pipeline(msg.source).run(&msg.sender, &msg.body) {
            Verdict::Deliver(body) => body,
            Verdict::Drop => return,
        };
        let line = self.render(msg.source, &msg.sender, &body);
        self.deliver(msg.source, &msg.sender, &line).await;
    }

    async fn handle_image(&self, image: ImageRef) {
        let payload = match self.media.relay(&image).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    source = %image.source,
                    sender = %image.sender,
                    "Dropping image: {}",
                    e
                );
                return;
            }
        };
        let line = self.render(image.source, &image.sender, &payload.to_html());
        self.deliver(image.source, &image.sender, &line).await;
    }

    async fn handle_connection(&self, event: ConnectionEvent) {
        if event.source == Side::A {
            warn!(
                user = %event.identity,
                "Ignoring connection event from room network"
            );
            return;
        }
        debug!(user = %event.identity, transition = %event.transition, "Presence change");
        self.identities
            .on_connection_transition(&event.identity, event.transition)
            .await;
    }

    /// Send `line` to the network opposite to `source`.
    async fn deliver(&self, source: Side, sender: &str, line: &str) {
        let result: Result<(), AdapterError> = match source {
            Side::A => {
                self.retry
                    .run("send to channel", || self.session_network.send_to_channel(line))
                    .await
            }
            Side::B => {
                if !self.identities.ensure_joined(sender).await {
                    warn!(sender, "Shadow identity unavailable, dropping message");
                    return;
                }
                self.retry
                    .run("send to room", || {
                        self.room_network.send_text(sender, &self.room, line)
                    })
                    .await
            }
        };

        match result {
            Ok(()) => info!("{} -> {}: {}", source, source.opposite(), preview(line)),
            Err(e) => warn!(
                sender,
                "Failed to deliver {} -> {}: {}",
                source,
                source.opposite(),
                e
            ),
        }
    }
}

#[async_trait]
impl EventProcessor for Bridge {
    async fn process(&self, event: InboundEvent) {
        if let Err(e) = event.validate() {
            warn!(source = %event.source(), "Dropping malformed event: {}", e);
            return;
        }
        match event {
            InboundEvent::Text(msg) => self.handle_text(msg).await,
            InboundEvent::Image(image) => self.handle_image(image).await,
            InboundEvent::Connection(event) => self.handle_connection(event).await,
        }
    }
}

/// Handle to a started bridge.
pub struct RunningBridge {
    bridge: Arc<Bridge>,
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for RunningBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningBridge").finish_non_exhaustive()
    }
}

impl RunningBridge {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Token that stops the dispatcher when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting events, let in-flight ones finish and release both
    /// adapters.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.dispatcher.await {
            error!("Dispatcher task failed: {}", e);
        }
        self.bridge.room_network.cleanup().await;
        self.bridge.session_network.cleanup().await;
        info!("Bridge stopped");
    }
}

fn critical(step: &'static str, source: AdapterError) -> StartupError {
    error!("CRITICAL: {} failed, bridge will not start: {}", step, source);
    StartupError::step(step, source)
}

/// Bring the bridge up.
///
/// Order: initialize A, initialize B, resolve the bridge room on A, select
/// the session on B, register event sinks. Any failure aborts the start and
/// releases whatever was already initialized.
pub async fn start(
    settings: BridgeSettings,
    room_network: Arc<dyn RoomNetwork>,
    session_network: Arc<dyn SessionNetwork>,
    media: MediaRelay,
) -> Result<RunningBridge, StartupError> {
    let ctx = HandlerContext {
        ignored_senders: settings.ignored_senders.clone(),
        no_resize: media.no_resize_switch(),
    };
    let a_to_b = Pipeline::from_names(Direction::AToB, &settings.a_to_b, &ctx)?;
    let b_to_a = Pipeline::from_names(Direction::BToA, &settings.b_to_a, &ctx)?;
    info!(
        a_to_b = ?a_to_b.names(),
        b_to_a = ?b_to_a.names(),
        "Handler pipelines ready"
    );

    room_network
        .initialize()
        .await
        .map_err(|e| critical("initialize room network", e))?;

    if let Err(e) = session_network.initialize().await {
        room_network.cleanup().await;
        return Err(critical("initialize session network", e));
    }

    let room = match room_network.ensure_bridge_room(&settings.room_alias).await {
        Ok(room) => room,
        Err(e) => {
            room_network.cleanup().await;
            session_network.cleanup().await;
            return Err(critical("resolve bridge room", e));
        }
    };

    let session = match session_network.select_session().await {
        Ok(session) => session,
        Err(e) => {
            room_network.cleanup().await;
            session_network.cleanup().await;
            return Err(critical("select session", e));
        }
    };
    info!(room = %room, session = %session, "Bridge endpoints resolved");

    let identities = IdentityManager::new(
        Arc::clone(&room_network),
        room.clone(),
        settings.retry.clone(),
    );
    let bridge = Arc::new(Bridge {
        room_network: Arc::clone(&room_network),
        session_network: Arc::clone(&session_network),
        room,
        a_to_b,
        b_to_a,
        identities,
        media,
        retry: settings.retry,
        a_tag: settings.a_tag,
        b_tag: settings.b_tag,
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    room_network.register(events_tx.clone());
    session_network.register(events_tx);

    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(bridge.clone(), settings.max_concurrent_events);
    let dispatcher = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));
    info!("Bridge running");

    Ok(RunningBridge {
        bridge,
        shutdown,
        dispatcher,
    })
}

/// Shorten `body` for logging, cutting on a char boundary.
fn preview(body: &str) -> std::borrow::Cow<'_, str> {
    if body.len() <= MAX_LOGGED_BODY {
        return body.into();
    }
    let mut end = MAX_LOGGED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &body[..end], body.len()).into()
}
