//! Matrix application service adapter (network A).
//!
//! Outbound operations go through the client-server API with the appservice
//! token; inbound events arrive as homeserver transactions on a small HTTP
//! server started by `initialize`.

pub mod appservice;
pub mod client;
pub mod registration;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::common::{AdapterError, AdapterResult};
use crate::config::MatrixConfig;
use crate::network::{EventSink, RoomNetwork, RoomRef};

pub use appservice::{create_router, AppService};
pub use client::MatrixClient;
pub use registration::{registration, Registration};

/// Network A adapter backed by a Matrix homeserver.
pub struct MatrixAdapter {
    client: MatrixClient,
    appservice: Arc<AppService>,
    listen: SocketAddr,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl MatrixAdapter {
    pub fn from_config(config: &MatrixConfig) -> AdapterResult<Self> {
        let listen = config.listen.parse::<SocketAddr>().map_err(|e| {
            AdapterError::Other(format!("invalid listen address '{}': {}", config.listen, e))
        })?;
        let client = MatrixClient::new(
            &config.address,
            &config.server_name,
            &config.user_prefix,
            &config.as_token,
        )?;
        let appservice = AppService::new(&config.hs_token, &config.user_prefix, &config.address);
        Ok(Self {
            client,
            appservice: Arc::new(appservice),
            listen,
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        })
    }
}

#[async_trait]
impl RoomNetwork for MatrixAdapter {
    async fn initialize(&self) -> AdapterResult<()> {
        let listener = TcpListener::bind(self.listen).await.map_err(|e| {
            AdapterError::Other(format!("cannot listen on {}: {}", self.listen, e))
        })?;

        let state = Arc::clone(&self.appservice);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = appservice::serve(listener, state, shutdown).await {
                error!("Appservice server failed: {:#}", e);
            }
        });
        *self.server.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    async fn cleanup(&self) {
        self.shutdown.cancel();
        let handle = self.server.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Appservice task failed: {}", e);
            }
        }
    }

    async fn ensure_bridge_room(&self, alias: &str) -> AdapterResult<RoomRef> {
        let room_id = match self.client.resolve_alias(alias).await? {
            Some(room_id) => room_id,
            None => {
                info!(alias, "Bridge room alias unknown, creating the room");
                self.client.create_room(alias).await?
            }
        };
        info!(room = %room_id, "Bridge room resolved");
        self.appservice.set_room(&room_id);
        Ok(RoomRef(room_id))
    }

    fn register(&self, sink: EventSink) {
        self.appservice.set_sink(sink);
    }

    async fn send_text(&self, identity: &str, room: &RoomRef, body: &str) -> AdapterResult<()> {
        let user_id = self.client.user_id(identity);
        self.client
            .send_text(&user_id, &room.0, body)
            .await
    }

    async fn ensure_identity(&self, name: &str) -> AdapterResult<()> {
        if self.client.user_exists(name).await? {
            return Ok(());
        }
        info!(user = %self.client.user_id(name), "Registering shadow user");
        self.client.register(name).await
    }

    async fn join_room(&self, identity: &str, room: &RoomRef) -> AdapterResult<()> {
        let user_id = self.client.user_id(identity);
        self.client.join(&user_id, &room.0).await
    }

    async fn leave_room(&self, identity: &str, room: &RoomRef) -> AdapterResult<()> {
        let user_id = self.client.user_id(identity);
        self.client.leave(&user_id, &room.0).await
    }
}
