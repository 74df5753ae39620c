//! Shadow identity and room presence tracking.
//!
//! Every remote user seen on network B gets a shadow identity on network A.
//! The table below remembers which identities were registered and whether
//! they currently sit in the bridged room, so repeated events only trigger
//! the side effects that are still missing.
//!
//! Each entry has its own lock: events for the same remote name run their
//! provision/join/leave sequences one after another, while different users
//! proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::common::{RetryPolicy, Transition};
use crate::network::{RoomNetwork, RoomRef};

/// Whether a shadow identity is in the bridged room, as far as we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    /// Never joined or left by us, or the last leave failed.
    #[default]
    Unknown,
    Joined,
    Left,
}

/// Local view of one remote user's counterpart on network A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowIdentity {
    pub remote_name: String,
    pub provisioned: bool,
    pub membership: Membership,
}

impl ShadowIdentity {
    fn new(remote_name: &str) -> Self {
        Self {
            remote_name: remote_name.to_string(),
            provisioned: false,
            membership: Membership::Unknown,
        }
    }

    /// Only ever true for a provisioned identity.
    pub fn joined_bridge_room(&self) -> bool {
        self.membership == Membership::Joined
    }

    async fn provision(&mut self, network: &dyn RoomNetwork, retry: &RetryPolicy) -> bool {
        if self.provisioned {
            return true;
        }
        let name = self.remote_name.clone();
        match retry
            .run("register shadow identity", || network.ensure_identity(&name))
            .await
        {
            Ok(()) => {
                info!(user = %name, "Provisioned shadow identity");
                self.provisioned = true;
                true
            }
            Err(e) => {
                warn!(user = %name, "Failed to provision shadow identity: {}", e);
                false
            }
        }
    }

    async fn join(&mut self, network: &dyn RoomNetwork, room: &RoomRef, retry: &RetryPolicy) -> bool {
        if !self.provision(network, retry).await {
            return false;
        }
        if self.joined_bridge_room() {
            return true;
        }
        let name = self.remote_name.clone();
        match retry
            .run("join bridge room", || network.join_room(&name, room))
            .await
        {
            Ok(()) => {
                info!(user = %name, room = %room, "Shadow identity joined bridge room");
                self.membership = Membership::Joined;
                true
            }
            Err(e) => {
                warn!(user = %name, room = %room, "Failed to join bridge room: {}", e);
                false
            }
        }
    }

    async fn leave(&mut self, network: &dyn RoomNetwork, room: &RoomRef, retry: &RetryPolicy) -> bool {
        if self.membership == Membership::Left {
            return true;
        }
        let name = self.remote_name.clone();
        match retry
            .run("leave bridge room", || network.leave_room(&name, room))
            .await
        {
            Ok(()) => {
                info!(user = %name, room = %room, "Shadow identity left bridge room");
                self.membership = Membership::Left;
                true
            }
            Err(e) => {
                // The identity may still be in the room; the next leave retries.
                warn!(user = %name, room = %room, "Failed to leave bridge room: {}", e);
                self.membership = Membership::Unknown;
                false
            }
        }
    }
}

type Entry = Arc<Mutex<ShadowIdentity>>;

/// Drives idempotent create/join/leave operations against network A.
pub struct IdentityManager {
    network: Arc<dyn RoomNetwork>,
    room: RoomRef,
    retry: RetryPolicy,
    identities: Mutex<HashMap<String, Entry>>,
}

impl IdentityManager {
    pub fn new(network: Arc<dyn RoomNetwork>, room: RoomRef, retry: RetryPolicy) -> Self {
        Self {
            network,
            room,
            retry,
            identities: Mutex::new(HashMap::new()),
        }
    }

    /// Entry for `remote_name`, created on first sight.
    async fn entry(&self, remote_name: &str) -> Entry {
        let mut identities = self.identities.lock().await;
        identities
            .entry(remote_name.to_string())
            .or_insert_with(|| {
                debug!(user = remote_name, "First sight of remote user");
                Arc::new(Mutex::new(ShadowIdentity::new(remote_name)))
            })
            .clone()
    }

    /// Register the shadow identity unless already done.
    pub async fn ensure_provisioned(&self, remote_name: &str) -> bool {
        let entry = self.entry(remote_name).await;
        let mut identity = entry.lock().await;
        identity.provision(self.network.as_ref(), &self.retry).await
    }

    /// Provision if needed, then join the bridge room unless already joined.
    pub async fn ensure_joined(&self, remote_name: &str) -> bool {
        let entry = self.entry(remote_name).await;
        let mut identity = entry.lock().await;
        identity
            .join(self.network.as_ref(), &self.room, &self.retry)
            .await
    }

    /// Leave the bridge room. Failures are logged and reported, never raised.
    pub async fn leave(&self, remote_name: &str) -> bool {
        let entry = self.entry(remote_name).await;
        let mut identity = entry.lock().await;
        identity
            .leave(self.network.as_ref(), &self.room, &self.retry)
            .await
    }

    /// Apply a presence change from network B.
    ///
    /// Unseen users are provisioned first whatever the transition is.
    pub async fn on_connection_transition(&self, remote_name: &str, transition: Transition) {
        let entry = self.entry(remote_name).await;
        let mut identity = entry.lock().await;
        let network = self.network.as_ref();

        if !identity.provision(network, &self.retry).await {
            return;
        }
        match transition {
            Transition::Connected => {
                identity.join(network, &self.room, &self.retry).await;
            }
            Transition::Disconnected => {
                identity.leave(network, &self.room, &self.retry).await;
            }
        }
    }

    /// Copy of one user's current state, if the user was ever seen.
    pub async fn snapshot(&self, remote_name: &str) -> Option<ShadowIdentity> {
        let entry = self.identities.lock().await.get(remote_name).cloned()?;
        let identity = entry.lock().await;
        Some(identity.clone())
    }

    /// Number of users seen so far.
    pub async fn len(&self) -> usize {
        self.identities.lock().await.len()
    }
}
