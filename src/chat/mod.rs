//! Realtime chat module
//!
//! Presence-aware chat over websockets for the community. Two surfaces share
//! one protocol and one set of machinery:
//!
//! - the community surface admits guests read-only and trusts legacy
//!   identity declarations,
//! - the private surface requires a verified token before the upgrade and
//!   receives presence broadcasts.
//!
//! The moving parts:
//!
//! - **Messages**: the JSON wire protocol and the ack contract
//! - **Session**: per-connection identity, surface, and joined rooms
//! - **Connection**: connection registry and outbound queues
//! - **Rooms**: room membership and fan-out
//! - **Handler**: the per-event state machine
//! - **Server**: websocket endpoints, socket lifecycle, heartbeats

pub mod connection;
pub mod handler;
pub mod messages;
pub mod rooms;
pub mod server;
pub mod session;

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

pub use connection::{Connection, ConnectionManager, ConnectionStats, MessageWriter};
pub use handler::handle_frame;
pub use messages::{AckData, ClientFrame, ClientMessage, MessageView, PageInfo, ServerMessage};
pub use rooms::RoomRegistry;
pub use server::{cleanup_task, community_chat_handler, disconnect_cleanup, private_chat_handler};
pub use session::{Session, Surface};

use crate::auth::ConnectionAuthenticator;
use crate::config::ChatConfig;
use crate::metrics;
use crate::models::PublicProfile;
use crate::presence::PresenceTracker;
use crate::state::{ChatStore, ProfileCache};

/// Shared state behind every chat connection
pub struct ChatState {
    /// Chat configuration
    pub config: ChatConfig,
    /// Connection registry
    pub connections: Arc<ConnectionManager>,
    /// Room membership and fan-out
    pub rooms: Arc<RoomRegistry>,
    /// Who is online
    pub presence: Arc<PresenceTracker>,
    /// Message, user, and conversation persistence
    pub store: Arc<dyn ChatStore>,
    /// Author profile read-through cache
    pub profiles: ProfileCache,
    /// Token verification for both surfaces
    pub authenticator: ConnectionAuthenticator,
}

impl ChatState {
    pub fn new(
        config: ChatConfig,
        store: Arc<dyn ChatStore>,
        authenticator: ConnectionAuthenticator,
    ) -> Self {
        Self {
            config,
            connections: Arc::new(ConnectionManager::new()),
            rooms: Arc::new(RoomRegistry::new()),
            presence: Arc::new(PresenceTracker::new()),
            store,
            profiles: ProfileCache::default(),
            authenticator,
        }
    }

    /// Resolve the public profile broadcast next to a user's messages. Users
    /// missing from the mirror get a placeholder rather than failing the
    /// whole send.
    pub async fn author_profile(&self, user_id: Uuid) -> PublicProfile {
        match self.profiles.get_or_load(self.store.as_ref(), user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => placeholder_profile(user_id),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Profile lookup failed, using placeholder");
                placeholder_profile(user_id)
            }
        }
    }

    /// Announce a presence transition. Only private-surface connections
    /// subscribe to per-user status; the community surface sees room
    /// membership notices instead.
    pub fn broadcast_status_change(&self, user_id: Uuid, is_online: bool) {
        let delivered = self.connections.send_to_surface(
            Surface::Private,
            ServerMessage::UserStatusChanged { user_id, is_online },
        );
        tracing::debug!(
            user_id = %user_id,
            is_online = is_online,
            delivered = delivered,
            "Presence transition broadcast"
        );
    }

    /// Keep the online-users gauge in step with the tracker
    pub fn sync_online_gauge(&self) {
        metrics::set_online_users(self.presence.online_count());
    }

    /// Active connection count across both surfaces
    pub fn active_connections(&self) -> usize {
        self.connections.connection_count()
    }
}

/// Profile used when a user id has no record in the mirror
fn placeholder_profile(user_id: Uuid) -> PublicProfile {
    PublicProfile {
        id: user_id,
        handle: "unknown".to_string(),
        display_name: "Unknown member".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::models::User;
    use crate::state::InMemoryStore;

    fn test_state() -> ChatState {
        ChatState::new(
            ChatConfig::default(),
            Arc::new(InMemoryStore::new()),
            ConnectionAuthenticator::new(TokenVerifier::new("test-secret", 3600)),
        )
    }

    #[tokio::test]
    async fn test_state_creation() {
        let state = test_state();
        assert_eq!(state.active_connections(), 0);
        assert_eq!(state.presence.online_count(), 0);
        assert_eq!(state.config.default_room, "main-chat");
    }

    #[tokio::test]
    async fn test_author_profile_falls_back_to_placeholder() {
        let state = test_state();
        let ghost = Uuid::new_v4();

        let profile = state.author_profile(ghost).await;
        assert_eq!(profile.id, ghost);
        assert_eq!(profile.handle, "unknown");
    }

    #[tokio::test]
    async fn test_author_profile_uses_the_mirror() {
        let state = test_state();
        let user = User::new(
            "nano_reefer".to_string(),
            "Nano Reefer".to_string(),
            "nano@example.com".to_string(),
        );
        state.store.upsert_user(&user).await.unwrap();

        let profile = state.author_profile(user.id).await;
        assert_eq!(profile.handle, "nano_reefer");
        assert_eq!(profile.display_name, "Nano Reefer");
    }
}
