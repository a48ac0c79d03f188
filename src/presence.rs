use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Tracks which users currently have at least one live connection.
///
/// A user may be connected from several tabs or devices at once, so presence
/// is a set of connection ids per user. The tracker itself never broadcasts;
/// callers use the returned transition flags to decide whether an
/// online/offline event should be announced.
pub struct PresenceTracker {
    sessions: DashMap<Uuid, HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a connection for a user. Returns true only when this is the
    /// user's first live connection (offline -> online transition).
    pub fn connect(&self, user_id: Uuid, connection_id: &str) -> bool {
        if user_id.is_nil() {
            warn!(connection_id = %connection_id, "Ignoring presence connect with nil user id");
            return false;
        }

        let mut entry = self.sessions.entry(user_id).or_default();
        let came_online = entry.is_empty();
        entry.insert(connection_id.to_string());

        if came_online {
            debug!(user_id = %user_id, connection_id = %connection_id, "User came online");
        } else {
            debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                connections = entry.len(),
                "Additional connection for online user"
            );
        }

        came_online
    }

    /// Remove a connection for a user. Returns true only when this was the
    /// user's last connection (online -> offline transition). Unknown users
    /// or connection ids are a silent no-op.
    pub fn disconnect(&self, user_id: Uuid, connection_id: &str) -> bool {
        if user_id.is_nil() {
            warn!(connection_id = %connection_id, "Ignoring presence disconnect with nil user id");
            return false;
        }

        let now_offline = match self.sessions.get_mut(&user_id) {
            Some(mut connections) => {
                let removed = connections.remove(connection_id);
                removed && connections.is_empty()
            }
            None => false,
        };

        if now_offline {
            // Re-check emptiness under the shard lock; a concurrent connect
            // may have landed since the guard above was dropped.
            self.sessions.remove_if(&user_id, |_, set| set.is_empty());
            debug!(user_id = %user_id, connection_id = %connection_id, "User went offline");
        }

        now_offline
    }

    /// Whether the user has at least one live connection
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions
            .get(&user_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Resolve online status for a batch of users in one pass
    pub fn bulk_status(&self, user_ids: &[Uuid]) -> HashMap<Uuid, bool> {
        user_ids
            .iter()
            .map(|id| (*id, self.is_online(*id)))
            .collect()
    }

    /// Number of distinct users currently online
    pub fn online_count(&self) -> usize {
        self.sessions.iter().filter(|e| !e.value().is_empty()).count()
    }

    /// Ids of all users currently online
    pub fn online_user_ids(&self) -> Vec<Uuid> {
        self.sessions
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
