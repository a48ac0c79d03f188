//! Room membership registry
//!
//! Maps rooms to the connections subscribed to them and back. Membership is
//! purely transport-level: joining subscribes a connection to a broadcast
//! scope, nothing is persisted. The reverse index makes disconnect cleanup
//! one lookup instead of a scan over every room.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::messages::ServerMessage;
use crate::metrics;

pub struct RoomRegistry {
    /// Room id -> subscribed connection ids
    rooms: DashMap<String, HashSet<String>>,
    /// Connection id -> joined room ids
    memberships: DashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
        }
    }

    /// Subscribe a connection to a room. Returns false if it was already a
    /// member (join is idempotent).
    pub fn join(&self, room_id: &str, connection_id: &str) -> bool {
        let newly_joined = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());

        if newly_joined {
            self.memberships
                .entry(connection_id.to_string())
                .or_default()
                .insert(room_id.to_string());
            debug!(room_id = %room_id, connection_id = %connection_id, "Joined room");
        }

        newly_joined
    }

    /// Unsubscribe a connection from one room
    pub fn leave(&self, room_id: &str, connection_id: &str) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut members) => members.remove(connection_id),
            None => false,
        };

        if removed {
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
            if let Some(mut rooms) = self.memberships.get_mut(connection_id) {
                rooms.remove(room_id);
            }
            self.memberships
                .remove_if(connection_id, |_, rooms| rooms.is_empty());
        }

        removed
    }

    /// Unsubscribe a connection from every room it joined, returning the
    /// rooms it was in. Called on disconnect.
    pub fn leave_all(&self, connection_id: &str) -> Vec<String> {
        let rooms: Vec<String> = self
            .memberships
            .remove(connection_id)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            if let Some(mut members) = self.rooms.get_mut(room_id) {
                members.remove(connection_id);
            }
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
        }

        rooms
    }

    /// Connection ids currently subscribed to a room
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, room_id: &str, connection_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|members| members.contains(connection_id))
            .unwrap_or(false)
    }

    /// Rooms a connection has joined
    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        self.memberships
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Queue a message for every member of a room. Returns how many
    /// connections it reached.
    pub fn broadcast(
        &self,
        manager: &ConnectionManager,
        room_id: &str,
        message: ServerMessage,
    ) -> usize {
        self.broadcast_except(manager, room_id, None, message)
    }

    /// Broadcast to a room, optionally skipping one connection (the actor,
    /// for notices like joins and typing that echo poorly).
    pub fn broadcast_except(
        &self,
        manager: &ConnectionManager,
        room_id: &str,
        except_connection: Option<&str>,
        message: ServerMessage,
    ) -> usize {
        let members = self.members(room_id);
        let mut delivered = 0;

        for connection_id in &members {
            if Some(connection_id.as_str()) == except_connection {
                continue;
            }

            match manager.send_to(connection_id, message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // Dead queues are cleaned up by the disconnect path; a
                    // failed fan-out send is not an error for the sender.
                    warn!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        error = ?e,
                        "Failed to deliver broadcast"
                    );
                    metrics::record_send_error();
                }
            }
        }

        debug!(
            room_id = %room_id,
            delivered = delivered,
            members = members.len(),
            "Room broadcast completed"
        );

        manager.record_broadcast(delivered as u64);
        metrics::record_broadcast(delivered);

        delivered
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
