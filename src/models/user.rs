use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A community member, mirrored from the main site's account system.
///
/// This service never stores credentials; the record carries only what chat
/// needs plus the email used for operational lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Unique identifier (shared with the main site)
    pub id: Uuid,

    /// Unique login handle
    pub handle: String,

    /// Display name shown next to messages
    pub display_name: String,

    /// Account email (never exposed over the chat surface)
    pub email: String,

    /// When the account was created
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user record
    pub fn new(handle: String, display_name: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            display_name,
            email,
            created_at: Utc::now(),
        }
    }

    /// The public projection attached to broadcast messages.
    ///
    /// Only id, handle, and display name ever leave the server.
    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            handle: self.handle.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Public profile fields safe to broadcast to any connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicProfile {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_profile_projection() {
        let user = User::new(
            "reefdad".to_string(),
            "Reef Dad".to_string(),
            "reefdad@example.com".to_string(),
        );

        let profile = user.public_profile();
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.handle, "reefdad");
        assert_eq!(profile.display_name, "Reef Dad");

        // The serialized projection must not leak the email.
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("example.com"));
        assert!(!json.contains("email"));
    }
}
