pub mod connect;
pub mod token;

pub use connect::{extract_token, ConnectionAuthenticator};
pub use token::{AuthenticatedUser, Claims, TokenVerifier};

use uuid::Uuid;

/// What the server knows about who is behind a connection.
///
/// The community surface keeps a legacy trust ladder: connections start as
/// guests, may declare a user id over the wire (trusted as-is for
/// compatibility with the old widget), or prove themselves with a token.
/// The private surface only ever holds verified identities.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// Anonymous reader; cannot post
    Guest,
    /// Self-declared user id, accepted without proof
    Declared { user_id: Uuid },
    /// Token-verified user
    Verified { user_id: Uuid, handle: String },
}

impl Identity {
    /// The user id behind this connection, if any
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::Guest => None,
            Identity::Declared { user_id } => Some(*user_id),
            Identity::Verified { user_id, .. } => Some(*user_id),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Identity::Verified { .. })
    }

    /// Short label for log lines and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Identity::Guest => "guest",
            Identity::Declared { .. } => "declared",
            Identity::Verified { .. } => "verified",
        }
    }
}
