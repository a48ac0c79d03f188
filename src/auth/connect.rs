use std::collections::HashMap;

use axum::http::HeaderMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::token::{AuthenticatedUser, TokenVerifier};
use crate::auth::Identity;
use crate::error::{AppError, Result};
use crate::metrics;

/// Decides what identity a new connection gets on each websocket surface.
///
/// The community surface is open: a valid token upgrades the connection to a
/// verified identity, anything else joins as a guest. The private surface
/// rejects the handshake outright unless the token checks out.
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    verifier: TokenVerifier,
}

impl ConnectionAuthenticator {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Community surface: never rejects. A valid token yields a verified
    /// identity; a bad or missing token falls back to the legacy handshake
    /// field, where clients simply declare a user id; with neither, the
    /// connection joins as a guest so stale sessions can still read the room.
    pub fn authenticate_community(
        &self,
        token: Option<&str>,
        declared_user: Option<Uuid>,
    ) -> Identity {
        if let Some(token) = token {
            match self.verifier.verify(token) {
                Ok(authed) => {
                    debug!(user_id = %authed.user_id, "Community connection verified");
                    return Identity::Verified {
                        user_id: authed.user_id,
                        handle: authed.handle,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Invalid token on community surface, continuing without it");
                    metrics::AUTH_FAILURES
                        .with_label_values(&["community"])
                        .inc();
                }
            }
        }

        match declared_user {
            Some(user_id) if !user_id.is_nil() => Identity::Declared { user_id },
            Some(_) => {
                warn!("Ignoring nil user id in community handshake");
                Identity::Guest
            }
            None => Identity::Guest,
        }
    }

    /// Private surface: the token is mandatory and must verify. Failures
    /// surface as 401 before the websocket upgrade completes.
    pub fn authenticate_private(&self, token: Option<&str>) -> Result<AuthenticatedUser> {
        let token = token.ok_or_else(|| {
            metrics::AUTH_FAILURES.with_label_values(&["private"]).inc();
            AppError::Authentication("Missing authentication token".to_string())
        })?;

        self.verifier.verify(token).map_err(|e| {
            metrics::AUTH_FAILURES.with_label_values(&["private"]).inc();
            warn!(error = %e, "Rejected private surface connection");
            AppError::Authentication("Invalid authentication token".to_string())
        })
    }
}

/// Pull a session token out of an upgrade request. Non-browser clients send
/// `Authorization: Bearer <token>`; browsers cannot set headers on websocket
/// handshakes, so a `token` query parameter is accepted too.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    query.get("token").cloned()
}
