use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::User;

/// JWT claims carried by session tokens minted by the main site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Login handle, for log lines and display fallbacks
    pub handle: String,
    /// Expiry (seconds since epoch)
    pub exp: usize,
    /// Issued-at (seconds since epoch)
    pub iat: usize,
}

/// Identity proven by a valid token
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub handle: String,
}

/// Signs and verifies session tokens. The secret is shared with the main
/// site so tokens minted at login work here unchanged.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenVerifier {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: ttl_secs as i64,
        }
    }

    /// Mint a token for a user. The site normally does this at login; the
    /// chat service only needs it for tooling and tests.
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            handle: user.handle.clone(),
            exp: (now + Duration::seconds(self.ttl_secs)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Verify a token's signature and expiry and extract the identity
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| {
            AppError::Authentication("Token subject is not a valid user id".to_string())
        })?;

        Ok(AuthenticatedUser {
            user_id,
            handle: data.claims.handle,
        })
    }
}
