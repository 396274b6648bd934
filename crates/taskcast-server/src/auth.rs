//! Channel-token validation for the WebSocket handshake.
//!
//! Tokens are HS256 JWTs carried in the `?token=` query parameter. The
//! backend that owns user accounts normally issues them; [`issue_token`]
//! exists for that backend and for the tests.

use crate::directory::{Directory, UserIdentity};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use taskcast_protocol::CloseReason;
use thiserror::Error;

/// Claims carried by a channel token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token subject, resolved to a user by the directory.
    pub sub: String,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Why the authentication step of a handshake failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was supplied with the connection request.
    #[error("no token provided")]
    MissingToken,
    /// Signature or claim validation failed, including expiry.
    #[error("invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    /// The token was valid but its subject is unknown.
    #[error("user not found")]
    UserNotFound,
}

impl AuthError {
    /// The close reason reported to the client for this failure.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        match self {
            AuthError::MissingToken => CloseReason::MissingToken,
            AuthError::InvalidToken(_) => CloseReason::InvalidToken,
            AuthError::UserNotFound => CloseReason::UserNotFound,
        }
    }
}

/// Issue a channel token for `subject`, valid for `ttl_secs`.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn issue_token(
    secret: &[u8],
    subject: &str,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: subject.to_string(),
        iat: now,
        exp: now + ttl_secs as i64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate a channel token and return its claims.
///
/// # Errors
///
/// Returns [`AuthError::InvalidToken`] for any signature, shape, or expiry
/// problem.
pub fn validate_token(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(AuthError::InvalidToken)
}

/// Run the authentication step of a handshake: token, claims, then user.
///
/// An empty token counts as missing, matching clients that send `?token=`.
///
/// # Errors
///
/// Returns the [`AuthError`] whose close reason the endpoint should send.
pub async fn authenticate(
    directory: &dyn Directory,
    secret: &[u8],
    token: Option<&str>,
) -> Result<UserIdentity, AuthError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let claims = validate_token(secret, token)?;
    directory
        .resolve_user(&claims.sub)
        .await
        .ok_or(AuthError::UserNotFound)
}
