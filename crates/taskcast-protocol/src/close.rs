//! Close reasons for rejected handshakes.
//!
//! Every rejection closes the socket with WebSocket status 1008 (policy
//! violation) and a short reason string the client can surface.

use std::fmt;

/// WebSocket close code sent with every handshake rejection.
pub const POLICY_VIOLATION: u16 = 1008;

/// Why a handshake was rejected before the channel was joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// No token was supplied with the connection request.
    MissingToken,
    /// The token failed signature or claim validation, including expiry.
    InvalidToken,
    /// The token was valid but its subject resolved to no user.
    UserNotFound,
    /// The user may not join the requested task channel.
    AccessDenied,
}

impl CloseReason {
    /// The close code paired with this reason.
    #[must_use]
    pub const fn code(&self) -> u16 {
        POLICY_VIOLATION
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::MissingToken => "missing-token",
            CloseReason::InvalidToken => "invalid-token",
            CloseReason::UserNotFound => "user-not-found",
            CloseReason::AccessDenied => "access-denied",
        }
    }

    /// The reason string carried in the close frame.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            CloseReason::MissingToken => "No token provided",
            CloseReason::InvalidToken => "Invalid token",
            CloseReason::UserNotFound => "User not found",
            CloseReason::AccessDenied => "Access denied",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
