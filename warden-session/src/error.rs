//! Error types for session operations.
//!
//! Store adapters speak [`SessionError`]. The lifecycle manager classifies
//! those errors at its boundary and only ever hands [`SessionFailure`],
//! [`AuthFailure`] or [`GuardRejection`] to application code.

use thiserror::Error;

/// Result type for store adapter operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Store-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Relational driver error
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Connection pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The store is intentionally unreachable (tests, maintenance)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Generic error
    #[error("Session error: {0}")]
    Other(String),
}

/// Failures the lifecycle manager reports to application code.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SessionFailure {
    /// The ephemeral tier could not be reached. Fatal for the request.
    #[error("session store unavailable")]
    StoreUnavailable,

    /// Another request held the session lock past the configured timeout.
    #[error("session lock contended")]
    Contended,

    /// The session ended while the request was running.
    #[error("session expired")]
    Expired,

    /// A sensitive action needs a fresh authentication.
    #[error("re-authentication required")]
    ReauthenticationRequired,
}

impl SessionFailure {
    /// Whether the request must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionFailure::StoreUnavailable | SessionFailure::Contended)
    }

    /// Generic message safe to show the client.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionFailure::StoreUnavailable | SessionFailure::Contended => {
                "The service is temporarily unavailable. Please try again."
            }
            SessionFailure::Expired => "Your session has expired.",
            SessionFailure::ReauthenticationRequired => {
                "Please sign in again to continue."
            }
        }
    }
}

/// Every credential rejection, whatever the cause.
///
/// Unknown identities, wrong credentials, inactive accounts and verifier
/// backend errors all collapse into this one value before they reach any
/// logging or response code.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Default)]
#[error("authentication failed")]
pub struct AuthFailure;

/// Request preconditions that failed before any session logic ran.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GuardRejection {
    #[error("must accept basic identification to proceed")]
    MissingRemoteAddress,

    #[error("must accept basic identification to proceed")]
    InvalidRemoteAddress,

    #[error("must accept basic identification to proceed")]
    MissingUserAgent,

    #[error("must accept basic identification to proceed")]
    InvalidUserAgent,
}

impl GuardRejection {
    /// Message shown to the client.
    pub fn user_message(&self) -> &'static str {
        "You must accept basic identification (client address and browser \
         identification) to proceed."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionFailure::StoreUnavailable.is_fatal());
        assert!(SessionFailure::Contended.is_fatal());
        assert!(!SessionFailure::Expired.is_fatal());
        assert!(!SessionFailure::ReauthenticationRequired.is_fatal());
    }

    #[test]
    fn test_guard_rejections_are_uniform() {
        let all = [
            GuardRejection::MissingRemoteAddress,
            GuardRejection::InvalidRemoteAddress,
            GuardRejection::MissingUserAgent,
            GuardRejection::InvalidUserAgent,
        ];
        for rejection in all {
            assert_eq!(
                rejection.to_string(),
                "must accept basic identification to proceed"
            );
        }
    }
}
