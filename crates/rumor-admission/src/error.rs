//! Error types for admission control.

use thiserror::Error;

/// Errors raised while issuing or checking admission cookies.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The cookie failed authenticated decryption (tampered, wrong key or corrupted).
    #[error("cookie authentication failed")]
    CookieAuthentication,

    /// The cookie decrypted but its contents are not a valid cookie.
    #[error("malformed cookie: {reason}")]
    MalformedCookie {
        /// What was wrong with the cookie layout.
        reason: String,
    },

    /// The cookie was issued for a different connection.
    #[error("cookie issued for {found}, presented on {expected}")]
    WrongDestination {
        /// The identity of the connection the cookie arrived on.
        expected: String,
        /// The destination sealed inside the cookie.
        found: String,
    },

    /// The cookie is outside the accepted freshness window.
    #[error("stale cookie: issued {age_ms}ms ago, limit {max_age_ms}ms")]
    StaleCookie {
        /// Age of the cookie in milliseconds (negative when issued in the future).
        age_ms: i64,
        /// Maximum accepted age in milliseconds.
        max_age_ms: i64,
    },

    /// The supplied key material is unusable.
    #[error("invalid cookie key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },
}

/// Result type alias for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;
