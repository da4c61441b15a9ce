//! Error types for the caching engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching engine
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid cache key (empty, too long, forbidden characters)
    #[error("invalid cache key: {0}")]
    Key(String),

    /// Value encode/decode failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// MAC verification failed or AEAD rejected the payload
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Tier is unreachable, timed out, or its circuit is open
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// Invalid configuration at construction time
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected error, carries the engine correlation id
    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl Error {
    /// Shorthand for a tier-unavailable error.
    pub fn unavailable(tier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::TierUnavailable {
            tier: tier.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an internal error with a correlation id.
    pub fn internal(correlation_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Internal {
            correlation_id: correlation_id.into(),
            message: message.to_string(),
        }
    }

    /// Category label used by the error-by-category statistics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Key(_) => "key",
            Error::Serialization(_) => "serialization",
            Error::Integrity(_) => "integrity",
            Error::TierUnavailable { .. } => "tier_unavailable",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Internal { .. } => "internal",
        }
    }
}
