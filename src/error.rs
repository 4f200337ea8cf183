//! Error types for the portfolio engine

use thiserror::Error;

/// Classification of a chain client failure, assigned once where the transport
/// error is first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    /// HTTP 429 or a provider-side rate limit response
    RateLimited,
    /// Request or socket timeout
    Timeout,
    /// Connection reset / refused / closed mid-flight
    ConnectionReset,
    /// 502/503/504 from a gateway in front of the node
    Gateway,
    /// The requested object does not exist
    NotFound,
    Other,
}

/// Error returned by a [`crate::chain::ChainClient`] implementation
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct ChainError {
    pub kind: ChainErrorKind,
    pub message: String,
}

impl ChainError {
    pub fn new(kind: ChainErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ChainErrorKind::Other, message)
    }

    /// Whether the resilience layer should retry the call that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ChainErrorKind::RateLimited
                | ChainErrorKind::Timeout
                | ChainErrorKind::ConnectionReset
                | ChainErrorKind::Gateway
        )
    }
}

/// Errors raised by the key-value store behind [`crate::data::cache::Cache`]
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum PortfolioError {
    /// Fetcher/network mismatch or other caller mistakes; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Program scan returned more accounts than the caller allows
    #[error("Too much accounts to get ({count}, max {max})")]
    TooManyAccounts { count: usize, max: usize },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Account payload could not be decoded into the expected layout
    #[error("Decode error for account {pubkey}: {message}")]
    Decode { pubkey: String, message: String },
}

/// Result type alias for convenience
pub type PortfolioResult<T> = Result<T, PortfolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ChainError::new(ChainErrorKind::RateLimited, "429").is_retryable());
        assert!(ChainError::new(ChainErrorKind::Gateway, "502").is_retryable());
        assert!(!ChainError::new(ChainErrorKind::NotFound, "gone").is_retryable());
        assert!(!ChainError::other("bad params").is_retryable());
    }

    #[test]
    fn test_too_many_accounts_message() {
        let err = PortfolioError::TooManyAccounts { count: 12, max: 10 };
        assert_eq!(err.to_string(), "Too much accounts to get (12, max 10)");
    }
}
