//! Error types for the CLOB engine

use std::time::Duration;

use thiserror::Error;

/// Engine-wide error type
///
/// Variants split into three propagation classes: retryable transport
/// conditions (`Transport`, `RateLimited`), internal resynchronization
/// signals (`SequenceGap`), and caller-visible failures (everything else).
#[derive(Error, Debug)]
pub enum ClobError {
    /// Network failure or timeout. Retryable with backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream rate limit hit. Retryable after the hinted delay.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Response did not match the expected schema. Never retried.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// A delta's sequence number does not chain onto the book's current
    /// sequence. Handled internally by requesting a fresh snapshot; never
    /// surfaced to action callers as a failure.
    #[error("Sequence gap for {asset_id}: expected {expected}, received {received}")]
    SequenceGap {
        asset_id: String,
        expected: u64,
        received: u64,
    },

    /// Upstream sent a book whose best bid is at or above its best ask.
    #[error("Crossed book for {asset_id}: bid {bid} >= ask {ask}")]
    CrossedBook {
        asset_id: String,
        bid: rust_decimal::Decimal,
        ask: rust_decimal::Decimal,
    },

    /// A partial credential set was supplied (e.g. API key without secret).
    #[error("Incomplete credentials: {0}")]
    IncompleteCredentials(String),

    /// No signing capability configured for the requested operation.
    /// Callers must degrade to a feature-unavailable response.
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Invalid order parameters: {0}")]
    InvalidOrderParameters(String),

    /// Counterparty business rejection, with the exchange's reason.
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClobError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ClobError::Transport(msg.into())
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        ClobError::RateLimited { retry_after }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ClobError::NotFound(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ClobError::Malformed(msg.into())
    }

    pub fn incomplete_credentials(msg: impl Into<String>) -> Self {
        ClobError::IncompleteCredentials(msg.into())
    }

    pub fn signing_unavailable(msg: impl Into<String>) -> Self {
        ClobError::SigningUnavailable(msg.into())
    }

    pub fn invalid_order(msg: impl Into<String>) -> Self {
        ClobError::InvalidOrderParameters(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        ClobError::Rejected(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ClobError::Internal(msg.into())
    }

    /// Whether a bounded retry with backoff is appropriate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClobError::Transport(_) | ClobError::RateLimited { .. }
        )
    }

    /// Retry-after hint, when the upstream provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClobError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this failure means a feature is unavailable rather than
    /// broken (missing credentials / signing capability).
    pub fn is_degraded_mode(&self) -> bool {
        matches!(
            self,
            ClobError::IncompleteCredentials(_) | ClobError::SigningUnavailable(_)
        )
    }
}

/// Result type alias for engine operations
pub type ClobResult<T> = Result<T, ClobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ClobError::transport("timeout").is_retryable());
        assert!(ClobError::rate_limited(Some(Duration::from_secs(2))).is_retryable());
        assert!(!ClobError::not_found("market").is_retryable());
        assert!(!ClobError::malformed("bad json").is_retryable());
        assert!(!ClobError::rejected("insufficient balance").is_retryable());
    }

    #[test]
    fn rate_limit_hint_is_preserved() {
        let err = ClobError::rate_limited(Some(Duration::from_secs(5)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(ClobError::transport("x").retry_after(), None);
    }

    #[test]
    fn degraded_mode_classification() {
        assert!(ClobError::signing_unavailable("no wallet").is_degraded_mode());
        assert!(ClobError::incomplete_credentials("missing secret").is_degraded_mode());
        assert!(!ClobError::invalid_order("bad tick").is_degraded_mode());
    }
}
