//! Error types for the CAOS collector
//!
//! One error taxonomy shared by every component. Each variant knows how far
//! a failure must propagate inside a collection tick, see [`AbortScope`].

use thiserror::Error;

/// Result type alias using CollectorError
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Unified error type for collector operations
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Zero period, malformed tag set, unsupported remote API version.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Metering store connection failure or timeout
    #[error("Metering store unavailable: {0}")]
    StoreUnavailable(String),

    /// Login or token refresh against the series store failed
    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    /// Non-2xx or malformed response while writing a series or sample
    #[error("Remote write error: {0}")]
    RemoteWrite(String),

    /// Series store could not be reached at all
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Cloud inventory call failed
    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How much work a failure aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortScope {
    /// Only the failing call; never retried.
    Call,
    /// The remaining windows of the current series. Sibling tenants and
    /// metrics in the same tick keep going.
    Series,
    /// The whole tick for this job. Retried at the next scheduled tick.
    Tick,
}

impl CollectorError {
    /// Classify the error for the orchestrator.
    pub fn abort_scope(&self) -> AbortScope {
        match self {
            CollectorError::InvalidConfiguration(_) => AbortScope::Call,
            CollectorError::RemoteWrite(_) => AbortScope::Series,
            CollectorError::StoreUnavailable(_)
            | CollectorError::AuthFailure(_)
            | CollectorError::RemoteUnavailable(_)
            | CollectorError::Inventory(_)
            | CollectorError::Serialization(_)
            | CollectorError::Internal(_) => AbortScope::Tick,
        }
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        CollectorError::InvalidConfiguration(msg.into())
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CollectorError {
    fn from(err: anyhow::Error) -> Self {
        CollectorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CollectorError::StoreUnavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_abort_scope_classification() {
        assert_eq!(
            CollectorError::invalid_configuration("period must be positive").abort_scope(),
            AbortScope::Call
        );
        assert_eq!(
            CollectorError::RemoteWrite("500".into()).abort_scope(),
            AbortScope::Series
        );
        assert_eq!(
            CollectorError::AuthFailure("no token".into()).abort_scope(),
            AbortScope::Tick
        );
        assert_eq!(
            CollectorError::StoreUnavailable("timeout".into()).abort_scope(),
            AbortScope::Tick
        );
    }
}
