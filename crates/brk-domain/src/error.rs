//! The broker's error taxonomy (spec §7).
//!
//! Every fallible operation in the domain and its adjacent crates returns
//! a [`BrokerError`]. Handlers and the Provider Strategy Engine classify
//! raw provider failures into one of these kinds before they ever reach
//! the bus; the bus never has to guess whether something is retryable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BrokerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("insufficient capacity: {0}")]
    Capacity(String),

    #[error("transient provider error ({code}): {message}")]
    ProviderTransient { code: String, message: String },

    #[error("permanent provider error ({code}): {message}")]
    ProviderPermanent { code: String, message: String },

    #[error("saturated: {0}")]
    Saturated(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Transient errors are retried per Fallback config; permanent
    /// errors bypass retry and surface immediately (spec §4.1, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::ProviderTransient { .. } | BrokerError::Saturated(_)
        )
    }

    /// The machine-readable kind name used in the CQRS error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "validation",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::Conflict(_) => "conflict",
            BrokerError::Quota(_) => "quota",
            BrokerError::Capacity(_) => "capacity",
            BrokerError::ProviderTransient { .. } => "provider_transient",
            BrokerError::ProviderPermanent { .. } => "provider_permanent",
            BrokerError::Saturated(_) => "saturated",
            BrokerError::Cancelled => "cancelled",
            BrokerError::Timeout(_) => "timeout",
            BrokerError::Internal(_) => "internal",
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        let transient = BrokerError::ProviderTransient {
            code: "Throttling".into(),
            message: "rate limited".into(),
        };
        let permanent = BrokerError::ProviderPermanent {
            code: "AuthFailure".into(),
            message: "bad credentials".into(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(BrokerError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(BrokerError::Cancelled.kind(), "cancelled");
    }
}
