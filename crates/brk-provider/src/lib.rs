//! Provider Strategy Engine: selection, composition, and circuit breaking
//! across cloud backends.
//!
//! [`context::ProviderContext`] is the crate's entry point. Configure it
//! with one or more [`provider::Provider`] implementations, a
//! [`selection::SelectionPolicy`], and optional
//! [`selection::SelectionCriteria`], then call `execute()` for each
//! operation — selection, dispatch, metrics, and circuit-breaker
//! bookkeeping all happen inside that one call.

#![forbid(unsafe_code)]

pub mod circuit;
pub mod composite;
pub mod context;
pub mod metrics;
pub mod operation;
pub mod provider;
pub mod selection;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use composite::{BackoffConfig, HealthCheckMode, LoadBalanceAlgorithm, RetryMode, hash_bucket, majority_wins};
pub use context::ProviderContext;
pub use metrics::{MetricsSnapshot, ProviderMetrics};
pub use operation::{
    CreateInstancesPayload, CreatedInstance, OperationKind, ProviderOperation, ProviderOutcome,
    ProviderResult, TerminateInstancesPayload,
};
pub use provider::{Provider, RestProvider, SimulatedProvider};
pub use selection::{Candidate, RoundRobinCursor, SelectionCriteria, SelectionPolicy};
