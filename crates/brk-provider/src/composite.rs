//! Composite execution modes layered on top of plain selection
//! (spec §4.1 Composite / Fallback / LoadBalancing strategies).
//!
//! These operate on a list of already-resolved provider names plus a
//! closure that executes one attempt against a given name — the actual
//! provider dispatch stays in [`crate::context::ProviderContext`]; this
//! module is pure composition logic, easy to test in isolation.

use brk_domain::BrokerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    RetryOnly,
    RetryThenFallback,
    CircuitBreaker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }
}

/// Try `attempt` against `providers` in order, honoring `backoff`. Each
/// attempt is a fresh async closure invocation bound to one provider
/// name. Stops at the first success or when providers are exhausted.
/// Transient failures are retried per `backoff`; a permanent failure
/// aborts immediately without trying further providers (spec §4.2
/// dispatch ordering, §7 propagation).
pub async fn sequential_first_success<F, Fut>(
    providers: &[String],
    backoff: &BackoffConfig,
    mut attempt: F,
) -> Result<(String, brk_proto::Machine), BrokerError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<brk_proto::Machine, BrokerError>>,
{
    let mut last_err = BrokerError::Internal("no providers configured".to_string());
    for (idx, name) in providers.iter().enumerate() {
        if idx as u32 >= backoff.max_attempts {
            break;
        }
        match attempt(name.clone()).await {
            Ok(machine) => return Ok((name.clone(), machine)),
            Err(err) => {
                let retryable = err.is_retryable();
                last_err = err;
                if !retryable {
                    return Err(last_err);
                }
                if idx + 1 < providers.len() {
                    tokio::time::sleep(backoff.delay_for_attempt(idx as u32)).await;
                }
            }
        }
    }
    Err(last_err)
}

/// `Redundant + MajorityWins` (spec §4.1): run on >= 3 providers,
/// succeed if >= ceil(N/2) agree on success.
pub fn majority_wins(results: &[bool]) -> bool {
    if results.is_empty() {
        return false;
    }
    let successes = results.iter().filter(|&&ok| ok).count();
    successes * 2 >= results.len() + (results.len() % 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceAlgorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Hash,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckMode {
    Passive,
    Active,
    Hybrid,
}

/// Hash-based load balancing: stable mapping from an operation key to one
/// of `len` buckets (spec §4.1 "Hash-based (by operation.key)").
pub fn hash_bucket(key: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % len
}
