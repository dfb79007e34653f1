//! Selection policies (spec §4.1).
//!
//! Generalizes `claw_provision::ProviderRegistry::select_provider`'s
//! health-gated, priority-ordered fallback search into the full
//! enumerated policy set.

use crate::metrics::ProviderMetrics;
use brk_proto::ProviderInstance;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    FirstAvailable,
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    FastestResponse,
    HighestSuccessRate,
    CapabilityBased,
    HealthBased,
    Random,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub min_success_rate: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub require_healthy: bool,
    pub required_capabilities: Vec<String>,
}

/// One eligible candidate: its configuration plus its current metrics
/// and whether it's reporting healthy and whether its circuit is open.
pub struct Candidate<'a> {
    pub instance: &'a ProviderInstance,
    pub metrics: &'a ProviderMetrics,
    pub healthy: bool,
    pub circuit_open: bool,
}

fn meets_criteria(candidate: &Candidate<'_>, criteria: &SelectionCriteria) -> bool {
    if candidate.circuit_open {
        return false;
    }
    if criteria.require_healthy && !candidate.healthy {
        return false;
    }
    if let Some(min_rate) = criteria.min_success_rate
        && candidate.metrics.success_rate() < min_rate
    {
        return false;
    }
    if let Some(max_latency) = criteria.max_response_time_ms
        && candidate.metrics.avg_latency_ms() > max_latency
        && candidate.metrics.successes.get() > 0
    {
        return false;
    }
    let required: HashSet<&str> = criteria.required_capabilities.iter().map(String::as_str).collect();
    let have: HashSet<&str> = candidate.instance.capabilities.iter().map(String::as_str).collect();
    required.is_subset(&have)
}

/// Weights of health score used by `HealthBased`: `w1*successRate -
/// w2*normalizedLatency` (spec §4.1).
const HEALTH_W1: f64 = 0.7;
const HEALTH_W2: f64 = 0.3;
/// Latencies at or above this are treated as maximally bad for
/// normalization purposes.
const LATENCY_NORMALIZATION_CEILING_MS: f64 = 5000.0;

fn health_score(candidate: &Candidate<'_>) -> f64 {
    let normalized_latency =
        (candidate.metrics.avg_latency_ms() / LATENCY_NORMALIZATION_CEILING_MS).min(1.0);
    HEALTH_W1 * candidate.metrics.success_rate() - HEALTH_W2 * normalized_latency
}

/// Stateful cursor shared across calls for `RoundRobin`/`WeightedRoundRobin`.
#[derive(Debug, Default)]
pub struct RoundRobinCursor(AtomicU64);

impl RoundRobinCursor {
    pub fn next(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        (self.0.fetch_add(1, Ordering::Relaxed) as usize) % len
    }
}

/// Select one provider name from `candidates` per `policy`, honoring
/// `criteria`. Empty eligible set returns `None` (spec §8: "Empty
/// provider list → selection returns NoProviderAvailable without
/// touching metrics" — the caller is responsible for not touching
/// metrics when this returns `None`).
pub fn select<'a>(
    policy: SelectionPolicy,
    candidates: &[Candidate<'a>],
    criteria: &SelectionCriteria,
    cursor: &RoundRobinCursor,
) -> Option<&'a ProviderInstance> {
    let mut eligible: Vec<&Candidate<'a>> = candidates
        .iter()
        .filter(|c| c.instance.enabled && meets_criteria(c, criteria))
        .collect();
    if eligible.is_empty() {
        return None;
    }
    eligible.sort_by_key(|c| c.instance.priority);

    match policy {
        SelectionPolicy::FirstAvailable | SelectionPolicy::CapabilityBased => {
            Some(eligible[0].instance)
        }
        SelectionPolicy::RoundRobin => {
            let idx = cursor.next(eligible.len());
            Some(eligible[idx].instance)
        }
        SelectionPolicy::WeightedRoundRobin => {
            // Weight-0 providers are excluded (spec §8 boundary).
            let ring: Vec<&Candidate<'a>> = eligible
                .iter()
                .filter(|c| c.instance.weight > 0)
                .flat_map(|c| std::iter::repeat_n(*c, c.instance.weight as usize))
                .collect();
            if ring.is_empty() {
                return None;
            }
            let idx = cursor.next(ring.len());
            Some(ring[idx].instance)
        }
        SelectionPolicy::LeastConnections => eligible
            .iter()
            .min_by_key(|c| (c.metrics.in_flight_count(), c.instance.priority))
            .map(|c| c.instance),
        SelectionPolicy::FastestResponse => eligible
            .iter()
            .min_by(|a, b| {
                a.metrics
                    .avg_latency_ms()
                    .partial_cmp(&b.metrics.avg_latency_ms())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.instance),
        SelectionPolicy::HighestSuccessRate => eligible
            .iter()
            .max_by(|a, b| {
                a.metrics
                    .success_rate()
                    .partial_cmp(&b.metrics.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.instance),
        SelectionPolicy::HealthBased => eligible
            .iter()
            .filter(|c| c.healthy)
            .max_by(|a, b| {
                health_score(a)
                    .partial_cmp(&health_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|c| c.instance),
        SelectionPolicy::Random => {
            let mut rng = rand::rng();
            eligible.choose(&mut rng).map(|c| c.instance)
        }
    }
}
