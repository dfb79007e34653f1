//! Per-provider metrics: lock-free counters plus an EWMA of response time
//! and success rate over a window of N=64 operations (spec §4.1, §5).

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// EWMA window size used for response-time and success-rate smoothing
/// (spec §4.1 `FastestResponse` / `HighestSuccessRate`).
pub const EWMA_WINDOW: u32 = 64;

fn ewma_alpha() -> f64 {
    2.0 / (EWMA_WINDOW as f64 + 1.0)
}

/// Per-provider metrics. Counters are lock-free; the EWMA fields are
/// bit-cast into an `AtomicI64` so updates stay O(1) without a spinlock,
/// matching the spec's "bounded to O(1)" requirement for EWMA updates.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    pub successes: Counter,
    pub failures: Counter,
    pub in_flight: AtomicI64,
    /// Millis, stored as bits of an f64 inside an AtomicI64.
    avg_latency_bits: AtomicI64,
    /// 0.0-1.0, stored as bits of an f64 inside an AtomicI64.
    success_rate_bits: AtomicI64,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        let m = Self::default();
        m.avg_latency_bits.store(0f64.to_bits() as i64, Ordering::Relaxed);
        m.success_rate_bits.store(1f64.to_bits() as i64, Ordering::Relaxed);
        m
    }

    pub fn record_start(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_complete(&self, success: bool, latency: Duration) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.successes.inc();
        } else {
            self.failures.inc();
        }

        let alpha = ewma_alpha();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let prev_latency = f64::from_bits(self.avg_latency_bits.load(Ordering::Relaxed) as u64);
        let next_latency = if prev_latency == 0.0 {
            latency_ms
        } else {
            alpha * latency_ms + (1.0 - alpha) * prev_latency
        };
        self.avg_latency_bits
            .store(next_latency.to_bits() as i64, Ordering::Relaxed);

        let prev_rate = f64::from_bits(self.success_rate_bits.load(Ordering::Relaxed) as u64);
        let sample = if success { 1.0 } else { 0.0 };
        let next_rate = alpha * sample + (1.0 - alpha) * prev_rate;
        self.success_rate_bits
            .store(next_rate.to_bits() as i64, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        f64::from_bits(self.avg_latency_bits.load(Ordering::Relaxed) as u64)
    }

    pub fn success_rate(&self) -> f64 {
        f64::from_bits(self.success_rate_bits.load(Ordering::Relaxed) as u64)
    }

    pub fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            successes: self.successes.get(),
            failures: self.failures.get(),
            in_flight: self.in_flight_count(),
            avg_latency_ms: self.avg_latency_ms(),
            success_rate: self.success_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub in_flight: i64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges_toward_new_samples() {
        let metrics = ProviderMetrics::new();
        for _ in 0..200 {
            metrics.record_complete(true, Duration::from_millis(100));
        }
        assert!((metrics.avg_latency_ms() - 100.0).abs() < 1.0);
        assert!((metrics.success_rate() - 1.0).abs() < 0.001);
    }

    #[test]
    fn success_rate_drops_with_failures() {
        let metrics = ProviderMetrics::new();
        for _ in 0..200 {
            metrics.record_complete(true, Duration::from_millis(50));
        }
        for _ in 0..200 {
            metrics.record_complete(false, Duration::from_millis(50));
        }
        assert!(metrics.success_rate() < 0.1);
    }

    #[test]
    fn in_flight_tracks_start_and_complete() {
        let metrics = ProviderMetrics::new();
        metrics.record_start();
        metrics.record_start();
        assert_eq!(metrics.in_flight_count(), 2);
        metrics.record_complete(true, Duration::from_millis(10));
        assert_eq!(metrics.in_flight_count(), 1);
    }
}
