//! Structured observability for the compute-resource broker.
//!
//! Provides:
//! - [`OperationsMetrics`] — atomic counters folded from domain events
//! - [`MetricsExporter`] — Prometheus text format export
//! - [`AuditLogger`] — structured JSON audit trail, bindable as an
//!   [`brk_domain::EventPublisher`]

#![forbid(unsafe_code)]

pub mod audit;
pub mod counter;
pub mod metrics;

pub use audit::{AuditEntry, AuditLogger};
pub use counter::Counter;
pub use metrics::{MetricsExporter, OperationsMetrics};

use brk_domain::{DomainEvent, EventPublisher};
use std::sync::Arc;

/// Fans one domain event out to the audit trail and the metrics
/// counters, so the composition root binds a single [`EventPublisher`]
/// instead of threading both through every command handler (spec §9
/// "optional event publishing" — a port, not a pair of special cases).
pub struct BroadcastPublisher {
    pub audit: Arc<AuditLogger>,
    pub metrics: Arc<OperationsMetrics>,
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: DomainEvent) {
        self.metrics.record(&event);
        self.audit.publish(event);
    }
}
