//! Operation counters and their Prometheus text-format export.

use crate::counter::Counter;
use brk_domain::DomainEvent;
use std::sync::Arc;

/// Atomic operation counters for the broker's key lifecycle events.
///
/// All counters are thread-safe and can be shared via [`Arc`]; wiring
/// typically creates one per process and threads it through the bus and
/// the provider context.
#[derive(Debug, Default)]
pub struct OperationsMetrics {
    pub requests_created_total: Counter,
    pub requests_completed_total: Counter,
    pub requests_failed_total: Counter,
    pub requests_partial_total: Counter,
    pub machines_created_total: Counter,
    pub machines_terminated_total: Counter,
    pub machines_failed_total: Counter,
    pub template_writes_total: Counter,
    pub template_deletes_total: Counter,
    pub template_validations_total: Counter,
    pub template_validation_failures_total: Counter,
    pub provider_health_flips_total: Counter,
    pub abis_override_warnings_total: Counter,
}

impl OperationsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one domain event into the relevant counters. Bind this as an
    /// [`brk_domain::EventPublisher`] alongside (or instead of) the audit
    /// logger to keep metrics and audit trail driven by the same stream.
    pub fn record(&self, event: &DomainEvent) {
        use brk_proto::RequestStatus;
        match event {
            DomainEvent::RequestCreated { .. } => self.requests_created_total.inc(),
            DomainEvent::RequestStatusChanged { new_status, .. } => match new_status {
                RequestStatus::Completed => self.requests_completed_total.inc(),
                RequestStatus::Failed | RequestStatus::Cancelled | RequestStatus::Timeout => {
                    self.requests_failed_total.inc()
                }
                RequestStatus::Partial => self.requests_partial_total.inc(),
                RequestStatus::Pending | RequestStatus::InProgress => {}
            },
            DomainEvent::MachineCreated { .. } => self.machines_created_total.inc(),
            DomainEvent::MachineStatusChanged { new_status, .. } => {
                use brk_proto::MachineStatus;
                match new_status {
                    MachineStatus::Terminated => self.machines_terminated_total.inc(),
                    MachineStatus::Failed => self.machines_failed_total.inc(),
                    _ => {}
                }
            }
            DomainEvent::TemplateCreated { .. } | DomainEvent::TemplateUpdated { .. } => {
                self.template_writes_total.inc()
            }
            DomainEvent::TemplateDeleted { .. } => self.template_deletes_total.inc(),
            DomainEvent::TemplateValidated { valid, .. } => {
                self.template_validations_total.inc();
                if !valid {
                    self.template_validation_failures_total.inc();
                }
            }
            DomainEvent::ProviderHealthChanged { .. } => self.provider_health_flips_total.inc(),
            DomainEvent::AbisOverrideWarning { .. } => self.abis_override_warnings_total.inc(),
        }
        tracing::debug!(event = ?event, "recorded metric for domain event");
    }
}

/// Exports [`OperationsMetrics`] in Prometheus text format.
pub struct MetricsExporter {
    metrics: Arc<OperationsMetrics>,
    prefix: String,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<OperationsMetrics>) -> Self {
        Self::with_prefix(metrics, "brk")
    }

    pub fn with_prefix(metrics: Arc<OperationsMetrics>, prefix: impl Into<String>) -> Self {
        Self { metrics, prefix: prefix.into() }
    }

    pub fn render(&self) -> String {
        let m = &self.metrics;
        let mut out = String::new();
        self.write_counter(&mut out, "requests_created_total", "Total resource requests created", m.requests_created_total.get());
        self.write_counter(&mut out, "requests_completed_total", "Total requests that completed fully", m.requests_completed_total.get());
        self.write_counter(&mut out, "requests_failed_total", "Total requests that failed, were cancelled, or timed out", m.requests_failed_total.get());
        self.write_counter(&mut out, "requests_partial_total", "Total requests that completed with partial fulfillment", m.requests_partial_total.get());
        self.write_counter(&mut out, "machines_created_total", "Total machines created", m.machines_created_total.get());
        self.write_counter(&mut out, "machines_terminated_total", "Total machines terminated", m.machines_terminated_total.get());
        self.write_counter(&mut out, "machines_failed_total", "Total machines that entered the failed state", m.machines_failed_total.get());
        self.write_counter(&mut out, "template_writes_total", "Total template create/update operations", m.template_writes_total.get());
        self.write_counter(&mut out, "template_deletes_total", "Total template deletions", m.template_deletes_total.get());
        self.write_counter(&mut out, "template_validations_total", "Total template validations run", m.template_validations_total.get());
        self.write_counter(&mut out, "template_validation_failures_total", "Total template validations that failed", m.template_validation_failures_total.get());
        self.write_counter(&mut out, "provider_health_flips_total", "Total provider health transitions", m.provider_health_flips_total.get());
        self.write_counter(&mut out, "abis_override_warnings_total", "Total ABIS-overrides-enumerated-types warnings emitted", m.abis_override_warnings_total.get());
        out
    }

    fn write_counter(&self, out: &mut String, name: &str, help: &str, value: u64) {
        let prefix = &self.prefix;
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brk_proto::RequestStatus;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn recording_a_completed_status_change_increments_completed_counter() {
        let metrics = OperationsMetrics::new();
        metrics.record(&DomainEvent::RequestStatusChanged {
            request_id: "r1".into(),
            old_status: RequestStatus::InProgress,
            new_status: RequestStatus::Completed,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
        });
        assert_eq!(metrics.requests_completed_total.get(), 1);
        assert_eq!(metrics.requests_failed_total.get(), 0);
    }

    #[test]
    fn exporter_renders_prometheus_text_with_custom_prefix() {
        let metrics = Arc::new(OperationsMetrics::new());
        metrics.requests_created_total.inc();
        let exporter = MetricsExporter::with_prefix(metrics, "myapp");
        let out = exporter.render();
        assert!(out.contains("# HELP myapp_requests_created_total"));
        assert!(out.contains("myapp_requests_created_total 1"));
        assert!(!out.contains("brk_requests_created_total"));
    }

    #[test]
    fn zero_counters_still_appear_in_output() {
        let metrics = Arc::new(OperationsMetrics::new());
        let exporter = MetricsExporter::new(metrics);
        assert!(exporter.render().contains("brk_machines_failed_total 0"));
    }
}
