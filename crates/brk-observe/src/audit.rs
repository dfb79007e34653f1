//! Structured JSON audit trail of domain events.
//!
//! Binds as an [`EventPublisher`] so the bus can publish into it directly
//! alongside (or instead of) [`crate::metrics::OperationsMetrics`].

use brk_domain::{DomainEvent, EventPublisher};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn event_kind(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::RequestCreated { .. } => "request_created",
        DomainEvent::RequestStatusChanged { .. } => "request_status_changed",
        DomainEvent::MachineCreated { .. } => "machine_created",
        DomainEvent::MachineStatusChanged { .. } => "machine_status_changed",
        DomainEvent::TemplateCreated { .. } => "template_created",
        DomainEvent::TemplateUpdated { .. } => "template_updated",
        DomainEvent::TemplateDeleted { .. } => "template_deleted",
        DomainEvent::TemplateValidated { .. } => "template_validated",
        DomainEvent::ProviderHealthChanged { .. } => "provider_health_changed",
        DomainEvent::AbisOverrideWarning { .. } => "abis_override_warning",
    }
}

/// One recorded event, along with the audit log's own identity for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub kind: &'static str,
    pub event: DomainEvent,
}

/// In-memory, capacity-bounded audit trail. Oldest entries are evicted
/// first once `max_entries` is exceeded.
pub struct AuditLogger {
    entries: RwLock<Vec<AuditEntry>>,
    max_entries: usize,
}

impl AuditLogger {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: RwLock::new(Vec::new()), max_entries }
    }

    pub fn default_capacity() -> Self {
        Self::new(10_000)
    }

    pub fn query(&self, kind: Option<&str>, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> String {
        let entries = self.entries.read();
        serde_json::to_string_pretty(&*entries).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }
}

impl EventPublisher for AuditLogger {
    fn publish(&self, event: DomainEvent) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            correlation_id: event.correlation_id(),
            kind: event_kind(&event),
            event,
        };
        tracing::info!(
            audit_id = %entry.id,
            correlation_id = %entry.correlation_id,
            kind = entry.kind,
            "domain event recorded"
        );
        let mut entries = self.entries.write();
        entries.push(entry);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid as UuidAlias;

    fn sample_event() -> DomainEvent {
        DomainEvent::RequestCreated {
            request_id: "r1".into(),
            timestamp: Utc::now(),
            correlation_id: UuidAlias::new_v4(),
        }
    }

    #[test]
    fn logging_an_event_increments_count_and_is_queryable() {
        let logger = AuditLogger::new(10);
        logger.publish(sample_event());
        assert_eq!(logger.count(), 1);
        let found = logger.query(Some("request_created"), 10);
        assert_eq!(found.len(), 1);
        assert!(logger.query(Some("machine_created"), 10).is_empty());
    }

    #[test]
    fn json_output_includes_the_event_kind() {
        let logger = AuditLogger::new(10);
        logger.publish(sample_event());
        assert!(logger.to_json().contains("request_created"));
    }

    #[test]
    fn capacity_evicts_oldest_entries_first() {
        let logger = AuditLogger::new(3);
        for _ in 0..5 {
            logger.publish(sample_event());
        }
        assert_eq!(logger.count(), 3);
    }
}
