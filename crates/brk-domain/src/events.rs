//! Domain events (spec §4.3).
//!
//! Emitted on commit. Event publishing is a port: if nothing is bound,
//! events are dropped with no behavioral change (spec §9 "optional event
//! publishing"). Aggregates never depend on delivery for correctness —
//! they compute and return events, the caller decides whether to publish.

use brk_proto::{MachineId, MachineStatus, ProviderName, RequestId, RequestStatus, TemplateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    RequestCreated {
        request_id: RequestId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    RequestStatusChanged {
        request_id: RequestId,
        old_status: RequestStatus,
        new_status: RequestStatus,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    MachineCreated {
        machine_id: MachineId,
        request_id: RequestId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    MachineStatusChanged {
        machine_id: MachineId,
        old_status: MachineStatus,
        new_status: MachineStatus,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    TemplateCreated {
        template_id: TemplateId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    TemplateUpdated {
        template_id: TemplateId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    TemplateDeleted {
        template_id: TemplateId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    TemplateValidated {
        template_id: TemplateId,
        valid: bool,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    ProviderHealthChanged {
        provider_name: ProviderName,
        healthy: bool,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
    /// ABIS present with enumerated types ⇒ enumerated types ignored;
    /// emitted once per template per process (spec §8 boundary behavior).
    AbisOverrideWarning {
        template_id: TemplateId,
        timestamp: DateTime<Utc>,
        correlation_id: Uuid,
    },
}

impl DomainEvent {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            DomainEvent::RequestCreated { correlation_id, .. }
            | DomainEvent::RequestStatusChanged { correlation_id, .. }
            | DomainEvent::MachineCreated { correlation_id, .. }
            | DomainEvent::MachineStatusChanged { correlation_id, .. }
            | DomainEvent::TemplateCreated { correlation_id, .. }
            | DomainEvent::TemplateUpdated { correlation_id, .. }
            | DomainEvent::TemplateDeleted { correlation_id, .. }
            | DomainEvent::TemplateValidated { correlation_id, .. }
            | DomainEvent::ProviderHealthChanged { correlation_id, .. }
            | DomainEvent::AbisOverrideWarning { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Port: where domain events go. Unbound by default — see [`NullPublisher`].
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// The default binding: drops every event. Correctness never depends on
/// delivery, so this is a legitimate production configuration, not just
/// a test stub.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: DomainEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_publisher_accepts_any_event() {
        let publisher = NullPublisher;
        publisher.publish(DomainEvent::RequestCreated {
            request_id: "req-1".into(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
        });
    }
}
