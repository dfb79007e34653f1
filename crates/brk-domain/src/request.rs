//! Request state machine (spec §4.3).
//!
//! `Pending -> InProgress -> {Completed, Partial, Failed} | Cancelled |
//! Timeout`. Terminal states reject further transitions except idempotent
//! re-observation — callers get `already_terminal=true` back instead of
//! an error, matching the "Cancel twice" idempotence law in spec §8.

use crate::error::{BrokerError, BrokerResult};
use crate::events::DomainEvent;
use brk_proto::{MachineId, Request, RequestError, RequestStatus};
use chrono::Utc;
use uuid::Uuid;

/// Outcome of attempting a transition: either the new event to record,
/// or a no-op acknowledgement for an already-terminal aggregate.
pub struct TransitionOutcome {
    pub event: Option<DomainEvent>,
    pub already_terminal: bool,
}

fn transition(
    request: &mut Request,
    new_status: RequestStatus,
    correlation_id: Uuid,
) -> TransitionOutcome {
    if request.status.is_terminal() {
        return TransitionOutcome {
            event: None,
            already_terminal: true,
        };
    }
    let old_status = request.status;
    request.status = new_status;
    request.updated_at = Utc::now();
    request.version += 1;
    TransitionOutcome {
        event: Some(DomainEvent::RequestStatusChanged {
            request_id: request.request_id.clone(),
            old_status,
            new_status,
            timestamp: request.updated_at,
            correlation_id,
        }),
        already_terminal: false,
    }
}

/// `Submitted` → `InProgress`: handler invocation accepted.
pub fn submit(request: &mut Request, correlation_id: Uuid) -> TransitionOutcome {
    transition(request, RequestStatus::InProgress, correlation_id)
}

/// `HandlerSuccessAll` → `Completed`: N machines created == requested.
pub fn complete(
    request: &mut Request,
    machine_ids: Vec<MachineId>,
    correlation_id: Uuid,
) -> TransitionOutcome {
    request.machine_ids = machine_ids;
    transition(request, RequestStatus::Completed, correlation_id)
}

/// `HandlerSuccessPartial` → `Partial`: 0 < N < requested, partial-allowed.
pub fn partial(
    request: &mut Request,
    machine_ids: Vec<MachineId>,
    errors: Vec<RequestError>,
    correlation_id: Uuid,
) -> TransitionOutcome {
    request.machine_ids = machine_ids;
    request.errors = errors;
    transition(request, RequestStatus::Partial, correlation_id)
}

/// `HandlerFailure` → `Failed`.
pub fn fail(
    request: &mut Request,
    errors: Vec<RequestError>,
    correlation_id: Uuid,
) -> TransitionOutcome {
    request.errors = errors;
    transition(request, RequestStatus::Failed, correlation_id)
}

/// `Cancelled` → `Cancelled`, allowed from {Pending, InProgress}.
/// Idempotent: cancelling an already-terminal request is a no-op that
/// reports success via `already_terminal`.
pub fn cancel(request: &mut Request, correlation_id: Uuid) -> TransitionOutcome {
    transition(request, RequestStatus::Cancelled, correlation_id)
}

/// `Timeout` → `Timeout`: deadline exceeded.
pub fn timeout(request: &mut Request, correlation_id: Uuid) -> TransitionOutcome {
    transition(request, RequestStatus::Timeout, correlation_id)
}

/// Decide Completed vs Partial vs Failed from a handler's create-count
/// result, honoring the caller's partial-fulfillment policy (spec §4.2
/// dispatch ordering, §8 invariant "partial-not-allowed ⇒ never Partial").
pub fn resolve_handler_outcome(
    request: &mut Request,
    created: Vec<MachineId>,
    errors: Vec<RequestError>,
    requested: u32,
    partial_allowed: bool,
    correlation_id: Uuid,
) -> TransitionOutcome {
    let created_count = created.len() as u32;
    if created_count == requested {
        complete(request, created, correlation_id)
    } else if created_count > 0 && partial_allowed {
        partial(request, created, errors, correlation_id)
    } else {
        fail(request, errors, correlation_id)
    }
}

/// Validate that a Return request only references machines that belong
/// to the calling aggregate set (spec §3 invariant: Machines never moved
/// between Requests). Callers pass in the set of machine ids currently
/// known to the repository.
pub fn validate_return_references(
    machine_references: &[MachineId],
    known_machine_ids: &[MachineId],
) -> BrokerResult<()> {
    for reference in machine_references {
        if !known_machine_ids.contains(reference) {
            return Err(BrokerError::NotFound(format!(
                "machine '{reference}' does not exist"
            )));
        }
    }
    Ok(())
}
