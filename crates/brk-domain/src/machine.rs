//! Machine state machine (spec §4.3).
//!
//! `Building -> Running | Failed`; `Running -> Stopping -> Stopped`;
//! `Running -> Terminating -> Terminated`; any non-terminal state goes
//! to `Unknown` on a failed poll, and recovers on the next successful
//! one. `Terminated`/`Failed` are terminal.

use crate::events::DomainEvent;
use brk_proto::{Machine, MachineStatus};
use chrono::Utc;
use uuid::Uuid;

fn allowed(from: MachineStatus, to: MachineStatus) -> bool {
    use MachineStatus::*;
    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        (Building, Running) | (Building, Failed) => true,
        (Running, Stopping) | (Running, Terminating) | (Running, Failed) => true,
        (Stopping, Stopped) | (Stopping, Failed) => true,
        (Terminating, Terminated) | (Terminating, Failed) => true,
        (Stopped, Terminating) => true,
        // Any non-terminal state may degrade to Unknown on poll failure,
        // and Unknown may recover to any reported state on next poll.
        (_, Unknown) => true,
        (Unknown, _) => true,
        _ => false,
    }
}

/// Apply a reported status. Returns `Some(event)` if the transition was
/// legal and changed state; `None` if the machine is already terminal or
/// the transition is not in the allowed set (the caller should log and
/// ignore in that case rather than corrupt the record).
pub fn apply_status(
    machine: &mut Machine,
    reported: MachineStatus,
    correlation_id: Uuid,
) -> Option<DomainEvent> {
    machine.last_status_check = Some(Utc::now());
    if machine.status == reported {
        return None;
    }
    if !allowed(machine.status, reported) {
        return None;
    }
    let old_status = machine.status;
    machine.status = reported;
    machine.version += 1;
    Some(DomainEvent::MachineStatusChanged {
        machine_id: machine.machine_id.clone(),
        old_status,
        new_status: reported,
        timestamp: Utc::now(),
        correlation_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn building_machine() -> Machine {
        Machine {
            machine_id: "m1".into(),
            request_id: "req-1".into(),
            template_id: "t1".into(),
            provider_name: "p1".into(),
            instance_id: "i-1".into(),
            instance_type: "m5.large".into(),
            private_ip: None,
            public_ip: None,
            status: MachineStatus::Building,
            launch_time: Utc::now(),
            last_status_check: None,
            version: 0,
        }
    }

    #[test]
    fn building_to_running_is_allowed() {
        let mut m = building_machine();
        let event = apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        assert!(event.is_some());
        assert_eq!(m.status, MachineStatus::Running);
    }

    #[test]
    fn terminal_rejects_further_transitions() {
        let mut m = building_machine();
        apply_status(&mut m, MachineStatus::Failed, Uuid::new_v4());
        assert_eq!(m.status, MachineStatus::Failed);

        let event = apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        assert!(event.is_none());
        assert_eq!(m.status, MachineStatus::Failed);
    }

    #[test]
    fn poll_failure_degrades_to_unknown_and_recovers() {
        let mut m = building_machine();
        apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        apply_status(&mut m, MachineStatus::Unknown, Uuid::new_v4());
        assert_eq!(m.status, MachineStatus::Unknown);

        let event = apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        assert!(event.is_some());
        assert_eq!(m.status, MachineStatus::Running);
    }

    #[test]
    fn same_status_reapplication_is_a_noop_event() {
        let mut m = building_machine();
        apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        let version_before = m.version;
        let event = apply_status(&mut m, MachineStatus::Running, Uuid::new_v4());
        assert!(event.is_none());
        assert_eq!(m.version, version_before);
    }
}
