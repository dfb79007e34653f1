//! Field name and status-vocabulary remapping tables.
//!
//! The scheduler needs several such tables (field names, status codes,
//! instance-attribute synthesis) all swapped together per strategy, so
//! they're centralized here as one `FieldMap` per strategy instead of
//! scattered across `Display` impls.

use brk_proto::{MachineStatus, RequestStatus};

/// A strategy's naming and status-vocabulary table. `Default` is the
/// identity mapping (spec.md §4.5's `Default` strategy); `HostFactory`
/// overrides every field.
pub struct FieldMap {
    pub template_id_key: &'static str,
    pub max_number_key: &'static str,
    pub instance_type_key: &'static str,
    pub machine_id_key: &'static str,
    pub machine_ids_key: &'static str,
    pub private_ip_key: &'static str,
    pub public_ip_key: &'static str,
}

pub const DEFAULT_FIELD_MAP: FieldMap = FieldMap {
    template_id_key: "template_id",
    max_number_key: "max_number",
    instance_type_key: "instance_type",
    machine_id_key: "machine_id",
    machine_ids_key: "machine_ids",
    private_ip_key: "private_ip",
    public_ip_key: "public_ip",
};

pub const HOST_FACTORY_FIELD_MAP: FieldMap = FieldMap {
    template_id_key: "templateId",
    max_number_key: "maxNumber",
    instance_type_key: "vmType",
    machine_id_key: "machineId",
    machine_ids_key: "machineIds",
    private_ip_key: "privateIpAddress",
    public_ip_key: "publicIpAddress",
};

/// HostFactory's scheduler-specific status vocabulary (spec §4.5).
pub fn host_factory_request_status(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::InProgress => "running",
        RequestStatus::Completed => "complete",
        RequestStatus::Failed => "complete_with_error",
        RequestStatus::Cancelled => "complete_with_error",
        RequestStatus::Partial => "complete_with_error",
        RequestStatus::Timeout => "complete_with_error",
    }
}

pub fn host_factory_machine_status(status: MachineStatus) -> &'static str {
    match status {
        MachineStatus::Building => "executing",
        MachineStatus::Running => "running",
        MachineStatus::Stopping | MachineStatus::Stopped => "running",
        MachineStatus::Terminating => "deallocating",
        MachineStatus::Terminated => "deallocated",
        MachineStatus::Failed => "error",
        MachineStatus::Unknown => "unknown",
    }
}

/// `ncpus`/`nram` synthesis table for instance types HostFactory expects
/// as machine attributes rather than a single type string. Unknown types
/// fall back to `fallback`.
pub struct InstanceTypeAttributes {
    pub ncpus: u32,
    pub nram_mb: u64,
}

pub const FALLBACK_INSTANCE_ATTRIBUTES: InstanceTypeAttributes = InstanceTypeAttributes { ncpus: 1, nram_mb: 1024 };

pub fn instance_type_attributes(instance_type: &str) -> InstanceTypeAttributes {
    match instance_type {
        "t3.medium" | "m5.medium" => InstanceTypeAttributes { ncpus: 2, nram_mb: 4096 },
        "t3.large" | "m5.large" => InstanceTypeAttributes { ncpus: 2, nram_mb: 8192 },
        "m5.xlarge" => InstanceTypeAttributes { ncpus: 4, nram_mb: 16384 },
        "m5.2xlarge" => InstanceTypeAttributes { ncpus: 8, nram_mb: 32768 },
        _ => FALLBACK_INSTANCE_ATTRIBUTES,
    }
}
