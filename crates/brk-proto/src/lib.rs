//! Core domain types for the compute-resource broker.
//!
//! Defines the entities shared by every other crate in the workspace:
//! templates, requests, machines, and provider instances. Nothing here
//! talks to a provider or a scheduler — those live in `brk-provider`,
//! `brk-handlers`, and `brk-scheduler`.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── IDs ───────────────────────────────────────────────────────────────────

pub type TemplateId = String;
pub type RequestId = String;
pub type MachineId = String;
pub type ProviderName = String;

/// Generate a new request id (`req-<uuid>`).
pub fn new_request_id() -> RequestId {
    format!("req-{}", Uuid::new_v4())
}

/// Generate a new machine id (`mach-<uuid>`).
pub fn new_machine_id() -> MachineId {
    format!("mach-{}", Uuid::new_v4())
}

/// Validate a template/request/machine id: non-empty, bounded, and
/// restricted to characters safe in file names and wire identifiers.
pub fn validate_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

// ─── ABIS (Attribute-Based Instance Selection) ────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbisRequirements {
    pub vcpu_count: Range<u32>,
    pub memory_mib: Range<u64>,
    #[serde(default)]
    pub attribute_filters: HashMap<String, String>,
}

// ─── Native-spec override ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NativeSpecMergeMode {
    #[default]
    Extend,
    Override,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NativeSpecOverride {
    pub provider_api_spec: Option<serde_json::Value>,
    pub provider_api_spec_file: Option<String>,
    pub launch_template_spec: Option<serde_json::Value>,
    pub launch_template_spec_file: Option<String>,
}

impl NativeSpecOverride {
    pub fn is_empty(&self) -> bool {
        self.provider_api_spec.is_none()
            && self.provider_api_spec_file.is_none()
            && self.launch_template_spec.is_none()
            && self.launch_template_spec_file.is_none()
    }
}

// ─── Template ──────────────────────────────────────────────────────────────

/// Which provisioning handler a template is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderApi {
    Fleet,
    AutoScalingGroup,
    SpotFleet,
    DirectRun,
}

/// Immutable description of a desired host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub template_id: TemplateId,
    pub provider_api: ProviderApi,
    pub provider_name: Option<ProviderName>,
    pub image_id: String,
    pub instance_type: Option<String>,
    #[serde(default)]
    pub instance_types: Vec<String>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    pub key_name: Option<String>,
    pub user_data: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub max_number: u32,
    pub abis_instance_requirements: Option<AbisRequirements>,
    #[serde(default)]
    pub native_spec: NativeSpecOverride,
    /// Numeric priority of the file this template was resolved from
    /// (lower wins). Not part of the template's own identity.
    #[serde(default = "default_source_priority")]
    pub source_priority: u8,
}

fn default_source_priority() -> u8 {
    u8::MAX
}

impl Template {
    /// ABIS and enumerated instance types are mutually exclusive at
    /// dispatch time: when ABIS is present, enumerated types are ignored.
    pub fn effective_instance_types(&self) -> Vec<String> {
        if self.abis_instance_requirements.is_some() {
            return Vec::new();
        }
        if !self.instance_types.is_empty() {
            return self.instance_types.clone();
        }
        self.instance_type.clone().into_iter().collect()
    }

    pub fn uses_abis(&self) -> bool {
        self.abis_instance_requirements.is_some()
    }
}

// ─── Request ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Acquire,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Partial,
    Timeout,
}

impl RequestStatus {
    /// Terminal = {Completed, Failed, Cancelled, Timeout}; Partial is
    /// terminal for scheduler-exit-code purposes but is tracked
    /// separately because it carries a non-empty machine list.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::Timeout
                | RequestStatus::Partial
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestError {
    pub kind: String,
    pub message: String,
    pub machine_id: Option<MachineId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub request_type: RequestType,
    pub template_id: Option<TemplateId>,
    pub machine_count: Option<u32>,
    #[serde(default)]
    pub machine_references: Vec<MachineId>,
    pub status: RequestStatus,
    pub provider_name: Option<ProviderName>,
    #[serde(default)]
    pub machine_ids: Vec<MachineId>,
    #[serde(default)]
    pub errors: Vec<RequestError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version; incremented on every Save.
    pub version: u64,
}

impl Request {
    pub fn new_acquire(template_id: TemplateId, machine_count: u32) -> Self {
        let now = Utc::now();
        Self {
            request_id: new_request_id(),
            request_type: RequestType::Acquire,
            template_id: Some(template_id),
            machine_count: Some(machine_count),
            machine_references: Vec::new(),
            status: RequestStatus::Pending,
            provider_name: None,
            machine_ids: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn new_return(machine_references: Vec<MachineId>) -> Self {
        let now = Utc::now();
        Self {
            request_id: new_request_id(),
            request_type: RequestType::Return,
            template_id: None,
            machine_count: None,
            machine_references,
            status: RequestStatus::Pending,
            provider_name: None,
            machine_ids: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

// ─── Machine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    #[default]
    Building,
    Running,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
    Failed,
    Unknown,
}

impl MachineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineStatus::Terminated | MachineStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: MachineId,
    pub request_id: RequestId,
    pub template_id: TemplateId,
    pub provider_name: ProviderName,
    pub instance_id: String,
    pub instance_type: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub status: MachineStatus,
    pub launch_time: DateTime<Utc>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub version: u64,
}

// ─── Provider instance configuration ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_health_interval() -> u64 {
    60
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval(),
        }
    }
}

/// A named, typed, configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub name: ProviderName,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_id_accepts_safe_characters() {
        assert!(validate_id("aws-basic_1"));
        assert!(!validate_id(""));
        assert!(!validate_id("has space"));
    }

    #[test]
    fn abis_suppresses_enumerated_types() {
        let mut t = Template {
            template_id: "t1".into(),
            provider_api: ProviderApi::Fleet,
            provider_name: None,
            image_id: "ami-1".into(),
            instance_type: Some("t3.medium".into()),
            instance_types: vec![],
            subnet_ids: vec![],
            security_group_ids: vec![],
            key_name: None,
            user_data: None,
            tags: HashMap::new(),
            max_number: 1,
            abis_instance_requirements: None,
            native_spec: NativeSpecOverride::default(),
            source_priority: 1,
        };
        assert_eq!(t.effective_instance_types(), vec!["t3.medium".to_string()]);

        t.abis_instance_requirements = Some(AbisRequirements {
            vcpu_count: Range { min: 2, max: 4 },
            memory_mib: Range { min: 4096, max: 8192 },
            attribute_filters: HashMap::new(),
        });
        assert!(t.effective_instance_types().is_empty());
        assert!(t.uses_abis());
    }

    #[test]
    fn request_status_terminality() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Partial.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::InProgress.is_terminal());
    }

    #[test]
    fn request_serde_roundtrip() {
        let r = Request::new_acquire("t1".into(), 3);
        let json = serde_json::to_string(&r).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, r.request_id);
        assert_eq!(back.status, RequestStatus::Pending);
    }
}
