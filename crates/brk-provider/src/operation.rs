//! The operation/result shape every provider strategy executes (spec §4.1).

use brk_domain::BrokerError;
use brk_proto::{AbisRequirements, ProviderName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateInstances,
    TerminateInstances,
    GetInstanceStatus,
    ValidateTemplate,
    HealthCheck,
    GetAvailableTemplates,
    GetCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstancesPayload {
    pub template_id: String,
    pub count: u32,
    pub image_id: String,
    pub instance_types: Vec<String>,
    pub abis: Option<AbisRequirements>,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub tags: HashMap<String, String>,
    /// Rendered native-spec override, present when the template carried
    /// one and its merge mode wasn't `None` (spec §4.2). Providers that
    /// understand their cloud's native shape may merge this in.
    #[serde(default)]
    pub native_spec: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateInstancesPayload {
    pub instance_ids: Vec<String>,
}

/// A request against the Provider Strategy Engine. `key` is used by
/// hash-based load balancing (spec §4.1) — callers pass a stable
/// identifier (e.g. the request id) so retries of the same operation hash
/// to the same provider.
#[derive(Debug, Clone)]
pub struct ProviderOperation {
    pub kind: OperationKind,
    pub key: String,
    pub required_capabilities: Vec<String>,
    pub create: Option<CreateInstancesPayload>,
    pub terminate: Option<TerminateInstancesPayload>,
    pub deadline: Option<Duration>,
}

impl ProviderOperation {
    pub fn create_instances(key: impl Into<String>, payload: CreateInstancesPayload) -> Self {
        Self {
            kind: OperationKind::CreateInstances,
            key: key.into(),
            required_capabilities: Vec::new(),
            create: Some(payload),
            terminate: None,
            deadline: None,
        }
    }

    pub fn terminate_instances(key: impl Into<String>, instance_ids: Vec<String>) -> Self {
        Self {
            kind: OperationKind::TerminateInstances,
            key: key.into(),
            required_capabilities: Vec::new(),
            create: None,
            terminate: Some(TerminateInstancesPayload { instance_ids }),
            deadline: None,
        }
    }

    pub fn health_check(key: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::HealthCheck,
            key: key.into(),
            required_capabilities: Vec::new(),
            create: None,
            terminate: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub created_instances: Vec<CreatedInstance>,
    pub terminated_instance_ids: Vec<String>,
    pub raw_provider_ids: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl Default for ProviderOutcome {
    fn default() -> Self {
        Self {
            created_instances: Vec::new(),
            terminated_instance_ids: Vec::new(),
            raw_provider_ids: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

/// The result of executing one [`ProviderOperation`] against one
/// [`ProviderName`]. Carries enough context for the caller to update
/// metrics and circuit-breaker state without re-deriving it.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider_name: ProviderName,
    pub outcome: Result<ProviderOutcome, BrokerError>,
    pub latency: Duration,
}

impl ProviderResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
