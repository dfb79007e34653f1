//! The `Provider` trait and two reference implementations.
//!
//! One struct per cloud, one `impl Provider for Struct`:
//! [`SimulatedProvider`] is an in-memory backend used by tests and local
//! development; [`RestProvider`] is a generic HTTP-backed implementation
//! for any cloud whose API matches a simple create/list/delete JSON
//! contract. Real, SDK-backed provider crates plug in the same trait;
//! credential loading for them is explicitly out of scope.

use crate::operation::{CreateInstancesPayload, CreatedInstance, ProviderOutcome};
use async_trait::async_trait;
use brk_domain::BrokerError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// All provider backends implement this trait. One instance per
/// configured [`brk_proto::ProviderInstance`].
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_instances(
        &self,
        payload: &CreateInstancesPayload,
    ) -> Result<ProviderOutcome, BrokerError>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<ProviderOutcome, BrokerError>;

    async fn health_check(&self) -> Result<bool, BrokerError>;

    fn capabilities(&self) -> Vec<String>;
}

// ─── Simulated backend ──────────────────────────────────────────────────────

/// An in-memory backend that "provisions" instances instantly. Used in
/// tests, local development, and as the default when no real backend is
/// configured for a provider instance.
pub struct SimulatedProvider {
    name: String,
    capabilities: Vec<String>,
    next_id: AtomicU64,
    /// When set, every `create_instances` call fails with this error
    /// (used to exercise retry/fallback/circuit-breaker paths in tests).
    fail_with: Mutex<Option<BrokerError>>,
    healthy: Mutex<bool>,
    instances: Mutex<HashMap<String, CreatedInstance>>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: vec!["standard".to_string()],
            next_id: AtomicU64::new(1),
            fail_with: Mutex::new(None),
            healthy: Mutex::new(true),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Test hook: make every subsequent `create_instances` call fail.
    pub fn set_failing(&self, error: Option<BrokerError>) {
        *self.fail_with.lock() = error;
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock() = healthy;
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_instances(
        &self,
        payload: &CreateInstancesPayload,
    ) -> Result<ProviderOutcome, BrokerError> {
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        let instance_type = payload
            .instance_types
            .first()
            .cloned()
            .unwrap_or_else(|| "generic.small".to_string());
        let mut created = Vec::with_capacity(payload.count as usize);
        let mut instances = self.instances.lock();
        for _ in 0..payload.count {
            let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
            let instance = CreatedInstance {
                instance_id: format!("{}-i-{}-{}", self.name, seq, Uuid::new_v4().simple()),
                instance_type: instance_type.clone(),
                private_ip: Some(format!("10.0.{}.{}", seq / 256, seq % 256)),
                public_ip: None,
            };
            instances.insert(instance.instance_id.clone(), instance.clone());
            created.push(instance);
        }
        let raw_ids = created.iter().map(|c| c.instance_id.clone()).collect();
        Ok(ProviderOutcome {
            created_instances: created,
            terminated_instance_ids: Vec::new(),
            raw_provider_ids: raw_ids,
            diagnostics: Vec::new(),
        })
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<ProviderOutcome, BrokerError> {
        let mut instances = self.instances.lock();
        let mut terminated = Vec::new();
        for id in instance_ids {
            if instances.remove(id).is_some() {
                terminated.push(id.clone());
            }
        }
        Ok(ProviderOutcome {
            terminated_instance_ids: terminated,
            ..Default::default()
        })
    }

    async fn health_check(&self) -> Result<bool, BrokerError> {
        Ok(*self.healthy.lock())
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }
}

// ─── Generic REST backend ───────────────────────────────────────────────────

/// A generic REST-backed provider for clouds exposing a simple
/// create/list/delete JSON API (`POST {base_url}/instances`,
/// `DELETE {base_url}/instances/{id}`, `GET {base_url}/health`).
pub struct RestProvider {
    name: String,
    base_url: String,
    api_key: String,
    capabilities: Vec<String>,
    client: reqwest::Client,
}

impl RestProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            capabilities: vec!["standard".to_string()],
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn classify_http_error(status: reqwest::StatusCode, body: String) -> BrokerError {
        if status.as_u16() == 429 || status.is_server_error() {
            BrokerError::ProviderTransient {
                code: status.to_string(),
                message: body,
            }
        } else {
            BrokerError::ProviderPermanent {
                code: status.to_string(),
                message: body,
            }
        }
    }
}

#[async_trait]
impl Provider for RestProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_instances(
        &self,
        payload: &CreateInstancesPayload,
    ) -> Result<ProviderOutcome, BrokerError> {
        let response = self
            .client
            .post(format!("{}/instances", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| BrokerError::ProviderTransient {
                code: "connect_error".to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http_error(status, body));
        }

        response
            .json::<ProviderOutcome>()
            .await
            .map_err(|e| BrokerError::Internal(format!("malformed provider response: {e}")))
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<ProviderOutcome, BrokerError> {
        let mut terminated = Vec::new();
        for id in instance_ids {
            let response = self
                .client
                .delete(format!("{}/instances/{}", self.base_url, id))
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|e| BrokerError::ProviderTransient {
                    code: "connect_error".to_string(),
                    message: e.to_string(),
                })?;
            if response.status().is_success() {
                terminated.push(id.clone());
            } else if !response.status().is_client_error() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Self::classify_http_error(status, body));
            }
        }
        Ok(ProviderOutcome {
            terminated_instance_ids: terminated,
            ..Default::default()
        })
    }

    async fn health_check(&self) -> Result<bool, BrokerError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BrokerError::ProviderTransient {
                code: "connect_error".to_string(),
                message: e.to_string(),
            })?;
        Ok(response.status().is_success())
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }
}
