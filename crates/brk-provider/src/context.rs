//! [`ProviderContext`]: the Provider Strategy Engine's entry point.
//! Ties together a registry of configured providers, the active
//! selection policy/criteria, per-provider metrics, and per-provider
//! circuit breakers behind a single `execute()` call, running the full
//! policy set plus explicit back-pressure instead of one fixed strategy.

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::metrics::{MetricsSnapshot, ProviderMetrics};
use crate::operation::{OperationKind, ProviderOperation, ProviderOutcome, ProviderResult};
use crate::provider::Provider;
use crate::selection::{Candidate, RoundRobinCursor, SelectionCriteria, SelectionPolicy, select};
use brk_domain::{BrokerError, DomainEvent, EventPublisher, NullPublisher};
use brk_proto::{ProviderInstance, ProviderName};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use uuid::Uuid;

struct Registered {
    provider: Arc<dyn Provider>,
    instance: ProviderInstance,
    metrics: Arc<ProviderMetrics>,
    circuit: Arc<CircuitBreaker>,
    healthy: std::sync::atomic::AtomicBool,
}

/// Default ceiling on concurrent in-flight operations across all
/// registered providers before `Execute` rejects with `Saturated`
/// (spec §4.1 back-pressure, §6 `provider.max_in_flight`).
pub const DEFAULT_MAX_IN_FLIGHT: i64 = 50;

pub struct ProviderContext {
    registry: RwLock<HashMap<ProviderName, Registered>>,
    policy: RwLock<SelectionPolicy>,
    criteria: RwLock<SelectionCriteria>,
    cursor: RoundRobinCursor,
    circuit_config: CircuitBreakerConfig,
    max_in_flight: i64,
    total_in_flight: AtomicI64,
    events: Arc<dyn EventPublisher>,
}

impl ProviderContext {
    pub fn new(policy: SelectionPolicy, circuit_config: CircuitBreakerConfig) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            policy: RwLock::new(policy),
            criteria: RwLock::new(SelectionCriteria::default()),
            cursor: RoundRobinCursor::default(),
            circuit_config,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            total_in_flight: AtomicI64::new(0),
            events: Arc::new(NullPublisher),
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: i64) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Bind where `ProviderHealthChanged` events go when a circuit trips
    /// open or recovers (spec §4.3). Defaults to [`NullPublisher`].
    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    fn publish_health_change(&self, provider_name: &str, healthy: bool) {
        self.events.publish(DomainEvent::ProviderHealthChanged {
            provider_name: provider_name.to_string(),
            healthy,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
        });
    }

    /// Register (or replace) one backend under its configured name.
    pub fn register_strategy(&self, instance: ProviderInstance, provider: Arc<dyn Provider>) {
        let name = instance.name.clone();
        self.registry.write().insert(
            name,
            Registered {
                provider,
                instance,
                metrics: Arc::new(ProviderMetrics::new()),
                circuit: Arc::new(CircuitBreaker::new(self.circuit_config.clone())),
                healthy: std::sync::atomic::AtomicBool::new(true),
            },
        );
    }

    pub fn set_selection_policy(&self, policy: SelectionPolicy) {
        *self.policy.write() = policy;
    }

    pub fn set_selection_criteria(&self, criteria: SelectionCriteria) {
        *self.criteria.write() = criteria;
    }

    /// Poll every registered provider's `health_check` and record the
    /// result. Returns a name -> healthy snapshot for callers (e.g. a
    /// `GetAvailableTemplates`-style readiness probe).
    pub async fn check_health(&self) -> HashMap<ProviderName, bool> {
        let snapshot: Vec<(ProviderName, Arc<dyn Provider>)> = self
            .registry
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), r.provider.clone()))
            .collect();

        let mut results = HashMap::with_capacity(snapshot.len());
        for (name, provider) in snapshot {
            let healthy = provider.health_check().await.unwrap_or(false);
            if let Some(registered) = self.registry.read().get(&name) {
                registered.healthy.store(healthy, Ordering::Relaxed);
            }
            results.insert(name, healthy);
        }
        results
    }

    pub fn metrics(&self) -> HashMap<ProviderName, MetricsSnapshot> {
        self.registry
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), r.metrics.snapshot()))
            .collect()
    }

    /// Select an eligible provider and run `op` against it, updating
    /// metrics and circuit-breaker state. Back-pressure is enforced
    /// before selection: once `max_in_flight` concurrent operations are
    /// outstanding across all providers, further calls fail fast with
    /// `Saturated` rather than queuing indefinitely (spec §4.1, §7).
    pub async fn execute(&self, op: ProviderOperation) -> Result<ProviderResult, BrokerError> {
        if self.total_in_flight.fetch_add(1, Ordering::Relaxed) >= self.max_in_flight {
            self.total_in_flight.fetch_sub(1, Ordering::Relaxed);
            return Err(BrokerError::Saturated(format!(
                "provider context at capacity ({} in-flight)",
                self.max_in_flight
            )));
        }

        let outcome = self.execute_inner(&op).await;
        self.total_in_flight.fetch_sub(1, Ordering::Relaxed);
        outcome
    }

    async fn execute_inner(&self, op: &ProviderOperation) -> Result<ProviderResult, BrokerError> {
        // Selection and dispatch are split into two critical sections so
        // the registry lock is never held across an `.await` point.
        let chosen_name = {
            let registry = self.registry.read();
            let candidates: Vec<Candidate<'_>> = registry
                .values()
                .map(|r| Candidate {
                    instance: &r.instance,
                    metrics: &r.metrics,
                    healthy: r.healthy.load(Ordering::Relaxed),
                    circuit_open: !r.circuit.allow_call(),
                })
                .collect();

            let mut criteria = self.criteria.read().clone();
            if !op.required_capabilities.is_empty() {
                criteria
                    .required_capabilities
                    .extend(op.required_capabilities.iter().cloned());
            }

            select(*self.policy.read(), &candidates, &criteria, &self.cursor)
                .map(|instance| instance.name.clone())
        };

        let Some(name) = chosen_name else {
            return Err(BrokerError::Capacity(
                "no provider satisfies the active selection criteria".to_string(),
            ));
        };

        let (provider, metrics, circuit) = {
            let registry = self.registry.read();
            let registered = registry
                .get(&name)
                .expect("selected provider vanished from registry mid-call");
            (
                registered.provider.clone(),
                registered.metrics.clone(),
                registered.circuit.clone(),
            )
        };

        metrics.record_start();
        let started = Instant::now();
        let outcome = self.dispatch(provider.as_ref(), op).await;
        let latency = started.elapsed();
        metrics.record_complete(outcome.is_ok(), latency);

        match &outcome {
            Ok(_) => {
                if circuit.record_success() {
                    self.publish_health_change(&name, true);
                }
            }
            Err(err) if err.is_retryable() => {
                if circuit.record_failure() {
                    self.publish_health_change(&name, false);
                }
            }
            Err(_) => {}
        }

        Ok(ProviderResult {
            provider_name: name,
            outcome,
            latency,
        })
    }

    async fn dispatch(
        &self,
        provider: &dyn Provider,
        op: &ProviderOperation,
    ) -> Result<ProviderOutcome, BrokerError> {
        match op.kind {
            OperationKind::CreateInstances => {
                let payload = op
                    .create
                    .as_ref()
                    .ok_or_else(|| BrokerError::Internal("create operation missing payload".into()))?;
                provider.create_instances(payload).await
            }
            OperationKind::TerminateInstances => {
                let payload = op.terminate.as_ref().ok_or_else(|| {
                    BrokerError::Internal("terminate operation missing payload".into())
                })?;
                provider.terminate_instances(&payload.instance_ids).await
            }
            OperationKind::HealthCheck => {
                let healthy = provider.health_check().await?;
                Ok(ProviderOutcome {
                    diagnostics: vec![format!("healthy={healthy}")],
                    ..Default::default()
                })
            }
            OperationKind::GetCapabilities => Ok(ProviderOutcome {
                diagnostics: provider.capabilities(),
                ..Default::default()
            }),
            OperationKind::GetInstanceStatus | OperationKind::ValidateTemplate | OperationKind::GetAvailableTemplates => {
                Err(BrokerError::Internal(format!(
                    "{:?} is not dispatched through ProviderContext::execute",
                    op.kind
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::CreateInstancesPayload;
    use crate::provider::SimulatedProvider;
    use std::collections::HashMap as StdHashMap;

    fn instance(name: &str) -> ProviderInstance {
        ProviderInstance {
            name: name.to_string(),
            kind: "simulated".to_string(),
            enabled: true,
            priority: 0,
            weight: 1,
            capabilities: vec![],
            config: StdHashMap::new(),
            health_check: Default::default(),
        }
    }

    fn create_payload() -> CreateInstancesPayload {
        CreateInstancesPayload {
            template_id: "t1".into(),
            count: 2,
            image_id: "ami-1".into(),
            instance_types: vec!["m5.large".into()],
            abis: None,
            subnet_ids: vec![],
            security_group_ids: vec![],
            tags: StdHashMap::new(),
            native_spec: None,
        }
    }

    #[tokio::test]
    async fn executes_against_the_only_registered_provider() {
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, CircuitBreakerConfig::default());
        ctx.register_strategy(instance("p1"), Arc::new(SimulatedProvider::new("p1")));

        let op = ProviderOperation::create_instances("req-1", create_payload());
        let result = ctx.execute(op).await.unwrap();
        assert_eq!(result.provider_name, "p1");
        assert!(result.is_success());
        assert_eq!(ctx.metrics()["p1"].successes, 1);
    }

    #[tokio::test]
    async fn empty_registry_returns_capacity_error_without_touching_metrics() {
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, CircuitBreakerConfig::default());
        let op = ProviderOperation::create_instances("req-1", create_payload());
        let err = ctx.execute(op).await.unwrap_err();
        assert!(matches!(err, BrokerError::Capacity(_)));
        assert!(ctx.metrics().is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit_and_then_reject_locally() {
        let config = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 2,
            recovery_timeout: std::time::Duration::from_secs(30),
            half_open_max_calls: 1,
        };
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, config);
        let provider = Arc::new(SimulatedProvider::new("p1"));
        provider.set_failing(Some(BrokerError::ProviderTransient {
            code: "Throttling".into(),
            message: "slow down".into(),
        }));
        ctx.register_strategy(instance("p1"), provider);

        for _ in 0..2 {
            let op = ProviderOperation::create_instances("req-1", create_payload());
            let result = ctx.execute(op).await.unwrap();
            assert!(!result.is_success());
        }

        // Circuit should now be open; selection excludes p1 entirely.
        let op = ProviderOperation::create_instances("req-1", create_payload());
        let err = ctx.execute(op).await.unwrap_err();
        assert!(matches!(err, BrokerError::Capacity(_)));
    }

    #[tokio::test]
    async fn saturation_rejects_beyond_max_in_flight() {
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, CircuitBreakerConfig::default())
            .with_max_in_flight(0);
        ctx.register_strategy(instance("p1"), Arc::new(SimulatedProvider::new("p1")));
        let op = ProviderOperation::create_instances("req-1", create_payload());
        let err = ctx.execute(op).await.unwrap_err();
        assert!(matches!(err, BrokerError::Saturated(_)));
    }

    #[derive(Default)]
    struct RecordingPublisher(parking_lot::Mutex<Vec<DomainEvent>>);

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: DomainEvent) {
            self.0.lock().push(event);
        }
    }

    #[tokio::test]
    async fn circuit_opening_publishes_provider_health_changed() {
        let config = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 2,
            recovery_timeout: std::time::Duration::from_secs(30),
            half_open_max_calls: 1,
        };
        let events = Arc::new(RecordingPublisher::default());
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, config).with_event_publisher(events.clone());
        let provider = Arc::new(SimulatedProvider::new("p1"));
        provider.set_failing(Some(BrokerError::ProviderTransient {
            code: "Throttling".into(),
            message: "slow down".into(),
        }));
        ctx.register_strategy(instance("p1"), provider);

        for _ in 0..2 {
            let op = ProviderOperation::create_instances("req-1", create_payload());
            ctx.execute(op).await.unwrap();
        }

        let recorded = events.0.lock();
        assert_eq!(
            recorded
                .iter()
                .filter(|e| matches!(e, DomainEvent::ProviderHealthChanged { healthy: false, .. }))
                .count(),
            1,
            "the trip must publish exactly once, on the call that opens the circuit"
        );
    }

    #[tokio::test]
    async fn circuit_recovery_publishes_provider_health_changed_true() {
        let config = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            recovery_timeout: std::time::Duration::from_millis(10),
            half_open_max_calls: 1,
        };
        let events = Arc::new(RecordingPublisher::default());
        let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, config).with_event_publisher(events.clone());
        let provider = Arc::new(SimulatedProvider::new("p1"));
        provider.set_failing(Some(BrokerError::ProviderTransient {
            code: "Throttling".into(),
            message: "slow down".into(),
        }));
        ctx.register_strategy(instance("p1"), provider.clone());

        let op = ProviderOperation::create_instances("req-1", create_payload());
        ctx.execute(op).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        provider.set_failing(None);
        let op = ProviderOperation::create_instances("req-1", create_payload());
        ctx.execute(op).await.unwrap();

        let recorded = events.0.lock();
        assert!(
            recorded
                .iter()
                .any(|e| matches!(e, DomainEvent::ProviderHealthChanged { healthy: true, .. })),
            "recovery to a healthy provider must publish healthy=true"
        );
    }
}
