//! End-to-end scenarios spanning persistence, the Provider Strategy
//! Engine, handler dispatch, and scheduler-strategy rendering together,
//! rather than any one crate in isolation.

use async_trait::async_trait;
use brk_domain::repository::PageRequest;
use brk_domain::{BrokerError, MachineRepository, RequestRepository, machine, request};
use brk_handlers::handler::{FleetHandler, Handler, HandlerDeps, HandlerRegistry};
use brk_handlers::template::{TemplateSection, discover_and_merge};
use brk_persist::{JsonMachineRepository, JsonRequestRepository};
use brk_proto::{AbisRequirements, Machine, MachineStatus, ProviderApi, ProviderInstance, Range, Request, Template};
use brk_provider::{
    CircuitBreakerConfig, CreateInstancesPayload, ProviderContext, ProviderOperation, ProviderOutcome, Provider,
    SelectionPolicy, SimulatedProvider,
};
use brk_scheduler::SchedulerStrategy;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

fn sample_template(subnets: Vec<&str>, abis: Option<AbisRequirements>) -> Template {
    Template {
        template_id: "web-fleet".into(),
        provider_api: ProviderApi::Fleet,
        provider_name: None,
        image_id: "ami-0001".into(),
        instance_type: Some("m5.large".into()),
        instance_types: vec![],
        subnet_ids: subnets.into_iter().map(String::from).collect(),
        security_group_ids: vec!["sg-1".into()],
        key_name: None,
        user_data: None,
        tags: HashMap::new(),
        max_number: 20,
        abis_instance_requirements: abis,
        native_spec: Default::default(),
        source_priority: 1,
    }
}

fn simulated_context() -> ProviderContext {
    let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, CircuitBreakerConfig::default());
    ctx.register_strategy(
        ProviderInstance {
            name: "sim".into(),
            kind: "simulated".into(),
            enabled: true,
            priority: 0,
            weight: 1,
            capabilities: vec![],
            config: HashMap::new(),
            health_check: Default::default(),
        },
        Arc::new(SimulatedProvider::new("sim")),
    );
    ctx
}

#[tokio::test]
async fn acquire_then_return_round_trips_through_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let requests = JsonRequestRepository::new(dir.path());
    let machines = JsonMachineRepository::new(dir.path());
    let ctx = simulated_context();
    let registry = HandlerRegistry::with_defaults(HandlerDeps::default());
    let handler = registry.get(ProviderApi::Fleet).unwrap();
    let template = sample_template(vec!["subnet-a", "subnet-b"], None);

    let mut req = Request::new_acquire(template.template_id.clone(), 4);
    request::submit(&mut req, Uuid::new_v4());
    let dispatched = handler.acquire(&ctx, &req.request_id, &template, 4).await.unwrap();
    assert_eq!(dispatched.created_instances.len(), 4);

    let mut created_ids = Vec::new();
    for created in &dispatched.created_instances {
        let machine = Machine {
            machine_id: Uuid::new_v4().to_string(),
            request_id: req.request_id.clone(),
            template_id: template.template_id.clone(),
            provider_name: "sim".into(),
            instance_id: created.instance_id.clone(),
            instance_type: created.instance_type.clone(),
            private_ip: created.private_ip.clone(),
            public_ip: None,
            status: MachineStatus::Building,
            launch_time: chrono::Utc::now(),
            last_status_check: None,
            version: 0,
        };
        machines.save(&machine, None).await.unwrap();
        created_ids.push(machine.machine_id);
    }
    let outcome = request::resolve_handler_outcome(&mut req, created_ids.clone(), vec![], 4, true, Uuid::new_v4());
    assert!(!outcome.already_terminal);
    requests.save(&req, None).await.unwrap();

    let reloaded = requests.find_by_id(&req.request_id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, brk_proto::RequestStatus::Completed);
    assert_eq!(machines.find_by_request(&req.request_id).await.unwrap().len(), 4);

    let instance_ids: Vec<String> = dispatched.created_instances.iter().map(|c| c.instance_id.clone()).collect();
    let released = handler.release(&ctx, &req.request_id, instance_ids.clone()).await.unwrap();
    assert_eq!(released.terminated_instance_ids.len(), 4);

    for id in &created_ids {
        let mut m = machines.find_by_id(id).await.unwrap().unwrap();
        machine::apply_status(&mut m, MachineStatus::Terminated, Uuid::new_v4());
        machines.save(&m, Some(0)).await.unwrap();
    }
    machines.delete_for_request(&req.request_id).await.unwrap();
    assert!(machines.find_by_request(&req.request_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_fulfillment_is_tracked_separately_from_failure() {
    let template = sample_template(vec![], None);
    let mut req = Request::new_acquire(template.template_id.clone(), 5);
    request::submit(&mut req, Uuid::new_v4());

    // Three created, two diagnostics — a handler dispatch that came back
    // short rather than erroring outright.
    let created_ids = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
    let errors = vec![
        brk_proto::RequestError { kind: "provider_diagnostic".into(), message: "quota".into(), machine_id: None },
        brk_proto::RequestError { kind: "provider_diagnostic".into(), message: "quota".into(), machine_id: None },
    ];
    let outcome = request::resolve_handler_outcome(&mut req, created_ids, errors, 5, true, Uuid::new_v4());
    assert!(!outcome.already_terminal);
    assert_eq!(req.status, brk_proto::RequestStatus::Partial);
    assert_eq!(SchedulerStrategy::Default.exit_code(req.status), 1);
    assert_eq!(SchedulerStrategy::HostFactory.exit_code(req.status), 1);
}

struct CountingProvider {
    inner: SimulatedProvider,
    calls: AtomicU64,
}

#[async_trait]
impl Provider for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_instances(&self, payload: &CreateInstancesPayload) -> Result<ProviderOutcome, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_instances(payload).await
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<ProviderOutcome, BrokerError> {
        self.inner.terminate_instances(instance_ids).await
    }

    async fn health_check(&self) -> Result<bool, BrokerError> {
        self.inner.health_check().await
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

#[tokio::test]
async fn circuit_breaker_stops_forwarding_calls_to_the_provider_once_open() {
    let counting = Arc::new(CountingProvider {
        inner: SimulatedProvider::new("flaky"),
        calls: AtomicU64::new(0),
    });
    counting.inner.set_failing(Some(BrokerError::ProviderTransient { code: "5xx".into(), message: "down".into() }));

    let config = CircuitBreakerConfig { enabled: true, failure_threshold: 3, ..CircuitBreakerConfig::default() };
    let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, config);
    ctx.register_strategy(
        ProviderInstance {
            name: "flaky".into(),
            kind: "simulated".into(),
            enabled: true,
            priority: 0,
            weight: 1,
            capabilities: vec![],
            config: HashMap::new(),
            health_check: Default::default(),
        },
        counting.clone(),
    );

    let payload = CreateInstancesPayload {
        template_id: "t1".into(),
        count: 1,
        image_id: "ami-1".into(),
        instance_types: vec![],
        abis: None,
        subnet_ids: vec![],
        security_group_ids: vec![],
        tags: HashMap::new(),
        native_spec: None,
    };

    for _ in 0..3 {
        let op = ProviderOperation::create_instances("req-1", payload.clone());
        assert!(ctx.execute(op).await.is_err());
    }
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

    // Circuit is now open; this call must not reach the provider at all.
    let op = ProviderOperation::create_instances("req-1", payload.clone());
    assert!(ctx.execute(op).await.is_err());
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3, "a tripped circuit must reject locally");
}

#[tokio::test]
async fn template_discovery_merges_by_source_priority() {
    let dir = tempfile::tempdir().unwrap();
    let provider = "aws";

    std::fs::write(
        dir.path().join(format!("{provider}prov_templates.json")),
        serde_json::to_string(&vec![sample_template(vec![], None)]).unwrap(),
    )
    .unwrap();

    let mut overridden = sample_template(vec![], None);
    overridden.max_number = 99;
    std::fs::write(
        dir.path().join(format!("{provider}inst_templates.json")),
        serde_json::to_string(&vec![overridden]).unwrap(),
    )
    .unwrap();

    let section = TemplateSection {
        search_paths: vec![dir.path().to_path_buf()],
        cache_ttl: std::time::Duration::from_secs(60),
        legacy_single_file: false,
    };
    let merged = discover_and_merge(&section, provider).unwrap();
    assert_eq!(merged.get("web-fleet").unwrap().max_number, 99, "instance-level file must win over provider-level");
}

#[tokio::test]
async fn abis_requirements_suppress_enumerated_instance_types_end_to_end() {
    let ctx = simulated_context();
    let abis = AbisRequirements {
        vcpu_count: Range { min: 2, max: 8 },
        memory_mib: Range { min: 4096, max: 16384 },
        attribute_filters: HashMap::new(),
    };
    let template = sample_template(vec!["subnet-a", "subnet-b"], Some(abis));
    assert!(template.effective_instance_types().is_empty());

    let result = FleetHandler::default().acquire(&ctx, "req-abis", &template, 6).await.unwrap();
    assert_eq!(result.created_instances.len(), 6);
    assert!(result.diagnostics.iter().any(|d| d.contains("abis_override_applied")));
}

#[tokio::test]
async fn cancelling_a_completed_request_is_a_no_op_but_cleanup_can_still_run() {
    let dir = tempfile::tempdir().unwrap();
    let requests = JsonRequestRepository::new(dir.path());
    let ctx = simulated_context();
    let template = sample_template(vec![], None);

    let mut req = Request::new_acquire(template.template_id.clone(), 3);
    request::submit(&mut req, Uuid::new_v4());
    let handler = FleetHandler::default();
    let dispatched = handler.acquire(&ctx, &req.request_id, &template, 3).await.unwrap();
    let created_ids: Vec<String> = dispatched.created_instances.iter().map(|c| c.instance_id.clone()).collect();
    request::resolve_handler_outcome(&mut req, created_ids.clone(), vec![], 3, true, Uuid::new_v4());
    req.machine_ids = created_ids.clone();
    requests.save(&req, None).await.unwrap();

    let cancel_outcome = request::cancel(&mut req, Uuid::new_v4());
    // A completed request is terminal: cancel is a no-op, matching the
    // idempotence rule that terminal transitions never re-fire.
    assert!(cancel_outcome.already_terminal);
    assert_eq!(req.machine_ids, created_ids);

    let released = handler.release(&ctx, &req.request_id, created_ids).await.unwrap();
    assert_eq!(released.terminated_instance_ids.len(), 3);
}

#[tokio::test]
async fn request_listing_paginates_and_scheduler_renders_both_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let requests = JsonRequestRepository::new(dir.path());
    for i in 0..3 {
        let mut r = Request::new_acquire(format!("template-{i}"), 1);
        r.machine_ids = vec![format!("m-{i}")];
        requests.save(&r, None).await.unwrap();
    }
    let page = requests
        .find_all(&brk_domain::repository::RequestFilter::default(), &PageRequest { page: 0, limit: 2 })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let sample = &page[0];
    let default_rendered = SchedulerStrategy::Default.render_request(sample);
    let hf_rendered = SchedulerStrategy::HostFactory.render_request(sample);
    assert!(default_rendered.get("template_id").is_some());
    assert!(hf_rendered.get("templateId").is_some());
}
