//! Broker performance benchmarks using Criterion.
//!
//! Run with: `cargo bench -p brk-bench`

use brk_handlers::handler::{DirectRunHandler, FleetHandler, Handler};
use brk_handlers::template::{TemplateSection, discover_and_merge};
use brk_proto::{AbisRequirements, ProviderApi, ProviderInstance, Range, Request, Template};
use brk_provider::{
    CircuitBreakerConfig, CreateInstancesPayload, ProviderContext, ProviderOperation, SelectionCriteria,
    SelectionPolicy, SimulatedProvider,
};
use brk_scheduler::SchedulerStrategy;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn sample_template(subnet_count: usize, abis: Option<AbisRequirements>) -> Template {
    Template {
        template_id: "bench-fleet".to_string(),
        provider_api: ProviderApi::Fleet,
        provider_name: None,
        image_id: "ami-bench".to_string(),
        instance_type: Some("m5.large".to_string()),
        instance_types: vec![],
        subnet_ids: (0..subnet_count).map(|i| format!("subnet-{i}")).collect(),
        security_group_ids: vec!["sg-bench".to_string()],
        key_name: None,
        user_data: None,
        tags: HashMap::new(),
        max_number: 500,
        abis_instance_requirements: abis,
        native_spec: Default::default(),
        source_priority: 1,
    }
}

fn provider_instance(name: &str, priority: i32) -> ProviderInstance {
    ProviderInstance {
        name: name.to_string(),
        kind: "simulated".to_string(),
        enabled: true,
        priority,
        weight: 1,
        capabilities: vec!["standard".to_string()],
        config: HashMap::new(),
        health_check: Default::default(),
    }
}

fn context_with_providers(count: usize, policy: SelectionPolicy) -> ProviderContext {
    let ctx = ProviderContext::new(policy, CircuitBreakerConfig::default());
    for i in 0..count {
        ctx.register_strategy(provider_instance(&format!("p{i}"), i as i32), Arc::new(SimulatedProvider::new(format!("p{i}"))));
    }
    ctx
}

// ─── bench_provider_selection ─────────────────────────────────────────────────

/// Score and select among 5 registered providers under `HealthBased`.
///
/// Called by `ProviderContext::execute` on every acquire/return dispatch.
fn bench_provider_selection(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = context_with_providers(5, SelectionPolicy::HealthBased);
    // Warm up metrics so HealthBased has a success rate to compare.
    rt.block_on(async {
        for _ in 0..5 {
            let op = ProviderOperation::create_instances("warmup", create_payload(1));
            let _ = ctx.execute(op).await;
        }
    });

    c.bench_function("provider_selection_health_based_5", |b| {
        b.to_async(&rt).iter(|| async {
            let op = ProviderOperation::create_instances("bench", create_payload(1));
            black_box(ctx.execute(op).await)
        });
    });
}

fn create_payload(count: u32) -> CreateInstancesPayload {
    CreateInstancesPayload {
        template_id: "bench".into(),
        count,
        image_id: "ami-bench".into(),
        instance_types: vec![],
        abis: None,
        subnet_ids: vec![],
        security_group_ids: vec![],
        tags: HashMap::new(),
        native_spec: None,
    }
}

// ─── bench_circuit_breaker_overhead ────────────────────────────────────────────

/// Measure the cost of one `execute()` call against a single healthy
/// provider — isolates selection + circuit-breaker bookkeeping overhead
/// from actual provider latency.
fn bench_circuit_breaker_overhead(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = ProviderContext::new(SelectionPolicy::FirstAvailable, CircuitBreakerConfig::default());
    ctx.register_strategy(provider_instance("p0", 0), Arc::new(SimulatedProvider::new("p0")));

    c.bench_function("circuit_breaker_single_provider_execute", |b| {
        b.to_async(&rt).iter(|| async {
            let op = ProviderOperation::create_instances("bench", create_payload(1));
            black_box(ctx.execute(op).await)
        });
    });
}

// ─── bench_fleet_handler_fanout ─────────────────────────────────────────────────

/// Dispatch an ABIS-bearing Fleet acquire across 8 subnets.
///
/// Called by `AppContext::acquire` once per template resolution.
fn bench_fleet_handler_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = context_with_providers(1, SelectionPolicy::FirstAvailable);
    let abis = AbisRequirements {
        vcpu_count: Range { min: 2, max: 8 },
        memory_mib: Range { min: 4096, max: 16384 },
        attribute_filters: HashMap::new(),
    };
    let template = sample_template(8, Some(abis));

    let handler = FleetHandler::default();
    c.bench_function("fleet_handler_abis_fanout_8_subnets", |b| {
        b.to_async(&rt).iter(|| async { black_box(handler.acquire(&ctx, "bench", &template, 64).await) });
    });
}

/// Dispatch a single-call DirectRun acquire for comparison against the
/// fan-out path above.
fn bench_direct_run_handler(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = context_with_providers(1, SelectionPolicy::FirstAvailable);
    let template = sample_template(0, None);

    let handler = DirectRunHandler::default();
    c.bench_function("direct_run_handler_single_call", |b| {
        b.to_async(&rt).iter(|| async { black_box(handler.acquire(&ctx, "bench", &template, 64).await) });
    });
}

// ─── bench_template_discovery ────────────────────────────────────────────────

/// Discover and merge 50 instance-level template files.
///
/// Run on startup and on every `TemplateCache` TTL expiry.
fn bench_template_discovery(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let templates: Vec<Template> = (0..50)
        .map(|i| {
            let mut t = sample_template(0, None);
            t.template_id = format!("tmpl-{i}");
            t
        })
        .collect();
    std::fs::write(dir.path().join("awsprov_templates.json"), serde_json::to_string(&templates).unwrap()).unwrap();
    // An instance-level file overriding half of them — exercises the
    // priority-merge path, not just the parse path.
    let overrides: Vec<Template> = (0..25)
        .map(|i| {
            let mut t = sample_template(0, None);
            t.template_id = format!("tmpl-{i}");
            t.max_number = 999;
            t
        })
        .collect();
    std::fs::write(dir.path().join("awsinst_templates.json"), serde_json::to_string(&overrides).unwrap()).unwrap();

    let section = TemplateSection {
        search_paths: vec![dir.path().to_path_buf()],
        cache_ttl: std::time::Duration::from_secs(300),
        legacy_single_file: false,
    };

    c.bench_function("template_discovery_merge_50", |b| {
        b.iter(|| black_box(discover_and_merge(&section, "aws").unwrap()));
    });
}

// ─── bench_scheduler_rendering ───────────────────────────────────────────────

/// Render a Request through both scheduler strategies' field-mapping.
///
/// Called once per row on every `brk request list` / `brk machine list`.
fn bench_scheduler_rendering(c: &mut Criterion) {
    let mut request = Request::new_acquire("bench-template".to_string(), 10);
    request.machine_ids = (0..10).map(|i| format!("m-{i}")).collect();

    c.bench_function("scheduler_render_request_default", |b| {
        b.iter(|| black_box(SchedulerStrategy::Default.render_request(&request)));
    });
    c.bench_function("scheduler_render_request_hostfactory", |b| {
        b.iter(|| black_box(SchedulerStrategy::HostFactory.render_request(&request)));
    });
}

fn bench_selection_criteria_filtering(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctx = context_with_providers(20, SelectionPolicy::CapabilityBased);
    ctx.set_selection_criteria(SelectionCriteria {
        min_success_rate: None,
        max_response_time_ms: None,
        require_healthy: true,
        required_capabilities: vec!["standard".to_string()],
    });

    c.bench_function("provider_selection_capability_filter_20", |b| {
        b.to_async(&rt).iter(|| async {
            let op = ProviderOperation::create_instances("bench", create_payload(1));
            black_box(ctx.execute(op).await)
        });
    });
}

// ─── Criterion groups ─────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_provider_selection,
    bench_circuit_breaker_overhead,
    bench_fleet_handler_fanout,
    bench_direct_run_handler,
    bench_template_discovery,
    bench_scheduler_rendering,
    bench_selection_criteria_filtering,
);
criterion_main!(benches);
