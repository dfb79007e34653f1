//! Handler dispatch: translates a resolved [`Template`] plus request
//! context into provider operations and back into machine-shaped results.
//!
//! One struct per handler kind implementing a shared [`Handler`] trait.

use crate::native_spec::{self, NativeSpecSettings, RenderContext};
use async_trait::async_trait;
use brk_domain::{BrokerError, DomainEvent, EventPublisher, NullPublisher};
use brk_proto::{AbisRequirements, ProviderApi, Template, TemplateId};
use brk_provider::{CreateInstancesPayload, CreatedInstance, ProviderContext, ProviderOperation};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// What a handler reports back after one dispatch attempt.
#[derive(Debug, Clone, Default)]
pub struct HandlerResult {
    pub created_instances: Vec<CreatedInstance>,
    pub terminated_instance_ids: Vec<String>,
    pub raw_provider_ids: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl From<brk_provider::ProviderOutcome> for HandlerResult {
    fn from(outcome: brk_provider::ProviderOutcome) -> Self {
        Self {
            created_instances: outcome.created_instances,
            terminated_instance_ids: outcome.terminated_instance_ids,
            raw_provider_ids: outcome.raw_provider_ids,
            diagnostics: outcome.diagnostics,
        }
    }
}

/// Every provider-api-specific dispatcher implements this. `key` is the
/// caller's request id, threaded through to the Provider Strategy Engine
/// for hash-based load balancing and passed back for error context.
#[async_trait]
pub trait Handler: Send + Sync {
    fn provider_api(&self) -> ProviderApi;

    async fn acquire(
        &self,
        ctx: &ProviderContext,
        key: &str,
        template: &Template,
        count: u32,
    ) -> Result<HandlerResult, BrokerError>;

    async fn release(
        &self,
        ctx: &ProviderContext,
        key: &str,
        instance_ids: Vec<String>,
    ) -> Result<HandlerResult, BrokerError>;
}

/// Split `count` as evenly as possible across `buckets`, remainder going
/// to the earliest buckets (used to fan ABIS-bearing create calls out
/// across subnets).
fn split_count(count: u32, buckets: usize) -> Vec<u32> {
    if buckets == 0 {
        return vec![count];
    }
    let base = count / buckets as u32;
    let remainder = count % buckets as u32;
    (0..buckets)
        .map(|i| base + u32::from((i as u32) < remainder))
        .collect()
}

/// Shared dependencies every handler needs beyond the per-call
/// `Template`/count: resolved native-spec render settings, where domain
/// events go, and a process-lifetime dedup set for the once-per-template
/// ABIS override warning (spec §8 boundary behavior).
#[derive(Clone)]
pub struct HandlerDeps {
    pub native_spec: NativeSpecSettings,
    pub events: Arc<dyn EventPublisher>,
    warned_abis_templates: Arc<Mutex<HashSet<TemplateId>>>,
}

impl HandlerDeps {
    pub fn new(native_spec: NativeSpecSettings, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            native_spec,
            events,
            warned_abis_templates: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn warn_abis_override_once(&self, template_id: &TemplateId) {
        if self.warned_abis_templates.lock().insert(template_id.clone()) {
            self.events.publish(DomainEvent::AbisOverrideWarning {
                template_id: template_id.clone(),
                timestamp: Utc::now(),
                correlation_id: Uuid::new_v4(),
            });
        }
    }
}

impl Default for HandlerDeps {
    fn default() -> Self {
        Self::new(NativeSpecSettings::default(), Arc::new(NullPublisher))
    }
}

async fn build_payload(
    template: &Template,
    count: u32,
    abis: Option<AbisRequirements>,
    key: &str,
    native_spec: &NativeSpecSettings,
) -> Result<CreateInstancesPayload, BrokerError> {
    let render_ctx = RenderContext {
        request_id: key.to_string(),
        template_id: template.template_id.clone(),
        requested_count: count,
        package_name: template.template_id.clone(),
    };
    let rendered = native_spec::render(
        template,
        render_ctx,
        native_spec.merge_mode,
        None,
        native_spec.limits.clone(),
    )
    .await?;
    Ok(CreateInstancesPayload {
        template_id: template.template_id.clone(),
        count,
        image_id: template.image_id.clone(),
        instance_types: template.effective_instance_types(),
        abis,
        subnet_ids: Vec::new(),
        security_group_ids: template.security_group_ids.clone(),
        tags: template.tags.clone(),
        native_spec: rendered,
    })
}

async fn terminate(ctx: &ProviderContext, key: &str, instance_ids: Vec<String>) -> Result<HandlerResult, BrokerError> {
    let op = ProviderOperation::terminate_instances(key, instance_ids);
    let result = ctx.execute(op).await?;
    result.outcome.map(HandlerResult::from)
}

// ─── FleetHandler ───────────────────────────────────────────────────────────

/// Batch of heterogeneous instance types across subnets. When ABIS is
/// present, one override is issued per subnet (spec §4.2).
#[derive(Clone, Default)]
pub struct FleetHandler {
    pub deps: HandlerDeps,
}

#[async_trait]
impl Handler for FleetHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::Fleet
    }

    async fn acquire(
        &self,
        ctx: &ProviderContext,
        key: &str,
        template: &Template,
        count: u32,
    ) -> Result<HandlerResult, BrokerError> {
        if !template.uses_abis() || template.subnet_ids.is_empty() {
            let mut payload = build_payload(
                template,
                count,
                template.abis_instance_requirements.clone(),
                key,
                &self.deps.native_spec,
            )
            .await?;
            payload.subnet_ids = template.subnet_ids.clone();
            let op = ProviderOperation::create_instances(key, payload);
            let result = ctx.execute(op).await?;
            return result.outcome.map(HandlerResult::from);
        }

        self.deps.warn_abis_override_once(&template.template_id);

        let mut aggregate = HandlerResult::default();
        for (subnet, share) in template
            .subnet_ids
            .iter()
            .zip(split_count(count, template.subnet_ids.len()))
        {
            if share == 0 {
                continue;
            }
            let mut payload = build_payload(
                template,
                share,
                template.abis_instance_requirements.clone(),
                key,
                &self.deps.native_spec,
            )
            .await?;
            payload.subnet_ids = vec![subnet.clone()];
            let op = ProviderOperation::create_instances(key, payload);
            let result = ctx.execute(op).await?;
            let outcome = result.outcome?;
            aggregate.created_instances.extend(outcome.created_instances);
            aggregate.raw_provider_ids.extend(outcome.raw_provider_ids);
            aggregate.diagnostics.extend(outcome.diagnostics);
        }
        aggregate
            .diagnostics
            .push(format!("abis_override_applied subnets={}", template.subnet_ids.len()));
        Ok(aggregate)
    }

    async fn release(&self, ctx: &ProviderContext, key: &str, instance_ids: Vec<String>) -> Result<HandlerResult, BrokerError> {
        terminate(ctx, key, instance_ids).await
    }
}

// ─── AutoScalingGroupHandler ────────────────────────────────────────────────

/// Creates or reuses a scaling group. When ABIS is present, emits a
/// mixed-instances policy referencing a launch template instead of an
/// enumerated instance-type list (spec §4.2).
#[derive(Clone, Default)]
pub struct AutoScalingGroupHandler {
    pub deps: HandlerDeps,
}

#[async_trait]
impl Handler for AutoScalingGroupHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::AutoScalingGroup
    }

    async fn acquire(
        &self,
        ctx: &ProviderContext,
        key: &str,
        template: &Template,
        count: u32,
    ) -> Result<HandlerResult, BrokerError> {
        let mut payload = build_payload(
            template,
            count,
            template.abis_instance_requirements.clone(),
            key,
            &self.deps.native_spec,
        )
        .await?;
        payload.subnet_ids = template.subnet_ids.clone();
        payload
            .tags
            .insert("brk.scaling_group_mode".to_string(), "mixed_instances".to_string());
        let op = ProviderOperation::create_instances(key, payload);
        let result = ctx.execute(op).await?;
        let mut handler_result = result.outcome.map(HandlerResult::from)?;
        if template.uses_abis() {
            self.deps.warn_abis_override_once(&template.template_id);
            handler_result
                .diagnostics
                .push("abis_override_applied mode=mixed_instances_policy".to_string());
        }
        Ok(handler_result)
    }

    async fn release(&self, ctx: &ProviderContext, key: &str, instance_ids: Vec<String>) -> Result<HandlerResult, BrokerError> {
        terminate(ctx, key, instance_ids).await
    }
}

// ─── SpotFleetHandler ───────────────────────────────────────────────────────

/// Requests spot capacity; mirrors [`FleetHandler`]'s ABIS behavior
/// (spec §4.2).
#[derive(Clone, Default)]
pub struct SpotFleetHandler {
    pub deps: HandlerDeps,
}

#[async_trait]
impl Handler for SpotFleetHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::SpotFleet
    }

    async fn acquire(
        &self,
        ctx: &ProviderContext,
        key: &str,
        template: &Template,
        count: u32,
    ) -> Result<HandlerResult, BrokerError> {
        FleetHandler { deps: self.deps.clone() }.acquire(ctx, key, template, count).await
    }

    async fn release(&self, ctx: &ProviderContext, key: &str, instance_ids: Vec<String>) -> Result<HandlerResult, BrokerError> {
        terminate(ctx, key, instance_ids).await
    }
}

// ─── DirectRunHandler ───────────────────────────────────────────────────────

/// Simplest path: a single launch call, no subnet fan-out.
#[derive(Clone, Default)]
pub struct DirectRunHandler {
    pub deps: HandlerDeps,
}

#[async_trait]
impl Handler for DirectRunHandler {
    fn provider_api(&self) -> ProviderApi {
        ProviderApi::DirectRun
    }

    async fn acquire(
        &self,
        ctx: &ProviderContext,
        key: &str,
        template: &Template,
        count: u32,
    ) -> Result<HandlerResult, BrokerError> {
        let mut payload = build_payload(
            template,
            count,
            template.abis_instance_requirements.clone(),
            key,
            &self.deps.native_spec,
        )
        .await?;
        payload.subnet_ids = template.subnet_ids.clone();
        let op = ProviderOperation::create_instances(key, payload);
        let result = ctx.execute(op).await?;
        result.outcome.map(HandlerResult::from)
    }

    async fn release(&self, ctx: &ProviderContext, key: &str, instance_ids: Vec<String>) -> Result<HandlerResult, BrokerError> {
        terminate(ctx, key, instance_ids).await
    }
}

/// Startup-populated lookup from `provider_api` to its handler, keyed
/// the way templates declare which dispatcher they use.
pub struct HandlerRegistry {
    handlers: HashMap<ProviderApi, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn with_defaults(deps: HandlerDeps) -> Self {
        let mut handlers: HashMap<ProviderApi, Box<dyn Handler>> = HashMap::new();
        handlers.insert(ProviderApi::Fleet, Box::new(FleetHandler { deps: deps.clone() }));
        handlers.insert(
            ProviderApi::AutoScalingGroup,
            Box::new(AutoScalingGroupHandler { deps: deps.clone() }),
        );
        handlers.insert(ProviderApi::SpotFleet, Box::new(SpotFleetHandler { deps: deps.clone() }));
        handlers.insert(ProviderApi::DirectRun, Box::new(DirectRunHandler { deps }));
        Self { handlers }
    }

    pub fn get(&self, provider_api: ProviderApi) -> Option<&dyn Handler> {
        self.handlers.get(&provider_api).map(|h| h.as_ref())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults(HandlerDeps::default())
    }
}
