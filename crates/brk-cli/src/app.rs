//! Commands and queries the CLI dispatches through [`brk_bus::Bus`].
//!
//! This is the composition-root-adjacent orchestration layer: it owns no
//! state of its own, only the glue between the Request/Machine state
//! machines (`brk-domain`), persistence (`brk-persist`), the Provider
//! Strategy Engine (`brk-provider`), and handler dispatch (`brk-handlers`).

use async_trait::async_trait;
use brk_bus::{Command, CommandHandler, Query, QueryHandler};
use brk_domain::repository::{PageRequest, RequestFilter};
use brk_domain::{BrokerError, BrokerResult, EventPublisher, MachineRepository, RequestRepository};
use brk_handlers::{HandlerRegistry, HandlerResult, TemplateCache};
use brk_proto::{Machine, MachineId, MachineStatus, ProviderName, Request, RequestError, RequestId, RequestStatus, RequestType, Template, TemplateId};
use brk_provider::{BackoffConfig, ProviderContext};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppContext {
    pub requests: Arc<dyn RequestRepository>,
    pub machines: Arc<dyn MachineRepository>,
    pub provider_context: Arc<ProviderContext>,
    pub handlers: Arc<HandlerRegistry>,
    pub templates: TemplateCache,
    pub events: Arc<dyn EventPublisher>,
    pub default_provider: ProviderName,
    pub partial_allowed: bool,
    pub retry: BackoffConfig,
}

impl AppContext {
    async fn resolve_template(&self, template_id: &TemplateId) -> BrokerResult<Template> {
        let templates = self.templates.resolve().await?;
        templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(format!("template '{template_id}' not found")))
    }

    /// Retry a handler dispatch on transient provider errors, honoring
    /// `self.retry`'s backoff and attempt cap (spec §4.1 Fallback
    /// `RetryThenFallback`, §4.2 dispatch ordering, §8 scenario 3).
    /// Each retry re-enters `ProviderContext::execute`, which reselects
    /// among registered providers — a tripped circuit breaker or a
    /// rotating policy naturally routes the next attempt to a fallback.
    /// A permanent error aborts immediately without further attempts.
    async fn dispatch_with_retry<F, Fut>(&self, mut attempt: F) -> BrokerResult<HandlerResult>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = BrokerResult<HandlerResult>>,
    {
        let mut last_err = BrokerError::Internal("no dispatch attempt made".to_string());
        for attempt_idx in 0..self.retry.max_attempts {
            match attempt().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let retryable = err.is_retryable();
                    last_err = err;
                    if !retryable {
                        return Err(last_err);
                    }
                    if attempt_idx + 1 < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt_idx)).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

// ─── AcquireMachines ────────────────────────────────────────────────────────

pub struct AcquireMachines {
    pub template_id: TemplateId,
    pub count: u32,
}

impl Command for AcquireMachines {
    type Output = Request;
}

#[async_trait]
impl CommandHandler<AcquireMachines> for AppContext {
    async fn handle(&self, command: AcquireMachines) -> BrokerResult<Request> {
        let correlation_id = Uuid::new_v4();
        let mut request = Request::new_acquire(command.template_id.clone(), command.count);
        self.events.publish(brk_domain::DomainEvent::RequestCreated {
            request_id: request.request_id.clone(),
            timestamp: request.created_at,
            correlation_id,
        });

        let template = match self.resolve_template(&command.template_id).await {
            Ok(template) => template,
            Err(err) => {
                let outcome = brk_domain::request::fail(
                    &mut request,
                    vec![RequestError { kind: err.kind().to_string(), message: err.to_string(), machine_id: None }],
                    correlation_id,
                );
                self.publish_if_any(outcome.event, correlation_id);
                self.requests.save(&request, None).await?;
                return Ok(request);
            }
        };

        if let Some(event) = brk_domain::request::submit(&mut request, correlation_id).event {
            self.events.publish(event);
        }
        request.provider_name = template.provider_name.clone().or_else(|| Some(self.default_provider.clone()));

        let Some(handler) = self.handlers.get(template.provider_api) else {
            let outcome = brk_domain::request::fail(
                &mut request,
                vec![RequestError {
                    kind: "internal".to_string(),
                    message: format!("no handler registered for provider api {:?}", template.provider_api),
                    machine_id: None,
                }],
                correlation_id,
            );
            self.publish_if_any(outcome.event, correlation_id);
            self.requests.save(&request, None).await?;
            return Ok(request);
        };

        let dispatch_result = self.dispatch_with_retry(|| handler.acquire(&self.provider_context, &request.request_id, &template, command.count)).await;
        let (created_ids, errors) = match dispatch_result {
            Ok(result) => {
                let mut created_ids = Vec::with_capacity(result.created_instances.len());
                for created in &result.created_instances {
                    let machine = Machine {
                        machine_id: Uuid::new_v4().to_string(),
                        request_id: request.request_id.clone(),
                        template_id: template.template_id.clone(),
                        provider_name: request.provider_name.clone().unwrap_or_default(),
                        instance_id: created.instance_id.clone(),
                        instance_type: created.instance_type.clone(),
                        private_ip: created.private_ip.clone(),
                        public_ip: created.public_ip.clone(),
                        status: MachineStatus::Building,
                        launch_time: chrono::Utc::now(),
                        last_status_check: None,
                        version: 0,
                    };
                    self.machines.save(&machine, None).await?;
                    self.events.publish(brk_domain::DomainEvent::MachineCreated {
                        machine_id: machine.machine_id.clone(),
                        request_id: request.request_id.clone(),
                        timestamp: machine.launch_time,
                        correlation_id,
                    });
                    created_ids.push(machine.machine_id);
                }
                let errors = result
                    .diagnostics
                    .into_iter()
                    .map(|message| RequestError { kind: "provider_diagnostic".to_string(), message, machine_id: None })
                    .collect();
                (created_ids, errors)
            }
            Err(err) => (
                Vec::new(),
                vec![RequestError { kind: err.kind().to_string(), message: err.to_string(), machine_id: None }],
            ),
        };

        let outcome = brk_domain::request::resolve_handler_outcome(
            &mut request,
            created_ids,
            errors,
            command.count,
            self.partial_allowed,
            correlation_id,
        );
        self.publish_if_any(outcome.event, correlation_id);
        self.requests.save(&request, None).await?;
        Ok(request)
    }

    fn invalidation_tags(&self) -> &'static [&'static str] {
        &["requests", "machines"]
    }
}

impl AppContext {
    fn publish_if_any(&self, event: Option<brk_domain::DomainEvent>, _correlation_id: Uuid) {
        if let Some(event) = event {
            self.events.publish(event);
        }
    }
}

// ─── ReturnMachines ─────────────────────────────────────────────────────────

pub struct ReturnMachines {
    pub machine_ids: Vec<MachineId>,
}

impl Command for ReturnMachines {
    type Output = Request;
}

#[async_trait]
impl CommandHandler<ReturnMachines> for AppContext {
    async fn handle(&self, command: ReturnMachines) -> BrokerResult<Request> {
        let correlation_id = Uuid::new_v4();
        let mut machines = Vec::with_capacity(command.machine_ids.len());
        for id in &command.machine_ids {
            if let Some(machine) = self.machines.find_by_id(id).await? {
                machines.push(machine);
            }
        }
        brk_domain::request::validate_return_references(
            &command.machine_ids,
            &machines.iter().map(|m| m.machine_id.clone()).collect::<Vec<_>>(),
        )?;

        let mut request = Request::new_return(command.machine_ids.clone());
        self.events.publish(brk_domain::DomainEvent::RequestCreated {
            request_id: request.request_id.clone(),
            timestamp: request.created_at,
            correlation_id,
        });
        if let Some(event) = brk_domain::request::submit(&mut request, correlation_id).event {
            self.events.publish(event);
        }

        let mut by_template: HashMap<TemplateId, Vec<String>> = HashMap::new();
        for machine in &machines {
            by_template.entry(machine.template_id.clone()).or_default().push(machine.instance_id.clone());
        }

        let mut released = Vec::new();
        let mut errors = Vec::new();
        for (template_id, instance_ids) in by_template {
            let template = match self.resolve_template(&template_id).await {
                Ok(template) => template,
                Err(err) => {
                    errors.push(RequestError { kind: err.kind().to_string(), message: err.to_string(), machine_id: None });
                    continue;
                }
            };
            let Some(handler) = self.handlers.get(template.provider_api) else {
                errors.push(RequestError {
                    kind: "internal".to_string(),
                    message: format!("no handler registered for provider api {:?}", template.provider_api),
                    machine_id: None,
                });
                continue;
            };
            match handler.release(&self.provider_context, &request.request_id, instance_ids).await {
                Ok(result) => released.extend(result.terminated_instance_ids),
                Err(err) => errors.push(RequestError { kind: err.kind().to_string(), message: err.to_string(), machine_id: None }),
            }
        }

        for machine in &machines {
            if released.contains(&machine.instance_id) {
                let mut updated = machine.clone();
                if let Some(event) = brk_domain::machine::apply_status(&mut updated, MachineStatus::Terminated, correlation_id) {
                    self.events.publish(event);
                }
                self.machines.save(&updated, Some(machine.version)).await?;
            }
        }

        let outcome = if errors.is_empty() {
            brk_domain::request::complete(&mut request, command.machine_ids.clone(), correlation_id)
        } else if released.is_empty() {
            brk_domain::request::fail(&mut request, errors, correlation_id)
        } else {
            brk_domain::request::partial(&mut request, command.machine_ids.clone(), errors, correlation_id)
        };
        self.publish_if_any(outcome.event, correlation_id);
        self.requests.save(&request, None).await?;
        Ok(request)
    }

    fn invalidation_tags(&self) -> &'static [&'static str] {
        &["requests", "machines"]
    }
}

// ─── CancelRequest ──────────────────────────────────────────────────────────

pub struct CancelRequest {
    pub request_id: RequestId,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub request: Request,
    pub already_terminal: bool,
}

impl Command for CancelRequest {
    type Output = CancelOutcome;
}

#[async_trait]
impl CommandHandler<CancelRequest> for AppContext {
    /// Cancelling a terminal Request is a no-op that reports success
    /// with `already_terminal=true` (spec §8 idempotence law). Cancelling
    /// an in-progress Acquire leaves any already-created Machines on
    /// record and issues a follow-up Return for them (spec §8 scenario 6).
    async fn handle(&self, command: CancelRequest) -> BrokerResult<CancelOutcome> {
        let correlation_id = Uuid::new_v4();
        let Some(mut request) = self.requests.find_by_id(&command.request_id).await? else {
            return Err(BrokerError::NotFound(format!("request '{}' not found", command.request_id)));
        };

        let outcome = brk_domain::request::cancel(&mut request, correlation_id);
        if outcome.already_terminal {
            return Ok(CancelOutcome { request, already_terminal: true });
        }
        self.publish_if_any(outcome.event, correlation_id);
        self.requests.save(&request, None).await?;

        if !request.machine_ids.is_empty() {
            let cleanup = ReturnMachines { machine_ids: request.machine_ids.clone() };
            if let Err(err) = CommandHandler::handle(self, cleanup).await {
                tracing::warn!(request_id = %request.request_id, error = %err, "follow-up return after cancel failed");
            }
        }

        Ok(CancelOutcome { request, already_terminal: false })
    }

    fn invalidation_tags(&self) -> &'static [&'static str] {
        &["requests", "machines"]
    }
}

// ─── Queries ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GetRequest {
    pub request_id: RequestId,
}

impl Query for GetRequest {
    type Output = Option<Request>;
}

#[async_trait]
impl QueryHandler<GetRequest> for AppContext {
    async fn handle(&self, query: &GetRequest) -> BrokerResult<Option<Request>> {
        self.requests.find_by_id(&query.request_id).await
    }
}

#[derive(Clone, Default)]
pub struct ListRequests {
    pub request_type: Option<RequestType>,
    pub status: Option<RequestStatus>,
}

impl Query for ListRequests {
    type Output = Vec<Request>;
}

#[async_trait]
impl QueryHandler<ListRequests> for AppContext {
    async fn handle(&self, query: &ListRequests) -> BrokerResult<Vec<Request>> {
        if let Some(status) = query.status {
            return self.requests.find_by_status(status).await;
        }
        let filter = RequestFilter { request_type: query.request_type, provider_name: None };
        self.requests.find_all(&filter, &PageRequest::all()).await
    }
}

#[derive(Clone, Default)]
pub struct ListMachines {
    pub request_id: Option<RequestId>,
}

impl Query for ListMachines {
    type Output = Vec<Machine>;
}

#[async_trait]
impl QueryHandler<ListMachines> for AppContext {
    async fn handle(&self, query: &ListMachines) -> BrokerResult<Vec<Machine>> {
        match &query.request_id {
            Some(request_id) => self.machines.find_by_request(request_id).await,
            None => self.machines.find_all(&PageRequest::all()).await,
        }
    }
}

#[derive(Clone)]
pub struct ListTemplates;

impl Query for ListTemplates {
    type Output = Vec<Template>;
}

#[async_trait]
impl QueryHandler<ListTemplates> for AppContext {
    async fn handle(&self, _query: &ListTemplates) -> BrokerResult<Vec<Template>> {
        let templates = self.templates.resolve().await?;
        let mut list: Vec<Template> = templates.into_values().collect();
        list.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        Ok(list)
    }
}
