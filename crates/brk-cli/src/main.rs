//! `brk` — compute-resource broker CLI.
//!
//! Loads a [`BrokerConfig`], wires a runtime out of it, builds the JSON
//! repositories and the audit/metrics sinks, and dispatches one
//! invocation through a [`Bus`] bound to [`app::AppContext`]. Request
//! output is rendered through the configured scheduler strategy so
//! callers see the field names and status vocabulary they asked for.

mod app;
mod cli;
mod error;

use app::{AcquireMachines, AppContext, CancelRequest, GetRequest, ListMachines, ListRequests, ListTemplates, ReturnMachines};
use brk_bus::{Bus, Envelope};
use brk_config::BrokerConfig;
use brk_domain::EventPublisher;
use brk_observe::{AuditLogger, BroadcastPublisher, MetricsExporter, OperationsMetrics};
use brk_persist::{JsonMachineRepository, JsonRequestRepository};
use brk_proto::{Machine, ProviderInstance, Request, RequestStatus};
use brk_provider::{BackoffConfig, Provider, RestProvider, SimulatedProvider};
use clap::Parser;
use cli::{Cli, Commands, MachineCommands, OutputFormat, RequestCommands, SystemCommands, TemplateCommands};
use error::CliError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Commands::Init { output } = &cli.command {
        write_sample_config(output)?;
        return Ok(());
    }

    let exit_code = run(cli).await?;
    std::process::exit(exit_code);
}

fn write_sample_config(output: &Path) -> anyhow::Result<()> {
    BrokerConfig::default().save(output).map_err(CliError::from)?;
    println!("Config written to {}", output.display());
    Ok(())
}

fn default_simulated_instance() -> ProviderInstance {
    ProviderInstance {
        name: "simulated".to_string(),
        kind: "simulated".to_string(),
        enabled: true,
        priority: 0,
        weight: 1,
        capabilities: vec!["standard".to_string()],
        config: HashMap::new(),
        health_check: Default::default(),
    }
}

fn build_provider(instance: &ProviderInstance) -> Arc<dyn Provider> {
    match instance.kind.as_str() {
        "rest" => {
            let base_url = instance.config.get("base_url").and_then(|v| v.as_str()).unwrap_or_default();
            let api_key = instance.config.get("api_key").and_then(|v| v.as_str()).unwrap_or_default();
            Arc::new(RestProvider::new(instance.name.clone(), base_url, api_key).with_capabilities(instance.capabilities.clone()))
        }
        _ => Arc::new(SimulatedProvider::new(instance.name.clone())),
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = BrokerConfig::load(&cli.config).map_err(CliError::from)?;
    if let Some(scheduler) = &cli.scheduler {
        config.scheduler.strategy = scheduler.clone();
    }

    let default_provider_name = config
        .provider
        .providers
        .iter()
        .find(|p| p.enabled)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "simulated".to_string());

    let audit = Arc::new(AuditLogger::default_capacity());
    let metrics = Arc::new(OperationsMetrics::new());
    let events: Arc<dyn EventPublisher> = Arc::new(BroadcastPublisher { audit: audit.clone(), metrics: metrics.clone() });

    let runtime = config.build_runtime(default_provider_name.clone(), events.clone()).map_err(CliError::from)?;

    if config.provider.providers.is_empty() {
        let instance = default_simulated_instance();
        let provider = build_provider(&instance);
        runtime.provider_context.register_strategy(instance, provider);
    } else {
        for instance in &config.provider.providers {
            if !instance.enabled {
                continue;
            }
            let provider = build_provider(instance);
            runtime.provider_context.register_strategy(instance.clone(), provider);
        }
    }

    let state_path = config.storage.state_path.clone().unwrap_or_else(|| PathBuf::from("/var/lib/brk"));
    let requests = Arc::new(JsonRequestRepository::new(&state_path));
    let machines = Arc::new(JsonMachineRepository::new(&state_path));

    let app = AppContext {
        requests,
        machines,
        provider_context: Arc::new(runtime.provider_context),
        handlers: Arc::new(runtime.handlers),
        templates: runtime.templates,
        events,
        default_provider: default_provider_name,
        partial_allowed: true,
        retry: BackoffConfig::default(),
    };

    let bus = Bus::new();
    bus.register_command_handler::<AcquireMachines, _>(app.clone());
    bus.register_command_handler::<ReturnMachines, _>(app.clone());
    bus.register_command_handler::<CancelRequest, _>(app.clone());
    bus.register_query_handler::<GetRequest, _>(app.clone());
    bus.register_query_handler::<ListRequests, _>(app.clone());
    bus.register_query_handler::<ListMachines, _>(app.clone());
    bus.register_query_handler::<ListTemplates, _>(app.clone());

    let scheduler_strategy = runtime.scheduler_strategy;
    let format = cli.format;

    match cli.command {
        Commands::Acquire { template_id, count } => {
            let envelope = bus.dispatch(AcquireMachines { template_id, count }).await;
            let exit_code = request_exit_code(&envelope, scheduler_strategy);
            print_request_envelope(&envelope, scheduler_strategy, format);
            Ok(exit_code)
        }
        Commands::Return { machine_ids } => {
            let envelope = bus.dispatch(ReturnMachines { machine_ids }).await;
            let exit_code = request_exit_code(&envelope, scheduler_strategy);
            print_request_envelope(&envelope, scheduler_strategy, format);
            Ok(exit_code)
        }
        Commands::Request { command } => match command {
            RequestCommands::Get { request_id } => {
                let envelope = bus.ask(GetRequest { request_id }).await;
                let exit_code = i32::from(!envelope.ok);
                print_value(
                    &envelope_to_value(&envelope, |found| {
                        found
                            .as_ref()
                            .map(|r| scheduler_strategy.render_request(r))
                            .unwrap_or(serde_json::Value::Null)
                    }),
                    format,
                );
                Ok(exit_code)
            }
            RequestCommands::List { status } => {
                let status = status.as_deref().and_then(parse_request_status);
                let envelope = bus.ask(ListRequests { request_type: None, status }).await;
                let exit_code = i32::from(!envelope.ok);
                print_value(
                    &envelope_to_value(&envelope, |list| render_requests(list, scheduler_strategy)),
                    format,
                );
                Ok(exit_code)
            }
        },
        Commands::Machine { command } => match command {
            MachineCommands::List { request_id } => {
                let envelope = bus.ask(ListMachines { request_id }).await;
                let exit_code = i32::from(!envelope.ok);
                print_value(
                    &envelope_to_value(&envelope, |list| render_machines(list, scheduler_strategy)),
                    format,
                );
                Ok(exit_code)
            }
        },
        Commands::Template { command } => match command {
            TemplateCommands::List => {
                let envelope = bus.ask(ListTemplates).await;
                let exit_code = i32::from(!envelope.ok);
                print_value(&envelope_to_value(&envelope, |templates| serde_json::json!(templates)), format);
                Ok(exit_code)
            }
        },
        Commands::System { command } => match command {
            SystemCommands::Metrics => {
                println!("{}", MetricsExporter::new(metrics.clone()).render());
                Ok(0)
            }
            SystemCommands::Audit { limit } => {
                let entries = audit.query(None, limit);
                print_value(&serde_json::json!(entries), format);
                Ok(0)
            }
            SystemCommands::Serve { port: _ } => Err(CliError::Unimplemented("system serve").into()),
        },
        Commands::Init { .. } => unreachable!("handled before wiring the runtime"),
    }
}

fn parse_request_status(raw: &str) -> Option<RequestStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase())).ok()
}

fn render_requests(requests: &[Request], strategy: brk_scheduler::SchedulerStrategy) -> serde_json::Value {
    serde_json::json!(requests.iter().map(|r| strategy.render_request(r)).collect::<Vec<_>>())
}

fn render_machines(machines: &[Machine], strategy: brk_scheduler::SchedulerStrategy) -> serde_json::Value {
    serde_json::json!(machines.iter().map(|m| strategy.render_machine(m)).collect::<Vec<_>>())
}

fn request_exit_code(envelope: &Envelope<Request>, strategy: brk_scheduler::SchedulerStrategy) -> i32 {
    match &envelope.value {
        Some(request) if envelope.ok => strategy.exit_code(request.status),
        _ => 1,
    }
}

fn print_request_envelope(envelope: &Envelope<Request>, strategy: brk_scheduler::SchedulerStrategy, format: OutputFormat) {
    let value = envelope_to_value(envelope, |request| strategy.render_request(request));
    print_value(&value, format);
}

fn envelope_to_value<T>(envelope: &Envelope<T>, render: impl FnOnce(&T) -> serde_json::Value) -> serde_json::Value {
    if envelope.ok {
        let data = envelope.value.as_ref().map(render).unwrap_or(serde_json::Value::Null);
        serde_json::json!({ "ok": true, "data": data })
    } else {
        serde_json::json!({
            "ok": false,
            "error_kind": envelope.error_kind,
            "message": envelope.message,
        })
    }
}

fn print_value(value: &serde_json::Value, format: OutputFormat) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::PrettyJson => serde_json::to_string_pretty(value),
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("failed to render output: {err}"),
    }
}
