//! Clap command tree (spec §6 External Interfaces).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "brk")]
#[command(about = "Compute-resource broker CLI")]
#[command(version)]
pub struct Cli {
    /// Path to the broker config file (JSON or YAML).
    #[arg(long, global = true, default_value = "/etc/brk/config.json")]
    pub config: PathBuf,

    /// Output renderer: `default` (snake_case) or `hf`/`hostfactory`
    /// (HostFactory-compatible field names and status vocabulary).
    /// Overrides the config file's `scheduler.strategy`.
    #[arg(long, global = true)]
    pub scheduler: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Log level for the tracing subscriber (off/error/warn/info/debug/trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    PrettyJson,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request new machines against a template.
    Acquire {
        template_id: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Return (terminate) machines by id.
    Return {
        machine_ids: Vec<String>,
    },

    /// Request lifecycle: get/list.
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },

    /// Machine lifecycle: list.
    Machine {
        #[command(subcommand)]
        command: MachineCommands,
    },

    /// Template discovery.
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Provider/operational metrics.
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// Write a sample config file.
    Init {
        #[arg(long, default_value = "/etc/brk/config.json")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum RequestCommands {
    Get { request_id: String },
    List {
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MachineCommands {
    List {
        #[arg(long)]
        request_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    List,
}

#[derive(Subcommand)]
pub enum SystemCommands {
    /// Prometheus text-format metrics snapshot.
    Metrics,
    /// Recent audit log entries.
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Bind a long-running transport (REST/MCP) in front of the bus.
    ///
    /// Not implemented: those transports are external collaborators per
    /// this workspace's scope. Documents the seam rather than binding one.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}
