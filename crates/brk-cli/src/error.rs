use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] brk_config::ConfigError),

    #[error(transparent)]
    Wiring(#[from] brk_config::WiringError),

    #[error("no scheduler strategy named '{0}'")]
    UnknownScheduler(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("'{0}' is not implemented: the REST/MCP transports are external to this workspace")]
    Unimplemented(&'static str),
}
