//! Config file loading and environment overrides.
//!
//! Read the whole file, deserialize with per-field defaults, return.
//! Dispatches JSON vs YAML by extension, the same dispatch
//! `brk_handlers::template::classify` already uses for template files.

use crate::error::{ConfigError, ConfigResult};
use crate::sections::{NativeSpecSection, ProviderSection, SchedulerSection, StorageSection, TemplateFileSection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Canonical environment variable prefix. Legacy prefixes from prior
/// scheduler integrations (`HF_`, `ORB_`, `OHFP_`) are not read.
pub const ENV_PREFIX: &str = "BRK_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub template: TemplateFileSection,
    #[serde(default)]
    pub native_spec: NativeSpecSection,
}

impl BrokerConfig {
    /// Load from a JSON or YAML file, chosen by extension, then apply
    /// `BRK_*` environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(path, &raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse(path: &Path, raw: &str) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            }),
            Some("json") => serde_json::from_str(raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            }),
            _ => Err(ConfigError::UnsupportedExtension { path: path.to_path_buf() }),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let rendered = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })?
            }
            _ => serde_json::to_string_pretty(self)
                .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })?,
        };
        std::fs::write(path, rendered).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })
    }

    /// Overrides a small, explicitly-named set of fields from `BRK_*`
    /// environment variables. Anything not listed here is config-file-only.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}SCHEDULER_STRATEGY")) {
            self.scheduler.strategy = value;
        }
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}STORAGE_STRATEGY")) {
            self.storage.strategy = value;
        }
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}STORAGE_STATE_PATH")) {
            self.storage.state_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}TEMPLATE_CACHE_TTL_SECS")) {
            if let Ok(secs) = value.parse() {
                self.template.cache_ttl_secs = secs;
            }
        }
        if let Ok(value) = std::env::var(format!("{ENV_PREFIX}NATIVE_SPEC_ENABLED")) {
            self.native_spec.enabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
    }
}
