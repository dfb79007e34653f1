//! Typed configuration sections matching the external config schema
//! (spec §6). Every optional field carries a `#[serde(default)]` so a
//! config file only needs to name what it's overriding, mirroring the
//! teacher's `NodeConfig::load`'s JSON-file-with-defaults pattern.

use brk_handlers::native_spec::RenderLimits;
use brk_handlers::template::TemplateSection as RuntimeTemplateSection;
use brk_proto::{NativeSpecMergeMode, ProviderInstance};
use brk_provider::{CircuitBreakerConfig, SelectionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_true() -> bool {
    true
}

// ─── provider.* ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_secs() -> u64 {
    30
}
fn default_half_open_max_calls() -> u32 {
    1
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerSection {
    pub fn to_runtime(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: self.enabled,
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

fn default_selection_policy() -> SelectionPolicy {
    SelectionPolicy::FirstAvailable
}
fn default_health_check_interval() -> u64 {
    60
}
fn default_max_in_flight() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_selection_policy")]
    pub selection_policy: SelectionPolicy,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: i64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub providers: Vec<ProviderInstance>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            selection_policy: default_selection_policy(),
            health_check_interval: default_health_check_interval(),
            max_in_flight: default_max_in_flight(),
            circuit_breaker: CircuitBreakerSection::default(),
            providers: Vec::new(),
        }
    }
}

impl ProviderSection {
    pub fn max_in_flight(&self) -> i64 {
        self.max_in_flight
    }
}

// ─── scheduler.* ────────────────────────────────────────────────────────────

fn default_scheduler_strategy() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_scheduler_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub field_mapping: HashMap<String, String>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            strategy: default_scheduler_strategy(),
            field_mapping: HashMap::new(),
        }
    }
}

// ─── storage.* ──────────────────────────────────────────────────────────────

fn default_storage_strategy() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            strategy: default_storage_strategy(),
            state_path: None,
        }
    }
}

// ─── template.* ─────────────────────────────────────────────────────────────

fn default_cache_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFileSection {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Opt-in to the deprecated `{provider}_templates.json` single-file
    /// naming convention (spec §9 Open Question resolution).
    #[serde(default)]
    pub legacy_single_file: bool,
}

impl Default for TemplateFileSection {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            legacy_single_file: false,
        }
    }
}

impl TemplateFileSection {
    pub fn to_runtime(&self) -> RuntimeTemplateSection {
        RuntimeTemplateSection {
            search_paths: self.paths.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            legacy_single_file: self.legacy_single_file,
        }
    }
}

// ─── native_spec.* ──────────────────────────────────────────────────────────

fn default_merge_mode() -> String {
    "extend".to_string()
}
fn default_cache_size() -> usize {
    256
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_recursion_depth() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingSection {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,
    #[serde(default = "default_true")]
    pub enable_auto_escape: bool,
}

impl Default for RenderingSection {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            timeout_seconds: default_timeout_seconds(),
            max_recursion_depth: default_max_recursion_depth(),
            enable_auto_escape: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingSection {
    #[serde(default)]
    pub fallback_to_legacy: bool,
    #[serde(default)]
    pub fail_fast_on_errors: bool,
}

impl Default for ErrorHandlingSection {
    fn default() -> Self {
        Self {
            fallback_to_legacy: true,
            fail_fast_on_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeSpecSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_merge_mode")]
    pub merge_mode: String,
    #[serde(default)]
    pub rendering: RenderingSection,
    #[serde(default)]
    pub error_handling: ErrorHandlingSection,
}

impl Default for NativeSpecSection {
    fn default() -> Self {
        Self {
            enabled: true,
            merge_mode: default_merge_mode(),
            rendering: RenderingSection::default(),
            error_handling: ErrorHandlingSection::default(),
        }
    }
}

impl NativeSpecSection {
    pub fn merge_mode(&self) -> NativeSpecMergeMode {
        match self.merge_mode.as_str() {
            "override" => NativeSpecMergeMode::Override,
            "none" => NativeSpecMergeMode::None,
            _ => NativeSpecMergeMode::Extend,
        }
    }

    pub fn render_limits(&self) -> RenderLimits {
        RenderLimits {
            auto_escape: self.rendering.enable_auto_escape,
            max_recursion_depth: self.rendering.max_recursion_depth,
            timeout: Duration::from_secs(self.rendering.timeout_seconds),
        }
    }
}
