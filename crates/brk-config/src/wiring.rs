//! Composition root: turn one loaded [`BrokerConfig`] into the runtime
//! objects the CLI dispatches through.

use crate::load::BrokerConfig;
use brk_domain::EventPublisher;
use brk_handlers::{HandlerDeps, HandlerRegistry, NativeSpecSettings, TemplateCache};
use brk_provider::ProviderContext;
use brk_proto::NativeSpecMergeMode;
use brk_scheduler::SchedulerStrategy;
use std::sync::Arc;

pub struct Runtime {
    pub provider_context: ProviderContext,
    pub handlers: HandlerRegistry,
    pub templates: TemplateCache,
    pub scheduler_strategy: SchedulerStrategy,
}

/// Errors building a [`Runtime`] out of a [`BrokerConfig`]. Distinct from
/// [`crate::error::ConfigError`], which only covers file I/O and parsing.
#[derive(Debug, thiserror::Error)]
pub enum WiringError {
    #[error("unknown scheduler strategy '{0}'")]
    UnknownSchedulerStrategy(String),
}

impl BrokerConfig {
    /// Build the runtime objects this configuration describes. Provider
    /// health is not probed here; callers run [`ProviderContext::check_health`]
    /// once a reactor is running. `events` is threaded into both the
    /// Provider Strategy Engine (circuit-open/recovery notifications) and
    /// the handler registry (once-per-template ABIS warnings) so the
    /// caller binds a single publisher for the whole runtime.
    pub fn build_runtime(
        &self,
        default_provider: impl Into<std::sync::Arc<str>>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Runtime, WiringError> {
        let scheduler_strategy = SchedulerStrategy::parse(&self.scheduler.strategy)
            .ok_or_else(|| WiringError::UnknownSchedulerStrategy(self.scheduler.strategy.clone()))?;

        let provider_context = ProviderContext::new(
            self.provider.selection_policy,
            self.provider.circuit_breaker.to_runtime(),
        )
        .with_max_in_flight(self.provider.max_in_flight())
        .with_event_publisher(events.clone());

        let templates = TemplateCache::new(self.template.to_runtime(), default_provider);

        let merge_mode = if self.native_spec.enabled {
            self.native_spec.merge_mode()
        } else {
            NativeSpecMergeMode::None
        };
        let native_spec = NativeSpecSettings {
            merge_mode,
            limits: self.native_spec.render_limits(),
        };
        let handlers = HandlerRegistry::with_defaults(HandlerDeps::new(native_spec, events));

        Ok(Runtime {
            provider_context,
            handlers,
            templates,
            scheduler_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_wires_a_runtime() {
        let config = BrokerConfig::default();
        let runtime = config.build_runtime("simulated", Arc::new(brk_domain::NullPublisher)).unwrap();
        assert_eq!(runtime.provider_context.metrics().len(), 0);
    }

    #[test]
    fn unknown_scheduler_strategy_is_rejected() {
        let mut config = BrokerConfig::default();
        config.scheduler.strategy = "not-a-real-strategy".to_string();
        assert!(matches!(
            config.build_runtime("simulated", Arc::new(brk_domain::NullPublisher)),
            Err(WiringError::UnknownSchedulerStrategy(_))
        ));
    }
}
