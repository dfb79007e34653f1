//! Typed configuration for the compute-resource broker.
//!
//! One struct per concern, every field defaulted, loaded from a single
//! file: section nesting (one struct per
//! `provider`/`scheduler`/`storage`/`template`/`native_spec` table) with
//! JSON-or-YAML dispatch by extension.

#![forbid(unsafe_code)]

pub mod error;
pub mod load;
pub mod sections;
pub mod wiring;

pub use error::{ConfigError, ConfigResult};
pub use load::{BrokerConfig, ENV_PREFIX};
pub use sections::{
    CircuitBreakerSection, ErrorHandlingSection, NativeSpecSection, ProviderSection, RenderingSection,
    SchedulerSection, StorageSection, TemplateFileSection,
};
pub use wiring::{Runtime, WiringError};
