//! Handler dispatch, template resolution, and native-spec rendering.
//!
//! [`handler::HandlerRegistry`] maps a [`brk_proto::ProviderApi`] to its
//! dispatcher; [`template::TemplateCache`] resolves the on-disk template
//! set with discovery, priority merge, and TTL caching;
//! [`native_spec::render`] handles the optional per-template native-spec
//! override.

#![forbid(unsafe_code)]

pub mod handler;
pub mod native_spec;
pub mod template;

pub use handler::{Handler, HandlerDeps, HandlerRegistry, HandlerResult};
pub use native_spec::{NativeSpecSettings, RenderContext, RenderLimits};
pub use template::{TemplateCache, TemplateSection};
