//! Native-spec override resolution and placeholder rendering (spec §4.2).

use brk_domain::BrokerError;
use brk_proto::{NativeSpecMergeMode, NativeSpecOverride, Template};
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

/// Per-render bounds (spec §4.2, §6 `native_spec.*`).
#[derive(Debug, Clone)]
pub struct RenderLimits {
    pub auto_escape: bool,
    pub max_recursion_depth: u32,
    pub timeout: Duration,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            auto_escape: true,
            max_recursion_depth: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Resolved once from config and threaded into every handler dispatch
/// (spec §4.2, §6 `native_spec.*`).
#[derive(Debug, Clone, Default)]
pub struct NativeSpecSettings {
    pub merge_mode: NativeSpecMergeMode,
    pub limits: RenderLimits,
}

/// Parameters substituted into `{{placeholder}}` tokens.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub request_id: String,
    pub template_id: String,
    pub requested_count: u32,
    pub package_name: String,
}

impl RenderContext {
    fn lookup(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "request_id" => Some(self.request_id.clone()),
            "template_id" => Some(self.template_id.clone()),
            "requested_count" => Some(self.requested_count.to_string()),
            "timestamp" => Some(Utc::now().to_rfc3339()),
            "package_name" => Some(self.package_name.clone()),
            _ => None,
        }
    }
}

/// Resolve which native-spec source applies, in precedence order:
/// `provider_api_spec` > `provider_api_spec_file` > `launch_template_spec`
/// > `launch_template_spec_file` > no override (legacy fields only).
fn pick_source(spec: &NativeSpecOverride) -> Option<&Value> {
    spec.provider_api_spec
        .as_ref()
        .or(spec.launch_template_spec.as_ref())
}

/// `provider_api_spec_file`/`launch_template_spec_file` are resolved by
/// the caller (they name a path on disk); this module only renders an
/// already-loaded [`Value`].
pub fn resolve_source_value(spec: &NativeSpecOverride, loaded_file: Option<&Value>) -> Option<Value> {
    if let Some(inline) = pick_source(spec) {
        return Some(inline.clone());
    }
    loaded_file.cloned()
}

fn escape(raw: &str) -> String {
    raw.replace('"', "\\\"")
}

fn render_value(value: &Value, ctx: &RenderContext, limits: &RenderLimits, depth: u32) -> Result<Value, BrokerError> {
    if depth > limits.max_recursion_depth {
        return Err(BrokerError::Validation(format!(
            "native-spec render exceeded max recursion depth ({})",
            limits.max_recursion_depth
        )));
    }
    match value {
        Value::String(s) => Ok(Value::String(render_string(s, ctx, limits))),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>, BrokerError> = items
                .iter()
                .map(|item| render_value(item, ctx, limits, depth + 1))
                .collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                rendered.insert(key.clone(), render_value(val, ctx, limits, depth + 1)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(raw: &str, ctx: &RenderContext, limits: &RenderLimits) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let placeholder = after[..end].trim();
        match ctx.lookup(placeholder) {
            Some(value) if limits.auto_escape => out.push_str(&escape(&value)),
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("{{");
                out.push_str(placeholder);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Render a template's native-spec source (if any) against `ctx`,
/// enforcing `limits`. Returns `None` when the template's merge mode is
/// `None` or it carries no native-spec override at all.
pub async fn render(
    template: &Template,
    ctx: RenderContext,
    merge_mode: NativeSpecMergeMode,
    loaded_file: Option<Value>,
    limits: RenderLimits,
) -> Result<Option<Value>, BrokerError> {
    if matches!(merge_mode, NativeSpecMergeMode::None) {
        return Ok(None);
    }
    let Some(source) = resolve_source_value(&template.native_spec, loaded_file.as_ref()) else {
        return Ok(None);
    };

    let timeout = limits.timeout;
    let rendered = tokio::time::timeout(timeout, async {
        render_value(&source, &ctx, &limits, 0)
    })
    .await
    .map_err(|_| BrokerError::Timeout(timeout.as_millis() as u64))??;

    Ok(Some(rendered))
}
