//! Scheduler strategies: translate internal domain shape to a caller's
//! wire shape without altering semantics (spec §4.5).

use crate::field_map::{
    DEFAULT_FIELD_MAP, FieldMap, HOST_FACTORY_FIELD_MAP, host_factory_machine_status,
    host_factory_request_status, instance_type_attributes,
};
use brk_proto::{Machine, Request, RequestStatus};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStrategy {
    Default,
    /// `HF` is an alias for `HostFactory`, accepted by `parse`.
    HostFactory,
}

impl SchedulerStrategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "default" | "Default" => Some(Self::Default),
            "hostfactory" | "HostFactory" | "hf" | "HF" => Some(Self::HostFactory),
            _ => None,
        }
    }

    fn field_map(self) -> &'static FieldMap {
        match self {
            Self::Default => &DEFAULT_FIELD_MAP,
            Self::HostFactory => &HOST_FACTORY_FIELD_MAP,
        }
    }

    /// Process exit code for a terminal request status (spec §4.5).
    /// `HostFactory` treats `{Failed, Cancelled, Timeout, Partial}` as 1;
    /// `Default` treats any non-`Completed` status as 1.
    pub fn exit_code(self, status: RequestStatus) -> i32 {
        match self {
            Self::Default => i32::from(status != RequestStatus::Completed),
            Self::HostFactory => i32::from(matches!(
                status,
                RequestStatus::Failed | RequestStatus::Cancelled | RequestStatus::Timeout | RequestStatus::Partial
            )),
        }
    }

    /// Render a request into its wire form. Keys are inserted into a
    /// `serde_json::Map`, which is BTreeMap-backed by default, so output
    /// key order is stable and alphabetic regardless of insertion order
    /// (spec §4.5 determinism requirement).
    pub fn render_request(self, request: &Request) -> Value {
        let map = self.field_map();
        let mut out = Map::new();
        out.insert("request_id".to_string(), json!(request.request_id));
        out.insert(
            "status".to_string(),
            match self {
                Self::Default => json!(status_snake_case(request.status)),
                Self::HostFactory => json!(host_factory_request_status(request.status)),
            },
        );
        if let Some(template_id) = &request.template_id {
            out.insert(map.template_id_key.to_string(), json!(template_id));
        }
        if let Some(count) = request.machine_count {
            out.insert(map.max_number_key.to_string(), json!(count));
        }
        out.insert(map.machine_ids_key.to_string(), json!(request.machine_ids));
        Value::Object(out)
    }

    pub fn render_machine(self, machine: &Machine) -> Value {
        let map = self.field_map();
        let mut out = Map::new();
        out.insert(map.machine_id_key.to_string(), json!(machine.machine_id));
        out.insert("request_id".to_string(), json!(machine.request_id));
        out.insert(
            "status".to_string(),
            match self {
                Self::Default => json!(format!("{:?}", machine.status).to_lowercase()),
                Self::HostFactory => json!(host_factory_machine_status(machine.status)),
            },
        );
        if let Some(ip) = &machine.private_ip {
            out.insert(map.private_ip_key.to_string(), json!(ip));
        }
        if let Some(ip) = &machine.public_ip {
            out.insert(map.public_ip_key.to_string(), json!(ip));
        }

        match self {
            Self::Default => {
                out.insert(map.instance_type_key.to_string(), json!(machine.instance_type));
            }
            Self::HostFactory => {
                out.insert(map.instance_type_key.to_string(), json!(machine.instance_type));
                let attrs = instance_type_attributes(&machine.instance_type);
                out.insert("ncpus".to_string(), json!(attrs.ncpus));
                out.insert("nram".to_string(), json!(attrs.nram_mb));
            }
        }
        Value::Object(out)
    }
}

fn status_snake_case(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::InProgress => "in_progress",
        RequestStatus::Completed => "completed",
        RequestStatus::Failed => "failed",
        RequestStatus::Cancelled => "cancelled",
        RequestStatus::Partial => "partial",
        RequestStatus::Timeout => "timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        let mut r = Request::new_acquire("t1".into(), 3);
        r.status = RequestStatus::Partial;
        r.machine_ids = vec!["m1".into(), "m2".into()];
        r
    }

    #[test]
    fn hf_alias_parses_to_host_factory() {
        assert_eq!(SchedulerStrategy::parse("HF"), Some(SchedulerStrategy::HostFactory));
        assert_eq!(SchedulerStrategy::parse("hostfactory"), Some(SchedulerStrategy::HostFactory));
    }

    #[test]
    fn default_exit_code_is_1_for_anything_but_completed() {
        assert_eq!(SchedulerStrategy::Default.exit_code(RequestStatus::Partial), 1);
        assert_eq!(SchedulerStrategy::Default.exit_code(RequestStatus::Completed), 0);
    }

    #[test]
    fn host_factory_exit_code_matches_spec_set() {
        assert_eq!(SchedulerStrategy::HostFactory.exit_code(RequestStatus::Partial), 1);
        assert_eq!(SchedulerStrategy::HostFactory.exit_code(RequestStatus::Timeout), 1);
        assert_eq!(SchedulerStrategy::HostFactory.exit_code(RequestStatus::Completed), 0);
    }

    #[test]
    fn render_request_remaps_field_names_for_host_factory() {
        let rendered = SchedulerStrategy::HostFactory.render_request(&sample_request());
        let obj = rendered.as_object().unwrap();
        assert!(obj.contains_key("templateId"));
        assert!(obj.contains_key("maxNumber"));
        assert!(!obj.contains_key("template_id"));
    }

    #[test]
    fn render_request_keeps_snake_case_for_default() {
        let rendered = SchedulerStrategy::Default.render_request(&sample_request());
        let obj = rendered.as_object().unwrap();
        assert!(obj.contains_key("template_id"));
        assert!(obj.contains_key("max_number"));
    }

    #[test]
    fn rendering_is_deterministic_across_invocations() {
        let request = sample_request();
        let a = serde_json::to_string(&SchedulerStrategy::HostFactory.render_request(&request)).unwrap();
        let b = serde_json::to_string(&SchedulerStrategy::HostFactory.render_request(&request)).unwrap();
        assert_eq!(a, b);
    }
}
