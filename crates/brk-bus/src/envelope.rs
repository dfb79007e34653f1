//! The structured outcome every dispatched message returns (spec §4.4).

use brk_domain::{BrokerError, BrokerResult};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// The original error, kept for in-process `into_result()` callers.
    /// Never serialized onto the wire envelope.
    #[serde(skip)]
    error: Option<BrokerError>,
}

impl<T> Envelope<T> {
    pub fn ok(value: T) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error_kind: None,
            message: None,
            details: None,
            retryable: None,
            error: None,
        }
    }

    pub fn from_error(error: BrokerError) -> Self {
        Self {
            ok: false,
            value: None,
            error_kind: Some(error.kind().to_string()),
            message: Some(error.to_string()),
            details: None,
            retryable: Some(error.is_retryable()),
            error: Some(error),
        }
    }

    pub fn from_result(result: BrokerResult<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(err) => Self::from_error(err),
        }
    }

    /// Convert back into a [`BrokerResult`] for in-process callers that
    /// want `?`-propagation instead of inspecting the envelope fields.
    pub fn into_result(self) -> BrokerResult<T> {
        if self.ok {
            Ok(self.value.expect("ok envelope always carries a value"))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| BrokerError::Internal("unknown bus error".to_string())))
        }
    }
}
