//! Action response shape
//!
//! Mirrors what the hosting framework expects back from an action handler:
//! a human-readable `text`, flat `values` for templating, and structured
//! `data` for downstream consumers.

use clob_core::ClobError;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Default)]
pub struct ActionResponse {
    pub text: String,
    pub values: Map<String, Value>,
    pub data: Map<String, Value>,
}

impl ActionResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        let mut response = Self {
            text: text.into(),
            ..Self::default()
        };
        response.values.insert("success".into(), Value::Bool(true));
        response
    }

    pub fn value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Render a failure. Degraded-mode failures (missing credentials or
    /// signing capability) read as feature-unavailable rather than broken.
    pub fn from_error(action: &str, err: &ClobError) -> Self {
        let text = if err.is_degraded_mode() {
            format!(
                "{} is unavailable: {}. Configure credentials to enable it.",
                action, err
            )
        } else {
            format!("{} failed: {}", action, err)
        };
        let mut response = Self {
            text,
            ..Self::default()
        };
        response.values.insert("success".into(), Value::Bool(false));
        response
            .values
            .insert("error".into(), Value::String(err.to_string()));
        if err.is_degraded_mode() {
            response.values.insert("degraded".into(), Value::Bool(true));
        }
        response
    }
}
