//! Built-in response validation policy.
//!
//! Decides whether an upstream response is worth caching. The built-in
//! rules cover the two payload shapes the backend serves — JSON documents
//! and CSV exports — and are applied only to paths named in the
//! `[validation]` config table. Plugins can veto further via
//! [`ResponsePlugin::should_cache`](crate::plugin::ResponsePlugin::should_cache).
//!
//! A rejected response never replaces an existing entry and is surfaced
//! to waiters as [`ProxyError::ValidationRejected`](crate::ProxyError);
//! it does not feed backoff, since the backend did answer.

use bytes::Bytes;

use crate::config::ValidationConfig;

/// Minimum number of commas a CSV payload must contain.
pub const MIN_CSV_COMMAS: usize = 4;

/// Validator applying the built-in caching policy.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    config: ValidationConfig,
}

impl ResponseValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Check a payload against the policy for `path`.
    ///
    /// Returns `Err(reason)` when the response must not be cached. Paths
    /// not named in the config always pass.
    pub fn check(&self, path: &str, payload: &Bytes) -> std::result::Result<(), String> {
        if self.config.require_json_object.iter().any(|p| p == path) {
            return check_json_object(payload);
        }
        if self.config.csv_paths.iter().any(|p| p == path) {
            return check_csv(payload);
        }
        Ok(())
    }
}

/// The payload must decode to a JSON object. `null`, the literal string
/// `"null"`, and non-object documents are rejected.
fn check_json_object(payload: &Bytes) -> std::result::Result<(), String> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| format!("payload is not valid JSON: {e}"))?;
    match value {
        serde_json::Value::Null => Err("payload is null".to_string()),
        serde_json::Value::String(s) if s == "null" => {
            Err("payload is the string \"null\"".to_string())
        }
        serde_json::Value::Object(_) => Ok(()),
        other => Err(format!(
            "payload is not a JSON object (got {})",
            json_type_name(&other)
        )),
    }
}

/// The payload must be UTF-8 text with at least [`MIN_CSV_COMMAS`] commas.
fn check_csv(payload: &Bytes) -> std::result::Result<(), String> {
    let text = std::str::from_utf8(payload).map_err(|_| "payload is not text".to_string())?;
    let commas = text.bytes().filter(|&b| b == b',').count();
    if commas < MIN_CSV_COMMAS {
        return Err(format!(
            "payload has {commas} commas, expected at least {MIN_CSV_COMMAS}"
        ));
    }
    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
