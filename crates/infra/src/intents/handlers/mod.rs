//! Built-in intent handlers.

pub mod agreement;
pub mod api_key;
pub mod asset;
pub mod container;
pub mod entity;
pub mod query;
pub mod realm;

use std::str::FromStr;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::registry::IntentRegistry;
use super::result::IntentError;

pub fn register_all(registry: &mut IntentRegistry) {
    entity::register(registry);
    realm::register(registry);
    agreement::register(registry);
    asset::register(registry);
    container::register(registry);
    api_key::register(registry);
    query::register(registry);
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload access helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn str_field<'a>(payload: &'a JsonValue, name: &str) -> Option<&'a str> {
    payload.get(name).and_then(JsonValue::as_str)
}

pub(crate) fn require_str<'a>(
    payload: &'a JsonValue,
    name: &'static str,
) -> Result<&'a str, IntentError> {
    str_field(payload, name)
        .ok_or_else(|| IntentError::validation(format!("missing field '{name}'"), Some(name)))
}

pub(crate) fn uuid_field(payload: &JsonValue, name: &'static str) -> Result<Option<Uuid>, IntentError> {
    match payload.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => {
            let s = value.as_str().ok_or_else(|| {
                IntentError::validation(format!("field '{name}' must be a UUID string"), Some(name))
            })?;
            Uuid::from_str(s)
                .map(Some)
                .map_err(|e| IntentError::validation(format!("field '{name}': {e}"), Some(name)))
        }
    }
}

pub(crate) fn require_uuid(payload: &JsonValue, name: &'static str) -> Result<Uuid, IntentError> {
    uuid_field(payload, name)?
        .ok_or_else(|| IntentError::validation(format!("missing field '{name}'"), Some(name)))
}

pub(crate) fn u64_field(payload: &JsonValue, name: &'static str) -> Result<Option<u64>, IntentError> {
    match payload.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            IntentError::validation(
                format!("field '{name}' must be a non-negative integer"),
                Some(name),
            )
        }),
    }
}

pub(crate) fn string_list(payload: &JsonValue, name: &str) -> Vec<String> {
    payload
        .get(name)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
