//! Structured event emission.
//!
//! Observable moments in the gateway (`client_initialized`,
//! `api_retry`, `cache_hit`, `circuit_breaker_state_change`, …) are
//! logged through [`emit`] as key-value records rather than formatted
//! prose, so downstream tooling can filter on `event` and
//! `correlation_id` without parsing strings.

use log::Level;
use serde_json::{Map, Value};

/// Emits one structured event.
///
/// The record always carries `event` (a snake_case token) and
/// `correlation_id`; `fields` adds event-specific context. Values are
/// real JSON values, not pre-formatted strings.
pub fn emit(level: Level, event: &str, correlation_id: &str, fields: &[(&str, Value)]) {
    debug_assert!(
        event.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
        "event tokens are snake_case"
    );
    let mut record = Map::new();
    record.insert("event".to_string(), Value::String(event.to_string()));
    record.insert(
        "correlation_id".to_string(),
        Value::String(correlation_id.to_string()),
    );
    for (key, value) in fields {
        record.insert((*key).to_string(), value.clone());
    }
    log::log!(target: "pylon::event", level, "{}", Value::Object(record));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_accepts_required_event_tokens() {
        // Compile-time style check: these are the events the rest of
        // the codebase relies on; keep the list in sync.
        for event in [
            "client_initialized",
            "api_retry",
            "cache_hit",
            "cache_miss",
            "circuit_breaker_state_change",
            "tool_invoked",
            "tool_failed",
            "session_closed",
            "shutdown",
        ] {
            emit(Level::Debug, event, "test-correlation", &[("attempt", json!(1))]);
        }
    }
}
