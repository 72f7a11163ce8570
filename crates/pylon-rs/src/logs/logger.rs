//! Logger configuration with JSON and console output formats.
//!
//! The gateway logs through the `log` facade; this module installs an
//! `env_logger` subscriber whose formatter is selected by
//! configuration. The JSON format emits one object per line with
//! `@timestamp`, `level`, `correlation_id` and whatever structured
//! fields the record carries, suitable for log aggregation. The
//! console format is a fixed-width human layout for development.

use chrono::Utc;
use env_logger::Builder;
use log::LevelFilter;
use serde_json::{json, Value};
use std::io::Write;

/// Configures the global logger.
///
/// `format` is `"json"` or `"console"`; `level` is one of the usual
/// filter names. `RUST_LOG`, when set, overrides the configured
/// level. Call once at startup; calling twice is a no-op error
/// swallowed by `try_init`.
pub fn configure_logger(format: &str, level: &str) {
    let level_filter = match level {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut builder = Builder::new();
    builder.filter_level(level_filter);
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        builder.parse_filters(&rust_log);
    }

    if format == "json" {
        builder.format(|buf, record| {
            let mut entry = json!({
                "@timestamp": Utc::now().to_rfc3339(),
                "level": record.level().to_string().to_lowercase(),
                "service": "pylon-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            });
            if let Some(module) = record.module_path() {
                entry["module"] = json!(module);
            }
            // Structured events arrive as pre-built JSON objects in
            // the message; splice their fields into the record
            // instead of nesting a string-encoded payload.
            let message = record.args().to_string();
            match serde_json::from_str::<Value>(&message) {
                Ok(Value::Object(fields)) => {
                    for (key, value) in fields {
                        entry[key] = value;
                    }
                }
                _ => entry["message"] = json!(message),
            }
            writeln!(buf, "{}", entry)
        });
    } else {
        builder.format(|buf, record| {
            let file_line = match (record.file(), record.line()) {
                (Some(file), Some(line)) => format!("{}:{}", file, line),
                _ => "unknown".to_string(),
            };
            writeln!(
                buf,
                "{} | [{:5}] | {:24} | {}",
                chrono::Local::now().format("%b %d %y %I:%M:%S %p"),
                record.level(),
                file_line,
                record.args(),
            )
        });
    }

    // try_init so integration tests can call this repeatedly.
    let _ = builder.try_init();
}
