//! Tool descriptors, input schemas and boundary validation.
//!
//! A [`ToolDescriptor`] is the immutable record the registry holds for
//! every exposed tool: name, description, typed input schema, cache
//! policy and read/mutate classification. Descriptors are built once
//! at startup and shipped verbatim to clients in `list_tools_result`.
//!
//! Validation happens here, at the boundary: unknown fields are
//! rejected, missing required fields are rejected, enum membership is
//! enforced, and CIDR/IP values are parsed before a handler ever runs.
//! Validation also normalizes arguments by filling absent optional
//! fields with their declared defaults, so the cache key of a call
//! with `{limit: 100}` and one relying on the default 100 are the
//! same entry.

use crate::models::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Semantic type of a single schema field.
///
/// The wire form is a tagged object (`{"type": "cidr"}`,
/// `{"type": "enum", "values": [...]}`) that agent clients can use
/// for their own argument validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    /// IPv4/IPv6 network in prefix notation, e.g. `10.0.0.0/16`.
    Cidr,
    IpAddress,
    Enum { values: Vec<String> },
    /// Free-form JSON object; forwarded to the upstream untouched.
    Mapping,
    Sequence { items: Box<FieldType> },
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Cidr => "cidr",
            FieldType::IpAddress => "ip_address",
            FieldType::Enum { .. } => "enum",
            FieldType::Mapping => "mapping",
            FieldType::Sequence { .. } => "sequence",
        }
    }

    /// Checks one value against the semantic type.
    fn check(&self, field: &str, value: &Value) -> Result<(), String> {
        match self {
            FieldType::String => value
                .is_string()
                .then_some(())
                .ok_or_else(|| format!("field '{}' must be a string", field)),
            FieldType::Integer => value
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| format!("field '{}' must be an integer", field)),
            FieldType::Boolean => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| format!("field '{}' must be a boolean", field)),
            FieldType::Cidr => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("field '{}' must be a CIDR string", field))?;
                parse_cidr(s).map_err(|e| format!("field '{}': {}", field, e))
            }
            FieldType::IpAddress => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("field '{}' must be an IP address string", field))?;
                s.parse::<IpAddr>()
                    .map(|_| ())
                    .map_err(|_| format!("field '{}' is not a valid IP address: {}", field, s))
            }
            FieldType::Enum { values } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("field '{}' must be a string", field))?;
                if values.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{}' must be one of [{}], got '{}'",
                        field,
                        values.join(", "),
                        s
                    ))
                }
            }
            FieldType::Mapping => value
                .is_object()
                .then_some(())
                .ok_or_else(|| format!("field '{}' must be an object", field)),
            FieldType::Sequence { items } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| format!("field '{}' must be an array", field))?;
                for (i, item) in arr.iter().enumerate() {
                    items.check(&format!("{}[{}]", field, i), item)?;
                }
                Ok(())
            }
        }
    }
}

/// Parses `addr/prefix` notation, checking the prefix bound for the
/// address family.
fn parse_cidr(s: &str) -> Result<(), String> {
    let (addr, prefix) = s
        .split_once('/')
        .ok_or_else(|| format!("'{}' is not in CIDR notation", s))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("'{}' has an invalid network address", s))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("'{}' has an invalid prefix length", s))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("'{}' prefix length exceeds /{}", s, max));
    }
    Ok(())
}

/// One named field in a tool's input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    pub required: bool,
    /// Default applied when an optional field is absent, before
    /// hashing and dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            field_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            field_type,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declarative input schema: the full set of accepted fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Validates raw call arguments and returns the normalized map.
    ///
    /// Normalization fills absent optional fields with their declared
    /// defaults; the returned map is what handlers and the cache key
    /// see. `Value::Null` arguments are treated as an empty object.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, GatewayError> {
        let args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(GatewayError::SchemaViolation {
                    message: format!("arguments must be an object, got {}", type_name(other)),
                })
            }
        };

        // Unknown fields are rejected outright; listing the accepted
        // names keeps agent-side repair cheap.
        for key in args.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                let known: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
                return Err(GatewayError::SchemaViolation {
                    message: format!(
                        "unknown field '{}'; accepted fields: [{}]",
                        key,
                        known.join(", ")
                    ),
                });
            }
        }

        let mut normalized = Map::new();
        for spec in &self.fields {
            match args.get(&spec.name) {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(GatewayError::SchemaViolation {
                            message: format!(
                                "missing required field '{}' ({})",
                                spec.name,
                                spec.field_type.name()
                            ),
                        });
                    }
                    if let Some(default) = &spec.default {
                        normalized.insert(spec.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    spec.field_type
                        .check(&spec.name, value)
                        .map_err(|message| GatewayError::SchemaViolation { message })?;
                    normalized.insert(spec.name.clone(), value.clone());
                }
            }
        }
        Ok(normalized)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Response caching policy declared on a tool descriptor.
///
/// Only mutation-free tools may declare `Ttl`; `Ttl` without an
/// explicit value inherits the configured default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CachePolicy {
    None,
    Ttl {
        #[serde(skip_serializing_if = "Option::is_none")]
        seconds: Option<u64>,
    },
}

impl CachePolicy {
    pub fn ttl() -> Self {
        CachePolicy::Ttl { seconds: None }
    }

    pub fn ttl_secs(seconds: u64) -> Self {
        CachePolicy::Ttl { seconds: Some(seconds) }
    }

    /// Effective TTL given the configured default; `None` means the
    /// tool is uncacheable.
    pub fn effective_ttl(&self, default_secs: u64) -> Option<u64> {
        match self {
            CachePolicy::None => None,
            CachePolicy::Ttl { seconds } => Some(seconds.unwrap_or(default_secs)),
        }
    }
}

/// Read/mutate classification.
///
/// Mutations always bypass the cache and carry an idempotency
/// fingerprint into upstream headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    Read,
    Mutate,
}

/// Immutable registry record for one exposed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
    /// Free-text hint about the shape of a successful result.
    pub output_hint: String,
    pub cache_policy: CachePolicy,
    pub classification: ToolClass,
    /// Per-tool deadline override in seconds; the configured request
    /// timeout applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ToolDescriptor {
    /// A descriptor declaring `Ttl` on a `Mutate` tool is a registry
    /// construction bug; checked when the registry is assembled.
    pub fn cacheable(&self) -> bool {
        self.classification == ToolClass::Read
            && !matches!(self.cache_policy, CachePolicy::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ToolSchema {
        ToolSchema::new(vec![
            FieldSpec::required("zone", FieldType::String, "zone FQDN"),
            FieldSpec::required("ip_address", FieldType::IpAddress, "target address"),
            FieldSpec::optional("ttl", FieldType::Integer, "record TTL").with_default(json!(3600)),
            FieldSpec::optional(
                "view",
                FieldType::Enum { values: vec!["default".into(), "internal".into()] },
                "DNS view",
            ),
        ])
    }

    #[test]
    fn validation_applies_defaults() {
        let args = json!({"zone": "corp.example.com", "ip_address": "10.1.2.3"});
        let normalized = schema().validate(&args).unwrap();
        assert_eq!(normalized["ttl"], json!(3600));
        assert!(!normalized.contains_key("view"));
    }

    #[test]
    fn validation_rejects_unknown_fields() {
        let args = json!({"zone": "z", "ip_address": "10.0.0.1", "zonee": "typo"});
        let err = schema().validate(&args).unwrap_err();
        assert!(err.to_string().contains("unknown field 'zonee'"));
    }

    #[test]
    fn validation_rejects_missing_required() {
        let args = json!({"zone": "z"});
        let err = schema().validate(&args).unwrap_err();
        assert!(err.to_string().contains("ip_address"));
    }

    #[test]
    fn validation_enforces_enum_membership() {
        let args = json!({"zone": "z", "ip_address": "10.0.0.1", "view": "staging"});
        let err = schema().validate(&args).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn validation_parses_ip_and_cidr() {
        let schema = ToolSchema::new(vec![FieldSpec::required(
            "address",
            FieldType::Cidr,
            "network",
        )]);
        assert!(schema.validate(&json!({"address": "10.0.0.0/16"})).is_ok());
        assert!(schema.validate(&json!({"address": "2001:db8::/48"})).is_ok());
        assert!(schema.validate(&json!({"address": "10.0.0.0/40"})).is_err());
        assert!(schema.validate(&json!({"address": "not-a-network"})).is_err());
    }

    #[test]
    fn sequence_items_are_checked() {
        let schema = ToolSchema::new(vec![FieldSpec::required(
            "servers",
            FieldType::Sequence { items: Box::new(FieldType::IpAddress) },
            "DNS servers",
        )]);
        assert!(schema
            .validate(&json!({"servers": ["10.0.0.1", "10.0.0.2"]}))
            .is_ok());
        assert!(schema
            .validate(&json!({"servers": ["10.0.0.1", "nope"]}))
            .is_err());
    }

    #[test]
    fn ttl_policy_inherits_default() {
        assert_eq!(CachePolicy::ttl().effective_ttl(300), Some(300));
        assert_eq!(CachePolicy::ttl_secs(60).effective_ttl(300), Some(60));
        assert_eq!(CachePolicy::None.effective_ttl(300), None);
    }
}
