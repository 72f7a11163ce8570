//! Canonical argument hashing for cache keys.
//!
//! Cache entries are keyed by `(tool name, argument hash)`. The hash
//! must be order-insensitive for mapping-valued arguments: the same
//! logical call serialized with different key orders has to land on
//! the same entry. The encoder below walks a JSON value emitting a
//! type-prefixed byte stream with object keys visited in sorted
//! order, then hashes the stream with ahash.
//!
//! Default-equivalence (an absent optional field hashing like its
//! explicit default) is handled upstream: schema validation fills
//! defaults in before the hash is computed.

use ahash::AHasher;
use serde_json::{Map, Value};
use std::hash::Hasher;

/// Hashes a normalized argument map into a stable cache-key
/// component.
pub fn argument_hash(arguments: &Map<String, Value>) -> u64 {
    let mut buf = Vec::with_capacity(128);
    encode_object(arguments, &mut buf);
    let mut hasher = AHasher::default();
    hasher.write(&buf);
    hasher.finish()
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(b'n'),
        Value::Bool(b) => {
            buf.push(b'b');
            buf.push(*b as u8);
        }
        Value::Number(n) => {
            buf.push(b'#');
            // Integers and their float twins (10 vs 10.0) encode
            // identically.
            if let Some(i) = n.as_i64() {
                buf.extend_from_slice(&(i as f64).to_bits().to_be_bytes());
            } else if let Some(u) = n.as_u64() {
                buf.extend_from_slice(&(u as f64).to_bits().to_be_bytes());
            } else {
                buf.extend_from_slice(&n.as_f64().unwrap_or(f64::NAN).to_bits().to_be_bytes());
            }
        }
        Value::String(s) => {
            buf.push(b's');
            buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            buf.push(b'[');
            buf.extend_from_slice(&(items.len() as u64).to_be_bytes());
            for item in items {
                encode_value(item, buf);
            }
        }
        Value::Object(map) => encode_object(map, buf),
    }
}

fn encode_object(map: &Map<String, Value>, buf: &mut Vec<u8>) {
    buf.push(b'{');
    buf.extend_from_slice(&(map.len() as u64).to_be_bytes());
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        buf.push(b'k');
        buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        encode_value(&map[key], buf);
    }
    buf.push(b'}');
}
