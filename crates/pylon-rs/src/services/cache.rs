//! TTL response cache with per-tool LRU bounds.
//!
//! Entries are keyed by `(tool name, canonical argument hash)` and
//! store the handler's successful response verbatim together with an
//! absolute expiry instant. Only read tools with a TTL policy
//! populate the cache; the pipeline enforces that rule, this module
//! just stores what it is given.
//!
//! Two concurrent identical calls may both miss and both insert; the
//! last insert wins and readers never observe a torn entry (the map
//! lock covers the whole value swap). There is deliberately no
//! single-flight here.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// One cached response.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Per-tool entry map with LRU bookkeeping.
#[derive(Debug, Default)]
struct ToolEntries {
    entries: HashMap<u64, CacheEntry, ahash::RandomState>,
    /// Access order, least recently used at the front.
    order: VecDeque<u64>,
}

impl ToolEntries {
    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    fn remove(&mut self, key: u64) {
        self.entries.remove(&key);
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
    }
}

/// Process-wide response cache shared by all pipeline calls.
///
/// A disabled cache ignores inserts and always misses, which is how
/// the global `cache_enabled = false` toggle degrades every tool
/// policy to `NONE` without touching the registry.
#[derive(Debug)]
pub struct ToolCache {
    enabled: bool,
    capacity_per_tool: usize,
    tools: RwLock<HashMap<String, ToolEntries>>,
}

impl ToolCache {
    pub fn new(enabled: bool, capacity_per_tool: usize) -> Self {
        Self {
            enabled,
            capacity_per_tool: capacity_per_tool.max(1),
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Looks up a non-expired entry, refreshing its LRU position.
    /// Expired entries are removed on the way out.
    pub fn get(&self, tool: &str, argument_hash: u64) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let mut tools = self.tools.write().unwrap();
        let entries = tools.get_mut(tool)?;
        match entries.entries.get(&argument_hash) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                entries.touch(argument_hash);
                Some(value)
            }
            Some(_) => {
                entries.remove(argument_hash);
                None
            }
            None => None,
        }
    }

    /// Stores a successful response with `expires_at = now + ttl`,
    /// evicting the least-recently-used entry when the tool is at
    /// capacity.
    pub fn insert(&self, tool: &str, argument_hash: u64, value: Value, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let mut tools = self.tools.write().unwrap();
        let entries = tools.entry(tool.to_string()).or_default();

        if !entries.entries.contains_key(&argument_hash) {
            while entries.entries.len() >= self.capacity_per_tool {
                match entries.order.pop_front() {
                    Some(oldest) => {
                        entries.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        entries.entries.insert(
            argument_hash,
            CacheEntry { value, expires_at: Instant::now() + ttl },
        );
        entries.touch(argument_hash);
    }

    /// Current live entry count across all tools, for the
    /// `cache_entries` gauge. Expired-but-unswept entries are pruned
    /// on the way through so the gauge does not drift upward.
    pub fn entry_count(&self) -> usize {
        let mut tools = self.tools.write().unwrap();
        let now = Instant::now();
        let mut total = 0;
        for entries in tools.values_mut() {
            let expired: Vec<u64> = entries
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| *k)
                .collect();
            for key in expired {
                entries.remove(key);
            }
            total += entries.entries.len();
        }
        total
    }

    pub fn clear(&self) {
        self.tools.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = ToolCache::new(true, 10);
        cache.insert("list_ip_spaces", 1, json!({"results": []}), Duration::from_millis(40));
        assert!(cache.get("list_ip_spaces", 1).is_some());
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("list_ip_spaces", 1).is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn lru_eviction_on_overflow() {
        let cache = ToolCache::new(true, 2);
        let ttl = Duration::from_secs(60);
        cache.insert("t", 1, json!(1), ttl);
        cache.insert("t", 2, json!(2), ttl);
        // Touch 1 so 2 becomes the eviction candidate.
        cache.get("t", 1);
        cache.insert("t", 3, json!(3), ttl);
        assert!(cache.get("t", 1).is_some());
        assert!(cache.get("t", 2).is_none());
        assert!(cache.get("t", 3).is_some());
    }

    #[test]
    fn capacity_is_per_tool() {
        let cache = ToolCache::new(true, 1);
        let ttl = Duration::from_secs(60);
        cache.insert("a", 1, json!("a"), ttl);
        cache.insert("b", 1, json!("b"), ttl);
        assert!(cache.get("a", 1).is_some());
        assert!(cache.get("b", 1).is_some());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ToolCache::new(false, 10);
        cache.insert("t", 1, json!(1), Duration::from_secs(60));
        assert!(cache.get("t", 1).is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn reinsert_overwrites_value() {
        let cache = ToolCache::new(true, 10);
        let ttl = Duration::from_secs(60);
        cache.insert("t", 1, json!("old"), ttl);
        cache.insert("t", 1, json!("new"), ttl);
        assert_eq!(cache.get("t", 1), Some(json!("new")));
    }
}
