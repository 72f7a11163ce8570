//! Process-wide metrics registry.
//!
//! Three primitive families (counters, gauges, histograms) keyed by
//! `(name, label set)` and created lazily on first observation.
//! Counters and gauges are atomic cells; histograms keep the last N
//! latency samples (default 1000) and compute percentiles at read
//! time from the sample window.
//!
//! The registry also keeps a rolling five-minute window of RPC
//! outcomes so the health evaluator can compute a recent error rate
//! without scanning counter deltas.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Samples kept per histogram for percentile estimation.
pub const DEFAULT_HISTOGRAM_WINDOW: usize = 1000;

/// Rolling window for the health error rate.
const OUTCOME_WINDOW: Duration = Duration::from_secs(300);

/// Identity of one metric series: name plus sorted label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: &'static str,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &'static str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self { name, labels }
    }

    fn render_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
            .collect();
        format!("{{{}}}", parts.join(","))
    }
}

/// Read-time statistics for one histogram series.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One serialized metric series, used by the JSON exposition.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesValue<T> {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: T,
}

/// Full registry snapshot for `/metrics/json`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub cache_hit_rate: f64,
    pub counters: Vec<SeriesValue<u64>>,
    pub gauges: Vec<SeriesValue<f64>>,
    pub histograms: Vec<SeriesValue<HistogramStats>>,
}

/// Thread-safe registry of counter, gauge and histogram families.
///
/// All mutation paths take exactly one lock and never hold it across
/// a suspension point.
#[derive(Debug)]
pub struct MetricsRegistry {
    start_instant: Instant,
    started_at: DateTime<Utc>,
    histogram_window: usize,
    counters: RwLock<HashMap<MetricKey, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<MetricKey, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<MetricKey, Arc<Mutex<VecDeque<f64>>>>>,
    outcomes: Mutex<VecDeque<(Instant, bool)>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_WINDOW)
    }
}

impl MetricsRegistry {
    pub fn new(histogram_window: usize) -> Self {
        Self {
            start_instant: Instant::now(),
            started_at: Utc::now(),
            histogram_window: histogram_window.max(1),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Increments a labeled counter, creating the series on first use.
    pub fn incr(&self, name: &'static str, labels: &[(&str, &str)]) {
        self.incr_by(name, labels, 1);
    }

    pub fn incr_by(&self, name: &'static str, labels: &[(&str, &str)], delta: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(cell) = self.counters.read().unwrap().get(&key) {
            cell.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Sets a labeled gauge to an absolute value.
    pub fn set_gauge(&self, name: &'static str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(cell) = self.gauges.read().unwrap().get(&key) {
            cell.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Records one latency sample into a histogram series.
    pub fn observe(&self, name: &'static str, labels: &[(&str, &str)], value_ms: f64) {
        let key = MetricKey::new(name, labels);
        let series = {
            let histograms = self.histograms.read().unwrap();
            histograms.get(&key).cloned()
        };
        let series = series.unwrap_or_else(|| {
            let mut histograms = self.histograms.write().unwrap();
            histograms
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(VecDeque::with_capacity(self.histogram_window)))
                })
                .clone()
        });
        let mut samples = series.lock().unwrap();
        if samples.len() >= self.histogram_window {
            samples.pop_front();
        }
        samples.push_back(value_ms);
    }

    /// Feeds the rolling outcome window used for the health error
    /// rate.
    pub fn record_outcome(&self, success: bool) {
        let mut outcomes = self.outcomes.lock().unwrap();
        let now = Instant::now();
        outcomes.push_back((now, success));
        while let Some((ts, _)) = outcomes.front() {
            if now.duration_since(*ts) > OUTCOME_WINDOW {
                outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Error rate over the last five minutes; `None` with no traffic.
    pub fn recent_error_rate(&self) -> Option<f64> {
        let mut outcomes = self.outcomes.lock().unwrap();
        let now = Instant::now();
        while let Some((ts, _)) = outcomes.front() {
            if now.duration_since(*ts) > OUTCOME_WINDOW {
                outcomes.pop_front();
            } else {
                break;
            }
        }
        if outcomes.is_empty() {
            return None;
        }
        let errors = outcomes.iter().filter(|(_, ok)| !ok).count();
        Some(errors as f64 / outcomes.len() as f64)
    }

    pub fn counter_value(&self, name: &'static str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters
            .read()
            .unwrap()
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of a counter family across all label sets.
    pub fn counter_total(&self, name: &'static str) -> u64 {
        self.counters
            .read()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn gauge_value(&self, name: &'static str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = MetricKey::new(name, labels);
        self.gauges
            .read()
            .unwrap()
            .get(&key)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    pub fn histogram_stats(
        &self,
        name: &'static str,
        labels: &[(&str, &str)],
    ) -> Option<HistogramStats> {
        let key = MetricKey::new(name, labels);
        let series = self.histograms.read().unwrap().get(&key).cloned()?;
        let samples = series.lock().unwrap();
        compute_stats(&samples)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_instant.elapsed().as_secs()
    }

    /// Hit rate over the whole process lifetime; 0.0 before any
    /// cache-eligible call.
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.counter_total("cache_hits_total");
        let misses = self.counter_total("cache_misses_total");
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Full snapshot for the JSON exposition.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: Vec<SeriesValue<u64>> = self
            .counters
            .read()
            .unwrap()
            .iter()
            .map(|(key, cell)| SeriesValue {
                name: key.name.to_string(),
                labels: key.labels.iter().cloned().collect(),
                value: cell.load(Ordering::Relaxed),
            })
            .collect();
        counters.sort_by(|a, b| (&a.name, &a.labels.len()).cmp(&(&b.name, &b.labels.len())));

        let mut gauges: Vec<SeriesValue<f64>> = self
            .gauges
            .read()
            .unwrap()
            .iter()
            .map(|(key, cell)| SeriesValue {
                name: key.name.to_string(),
                labels: key.labels.iter().cloned().collect(),
                value: f64::from_bits(cell.load(Ordering::Relaxed)),
            })
            .collect();
        gauges.sort_by(|a, b| a.name.cmp(&b.name));

        let mut histograms: Vec<SeriesValue<HistogramStats>> = self
            .histograms
            .read()
            .unwrap()
            .iter()
            .filter_map(|(key, series)| {
                let samples = series.lock().unwrap();
                compute_stats(&samples).map(|stats| SeriesValue {
                    name: key.name.to_string(),
                    labels: key.labels.iter().cloned().collect(),
                    value: stats,
                })
            })
            .collect();
        histograms.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.uptime_seconds(),
            cache_hit_rate: self.cache_hit_rate(),
            counters,
            gauges,
            histograms,
        }
    }

    /// Renders the registry in Prometheus text exposition format
    /// (v0.0.4): `# HELP`, `# TYPE`, then one line per series.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        let counters = self.counters.read().unwrap();
        let mut counter_keys: Vec<&MetricKey> = counters.keys().collect();
        counter_keys.sort_by(|a, b| (a.name, &a.labels).cmp(&(b.name, &b.labels)));
        let mut last_name = "";
        for key in counter_keys {
            if key.name != last_name {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n",
                    key.name,
                    help_text(key.name),
                    key.name
                ));
                last_name = key.name;
            }
            let value = counters[key].load(Ordering::Relaxed);
            out.push_str(&format!("{}{} {}\n", key.name, key.render_labels(), value));
        }
        drop(counters);

        let gauges = self.gauges.read().unwrap();
        let mut gauge_keys: Vec<&MetricKey> = gauges.keys().collect();
        gauge_keys.sort_by(|a, b| (a.name, &a.labels).cmp(&(b.name, &b.labels)));
        let mut last_name = "";
        for key in gauge_keys {
            if key.name != last_name {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} gauge\n",
                    key.name,
                    help_text(key.name),
                    key.name
                ));
                last_name = key.name;
            }
            let value = f64::from_bits(gauges[key].load(Ordering::Relaxed));
            out.push_str(&format!("{}{} {}\n", key.name, key.render_labels(), value));
        }
        drop(gauges);

        // Derived gauges not stored as cells.
        out.push_str(&format!(
            "# HELP cache_hit_rate Lifetime cache hit rate\n# TYPE cache_hit_rate gauge\ncache_hit_rate {}\n",
            self.cache_hit_rate()
        ));
        out.push_str(&format!(
            "# HELP uptime_seconds Gateway uptime in seconds\n# TYPE uptime_seconds gauge\nuptime_seconds {}\n",
            self.uptime_seconds()
        ));

        let histograms = self.histograms.read().unwrap();
        let mut histo_keys: Vec<&MetricKey> = histograms.keys().collect();
        histo_keys.sort_by(|a, b| (a.name, &a.labels).cmp(&(b.name, &b.labels)));
        let mut last_name = "";
        for key in histo_keys {
            if key.name != last_name {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} summary\n",
                    key.name,
                    help_text(key.name),
                    key.name
                ));
                last_name = key.name;
            }
            let samples = histograms[key].lock().unwrap();
            if let Some(stats) = compute_stats(&samples) {
                for (quantile, value) in
                    [("0.5", stats.p50), ("0.95", stats.p95), ("0.99", stats.p99)]
                {
                    let mut labels = key.labels.clone();
                    labels.push(("quantile".to_string(), quantile.to_string()));
                    labels.sort();
                    let rendered = MetricKey { name: key.name, labels };
                    out.push_str(&format!(
                        "{}{} {}\n",
                        key.name,
                        rendered.render_labels(),
                        value
                    ));
                }
                out.push_str(&format!(
                    "{}_count{} {}\n",
                    key.name,
                    key.render_labels(),
                    stats.count
                ));
            }
        }

        out
    }
}

fn compute_stats(samples: &VecDeque<f64>) -> Option<HistogramStats> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    Some(HistogramStats {
        count,
        min: sorted[0],
        max: sorted[count - 1],
        avg: sum / count as f64,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
    })
}

fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    let rank = (quantile / 100.0) * (sorted.len() - 1) as f64;
    sorted[rank.round() as usize]
}

fn help_text(name: &str) -> &'static str {
    match name {
        "rpc_requests_total" => "Total RPC tool calls by tool and terminal status",
        "rpc_errors_total" => "Total failed RPC tool calls by tool and error kind",
        "cache_hits_total" => "Cache hits by tool",
        "cache_misses_total" => "Cache misses by tool",
        "circuit_breaker_open_total" => "Cumulative breaker open transitions by service",
        "circuit_breaker_state" => "Breaker state by service (0=closed, 0.5=half-open, 1=open)",
        "cache_entries" => "Live cache entries across all tools",
        "active_sessions" => "Currently open RPC sessions",
        "api_retries_total" => "Upstream retry attempts by endpoint",
        "rpc_request_duration_ms" => "RPC call latency in milliseconds by tool",
        "upstream_request_duration_ms" => "Upstream request latency in milliseconds",
        _ => "Gateway metric",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let registry = MetricsRegistry::default();
        registry.incr("rpc_requests_total", &[("tool", "list_subnets"), ("status", "ok")]);
        registry.incr("rpc_requests_total", &[("status", "ok"), ("tool", "list_subnets")]);
        registry.incr("rpc_requests_total", &[("tool", "list_subnets"), ("status", "error")]);
        assert_eq!(
            registry.counter_value(
                "rpc_requests_total",
                &[("tool", "list_subnets"), ("status", "ok")]
            ),
            2
        );
        assert_eq!(registry.counter_total("rpc_requests_total"), 3);
    }

    #[test]
    fn histogram_window_is_bounded() {
        let registry = MetricsRegistry::new(10);
        for i in 0..100 {
            registry.observe("rpc_request_duration_ms", &[("tool", "t")], i as f64);
        }
        let stats = registry
            .histogram_stats("rpc_request_duration_ms", &[("tool", "t")])
            .unwrap();
        assert_eq!(stats.count, 10);
        assert_eq!(stats.min, 90.0);
        assert_eq!(stats.max, 99.0);
    }

    #[test]
    fn percentiles_cover_min_and_max() {
        let registry = MetricsRegistry::default();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            registry.observe("upstream_request_duration_ms", &[("service", "s")], v);
        }
        let stats = registry
            .histogram_stats("upstream_request_duration_ms", &[("service", "s")])
            .unwrap();
        assert_eq!(stats.p50, 30.0);
        assert_eq!(stats.max, 50.0);
        assert_eq!(stats.avg, 30.0);
    }

    #[test]
    fn prometheus_rendering_has_help_and_type() {
        let registry = MetricsRegistry::default();
        registry.incr("cache_hits_total", &[("tool", "list_ip_spaces")]);
        registry.set_gauge("circuit_breaker_state", &[("service", "infoblox_api")], 0.5);
        let text = registry.render_prometheus();
        assert!(text.contains("# HELP cache_hits_total"));
        assert!(text.contains("# TYPE cache_hits_total counter"));
        assert!(text.contains("cache_hits_total{tool=\"list_ip_spaces\"} 1"));
        assert!(text.contains("circuit_breaker_state{service=\"infoblox_api\"} 0.5"));
        assert!(text.contains("uptime_seconds"));
    }

    #[test]
    fn error_rate_reflects_recent_outcomes() {
        let registry = MetricsRegistry::default();
        assert_eq!(registry.recent_error_rate(), None);
        for _ in 0..3 {
            registry.record_outcome(true);
        }
        registry.record_outcome(false);
        assert_eq!(registry.recent_error_rate(), Some(0.25));
    }
}
