use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Attempts made by the request executor, labelled by `outcome`.
pub const CLIENT_ATTEMPTS_TOTAL: &str = "client_attempts_total";
/// Logical calls that exhausted every attempt, labelled by `kind`.
pub const CLIENT_FAILURES_TOTAL: &str = "client_failures_total";
/// Wall time of a single attempt, in seconds.
pub const CLIENT_REQUEST_DURATION: &str = "client_request_duration_seconds";
/// Chat sends refused because another one was in flight.
pub const CHAT_REJECTED_TOTAL: &str = "chat_rejected_total";
/// 1 while the orchestrator's terminal session is running.
pub const TERMINAL_RUNNING: &str = "terminal_running";

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Fixed-bucket histogram. Bucket counts are per bucket; the export makes
/// them cumulative.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    hits: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let hits = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            hits,
            sum_bits: AtomicU64::new(0f64.to_bits()),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        if let Some(i) = self.bounds.iter().position(|b| value <= *b) {
            self.hits[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// `(upper bound, observations <= bound)` pairs in ascending order.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        self.bounds
            .iter()
            .zip(&self.hits)
            .map(|(bound, hits)| {
                running += hits.load(Ordering::Relaxed);
                (*bound, running)
            })
            .collect()
    }
}

/// Request durations range from instant failures to the long generation
/// budget, so the buckets stretch out to two minutes.
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0,
    ]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A sorted list of key=value pairs distinguishing counters of one family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    /// Format labels as `{key="value",key2="value2"}` for Prometheus output.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
        format!("{{{}}}", pairs.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

/// Counters, gauges and histograms behind read-mostly locks.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<(String, Labels), AtomicU64>>,
    gauges: RwLock<AHashMap<String, AtomicI64>>,
    histograms: RwLock<AHashMap<String, Histogram>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Counters -----------------------------------------------------------

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let map = read(&self.counters);
            if let Some(c) = map.get(&key) {
                c.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        write(&self.counters)
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        read(&self.counters)
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    pub fn set_gauge(&self, name: &str, value: i64) {
        {
            let map = read(&self.gauges);
            if let Some(g) = map.get(name) {
                g.store(value, Ordering::Relaxed);
                return;
            }
        }
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn get_gauge(&self, name: &str) -> i64 {
        read(&self.gauges)
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Record a value into a histogram, creating it with the default
    /// duration buckets on first use.
    pub fn record_histogram(&self, name: &str, value: f64) {
        {
            let map = read(&self.histograms);
            if let Some(h) = map.get(name) {
                h.observe(value);
                return;
            }
        }
        write(&self.histograms)
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_duration_buckets()))
            .observe(value);
    }

    pub fn histogram_count(&self, name: &str) -> u64 {
        read(&self.histograms)
            .get(name)
            .map(Histogram::count)
            .unwrap_or(0)
    }

    // -- Export --------------------------------------------------------------

    /// Export all metrics in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let map = read(&self.counters);
            let mut grouped: AHashMap<&str, Vec<(&Labels, u64)>> = AHashMap::new();
            for ((name, labels), val) in map.iter() {
                grouped
                    .entry(name.as_str())
                    .or_default()
                    .push((labels, val.load(Ordering::Relaxed)));
            }
            let mut names: Vec<&str> = grouped.keys().copied().collect();
            names.sort_unstable();
            for name in names {
                out.push_str(&format!("# TYPE {name} counter\n"));
                for (labels, value) in &grouped[name] {
                    out.push_str(&format!("{name}{} {value}\n", labels.prometheus_str()));
                }
            }
        }

        {
            let map = read(&self.gauges);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let value = map[name].load(Ordering::Relaxed);
                out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
            }
        }

        {
            let map = read(&self.histograms);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            for name in names {
                let h = &map[name];
                out.push_str(&format!("# TYPE {name} histogram\n"));
                for (bound, hits) in h.cumulative() {
                    out.push_str(&format!("{name}_bucket{{le=\"{bound}\"}} {hits}\n"));
                }
                out.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", h.count()));
                out.push_str(&format!("{name}_sum {}\n", h.sum()));
                out.push_str(&format!("{name}_count {}\n", h.count()));
            }
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Global singleton
// ---------------------------------------------------------------------------

/// The process-wide collector shared by every crate in the workspace.
pub fn global_metrics() -> &'static MetricsCollector {
    use std::sync::OnceLock;
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increment() {
        let m = MetricsCollector::new();
        m.increment_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "ok")]);
        m.increment_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "ok")]);
        m.increment_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "timeout")]);

        assert_eq!(m.get_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "ok")]), 2);
        assert_eq!(m.get_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "timeout")]), 1);
        assert_eq!(m.get_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", "status")]), 0);
    }

    #[test]
    fn gauge_set() {
        let m = MetricsCollector::new();
        m.set_gauge(TERMINAL_RUNNING, 1);
        assert_eq!(m.get_gauge(TERMINAL_RUNNING), 1);
        m.set_gauge(TERMINAL_RUNNING, 0);
        assert_eq!(m.get_gauge(TERMINAL_RUNNING), 0);
    }

    #[test]
    fn histogram_record() {
        let m = MetricsCollector::new();
        m.record_histogram(CLIENT_REQUEST_DURATION, 0.05);
        m.record_histogram(CLIENT_REQUEST_DURATION, 0.5);
        m.record_histogram(CLIENT_REQUEST_DURATION, 2.0);

        assert_eq!(m.histogram_count(CLIENT_REQUEST_DURATION), 3);
        let map = read(&m.histograms);
        let h = map.get(CLIENT_REQUEST_DURATION).unwrap();
        assert!((h.sum() - 2.55).abs() < 0.001);
        assert_eq!(h.cumulative()[1], (0.05, 1));
        assert_eq!(h.cumulative()[6], (2.5, 3));
    }

    #[test]
    fn prometheus_export() {
        let m = MetricsCollector::new();
        m.increment_counter(CLIENT_FAILURES_TOTAL, &[("kind", "timeout")]);
        m.set_gauge(TERMINAL_RUNNING, 1);
        m.record_histogram(CLIENT_REQUEST_DURATION, 0.1);

        let output = m.export_prometheus();
        assert!(output.contains("# TYPE client_failures_total counter"));
        assert!(output.contains("client_failures_total{kind=\"timeout\"} 1"));
        assert!(output.contains("# TYPE terminal_running gauge"));
        assert!(output.contains("terminal_running 1"));
        assert!(output.contains("# TYPE client_request_duration_seconds histogram"));
        assert!(output.contains("client_request_duration_seconds_count 1"));
    }

    #[test]
    fn labels_prometheus_format() {
        let l = Labels::new(&[("outcome", "ok"), ("endpoint", "/health")]);
        assert_eq!(l.prometheus_str(), "{endpoint=\"/health\",outcome=\"ok\"}");
        assert_eq!(Labels::new(&[]).prometheus_str(), "");
    }

    #[test]
    fn global_metrics_singleton() {
        assert!(std::ptr::eq(global_metrics(), global_metrics()));
    }
}
