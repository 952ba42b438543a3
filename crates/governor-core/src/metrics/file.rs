//! File-based metrics exporter — always available, no external dependency,
//! useful as a file backend alongside the network-facing Prometheus one.

use super::{Labels, MetricsExporter, MetricsSnapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

fn key(name: &str, labels: Labels) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{name}{{{}}}", pairs.join(","))
}

pub struct FileExporter {
    path: PathBuf,
    counters: Mutex<HashMap<String, f64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl FileExporter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Writes the current snapshot to disk as pretty-printed JSON. Errors
    /// are swallowed: a failed metrics flush must never take down the
    /// governance loop.
    fn flush(&self) {
        let snapshot = self.snapshot();
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            let _ = std::fs::write(&self.path, json);
        }
    }
}

impl MetricsExporter for FileExporter {
    fn increment_counter(&self, name: &str, labels: Labels) {
        *self.counters.lock().entry(key(name, labels)).or_insert(0.0) += 1.0;
        self.flush();
    }

    fn observe_histogram(&self, name: &str, value: f64, labels: Labels) {
        // No histogram bucketing on disk; track the running average under
        // a derived key so operators still see *something* meaningful.
        let k = format!("{}_last", key(name, labels));
        *self.gauges.lock().entry(k).or_insert(0.0) = value;
        self.flush();
    }

    fn set_gauge(&self, name: &str, value: f64, labels: Labels) {
        *self.gauges.lock().entry(key(name, labels)).or_insert(0.0) = value;
        self.flush();
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().clone(),
            gauges: self.gauges.lock().clone(),
        }
    }
}
