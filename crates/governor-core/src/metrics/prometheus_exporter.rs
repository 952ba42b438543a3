//! Prometheus text-exposition backend. Dynamic metric registration is
//! needed because governance labels are per-scope and per-governance-path;
//! vectors are created lazily and cached by name.

use super::{Labels, MetricsExporter, MetricsSnapshot};
use dashmap::DashMap;
use prometheus::{Encoder, GaugeVec, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

pub struct PrometheusExporter {
    registry: Registry,
    counters: DashMap<String, IntCounterVec>,
    histograms: DashMap<String, HistogramVec>,
    gauges: DashMap<String, GaugeVec>,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: DashMap::new(),
            histograms: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    /// Renders the registry in Prometheus text-exposition format, for a
    /// `/metrics` style scrape endpoint served by the CLI binary.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buf)
            .unwrap_or_else(|_| buf.clear());
        String::from_utf8(buf).unwrap_or_default()
    }

    fn label_names(labels: Labels) -> Vec<&str> {
        labels.iter().map(|(k, _)| *k).collect()
    }

    fn label_values(labels: Labels) -> Vec<&str> {
        labels.iter().map(|(_, v)| *v).collect()
    }
}

impl MetricsExporter for PrometheusExporter {
    fn increment_counter(&self, name: &str, labels: Labels) {
        let counter = self.counters.entry(name.to_string()).or_insert_with(|| {
            let vec = IntCounterVec::new(Opts::new(name, name), &Self::label_names(labels))
                .expect("metric name/labels are static and valid");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        counter.with_label_values(&Self::label_values(labels)).inc();
    }

    fn observe_histogram(&self, name: &str, value: f64, labels: Labels) {
        let hist = self.histograms.entry(name.to_string()).or_insert_with(|| {
            let vec = HistogramVec::new(prometheus::HistogramOpts::new(name, name), &Self::label_names(labels))
                .expect("metric name/labels are static and valid");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        hist.with_label_values(&Self::label_values(labels)).observe(value);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: Labels) {
        let gauge = self.gauges.entry(name.to_string()).or_insert_with(|| {
            let vec = GaugeVec::new(Opts::new(name, name), &Self::label_names(labels))
                .expect("metric name/labels are static and valid");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        gauge.with_label_values(&Self::label_values(labels)).set(value);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for family in self.registry.gather() {
            let name = family.get_name().to_string();
            for metric in family.get_metric() {
                if metric.has_counter() {
                    snapshot.counters.insert(name.clone(), metric.get_counter().get_value());
                } else if metric.has_gauge() {
                    snapshot.gauges.insert(name.clone(), metric.get_gauge().get_value());
                }
            }
        }
        snapshot
    }
}
