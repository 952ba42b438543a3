//! Metrics export: a small exporter trait plus a composite that can fan
//! out to more than one backend, backed by Prometheus text exposition
//! rather than OTLP since this engine has no outer OTel collector to
//! report to.

pub mod file;
pub mod prometheus_exporter;

use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, f64>,
    pub gauges: HashMap<String, f64>,
}

/// A label set, kept as owned pairs so exporters can key caches without
/// worrying about borrow lifetimes across the governance loop's await
/// points.
pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsExporter: Send + Sync {
    fn increment_counter(&self, name: &str, labels: Labels);
    fn observe_histogram(&self, name: &str, value: f64, labels: Labels);
    fn set_gauge(&self, name: &str, value: f64, labels: Labels);
    fn snapshot(&self) -> MetricsSnapshot;
}

/// Fans out to every registered exporter, supporting simultaneous backends.
#[derive(Default)]
pub struct CompositeExporter {
    exporters: Vec<Box<dyn MetricsExporter>>,
}

impl CompositeExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, exporter: Box<dyn MetricsExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }
}

impl MetricsExporter for CompositeExporter {
    fn increment_counter(&self, name: &str, labels: Labels) {
        for e in &self.exporters {
            e.increment_counter(name, labels);
        }
    }

    fn observe_histogram(&self, name: &str, value: f64, labels: Labels) {
        for e in &self.exporters {
            e.observe_histogram(name, value, labels);
        }
    }

    fn set_gauge(&self, name: &str, value: f64, labels: Labels) {
        for e in &self.exporters {
            e.set_gauge(name, value, labels);
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.exporters
            .first()
            .map(|e| e.snapshot())
            .unwrap_or_default()
    }
}

/// A no-op exporter, useful for tests that don't care about metrics.
#[derive(Default)]
pub struct NullExporter;

impl MetricsExporter for NullExporter {
    fn increment_counter(&self, _name: &str, _labels: Labels) {}
    fn observe_histogram(&self, _name: &str, _value: f64, _labels: Labels) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: Labels) {}
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}
