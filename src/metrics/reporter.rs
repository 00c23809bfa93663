//! Metric report sinks

use super::Metric;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Receives human-readable evaluation output
pub trait MetricReporter: Send + Sync {
    /// Emit one line of report text
    fn line(&self, text: &str);

    /// Emit a metric value as `<label>: <value>`
    fn metric(&self, metric: Metric, value: f64) {
        self.line(&format!("{}: {:.6}", metric.label(), value));
    }
}

/// Prints report lines to stdout and mirrors them into the log
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl MetricReporter for ConsoleReporter {
    fn line(&self, text: &str) {
        println!("{}", text);
    }

    fn metric(&self, metric: Metric, value: f64) {
        info!(metric = metric.as_str(), value, "Evaluated predictions");
        self.line(&format!("{}: {:.6}", metric.label(), value));
    }
}

/// Keeps report lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line reported so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl MetricReporter for RecordingReporter {
    fn line(&self, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_string());
        }
    }
}
