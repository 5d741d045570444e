//! Wall-time accounting for task graph runs.
//!
//! Labels follow the convention `task:<name>` for individual tasks and
//! `layer:<a+b+c>` for whole layers. The summary derives total wall time
//! (sum of layer durations), total task time, and effective parallelism.

use crate::scheduler::TimingSink;
use std::sync::Mutex;
use std::time::Duration;

/// One recorded timing.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEntry {
    pub label: String,
    pub duration: Duration,
}

/// Append-only, thread-safe collection of timings.
///
/// `add` is called concurrently from every task in a layer; the summary is
/// only read after scheduling completes.
#[derive(Debug, Default)]
pub struct TimingsCollector {
    entries: Mutex<Vec<TimingEntry>>,
}

impl TimingsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, label: impl Into<String>, duration: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(TimingEntry {
            label: label.into(),
            duration,
        });
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<TimingEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn summary(&self) -> TimingSummary {
        TimingSummary::from_entries(&self.entries())
    }
}

impl TimingSink for TimingsCollector {
    fn record(&self, label: &str, duration: Duration) {
        self.add(label, duration);
    }
}

/// Derived totals for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSummary {
    pub layer_count: usize,
    pub task_count: usize,
    /// Sum of layer durations: the run's wall-clock time inside the graph.
    pub wall_time: Duration,
    /// Sum of individual task durations.
    pub task_time: Duration,
}

impl TimingSummary {
    fn from_entries(entries: &[TimingEntry]) -> Self {
        let mut layer_count = 0usize;
        let mut task_count = 0usize;
        let mut wall_time = Duration::ZERO;
        let mut task_time = Duration::ZERO;
        for entry in entries {
            if entry.label.starts_with("layer:") {
                layer_count += 1;
                wall_time += entry.duration;
            } else if entry.label.starts_with("task:") {
                task_count += 1;
                task_time += entry.duration;
            }
        }
        Self {
            layer_count,
            task_count,
            wall_time,
            task_time,
        }
    }

    /// `task_time / wall_time`; 1.0 is serial, N is N concurrent workers at
    /// full utilization. Zero wall time yields 0.0.
    pub fn effective_parallelism(&self) -> f64 {
        let wall = self.wall_time.as_secs_f64();
        if wall <= f64::EPSILON {
            return 0.0;
        }
        self.task_time.as_secs_f64() / wall
    }

    /// Human-readable summary lines for operator output, slowest tasks first.
    pub fn render(&self, entries: &[TimingEntry]) -> Vec<String> {
        let mut tasks: Vec<&TimingEntry> = entries
            .iter()
            .filter(|e| e.label.starts_with("task:"))
            .collect();
        tasks.sort_by(|a, b| b.duration.cmp(&a.duration));

        let mut lines = Vec::with_capacity(tasks.len() + 3);
        for entry in tasks {
            lines.push(format!(
                "  {:<40} {:>8.1}s",
                entry.label.trim_start_matches("task:"),
                entry.duration.as_secs_f64()
            ));
        }
        lines.push(format!(
            "  total wall time: {:.1}s across {} layers",
            self.wall_time.as_secs_f64(),
            self.layer_count
        ));
        lines.push(format!(
            "  total task time: {:.1}s across {} tasks",
            self.task_time.as_secs_f64(),
            self.task_count
        ));
        lines.push(format!(
            "  effective parallelism: {:.2}x",
            self.effective_parallelism()
        ));
        lines
    }
}
