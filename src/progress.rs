//! Progress reporting sinks.
//!
//! The core reports progress through the [`ProgressSink`] trait: one
//! overall task with a known total, sub-tasks per provider or per item,
//! message updates, and advancement. [`IndicatifSink`] renders bars on a
//! terminal; [`NoopSink`] discards everything and is used whenever output
//! is machine-readable (JSON).

use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opaque handle for a task created on a sink.
pub type TaskId = usize;

/// Destination for progress events. Implementations must be cheap enough to
/// call per item and safe to share across tasks.
pub trait ProgressSink: Send + Sync {
    /// Create a top-level task. `total` is the number of expected steps,
    /// when known.
    fn add_task(&self, description: &str, total: Option<u64>) -> TaskId;

    /// Create a sub-task under an existing task.
    fn add_subtask(&self, parent: TaskId, description: &str, total: Option<u64>) -> TaskId;

    /// Replace a task's description.
    fn set_message(&self, task: TaskId, message: &str);

    /// Advance a task by `delta` steps.
    fn advance(&self, task: TaskId, delta: u64);

    /// Complete a task with a final message.
    fn finish(&self, task: TaskId, message: &str);
}

/// Sink that discards all progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn add_task(&self, _description: &str, _total: Option<u64>) -> TaskId {
        0
    }

    fn add_subtask(&self, _parent: TaskId, _description: &str, _total: Option<u64>) -> TaskId {
        0
    }

    fn set_message(&self, _task: TaskId, _message: &str) {}

    fn advance(&self, _task: TaskId, _delta: u64) {}

    fn finish(&self, _task: TaskId, _message: &str) {}
}

/// Terminal progress bars backed by `indicatif`.
pub struct IndicatifSink {
    multi: MultiProgress,
    bars: DashMap<TaskId, ProgressBar>,
    next_id: AtomicUsize,
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self { multi: MultiProgress::new(), bars: DashMap::new(), next_id: AtomicUsize::new(1) }
    }

    fn style(total: Option<u64>) -> ProgressStyle {
        match total {
            Some(_) => ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            None => ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        }
    }

    fn insert_bar(&self, description: &str, total: Option<u64>) -> TaskId {
        let bar = match total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        bar.set_style(Self::style(total));
        bar.set_message(description.to_string());
        let bar = self.multi.add(bar);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.bars.insert(id, bar);
        id
    }
}

impl ProgressSink for IndicatifSink {
    fn add_task(&self, description: &str, total: Option<u64>) -> TaskId {
        self.insert_bar(description, total)
    }

    fn add_subtask(&self, _parent: TaskId, description: &str, total: Option<u64>) -> TaskId {
        // MultiProgress renders insertion order; nesting is visual only.
        self.insert_bar(&format!("  {description}"), total)
    }

    fn set_message(&self, task: TaskId, message: &str) {
        if let Some(bar) = self.bars.get(&task) {
            bar.set_message(message.to_string());
        }
    }

    fn advance(&self, task: TaskId, delta: u64) {
        if let Some(bar) = self.bars.get(&task) {
            bar.inc(delta);
        }
    }

    fn finish(&self, task: TaskId, message: &str) {
        if let Some((_, bar)) = self.bars.remove(&task) {
            bar.finish_with_message(message.to_string());
        }
    }
}
