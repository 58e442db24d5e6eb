//! Bounded-concurrency batch execution.
//!
//! Runs a list of items through an async processing function with a
//! counting semaphore limiting in-flight work (default 4), collecting
//! per-item errors instead of propagating them: the batch always runs to
//! completion and the caller receives both results and failures. A strict
//! mode surfaces the first error after the batch drains.
//!
//! Cancellation is cooperative: once the flag is set, in-flight items
//! finish their current subprocess or API call and no new items start.

use crate::error::{RepoFleetError, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default in-flight ceiling for batch work.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Shared cancellation flag for a running batch.
///
/// Cloning is cheap; any clone can cancel.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. In-flight items finish; pending items are
    /// never started.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a batch run.
///
/// `results` is positional: slot `i` holds the output of item `i`, or
/// `None` when the item failed or was never started. `errors` carries
/// `(item, error)` pairs without positional guarantees.
#[derive(Debug)]
pub struct BatchReport<I, T> {
    /// Positional results, one slot per input item
    pub results: Vec<Option<T>>,
    /// Collected failures as (item, error) pairs
    pub errors: Vec<(I, RepoFleetError)>,
    /// Whether the batch was cancelled before all items started
    pub cancelled: bool,
}

impl<I, T> BatchReport<I, T> {
    /// Number of successful items.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Batch runner with a configurable in-flight ceiling.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    concurrency: Option<usize>,
    strict: bool,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BatchExecutor {
    /// Concurrent executor with the given in-flight ceiling (minimum 1).
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency: Some(concurrency.max(1)), strict: false }
    }

    /// Sequential executor: items run one after another, no semaphore.
    #[must_use]
    pub fn sequential() -> Self {
        Self { concurrency: None, strict: false }
    }

    /// Surface the first collected error after the batch drains instead of
    /// returning a report.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Run every item through `process`, collecting results and errors.
    ///
    /// # Errors
    ///
    /// Only in strict mode: the first collected error is returned after the
    /// batch completes.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancelFlag,
        process: F,
    ) -> Result<BatchReport<I, T>>
    where
        I: Clone,
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_hooks(items, cancel, process, |_, _| {}, |_, _| {}).await
    }

    /// Like [`BatchExecutor::run`] with per-item success/error hooks.
    ///
    /// Hooks fire exactly once per finished item, before its slot is
    /// recorded.
    ///
    /// # Errors
    ///
    /// Only in strict mode: the first collected error is returned after the
    /// batch completes.
    pub async fn run_with_hooks<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancelFlag,
        process: F,
        on_success: impl Fn(&I, &T),
        on_error: impl Fn(&I, &RepoFleetError),
    ) -> Result<BatchReport<I, T>>
    where
        I: Clone,
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = items.len();
        let mut results: Vec<Option<T>> = Vec::with_capacity(total);
        results.resize_with(total, || None);
        let mut errors: Vec<(I, RepoFleetError)> = Vec::new();

        tracing::debug!(
            items = total,
            concurrency = ?self.concurrency,
            "Starting batch"
        );

        match self.concurrency {
            None => {
                // Sequential mode: one item at a time, same bookkeeping.
                for (index, item) in items.into_iter().enumerate() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match process(index, item.clone()).await {
                        Ok(value) => {
                            on_success(&item, &value);
                            results[index] = Some(value);
                        }
                        Err(error) => {
                            on_error(&item, &error);
                            errors.push((item, error));
                        }
                    }
                }
            }
            Some(limit) => {
                let semaphore = Arc::new(Semaphore::new(limit));
                let futures = items.into_iter().enumerate().map(|(index, item)| {
                    let semaphore = Arc::clone(&semaphore);
                    let process = &process;
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return (index, item, None);
                        }
                        let Ok(_permit) = semaphore.acquire().await else {
                            return (index, item, None);
                        };
                        if cancel.is_cancelled() {
                            return (index, item, None);
                        }
                        let outcome = process(index, item.clone()).await;
                        (index, item, Some(outcome))
                    }
                });

                for (index, item, outcome) in join_all(futures).await {
                    match outcome {
                        Some(Ok(value)) => {
                            on_success(&item, &value);
                            results[index] = Some(value);
                        }
                        Some(Err(error)) => {
                            on_error(&item, &error);
                            errors.push((item, error));
                        }
                        None => {}
                    }
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        tracing::debug!(
            ok = results.iter().filter(|r| r.is_some()).count(),
            failed = errors.len(),
            cancelled = cancelled,
            "Batch finished"
        );

        if self.strict {
            if let Some((_, error)) = errors.into_iter().next() {
                return Err(error);
            }
            return Ok(BatchReport { results, errors: Vec::new(), cancelled });
        }

        Ok(BatchReport { results, errors, cancelled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_results_are_positional() {
        let executor = BatchExecutor::new(3);
        let report = executor
            .run(vec![1u32, 2, 3, 4], &CancelFlag::new(), |_, n| async move { Ok(n * 10) })
            .await
            .unwrap();
        assert_eq!(report.results, vec![Some(10), Some(20), Some(30), Some(40)]);
        assert!(report.errors.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_errors_collected_not_propagated() {
        let executor = BatchExecutor::new(2);
        let report = executor
            .run(vec![1u32, 2, 3], &CancelFlag::new(), |_, n| async move {
                if n == 2 {
                    Err(RepoFleetError::validation("boom"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        // Every input accounts for exactly one slot: success or error.
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.success_count() + report.errors.len(), 3);
        assert_eq!(report.results[1], None);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, 2);
    }

    #[tokio::test]
    async fn test_strict_mode_surfaces_first_error() {
        let executor = BatchExecutor::new(2).strict();
        let err = executor
            .run(vec![1u32, 2], &CancelFlag::new(), |_, n| async move {
                if n == 2 {
                    Err(RepoFleetError::validation("boom"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoFleetError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let executor = BatchExecutor::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = executor
            .run(vec![(); 8], &CancelFlag::new(), |_, ()| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report.success_count(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_items() {
        let executor = BatchExecutor::sequential();
        let cancel = CancelFlag::new();
        let cancel_inner = cancel.clone();

        let report = executor
            .run(vec![1u32, 2, 3, 4], &cancel, |_, n| {
                let cancel = cancel_inner.clone();
                async move {
                    if n == 2 {
                        cancel.cancel();
                    }
                    Ok(n)
                }
            })
            .await
            .unwrap();

        // Items 1 and 2 ran; 3 and 4 never started.
        assert_eq!(report.results[0], Some(1));
        assert_eq!(report.results[1], Some(2));
        assert_eq!(report.results[2], None);
        assert_eq!(report.results[3], None);
        assert!(report.cancelled);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_hooks_fire_per_item() {
        let executor = BatchExecutor::new(2);
        let ok_count = AtomicUsize::new(0);
        let err_count = AtomicUsize::new(0);

        let _ = executor
            .run_with_hooks(
                vec![1u32, 2, 3],
                &CancelFlag::new(),
                |_, n| async move {
                    if n == 3 {
                        Err(RepoFleetError::validation("x"))
                    } else {
                        Ok(n)
                    }
                },
                |_, _| {
                    ok_count.fetch_add(1, Ordering::SeqCst);
                },
                |_, _| {
                    err_count.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
            .unwrap();

        assert_eq!(ok_count.load(Ordering::SeqCst), 2);
        assert_eq!(err_count.load(Ordering::SeqCst), 1);
    }
}
