//! Progress reporting for batched evaluation.
//!
//! The coordinator publishes a [`BatchProgress`] snapshot into a
//! `tokio::sync::watch` channel every time a unit of work finishes. A separate
//! reporter task forwards snapshots to a [`ProgressObserver`]. Publishing
//! never blocks; if the observer is slow, intermediate snapshots are
//! coalesced and only the latest one is delivered.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of the batch currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    /// Zero-based index of the current batch.
    pub batch_index: usize,
    pub batch_count: usize,
    /// Units finished in the current batch.
    pub completed: usize,
    /// Units in the current batch.
    pub total: usize,
    /// Batches fully awaited so far.
    pub batches_completed: usize,
}

pub trait ProgressObserver: Send + Sync {
    /// Latest "K of N done" for the current batch. May skip intermediate counts.
    fn on_progress(&self, progress: &BatchProgress);

    /// Called exactly once per batch, after all its units finished.
    fn on_batch_complete(&self, batch_index: usize, batch_count: usize);
}

// =============================================================================
// REPORTER
// =============================================================================

/// Publishing half held by the coordinator, plus the forwarding task.
pub(crate) struct ProgressReporter {
    tx: watch::Sender<BatchProgress>,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    pub(crate) fn spawn(observer: Arc<dyn ProgressObserver>) -> Self {
        let (tx, mut rx) = watch::channel(BatchProgress::default());
        let task = tokio::spawn(async move {
            let mut reported_batches = 0;
            while rx.changed().await.is_ok() {
                let snapshot = *rx.borrow_and_update();
                observer.on_progress(&snapshot);
                // Batch boundaries are counted, so a coalesced snapshot still
                // yields one completion signal per batch.
                while reported_batches < snapshot.batches_completed {
                    observer.on_batch_complete(reported_batches, snapshot.batch_count);
                    reported_batches += 1;
                }
            }
        });
        Self { tx, task }
    }

    pub(crate) fn publish(&self, progress: BatchProgress) {
        self.tx.send_replace(progress);
    }

    /// Close the channel and wait for the observer to drain the last snapshot.
    pub(crate) async fn finish(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "progress reporter task failed");
        }
    }
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Logs batch boundaries at `info` and per-unit counts at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, p: &BatchProgress) {
        tracing::debug!(
            batch = p.batch_index + 1,
            batches = p.batch_count,
            completed = p.completed,
            total = p.total,
            "batch progress"
        );
    }

    fn on_batch_complete(&self, batch_index: usize, batch_count: usize) {
        tracing::info!(batch = batch_index + 1, batches = batch_count, "batch complete");
    }
}

/// Rewrites a single terminal line with the running count.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrProgress;

impl ProgressObserver for StderrProgress {
    fn on_progress(&self, p: &BatchProgress) {
        let mut err = std::io::stderr().lock();
        let _ = write!(
            err,
            "\rbatch {}/{}: {}/{} samples done",
            p.batch_index + 1,
            p.batch_count,
            p.completed,
            p.total
        );
        let _ = err.flush();
    }

    fn on_batch_complete(&self, batch_index: usize, batch_count: usize) {
        eprintln!("\nbatch {}/{} complete", batch_index + 1, batch_count);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _progress: &BatchProgress) {}

    fn on_batch_complete(&self, _batch_index: usize, _batch_count: usize) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<BatchProgress>>,
        batches: Mutex<Vec<usize>>,
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, progress: &BatchProgress) {
            self.progress.lock().unwrap().push(*progress);
        }

        fn on_batch_complete(&self, batch_index: usize, _batch_count: usize) {
            self.batches.lock().unwrap().push(batch_index);
        }
    }

    #[tokio::test]
    async fn coalesced_snapshots_still_complete_every_batch() {
        let recorder = Arc::new(Recorder::default());
        let reporter = ProgressReporter::spawn(recorder.clone());

        // Published back to back without yielding; the reporter may only see the last.
        for batch in 0..3 {
            reporter.publish(BatchProgress {
                batch_index: batch,
                batch_count: 3,
                completed: 2,
                total: 2,
                batches_completed: batch + 1,
            });
        }
        reporter.finish().await;

        assert_eq!(*recorder.batches.lock().unwrap(), vec![0, 1, 2]);
        let last = *recorder.progress.lock().unwrap().last().unwrap();
        assert_eq!(last.batches_completed, 3);
    }

    #[tokio::test]
    async fn finish_without_publishing_reports_nothing() {
        let recorder = Arc::new(Recorder::default());
        ProgressReporter::spawn(recorder.clone()).finish().await;
        assert!(recorder.progress.lock().unwrap().is_empty());
        assert!(recorder.batches.lock().unwrap().is_empty());
    }
}
