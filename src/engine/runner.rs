use crate::engine::{TallyAggregator, TrialFactory, WorkerPool};
use crate::metrics::DurationRecorder;
use crate::model::{BatchConfig, BatchControl, BatchReport, TrialEvent, TrialOutcome};
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a finished trial task hands back to the collector.
struct TrialReturn {
    index: u64,
    result: Result<TrialOutcome>,
    elapsed: Duration,
}

/// Fraction of a batch that has finished, as a whole percentage in `[0, 100]`.
pub fn progress_percent(completed: u64, requested: u64) -> u8 {
    if requested == 0 {
        return 100;
    }
    let pct = completed.saturating_mul(100) / requested;
    pct.min(100) as u8
}

/// Runs one batch of independent trials on a bounded worker pool.
pub struct TrialRunner {
    cfg: BatchConfig,
    pool: WorkerPool,
}

impl TrialRunner {
    pub fn new(cfg: BatchConfig, pool: WorkerPool) -> Self {
        Self { cfg, pool }
    }

    /// Build a runner whose pool is sized from `cfg.workers`.
    pub fn with_config(cfg: BatchConfig) -> Self {
        let pool = WorkerPool::new(cfg.workers);
        Self::new(cfg, pool)
    }

    /// Run every trial to completion and return the final tally.
    ///
    /// Never fails: trial errors, panics and abandoned trials are all counted
    /// as failures.
    pub async fn run(
        self,
        factory: Arc<dyn TrialFactory>,
        event_tx: mpsc::UnboundedSender<TrialEvent>,
        mut control_rx: mpsc::UnboundedReceiver<BatchControl>,
    ) -> BatchReport {
        let requested = self.cfg.trial_count;
        let tally = TallyAggregator::new(self.cfg.side_of_interest.clone(), requested);
        let start = Instant::now();

        if requested == 0 {
            debug!("empty batch requested, nothing to run");
            return self.finish(&tally, start, false, None, &event_tx);
        }

        let _ = event_tx.send(TrialEvent::BatchStarted {
            requested,
            workers: self.pool.size(),
        });
        info!(
            trials = requested,
            workers = self.pool.size(),
            side = %self.cfg.side_of_interest,
            "starting batch"
        );

        let mut trials = JoinSet::new();
        for index in 0..requested {
            let factory = Arc::clone(&factory);
            self.pool.spawn(&mut trials, async move {
                let started = Instant::now();
                // The trial state is built only once a worker slot is free.
                let result = AssertUnwindSafe(async move { factory.create(index).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(anyhow!("trial panicked: {}", panic_message(&*payload))));
                TrialReturn {
                    index,
                    result,
                    elapsed: started.elapsed(),
                }
            });
        }

        let mut durations = DurationRecorder::new();
        let mut last_percent = 0u8;
        let mut cancelled = false;
        let mut control_open = true;

        loop {
            tokio::select! {
                joined = trials.join_next() => {
                    let Some(joined) = joined else { break };
                    self.collect(joined, &tally, &mut durations, &event_tx);

                    let percent = progress_percent(tally.snapshot().completed, requested).max(last_percent);
                    last_percent = percent;
                    let _ = event_tx.send(TrialEvent::Progress { percent });
                }
                ctrl = control_rx.recv(), if control_open && !cancelled => {
                    match ctrl {
                        Some(BatchControl::Cancel) => {
                            cancelled = true;
                            info!(pending = trials.len(), "batch cancelled, abandoning unfinished trials");
                            trials.abort_all();
                        }
                        None => control_open = false,
                    }
                }
            }
        }

        self.finish(&tally, start, cancelled, durations.summary(), &event_tx)
    }

    /// Route one joined task to exactly one tally bucket.
    fn collect(
        &self,
        joined: Result<TrialReturn, JoinError>,
        tally: &TallyAggregator,
        durations: &mut DurationRecorder,
        event_tx: &mpsc::UnboundedSender<TrialEvent>,
    ) {
        match joined {
            Ok(TrialReturn {
                index,
                result,
                elapsed,
            }) => {
                durations.record(elapsed);
                match result {
                    Ok(outcome) => tally.record_outcome(&outcome),
                    Err(e) => {
                        tally.record_failure();
                        let message = format!("{e:#}");
                        warn!(trial = index, error = %message, "trial failed");
                        let _ = event_tx.send(TrialEvent::TrialFailed { index, message });
                    }
                }
            }
            Err(e) => {
                // Only abandoned trials end up here; panics are caught inside the task.
                tally.record_failure();
                debug!(error = %e, "trial abandoned before finishing");
            }
        }
    }

    fn finish(
        &self,
        tally: &TallyAggregator,
        start: Instant,
        cancelled: bool,
        trial_durations: Option<crate::model::DurationSummary>,
        event_tx: &mpsc::UnboundedSender<TrialEvent>,
    ) -> BatchReport {
        let snapshot = tally.snapshot();
        if !snapshot.is_balanced() || snapshot.completed != snapshot.requested {
            warn!(?snapshot, "batch accounting mismatch");
        }
        let report = BatchReport {
            timestamp_utc: crate::model::now_rfc3339(),
            config: self.cfg.clone(),
            tally: snapshot,
            elapsed: start.elapsed(),
            cancelled,
            trial_durations,
        };
        info!(
            completed = snapshot.completed,
            victories = snapshot.victories,
            failures = snapshot.failures,
            elapsed = ?report.elapsed,
            "batch finished"
        );
        let _ = event_tx.send(TrialEvent::BatchCompleted {
            report: Box::new(report.clone()),
        });
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
