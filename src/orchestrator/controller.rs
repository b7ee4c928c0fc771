//! Batch lifecycle controller.
//!
//! Owns the running batch, turns Ctrl-C into a cancel request, and emits
//! events for presentation layers.

use crate::engine::{TrialFactory, TrialRunner};
use crate::model::{BatchControl, BatchReport, InfoEvent, TrialEvent};
use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::Duration;
use tracing::debug;

/// Run one batch to completion, cancelling it on Ctrl-C.
pub(crate) async fn run_controller(
    runner: TrialRunner,
    factory: Arc<dyn TrialFactory>,
    event_tx: UnboundedSender<TrialEvent>,
) -> Result<BatchReport> {
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never request a cancel.
            futures::future::pending::<()>().await;
        }
    };
    drive_batch(runner, factory, event_tx, shutdown).await
}

/// Drive `runner` until it finishes; `shutdown` resolving requests a cancel.
pub(crate) async fn drive_batch<S>(
    runner: TrialRunner,
    factory: Arc<dyn TrialFactory>,
    event_tx: UnboundedSender<TrialEvent>,
    shutdown: S,
) -> Result<BatchReport>
where
    S: Future<Output = ()>,
{
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<BatchControl>();
    let run_events = event_tx.clone();
    let mut handle = tokio::spawn(async move { runner.run(factory, run_events, ctrl_rx).await });

    tokio::pin!(shutdown);
    let mut shutdown_seen = false;
    // Cancel watchdog: if a cancel takes too long, emit a status message to keep feedback alive.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            joined = &mut handle => {
                return joined.map_err(|e| anyhow!("batch task failed: {e}"));
            }
            _ = &mut shutdown, if !shutdown_seen => {
                shutdown_seen = true;
                debug!("cancel requested");
                let _ = ctrl_tx.send(BatchControl::Cancel);
                let _ = event_tx.send(TrialEvent::Info(InfoEvent::Cancelling));
                cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
            }
            // If cancel stalls (e.g., a resolver call still running), keep the user informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        let _ = event_tx.send(TrialEvent::Info(InfoEvent::StillCancelling));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrialFuture;
    use crate::model::{BatchConfig, SideId, TrialOutcome};
    use futures::FutureExt;
    use std::num::NonZeroUsize;

    fn runner(trials: u64) -> TrialRunner {
        TrialRunner::with_config(BatchConfig {
            trial_count: trials,
            workers: NonZeroUsize::new(4).unwrap(),
            side_of_interest: SideId::from("blue"),
        })
    }

    fn hanging_factory() -> Arc<dyn TrialFactory> {
        Arc::new(|_: u64| -> TrialFuture { futures::future::pending().boxed() })
    }

    #[tokio::test]
    async fn test_batch_without_shutdown_runs_to_completion() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory: Arc<dyn TrialFactory> =
            Arc::new(|_: u64| -> TrialFuture { async { Ok(TrialOutcome::Draw) }.boxed() });
        let report = drive_batch(runner(9), factory, tx, futures::future::pending())
            .await
            .unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.tally.draws, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_hanging_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = tokio::time::sleep(Duration::from_secs(1));
        let report = drive_batch(runner(6), hanging_factory(), tx, shutdown)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.tally.completed, 6);
        assert_eq!(report.tally.failures, 6);

        let mut saw_cancelling = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, TrialEvent::Info(InfoEvent::Cancelling)) {
                saw_cancelling = true;
            }
        }
        assert!(saw_cancelling);
    }
}
