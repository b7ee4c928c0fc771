//! Heartbeat progress for a single long-running trial.
//!
//! The resolver gives no progress of its own, so a ticker task publishes a
//! synthetic, wrapping percentage until the real trial finishes. The ticker
//! also bounds how long the caller can be kept waiting.

use crate::engine::TrialFuture;
use crate::model::{HeartbeatConfig, TrialEvent, TrialOutcome, WatchdogResult};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum WatchdogError {
    /// The trial never finished within the heartbeat ceiling.
    #[error("trial did not finish after {ticks} heartbeat ticks ({elapsed:?})")]
    CeilingExceeded { ticks: u64, elapsed: Duration },
    #[error("heartbeat task failed: {0}")]
    Ticker(String),
}

/// One-shot completion flag shared between the real task and the ticker.
///
/// Released on the first `release` call or when dropped, whichever comes first.
struct Gate(watch::Sender<bool>);

impl Gate {
    fn release(&self) {
        self.0.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        });
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        self.release();
    }
}

/// Aborts the tasks it owns when dropped; the single teardown path for every exit.
struct TaskGuard(Vec<AbortHandle>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

enum TickerExit {
    Released { ticks: u64 },
    Ceiling { ticks: u64 },
}

pub struct HeartbeatWatchdog {
    cfg: HeartbeatConfig,
}

impl HeartbeatWatchdog {
    pub fn new(cfg: HeartbeatConfig) -> Self {
        Self { cfg }
    }

    /// Run `trial` once while publishing heartbeat ticks.
    ///
    /// A trial error surfaces as `outcome: None`; a trial that outlives the
    /// tick ceiling surfaces as [`WatchdogError::CeilingExceeded`].
    pub async fn run(
        &self,
        trial: TrialFuture,
        event_tx: mpsc::UnboundedSender<TrialEvent>,
    ) -> Result<WatchdogResult, WatchdogError> {
        let start = Instant::now();
        let (gate_tx, gate_rx) = watch::channel(false);

        let real = tokio::spawn(async move {
            let gate = Gate(gate_tx);
            let outcome = trial.await;
            gate.release();
            outcome
        });
        let ticker = tokio::spawn(run_ticker(self.cfg.clone(), gate_rx, event_tx));
        let _guard = TaskGuard(vec![real.abort_handle(), ticker.abort_handle()]);

        let ticks = match ticker.await {
            Ok(TickerExit::Released { ticks }) => ticks,
            Ok(TickerExit::Ceiling { ticks }) => {
                let elapsed = start.elapsed();
                warn!(ticks, ?elapsed, "trial exceeded heartbeat ceiling, giving up");
                return Err(WatchdogError::CeilingExceeded { ticks, elapsed });
            }
            Err(e) => return Err(WatchdogError::Ticker(e.to_string())),
        };

        let outcome: Option<TrialOutcome> = match real.await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "trial failed");
                None
            }
            Err(e) => {
                error!(error = %e, "trial task panicked");
                None
            }
        };

        let elapsed = start.elapsed();
        debug!(ticks, ?elapsed, has_outcome = outcome.is_some(), "watched trial finished");
        Ok(WatchdogResult {
            outcome,
            elapsed,
            ticks,
        })
    }
}

/// Random wait in `[tick_min, tick_max]`.
fn next_wait(cfg: &HeartbeatConfig) -> Duration {
    let lo = cfg.tick_min.as_millis() as u64;
    let hi = cfg.tick_max.as_millis() as u64;
    if hi <= lo {
        return cfg.tick_min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

async fn run_ticker(
    cfg: HeartbeatConfig,
    mut gate: watch::Receiver<bool>,
    event_tx: mpsc::UnboundedSender<TrialEvent>,
) -> TickerExit {
    let mut percent = 0u8;
    let mut ticks = 0u64;
    loop {
        let wait = next_wait(&cfg);
        match tokio::time::timeout(wait, gate.wait_for(|released| *released)).await {
            // A closed channel means the gate was dropped, which also releases it.
            Ok(_) => return TickerExit::Released { ticks },
            Err(_) => {
                ticks += 1;
                percent = (percent + 1) % 100;
                let _ = event_tx.send(TrialEvent::Heartbeat { percent });
            }
        }
        if ticks >= cfg.max_ticks {
            // A release racing the last timeout still counts as finished.
            if *gate.borrow() {
                return TickerExit::Released { ticks };
            }
            return TickerExit::Ceiling { ticks };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SideId;
    use anyhow::anyhow;
    use futures::FutureExt;

    fn config(max_ticks: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            tick_min: Duration::from_millis(750),
            tick_max: Duration::from_millis(1500),
            max_ticks,
        }
    }

    fn heartbeats(rx: &mut mpsc::UnboundedReceiver<TrialEvent>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let TrialEvent::Heartbeat { percent } = ev {
                out.push(percent);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_trial_returns_outcome_without_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = HeartbeatWatchdog::new(config(4800));
        let res = watchdog
            .run(async { Ok(TrialOutcome::Win(SideId::from("blue"))) }.boxed(), tx)
            .await
            .unwrap();
        assert_eq!(res.outcome, Some(TrialOutcome::Win(SideId::from("blue"))));
        assert_eq!(res.ticks, 0);
        assert!(heartbeats(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_once_trial_finishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = HeartbeatWatchdog::new(config(4800));
        let trial = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(TrialOutcome::Draw)
        }
        .boxed();
        let res = watchdog.run(trial, tx).await.unwrap();
        assert_eq!(res.outcome, Some(TrialOutcome::Draw));

        // 10s of waits between 750ms and 1500ms: between 6 and 13 timeouts.
        let ticks = heartbeats(&mut rx);
        assert!((6..=13).contains(&ticks.len()), "got {} ticks", ticks.len());
        assert_eq!(ticks.len() as u64, res.ticks);
        assert_eq!(ticks, (1..=ticks.len() as u8).collect::<Vec<_>>());

        // Nothing published after the result came back.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(heartbeats(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_yields_no_result() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let watchdog = HeartbeatWatchdog::new(config(4800));
        let trial = async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Err(anyhow!("engine crashed"))
        }
        .boxed();
        let res = watchdog.run(trial, tx).await.unwrap();
        assert!(res.outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_trial_still_releases_gate() {
        let (tx, _rx) = mpsc::unbounded_channel();
        async fn explode() -> anyhow::Result<TrialOutcome> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            panic!("resolver bug")
        }

        let watchdog = HeartbeatWatchdog::new(config(10));
        let res = watchdog.run(explode().boxed(), tx).await.unwrap();
        assert!(res.outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_trial_hits_ceiling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = HeartbeatWatchdog::new(config(5));
        let trial = futures::future::pending().boxed();
        let err = watchdog.run(trial, tx).await.unwrap_err();
        match err {
            WatchdogError::CeilingExceeded { ticks, elapsed } => {
                assert_eq!(ticks, 5);
                assert!(elapsed >= Duration::from_millis(5 * 750));
                assert!(elapsed <= Duration::from_millis(5 * 1500));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(heartbeats(&mut rx).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_still_reports_finished_trial() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let res = HeartbeatWatchdog::new(config(0))
            .run(async { Ok(TrialOutcome::Draw) }.boxed(), tx)
            .await
            .unwrap();
        assert_eq!(res.outcome, Some(TrialOutcome::Draw));
        assert_eq!(res.ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_finishing_inside_last_tick_is_not_a_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = HeartbeatConfig {
            tick_min: Duration::from_millis(10),
            tick_max: Duration::from_millis(10),
            max_ticks: 3,
        };
        let trial = async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            Ok(TrialOutcome::Loss)
        }
        .boxed();
        let res = HeartbeatWatchdog::new(cfg).run(trial, tx).await.unwrap();
        assert_eq!(res.outcome, Some(TrialOutcome::Loss));
        assert_eq!(res.ticks, 2);
        assert_eq!(heartbeats(&mut rx), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_percent_wraps() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cfg = HeartbeatConfig {
            tick_min: Duration::from_millis(10),
            tick_max: Duration::from_millis(10),
            max_ticks: 250,
        };
        let err = HeartbeatWatchdog::new(cfg)
            .run(futures::future::pending().boxed(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchdogError::CeilingExceeded { ticks: 250, .. }));
        let ticks = heartbeats(&mut rx);
        assert_eq!(ticks.len(), 250);
        assert!(ticks.iter().all(|p| *p < 100));
        assert_eq!(ticks[98], 99);
        assert_eq!(ticks[99], 0);
    }

    #[test]
    fn test_next_wait_stays_in_bounds() {
        let cfg = HeartbeatConfig::default();
        for _ in 0..1000 {
            let w = next_wait(&cfg);
            assert!(w >= cfg.tick_min && w <= cfg.tick_max);
        }
        let fixed = HeartbeatConfig {
            tick_min: Duration::from_millis(5),
            tick_max: Duration::from_millis(1),
            max_ticks: 1,
        };
        assert_eq!(next_wait(&fixed), Duration::from_millis(5));
    }
}
