//! Trial execution: the resolver seam, the tally, the batch runner and the
//! single-trial heartbeat watchdog.

mod pool;
mod runner;
pub mod skirmish;
mod tally;
mod watchdog;

use crate::model::TrialOutcome;
use anyhow::Result;
use futures::future::BoxFuture;

pub use pool::WorkerPool;
pub use runner::TrialRunner;
pub use tally::TallyAggregator;
pub use watchdog::{HeartbeatWatchdog, WatchdogError};

/// One in-flight invocation of the battle resolver.
pub type TrialFuture = BoxFuture<'static, Result<TrialOutcome>>;

/// Produces independent trials.
///
/// Every call must build its own copy of whatever the resolver needs; no two
/// trials may share mutable inputs.
pub trait TrialFactory: Send + Sync + 'static {
    fn create(&self, index: u64) -> TrialFuture;
}

impl<F> TrialFactory for F
where
    F: Fn(u64) -> TrialFuture + Send + Sync + 'static,
{
    fn create(&self, index: u64) -> TrialFuture {
        self(index)
    }
}
