use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Identifier of one participant in a battle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SideId(pub String);

impl SideId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SideId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one trial as reported by the battle resolver.
///
/// A trial that errors produces no outcome at all; that case is carried by the
/// `Err` arm of the trial future, not by this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialOutcome {
    /// The named side won outright.
    Win(SideId),
    /// Another side won (for resolvers that report relative to the side of interest).
    Loss,
    /// No side won outright.
    Draw,
}

/// Point-in-time copy of the tally counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallySnapshot {
    pub requested: u64,
    pub completed: u64,
    pub victories: u64,
    pub losses: u64,
    pub draws: u64,
    pub failures: u64,
}

impl TallySnapshot {
    /// Percentage of completed trials won by the side of interest, truncated.
    pub fn win_rate_percent(&self) -> u64 {
        percent_of(self.victories, self.completed)
    }

    pub fn loss_rate_percent(&self) -> u64 {
        percent_of(self.losses, self.completed)
    }

    pub fn draw_rate_percent(&self) -> u64 {
        percent_of(self.draws, self.completed)
    }

    pub fn failure_rate_percent(&self) -> u64 {
        percent_of(self.failures, self.completed)
    }

    /// Every completed trial sits in exactly one bucket and nothing completed
    /// that was not requested.
    pub fn is_balanced(&self) -> bool {
        self.victories + self.losses + self.draws + self.failures == self.completed
            && self.completed <= self.requested
    }
}

fn percent_of(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    part * 100 / whole
}

/// Parameters for one batch of trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub trial_count: u64,
    pub workers: NonZeroUsize,
    pub side_of_interest: SideId,
}

/// Tuning for the single-trial heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(with = "humantime_serde")]
    pub tick_min: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_max: Duration,
    /// Timed-out waits allowed before the watchdog gives up on the trial.
    pub max_ticks: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_min: Duration::from_millis(750),
            tick_max: Duration::from_millis(1500),
            max_ticks: 4800,
        }
    }
}

/// Control messages accepted by a running batch.
#[derive(Debug, Clone)]
pub enum BatchControl {
    /// Abandon every trial that has not finished yet.
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrialEvent {
    BatchStarted {
        requested: u64,
        workers: usize,
    },
    Progress {
        percent: u8,
    },
    TrialFailed {
        index: u64,
        message: String,
    },
    Heartbeat {
        percent: u8,
    },
    Info(InfoEvent),
    BatchCompleted {
        // Boxed so the per-trial events stay small.
        report: Box<BatchReport>,
    },
}

/// Structured info events emitted by the orchestrator and consumed by CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Cancelling,
    StillCancelling,
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Cancelling => "Cancelling… (unfinished trials count as failures)".to_string(),
            InfoEvent::StillCancelling => "Still cancelling…".to_string(),
        }
    }
}

/// Wall-clock distribution of individual trial durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationSummary {
    pub samples: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p25_ms: f64,
    pub p75_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub config: BatchConfig,
    pub tally: TallySnapshot,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub trial_durations: Option<DurationSummary>,
}

/// Outcome of a single watched trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogResult {
    /// `None` when the trial raised instead of returning.
    pub outcome: Option<TrialOutcome>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Heartbeat ticks published while the trial ran.
    pub ticks: u64,
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
