use crate::model::DurationSummary;
use hdrhistogram::Histogram;
use std::time::Duration;

/// Longest trial duration tracked exactly; longer trials are clamped to it.
const MAX_TRACKED_MICROS: u64 = 24 * 60 * 60 * 1_000_000;

/// Records trial wall-clock durations at microsecond resolution.
pub struct DurationRecorder {
    hist: Histogram<u64>,
}

impl DurationRecorder {
    pub fn new() -> Self {
        let hist = Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_MICROS, 3)
            .expect("1µs..24h at 3 significant figures is a valid histogram range");
        Self { hist }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX).max(1);
        self.hist.saturating_record(micros);
    }

    /// Compute min/mean/median/p25/p75/p99/max in milliseconds; `None` when empty.
    pub fn summary(&self) -> Option<DurationSummary> {
        if self.hist.is_empty() {
            return None;
        }
        let ms = |micros: u64| micros as f64 / 1000.0;
        Some(DurationSummary {
            samples: self.hist.len(),
            min_ms: ms(self.hist.min()),
            mean_ms: self.hist.mean() / 1000.0,
            median_ms: ms(self.hist.value_at_quantile(0.50)),
            p25_ms: ms(self.hist.value_at_quantile(0.25)),
            p75_ms: ms(self.hist.value_at_quantile(0.75)),
            p99_ms: ms(self.hist.value_at_quantile(0.99)),
            max_ms: ms(self.hist.max()),
        })
    }
}

impl Default for DurationRecorder {
    fn default() -> Self {
        Self::new()
    }
}
