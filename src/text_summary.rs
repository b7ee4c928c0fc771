//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for text mode.

use crate::model::{BatchReport, SideId, TrialOutcome, WatchdogResult};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished batch.
pub(crate) fn build_text_summary(report: &BatchReport) -> TextSummary {
    let mut lines = Vec::new();
    let t = &report.tally;

    lines.push(format!(
        "Side: {}   Trials: {}/{}   Workers: {}",
        report.config.side_of_interest, t.completed, t.requested, report.config.workers
    ));
    if report.cancelled {
        lines.push("Batch cancelled: unfinished trials are counted as failures".to_string());
    }
    lines.push(format!(
        "Victories: {} ({}%)",
        t.victories,
        t.win_rate_percent()
    ));
    lines.push(format!("Losses:    {} ({}%)", t.losses, t.loss_rate_percent()));
    lines.push(format!("Draws:     {} ({}%)", t.draws, t.draw_rate_percent()));
    if t.failures > 0 {
        lines.push(format!(
            "Failures:  {} of {} trials ({}%)",
            t.failures,
            t.requested,
            t.failure_rate_percent()
        ));
    }
    lines.push(format!(
        "Elapsed: {}",
        humantime::format_duration(truncate_to_millis(report.elapsed))
    ));
    if let Some(d) = report.trial_durations.as_ref() {
        lines.push(format!(
            "Trial time: avg {:.1} med {:.1} p25 {:.1} p75 {:.1} p99 {:.1} max {:.1} ms",
            d.mean_ms, d.median_ms, d.p25_ms, d.p75_ms, d.p99_ms, d.max_ms
        ));
    }

    TextSummary { lines }
}

/// Build a text summary from a single watched trial.
pub(crate) fn build_single_summary(result: &WatchdogResult, side: &SideId) -> TextSummary {
    let verdict = match result.outcome.as_ref() {
        Some(TrialOutcome::Win(winner)) if winner == side => format!("Victory for {side}"),
        Some(TrialOutcome::Win(winner)) => format!("Defeat: {winner} won"),
        Some(TrialOutcome::Loss) => "Defeat".to_string(),
        Some(TrialOutcome::Draw) => "Draw".to_string(),
        None => "No result: the simulation failed (see log)".to_string(),
    };
    TextSummary {
        lines: vec![
            verdict,
            format!(
                "Elapsed: {}",
                humantime::format_duration(truncate_to_millis(result.elapsed))
            ),
        ],
    }
}

fn truncate_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
