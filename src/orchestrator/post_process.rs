//! Post-batch processing utilities.
//!
//! Handles JSON and CSV exports after a batch completes.

use crate::cli::Cli;
use crate::model::BatchReport;
use anyhow::{Context, Result};
use std::path::Path;

const CSV_HEADER: &str =
    "timestamp_utc,side,requested,completed,victories,losses,draws,failures,win_rate_percent,elapsed_ms,cancelled";

/// Write the requested exports and return one message per file written.
pub(crate) fn process_batch_completion(args: &Cli, report: &BatchReport) -> Result<Vec<String>> {
    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        export_json(export_path, report)?;
        export_messages.push(format!("Exported JSON: {}", export_path.display()));
    }
    if let Some(export_path) = args.export_csv.as_deref() {
        export_csv(export_path, report)?;
        export_messages.push(format!("Exported CSV: {}", export_path.display()));
    }
    Ok(export_messages)
}

pub(crate) fn export_json(path: &Path, report: &BatchReport) -> Result<()> {
    let out = serde_json::to_string_pretty(report)?;
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

pub(crate) fn export_csv(path: &Path, report: &BatchReport) -> Result<()> {
    let out = format!("{CSV_HEADER}\n{}\n", csv_row(report));
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

fn csv_row(report: &BatchReport) -> String {
    let t = &report.tally;
    format!(
        "{},{},{},{},{},{},{},{},{},{},{}",
        report.timestamp_utc,
        csv_field(report.config.side_of_interest.as_str()),
        t.requested,
        t.completed,
        t.victories,
        t.losses,
        t.draws,
        t.failures,
        t.win_rate_percent(),
        report.elapsed.as_millis(),
        report.cancelled
    )
}

/// Quote a field if it contains a delimiter, quote or newline.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchConfig, SideId, TallySnapshot};
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn report(side: &str) -> BatchReport {
        BatchReport {
            timestamp_utc: "2024-01-01T00:00:00Z".into(),
            config: BatchConfig {
                trial_count: 10,
                workers: NonZeroUsize::new(2).unwrap(),
                side_of_interest: SideId::from(side),
            },
            tally: TallySnapshot {
                requested: 10,
                completed: 10,
                victories: 7,
                losses: 2,
                draws: 0,
                failures: 1,
            },
            elapsed: Duration::from_millis(1234),
            cancelled: false,
            trial_durations: None,
        }
    }

    #[test]
    fn test_csv_row() {
        assert_eq!(
            csv_row(&report("blue")),
            "2024-01-01T00:00:00Z,blue,10,10,7,2,0,1,70,1234,false"
        );
    }

    #[test]
    fn test_csv_quotes_awkward_side_names() {
        assert!(csv_row(&report("blue, \"the best\"")).contains("\"blue, \"\"the best\"\"\""));
    }

    #[test]
    fn test_exports_write_files() {
        let dir = std::env::temp_dir().join(format!("battle-trials-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let json_path = dir.join("report.json");
        let csv_path = dir.join("report.csv");

        export_json(&json_path, &report("blue")).unwrap();
        let parsed: BatchReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.tally, report("blue").tally);

        export_csv(&csv_path, &report("blue")).unwrap();
        let csv = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert!(lines.next().unwrap().starts_with("2024-01-01T00:00:00Z,blue,"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
