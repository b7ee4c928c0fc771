use crate::engine::skirmish::{self, Battlefield, Force, Scenario, SkirmishEngine};
use crate::engine::{HeartbeatWatchdog, TrialFactory, TrialRunner, WatchdogError};
use crate::model::{BatchConfig, BatchReport, HeartbeatConfig, SideId, TrialEvent};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "battle-trials",
    version,
    about = "Run a battle simulation many times in parallel and summarize the outcomes"
)]
pub struct Cli {
    /// Number of independent trials to run
    #[arg(long, short = 'n', default_value_t = 1000)]
    pub trials: u64,

    /// Number of trials allowed to run at the same time (at least 1)
    #[arg(long, short = 'w', default_value = "4")]
    pub workers: NonZeroUsize,

    /// Side whose win/loss/draw rate is reported
    #[arg(long, default_value = "blue")]
    pub side: String,

    /// Force taking part, as NAME:STRENGTH[:QUALITY] (repeatable)
    #[arg(long = "force", value_name = "NAME:STRENGTH[:QUALITY]")]
    pub forces: Vec<String>,

    /// Load forces and battlefield from a JSON scenario file instead of --force
    #[arg(long, conflicts_with = "forces")]
    pub scenario: Option<std::path::PathBuf>,

    /// Battlefield name used in reports and resolver errors
    #[arg(long, default_value = "open field")]
    pub battlefield: String,

    /// Fraction of losses absorbed by terrain, in [0, 1)
    #[arg(long, default_value_t = 0.0)]
    pub cover: f64,

    /// Round limit after which a battle is a draw
    #[arg(long, default_value_t = 200)]
    pub max_rounds: u32,

    /// Base RNG seed; trial i uses seed + i
    #[arg(long)]
    pub seed: Option<u64>,

    /// Artificial extra time spent in every trial
    #[arg(long, default_value = "0s")]
    pub trial_delay: humantime::Duration,

    /// Probability that a trial fails instead of returning an outcome
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Run one trial with a heartbeat progress indicator instead of a batch
    #[arg(long)]
    pub single: bool,

    /// Shortest wait between heartbeat ticks
    #[arg(long, default_value = "750ms")]
    pub tick_min: humantime::Duration,

    /// Longest wait between heartbeat ticks
    #[arg(long, default_value = "1500ms")]
    pub tick_max: humantime::Duration,

    /// Heartbeat ticks before a single trial is abandoned as timed out
    #[arg(long, default_value_t = 4800, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_ticks: u64,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export the batch report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Export the batch tally as CSV
    #[arg(long)]
    pub export_csv: Option<std::path::PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive"));
    }

    init_logging(&args);

    let scenario = build_scenario(&args)?;
    let side = SideId::new(args.side.clone());
    if !scenario.has_side(&side) {
        tracing::warn!(%side, "side of interest takes no part in the scenario; it can never win");
    }
    let engine = SkirmishEngine::new(scenario)
        .with_seed(args.seed)
        .with_delay(Duration::from(args.trial_delay))
        .with_failure_rate(args.failure_rate);

    if args.single {
        return run_single(&args, engine).await;
    }
    run_batch(&args, Arc::new(engine)).await
}

fn init_logging(args: &Cli) {
    if args.silent {
        return;
    }
    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // Ignore the error if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Build the scenario from `--scenario` or the `--force` list.
pub fn build_scenario(args: &Cli) -> Result<Scenario> {
    if let Some(path) = args.scenario.as_deref() {
        return Scenario::load(path);
    }
    let forces = if args.forces.is_empty() {
        vec![
            Force {
                side: SideId::from("blue"),
                strength: 100,
                quality: 1.0,
            },
            Force {
                side: SideId::from("red"),
                strength: 100,
                quality: 1.0,
            },
        ]
    } else {
        args.forces
            .iter()
            .map(|s| skirmish::parse_force(s))
            .collect::<Result<Vec<_>>>()?
    };
    let scenario = Scenario {
        forces,
        battlefield: Battlefield {
            name: args.battlefield.clone(),
            cover: args.cover,
        },
        max_rounds: args.max_rounds,
    };
    scenario.validate().context("invalid scenario")?;
    Ok(scenario)
}

/// Build a `BatchConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> BatchConfig {
    BatchConfig {
        trial_count: args.trials,
        workers: args.workers,
        side_of_interest: SideId::new(args.side.clone()),
    }
}

/// Build a `HeartbeatConfig` from CLI arguments.
pub fn build_heartbeat_config(args: &Cli) -> HeartbeatConfig {
    HeartbeatConfig {
        tick_min: Duration::from(args.tick_min),
        tick_max: Duration::from(args.tick_max),
        max_ticks: args.max_ticks,
    }
}

async fn run_batch(args: &Cli, factory: Arc<dyn TrialFactory>) -> Result<()> {
    let runner = TrialRunner::with_config(build_config(args));
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<TrialEvent>();

    let controller = tokio::spawn(crate::orchestrator::run_controller(runner, factory, evt_tx));

    // Progress goes to stderr only in text mode; JSON mode keeps stderr for logs.
    let show_progress = !args.json;
    let mut last_shown: Option<u8> = None;
    while let Some(ev) = evt_rx.recv().await {
        let Some(tx) = out_tx.as_ref() else { continue };
        if !show_progress {
            continue;
        }
        match ev {
            TrialEvent::BatchStarted { requested, workers } => {
                let _ = tx.send(OutputLine::Stderr(format!(
                    "== Running {requested} trials on {workers} workers =="
                )));
            }
            TrialEvent::Progress { percent } => {
                // Print each 10% step once.
                let step = percent / 10 * 10;
                if last_shown != Some(step) {
                    last_shown = Some(step);
                    let _ = tx.send(OutputLine::Stderr(format!("Progress: {step}%")));
                }
            }
            TrialEvent::Info(info) => {
                let _ = tx.send(OutputLine::Stderr(info.to_message()));
            }
            // Failures are logged by the runner; the summary carries the count.
            TrialEvent::TrialFailed { .. }
            | TrialEvent::Heartbeat { .. }
            | TrialEvent::BatchCompleted { .. } => {}
        }
    }

    let report = controller.await.context("batch controller task failed")??;

    handle_exports(args, &report)?;

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let out = serde_json::to_string_pretty(&report)?;
            let _ = tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&report).lines {
                let _ = tx.send(OutputLine::Stdout(line));
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn run_single(args: &Cli, engine: SkirmishEngine) -> Result<()> {
    let watchdog = HeartbeatWatchdog::new(build_heartbeat_config(args));
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<TrialEvent>();

    let trial = engine.create(0);
    let handle = tokio::spawn(async move { watchdog.run(trial, evt_tx).await });

    while let Some(ev) = evt_rx.recv().await {
        if let TrialEvent::Heartbeat { percent } = ev {
            if !args.silent && !args.json {
                let _ = out_tx.send(OutputLine::Stderr(format!("Working… {percent}%")));
            }
        }
    }

    let result = match handle.await.context("watchdog task failed")? {
        Ok(result) => result,
        Err(e @ WatchdogError::CeilingExceeded { .. }) => {
            drop(out_tx);
            let _ = out_handle.await;
            return Err(e).context("single trial timed out");
        }
        Err(e) => return Err(e.into()),
    };

    if !args.silent {
        if args.json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&result)?));
        } else {
            let side = SideId::new(args.side.clone());
            for line in crate::text_summary::build_single_summary(&result, &side).lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Handle export operations (JSON and CSV).
fn handle_exports(args: &Cli, report: &BatchReport) -> Result<()> {
    let messages = crate::orchestrator::process_batch_completion(args, report)?;
    for msg in messages {
        tracing::info!("{msg}");
    }
    Ok(())
}
