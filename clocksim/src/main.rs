/*
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::Parser;
use tracing::{error, info, warn};

use clocksim::config::Settings;
use clocksim::ledger::{DispatchLedger, MemoryLedger};
use clocksim::orchestrator::{CycleOrchestrator, CycleSummary, SimulationMode};
use clocksim::planner::EventPlanner;
use clocksim::roster;
use clocksim::transport::{DispatchClient, FileRosterSource, RecordingDispatchClient, RosterSource};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Clocksim time-attendance clock-event simulator.
///
/// Example:
///   clocksim --config demos/settings.yaml --roster demos/roster.json \
///            --mode catch-up --date 2024-12-02 --watch
#[derive(Debug, Parser)]
#[command(
    name = "clocksim",
    about = "Time-attendance clock-event simulator",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML settings file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to the roster JSON file (envelope or bare-array format).
    #[arg(short = 'r', long = "roster")]
    roster: PathBuf,

    /// Run mode: catch-up, immediate or realtime.
    #[arg(short = 'm', long = "mode", default_value = "catch-up")]
    mode: String,

    /// Calendar date for catch-up runs (YYYY-MM-DD). Defaults to today in
    /// the configured timezone.
    #[arg(short = 'd', long = "date")]
    date: Option<NaiveDate>,

    /// Keep running, repeating the cycle at the configured poll interval.
    #[arg(short = 'w', long = "watch", default_value_t = false)]
    watch: bool,
}

/// What one trigger of the simulator actually runs.
#[derive(Debug, Clone, Copy)]
enum RunMode {
    CatchUp,
    File(SimulationMode),
}

fn parse_run_mode(s: &str) -> Result<RunMode, String> {
    if s.eq_ignore_ascii_case("catch-up") || s.eq_ignore_ascii_case("catchup") {
        return Ok(RunMode::CatchUp);
    }
    s.parse::<SimulationMode>()
        .map(RunMode::File)
        .map_err(|e| e.to_string())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialise structured logging.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Clocksim starting up...");

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    let cli = Cli::parse();

    info!(
        config = ?cli.config,
        roster = %cli.roster.display(),
        mode   = %cli.mode,
        date   = ?cli.date,
        watch  = cli.watch,
        "Configuration"
    );

    let mode = match parse_run_mode(&cli.mode) {
        Ok(mode) => mode,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    // ── Load settings ─────────────────────────────────────────────────────────
    let settings = match &cli.config {
        Some(path) => match Settings::load_from_file(path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load settings: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No settings file provided, using default settings");
            Settings::default()
        }
    };

    let tz = match settings.tz() {
        Ok(tz) => tz,
        Err(e) => {
            error!("Invalid timezone in settings: {:#}", e);
            process::exit(1);
        }
    };

    // ── Wire up the orchestrator ──────────────────────────────────────────────
    let orchestrator = CycleOrchestrator::new(
        FileRosterSource::new(&cli.roster, tz),
        RecordingDispatchClient::new(),
        MemoryLedger::new(),
        EventPlanner::new(&settings.device_id, &settings.send_from),
        tz,
    );

    if !cli.watch {
        run_cycle(&orchestrator, &cli, tz, mode).await;
        return;
    }

    // ── Watch loop ────────────────────────────────────────────────────────────
    info!(
        interval_seconds = settings.poll_interval_seconds,
        "Entering watch loop"
    );
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        settings.poll_interval_seconds.max(1),
    ));

    loop {
        ticker.tick().await;
        run_cycle(&orchestrator, &cli, tz, mode).await;

        let cutoff = Utc::now() - Duration::days(settings.retention_days);
        let removed = orchestrator.cleanup_ledger(cutoff);
        if removed > 0 {
            info!(removed, "Retention cleanup removed stale ledger rows");
        }

        let stats = orchestrator.ledger_stats();
        info!(
            tracked = stats.total,
            in_sent = stats.in_count,
            out_sent = stats.out_count,
            "Ledger state"
        );
    }
}

// ── Cycle execution ───────────────────────────────────────────────────────────

/// Run one cycle in the requested mode. Failures are logged, never fatal —
/// the next watch tick retries.
async fn run_cycle<S, C, L>(
    orchestrator: &CycleOrchestrator<S, C, L>,
    cli: &Cli,
    tz: Tz,
    mode: RunMode,
) where
    S: RosterSource,
    C: DispatchClient,
    L: DispatchLedger,
{
    match mode {
        RunMode::CatchUp => {
            let date = cli
                .date
                .unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive());
            match orchestrator.run_catch_up(date).await {
                Ok(summary) => log_summary(&summary),
                Err(e) => error!("Catch-up cycle failed: {:#}", e),
            }
        }
        RunMode::File(sim_mode) => {
            let content = match tokio::fs::read_to_string(&cli.roster).await {
                Ok(content) => content,
                Err(e) => {
                    error!("Cannot open roster file {}: {e}", cli.roster.display());
                    return;
                }
            };
            let payload: serde_json::Value = match serde_json::from_str(&content) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Roster file {} is not valid JSON: {e}", cli.roster.display());
                    return;
                }
            };

            let records = roster::extract_records(&payload);
            if records.is_empty() {
                warn!("Roster file {} contains no records", cli.roster.display());
                return;
            }

            let summary = match sim_mode {
                SimulationMode::Immediate => orchestrator.run_immediate(&records).await,
                SimulationMode::Realtime => orchestrator.run_realtime(&records).await,
            };
            log_summary(&summary);
        }
    }
}

fn log_summary(summary: &CycleSummary) {
    let json = serde_json::to_string(summary).unwrap_or_else(|_| String::from("{}"));
    info!(summary = %json, "Cycle summary");
}
