/*
SPDX-License-Identifier: MIT
*/

//! Cycle orchestration — the three reconciliation modes.
//!
//! [`CycleOrchestrator`] composes the roster source, the event planner,
//! the dispatch ledger and the dispatch client into one of three run
//! modes:
//!
//! | Mode | Trigger | Ledger filter | Reconciliation |
//! |---|---|---|---|
//! | catch-up | per calendar date | skip already-sent cells | mark every *attempted* event sent, whatever the outcome |
//! | immediate | uploaded roster | none — always regenerate | mark sent; purge keys after confirmed full delivery |
//! | realtime | uploaded roster | skip sent **and** not-yet-due | mark exactly the dispatched subset |
//!
//! Marking on *attempt* rather than confirmed delivery is deliberate: a
//! failed delivery becomes a terminal state instead of fueling unbounded
//! retries. Reachability is reported separately in
//! [`CycleSummary::backend_available`].
//!
//! # Concurrency
//! The ledger is a single shared store and the check-plan-dispatch-mark
//! sequence is not transactional, so two overlapping runs (a manual
//! trigger racing the periodic timer) could double-dispatch. Every run
//! therefore takes the orchestrator's single-flight guard first;
//! concurrent triggers queue instead of racing. Within a run all I/O is
//! sequential: one fetch, then one dispatch per event, IN before OUT per
//! assignment, assignments in source order.

pub mod error;

pub use error::CycleError;

use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::{ClockEvent, EventKind};
use crate::ledger::{DispatchLedger, LedgerKey, LedgerStats, RosterFileStatus, RosterRepository};
use crate::planner::{EventPlanner, PlannedEvent};
use crate::roster::{self, Assignment};
use crate::transport::{DispatchClient, DispatchOutcome, RosterSource};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Realtime mode look-ahead: events clocked within this many minutes of
/// "now" are dispatched preemptively instead of waiting for the next run.
const LOOKAHEAD_MINUTES: i64 = 15;

// ── SimulationMode ────────────────────────────────────────────────────────────

/// Execution mode for roster-file runs.
///
/// Catch-up is not listed here: it is date-driven, not file-driven, and
/// has its own entry point ([`CycleOrchestrator::run_catch_up`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    /// Generate everything and post immediately; purge on full delivery.
    Immediate,
    /// Dispatch only what is due now or within the look-ahead window.
    Realtime,
}

impl FromStr for SimulationMode {
    type Err = CycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(SimulationMode::Immediate),
            "realtime" => Ok(SimulationMode::Realtime),
            other => Err(CycleError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SimulationMode::Immediate => "immediate",
            SimulationMode::Realtime => "realtime",
        })
    }
}

// ── CycleSummary ──────────────────────────────────────────────────────────────

/// Per-run result counts. Always returned — partial failures are counts
/// here, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// The calendar date of a catch-up run; `None` for file-driven runs.
    pub date: Option<NaiveDate>,
    /// Raw records supplied (catch-up: assignments fetched).
    pub assignments_found: usize,
    /// Records that parsed into assignments.
    pub assignments_parsed: usize,
    /// Records skipped as unparseable.
    pub parse_failures: usize,
    /// Events handed to the dispatch client this run.
    pub events_generated: usize,
    /// Realtime only: events left unmarked for a later run.
    pub events_deferred: usize,
    /// Immediate only: ledger rows purged after confirmed full delivery.
    pub records_cleaned: usize,
    /// Whether the backend was reachable (distinct from acceptance).
    /// `true` when nothing was attempted — nothing was learned.
    pub backend_available: bool,
}

impl CycleSummary {
    fn empty(date: Option<NaiveDate>) -> CycleSummary {
        CycleSummary {
            date,
            assignments_found: 0,
            assignments_parsed: 0,
            parse_failures: 0,
            events_generated: 0,
            events_deferred: 0,
            records_cleaned: 0,
            backend_available: true,
        }
    }
}

// ── CycleOrchestrator ─────────────────────────────────────────────────────────

/// Composes source, planner, ledger and client into complete cycles.
///
/// Owns the ledger behind a sync mutex (critical sections never hold it
/// across an await) and a tokio mutex as the single-flight run guard.
pub struct CycleOrchestrator<S, C, L> {
    roster_source: S,
    dispatch: C,
    ledger: Mutex<L>,
    planner: EventPlanner,
    tz: Tz,
    run_guard: tokio::sync::Mutex<()>,
}

impl<S, C, L> CycleOrchestrator<S, C, L>
where
    S: RosterSource,
    C: DispatchClient,
    L: DispatchLedger,
{
    pub fn new(
        roster_source: S,
        dispatch: C,
        ledger: L,
        planner: EventPlanner,
        tz: Tz,
    ) -> CycleOrchestrator<S, C, L> {
        CycleOrchestrator {
            roster_source,
            dispatch,
            ledger: Mutex::new(ledger),
            planner,
            tz,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    // ── Catch-up mode ─────────────────────────────────────────────────────────

    /// Run a catch-up cycle for one calendar date.
    ///
    /// Fetches the date's assignments, keeps only the not-yet-sent events
    /// of each planned pair, dispatches them as one batch, and marks
    /// every attempted event sent regardless of the outcome.
    ///
    /// # Errors
    /// Only a roster fetch failure — everything past the fetch degrades
    /// into summary counts.
    pub async fn run_catch_up(&self, date: NaiveDate) -> Result<CycleSummary, CycleError> {
        let _run = self.run_guard.lock().await;
        info!(%date, "Starting catch-up cycle");

        let assignments = self
            .roster_source
            .fetch_range(date, date)
            .await
            .map_err(CycleError::RosterFetch)?;

        if assignments.is_empty() {
            info!(%date, "No roster assignments found");
            return Ok(CycleSummary::empty(Some(date)));
        }

        let due = self.collect_unsent(&assignments);
        if due.is_empty() {
            info!(%date, "All events for this date have already been sent");
            return Ok(CycleSummary {
                assignments_found: assignments.len(),
                assignments_parsed: assignments.len(),
                ..CycleSummary::empty(Some(date))
            });
        }

        info!(count = due.len(), "Dispatching unsent events");
        let outcome = self.dispatch_batch(&due).await;
        self.mark_attempted(&due);

        info!(
            %date,
            assignments = assignments.len(),
            events = due.len(),
            backend_available = outcome.reachable(),
            "Catch-up cycle complete"
        );

        Ok(CycleSummary {
            date: Some(date),
            assignments_found: assignments.len(),
            assignments_parsed: assignments.len(),
            parse_failures: 0,
            events_generated: due.len(),
            events_deferred: 0,
            records_cleaned: 0,
            backend_available: outcome.reachable(),
        })
    }

    // ── Immediate mode ────────────────────────────────────────────────────────

    /// Run immediate (batch) mode over raw roster records.
    ///
    /// Ignores ledger state entirely: both events of every parseable
    /// assignment are regenerated and dispatched. On confirmed full
    /// delivery the attempted keys are purged — the backend now owns the
    /// record, so there is nothing left to track. On anything less the
    /// rows stay (marked sent) and `records_cleaned` is zero.
    pub async fn run_immediate(&self, records: &[Value]) -> CycleSummary {
        let _run = self.run_guard.lock().await;
        info!(records = records.len(), "Starting immediate-mode run");

        let parsed = roster::parse_assignments(records, self.tz);

        let mut batch = Vec::with_capacity(parsed.assignments.len() * 2);
        for assignment in &parsed.assignments {
            let pair = self.planner.plan(assignment);
            batch.push(pair.clock_in);
            batch.push(pair.clock_out);
        }

        let outcome = self.dispatch_batch(&batch).await;
        self.mark_attempted(&batch);

        let records_cleaned = if outcome == DispatchOutcome::AllDelivered && !batch.is_empty() {
            let keys = unique_keys(&batch);
            self.ledger.lock().expect("lock poisoned").purge(&keys)
        } else {
            0
        };

        info!(
            assignments = parsed.assignments.len(),
            skipped = parsed.skipped,
            events = batch.len(),
            records_cleaned,
            backend_available = outcome.reachable(),
            "Immediate-mode run complete"
        );

        CycleSummary {
            date: None,
            assignments_found: records.len(),
            assignments_parsed: parsed.assignments.len(),
            parse_failures: parsed.skipped,
            events_generated: batch.len(),
            events_deferred: 0,
            records_cleaned,
            backend_available: outcome.reachable(),
        }
    }

    // ── Realtime mode ─────────────────────────────────────────────────────────

    /// Run realtime (windowed) mode over raw roster records.
    ///
    /// Computes "now" in the configured zone; a not-yet-sent event is due
    /// when its clocked timestamp is at or before `now` (overdue) or
    /// within the next 15 minutes (upcoming — dispatched preemptively).
    /// Everything later is deferred: left unmarked and reconsidered on
    /// the next invocation.
    pub async fn run_realtime(&self, records: &[Value]) -> CycleSummary {
        let _run = self.run_guard.lock().await;
        info!(records = records.len(), "Starting realtime-mode run");

        let parsed = roster::parse_assignments(records, self.tz);
        let now = Utc::now().with_timezone(&self.tz);

        let mut due = Vec::new();
        let mut deferred = 0usize;
        {
            let ledger = self.ledger.lock().expect("lock poisoned");
            for assignment in &parsed.assignments {
                let pair = self.planner.plan(assignment);
                for candidate in [pair.clock_in, pair.clock_out] {
                    let sent = match candidate.kind {
                        EventKind::In => ledger.has_in_sent(&candidate.key),
                        EventKind::Out => ledger.has_out_sent(&candidate.key),
                    };
                    if sent {
                        continue;
                    }
                    if is_due(candidate.clocked_at, now) {
                        due.push(candidate);
                    } else {
                        debug!(
                            key = %candidate.key,
                            kind = %candidate.kind,
                            clocked_at = %candidate.clocked_at,
                            "Deferring event beyond the look-ahead window"
                        );
                        deferred += 1;
                    }
                }
            }
        }

        let outcome = self.dispatch_batch(&due).await;
        self.mark_attempted(&due);

        info!(
            assignments = parsed.assignments.len(),
            skipped = parsed.skipped,
            dispatched = due.len(),
            deferred,
            backend_available = outcome.reachable(),
            "Realtime-mode run complete"
        );

        CycleSummary {
            date: None,
            assignments_found: records.len(),
            assignments_parsed: parsed.assignments.len(),
            parse_failures: parsed.skipped,
            events_generated: due.len(),
            events_deferred: deferred,
            records_cleaned: 0,
            backend_available: outcome.reachable(),
        }
    }

    // ── Roster-file runs ──────────────────────────────────────────────────────

    /// Run an uploaded roster file through the chosen mode, tracking its
    /// processing status in the repository (pending → processing →
    /// completed, or failed when the payload holds no records).
    pub async fn run_roster_file<R: RosterRepository>(
        &self,
        repo: &mut R,
        id: &str,
        mode: SimulationMode,
    ) -> Result<CycleSummary, CycleError> {
        let file = repo
            .get(id)
            .ok_or_else(|| CycleError::RosterFileNotFound { id: id.to_string() })?;

        info!(id = %id, %mode, "Running roster file");
        repo.update_status(id, RosterFileStatus::Processing);

        let records = roster::extract_records(&file.payload);
        if records.is_empty() {
            warn!(id = %id, "Roster file contains no records");
            repo.update_status(id, RosterFileStatus::Failed);
            return Err(CycleError::EmptyRosterFile { id: id.to_string() });
        }

        let summary = match mode {
            SimulationMode::Immediate => self.run_immediate(&records).await,
            SimulationMode::Realtime => self.run_realtime(&records).await,
        };

        repo.update_status(id, RosterFileStatus::Completed);
        Ok(summary)
    }

    // ── Ledger surface ────────────────────────────────────────────────────────

    /// Aggregate ledger counts for the observability surface.
    pub fn ledger_stats(&self) -> LedgerStats {
        self.ledger.lock().expect("lock poisoned").stats()
    }

    /// Routine retention cleanup; returns the number of rows removed.
    pub fn cleanup_ledger(&self, cutoff: DateTime<Utc>) -> usize {
        self.ledger
            .lock()
            .expect("lock poisoned")
            .cleanup_older_than(cutoff)
    }

    // ── Shared helpers ────────────────────────────────────────────────────────

    /// Plan each assignment and keep only the events whose ledger cell is
    /// still unset. Order: IN before OUT per assignment, assignments as
    /// supplied.
    fn collect_unsent(&self, assignments: &[Assignment]) -> Vec<PlannedEvent> {
        let ledger = self.ledger.lock().expect("lock poisoned");
        let mut due = Vec::new();

        for assignment in assignments {
            let pair = self.planner.plan(assignment);
            if !ledger.has_in_sent(&pair.clock_in.key) {
                due.push(pair.clock_in);
            }
            if !ledger.has_out_sent(&pair.clock_out.key) {
                due.push(pair.clock_out);
            }
        }
        due
    }

    /// Hand the batch to the dispatch client. An empty batch attempts
    /// nothing and reports `AllDelivered`.
    async fn dispatch_batch(&self, batch: &[PlannedEvent]) -> DispatchOutcome {
        if batch.is_empty() {
            return DispatchOutcome::AllDelivered;
        }
        let events: Vec<ClockEvent> = batch.iter().map(|p| p.event.clone()).collect();
        self.dispatch.send_events(&events).await
    }

    /// Mark every event in the batch as sent — unconditionally on
    /// attempt, per the at-most-one-attempt policy.
    fn mark_attempted(&self, batch: &[PlannedEvent]) {
        if batch.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut ledger = self.ledger.lock().expect("lock poisoned");
        for planned in batch {
            match planned.kind {
                EventKind::In => ledger.mark_in_sent(&planned.key, now),
                EventKind::Out => ledger.mark_out_sent(&planned.key, now),
            }
        }
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

/// Realtime due check: at or before now (overdue) or within the
/// look-ahead window, bounds inclusive.
fn is_due(clocked_at: DateTime<Tz>, now: DateTime<Tz>) -> bool {
    clocked_at <= now + Duration::minutes(LOOKAHEAD_MINUTES)
}

/// The distinct ledger keys of a batch, in first-seen order.
fn unique_keys(batch: &[PlannedEvent]) -> Vec<LedgerKey> {
    let mut keys: Vec<LedgerKey> = Vec::new();
    for planned in batch {
        if !keys.contains(&planned.key) {
            keys.push(planned.key.clone());
        }
    }
    keys
}

// ── Tests ─────────────────────────────────────────────────────────────────────
