/*
SPDX-License-Identifier: MIT
*/

//! Collaborator contracts for the roster source and the dispatch client.
//!
//! The core never talks to the network itself — it consumes these two
//! seams. A real deployment plugs in HTTP/gRPC implementations; this
//! crate ships local ones ([`FileRosterSource`], [`RecordingDispatchClient`])
//! for the binary and for tests.
//!
//! # Delivery semantics
//! A dispatch client attempts events **sequentially, in the order
//! given** — the orchestrator already orders them IN before OUT per
//! assignment, assignments in source order — and reports a tri-state
//! [`DispatchOutcome`]. The distinction matters downstream:
//!
//! * connection or authentication failure → [`DispatchOutcome::Unreachable`]
//!   (the backend is unavailable; nothing can be said about acceptance)
//! * per-event validation rejection (4xx) → counted in
//!   [`DispatchOutcome::PartiallyDelivered`] (the backend is available,
//!   that event is invalid; later events still proceed)

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::event::ClockEvent;
use crate::roster::{self, Assignment};

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Result of one batched dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every event in the batch was accepted.
    AllDelivered,
    /// The backend was reachable but rejected some events.
    PartiallyDelivered { delivered: usize, rejected: usize },
    /// Connection or authentication failure — nothing was delivered and
    /// the backend is considered unavailable.
    Unreachable,
}

impl DispatchOutcome {
    /// Whether the backend was reachable, regardless of acceptance.
    pub fn reachable(self) -> bool {
        !matches!(self, DispatchOutcome::Unreachable)
    }
}

// ── Contracts ─────────────────────────────────────────────────────────────────

/// Supplies ordered assignments for a date range.
///
/// A fetch failure aborts the requesting cycle only; the process keeps
/// running and the next trigger retries.
#[allow(async_fn_in_trait)]
pub trait RosterSource {
    async fn fetch_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Assignment>>;
}

/// Transmits clock events one at a time, in order.
#[allow(async_fn_in_trait)]
pub trait DispatchClient {
    async fn send_events(&self, events: &[ClockEvent]) -> DispatchOutcome;
}

// Shared references implement the contracts too, so a caller can hand an
// orchestrator a borrowed client and keep inspecting it afterwards.

impl<T: RosterSource> RosterSource for &T {
    async fn fetch_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Assignment>> {
        (**self).fetch_range(from, to).await
    }
}

impl<T: DispatchClient> DispatchClient for &T {
    async fn send_events(&self, events: &[ClockEvent]) -> DispatchOutcome {
        (**self).send_events(events).await
    }
}

// ── FileRosterSource ──────────────────────────────────────────────────────────

/// Roster source backed by an envelope-format JSON file on disk.
///
/// Re-reads the file on every fetch so an updated roster is picked up by
/// the next cycle without a restart.
#[derive(Debug, Clone)]
pub struct FileRosterSource {
    path: PathBuf,
    tz: Tz,
}

impl FileRosterSource {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> FileRosterSource {
        FileRosterSource {
            path: path.into(),
            tz,
        }
    }
}

impl RosterSource for FileRosterSource {
    async fn fetch_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Assignment>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Cannot open roster file: {}", self.path.display()))?;

        let payload: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Roster file is not valid JSON: {}", self.path.display()))?;

        let records = roster::extract_records(&payload);
        let parsed = roster::parse_assignments(&records, self.tz);

        let assignments: Vec<Assignment> = parsed
            .assignments
            .into_iter()
            .filter(|a| a.date >= from && a.date <= to)
            .collect();

        info!(
            path = %self.path.display(),
            found = assignments.len(),
            skipped = parsed.skipped,
            %from,
            %to,
            "Fetched roster from file"
        );

        Ok(assignments)
    }
}

// ── RecordingDispatchClient ───────────────────────────────────────────────────

/// Dispatch client that logs events instead of delivering them.
///
/// Records everything it is handed and reports a pre-configured outcome.
/// Serves as the binary's offline client and as the test double for the
/// orchestrator.
#[derive(Debug)]
pub struct RecordingDispatchClient {
    outcome: DispatchOutcome,
    sent: std::sync::Mutex<Vec<ClockEvent>>,
}

impl RecordingDispatchClient {
    /// Client that reports every batch fully delivered.
    pub fn new() -> RecordingDispatchClient {
        Self::with_outcome(DispatchOutcome::AllDelivered)
    }

    /// Client that reports `outcome` for every batch.
    pub fn with_outcome(outcome: DispatchOutcome) -> RecordingDispatchClient {
        RecordingDispatchClient {
            outcome,
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Everything handed to [`send_events`](DispatchClient::send_events),
    /// in dispatch order.
    pub fn sent(&self) -> Vec<ClockEvent> {
        self.sent.lock().expect("lock poisoned").clone()
    }
}

impl Default for RecordingDispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchClient for RecordingDispatchClient {
    async fn send_events(&self, events: &[ClockEvent]) -> DispatchOutcome {
        for event in events {
            debug!(
                status = %event.status,
                personnel = %event.personnel_id,
                clocked = %event.clocked_datetime,
                clocking_id = %event.clocking_id,
                "Recording clock event"
            );
        }

        self.sent
            .lock()
            .expect("lock poisoned")
            .extend_from_slice(events);

        if events.is_empty() {
            return DispatchOutcome::AllDelivered;
        }
        self.outcome
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TZ: Tz = chrono_tz::Asia::Singapore;

    fn roster_json() -> String {
        serde_json::json!({
            "FunctionName": "RosterPush",
            "list_item": { "data": { "d": { "results": [
                { "__metadata": {
                    "PersonnelId": "P001",
                    "deployment_date": "/Date(1733097600000)/",
                    "deploymentItm": "DEPLOY001",
                    "plant": "PL01",
                    "planned_start_time": "PT8H0M0S",
                    "planned_end_time": "PT17H0M0S"
                }}
            ]}}}
        })
        .to_string()
    }

    #[tokio::test]
    async fn file_source_parses_and_filters_by_date() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(roster_json().as_bytes()).unwrap();

        let source = FileRosterSource::new(f.path(), TZ);
        let day = NaiveDate::from_ymd_opt(2024, 12, 2).unwrap();

        let hit = source.fetch_range(day, day).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].shift_id, "DEPLOY001");

        let other_day = NaiveDate::from_ymd_opt(2024, 12, 3).unwrap();
        let miss = source.fetch_range(other_day, other_day).await.unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn file_source_missing_file_is_an_error() {
        let source = FileRosterSource::new("/nonexistent/roster.json", TZ);
        let day = NaiveDate::from_ymd_opt(2024, 12, 2).unwrap();
        assert!(source.fetch_range(day, day).await.is_err());
    }

    #[tokio::test]
    async fn recording_client_preserves_dispatch_order() {
        let client = RecordingDispatchClient::new();

        let a = crate::roster::Assignment {
            shift_id: "S1".into(),
            personnel_id: "P001".into(),
            first_name: String::new(),
            last_name: String::new(),
            plant: "PL".into(),
            planner_group_id: String::new(),
            demand_item_id: String::new(),
            customer_id: String::new(),
            customer_name: String::new(),
            location: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 12, 2).unwrap(),
            planned_start: TZ.with_ymd_and_hms(2024, 12, 2, 8, 0, 0).unwrap(),
            planned_end: TZ.with_ymd_and_hms(2024, 12, 2, 17, 0, 0).unwrap(),
        };
        let at = TZ.with_ymd_and_hms(2024, 12, 2, 8, 0, 0).unwrap();

        let events = vec![
            ClockEvent::new(EventKind::In, &a, at, "dev", "sim"),
            ClockEvent::new(EventKind::Out, &a, at, "dev", "sim"),
        ];

        let outcome = client.send_events(&events).await;
        assert_eq!(outcome, DispatchOutcome::AllDelivered);

        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].status, EventKind::In);
        assert_eq!(sent[1].status, EventKind::Out);
    }

    #[tokio::test]
    async fn scripted_outcome_is_reported() {
        let client = RecordingDispatchClient::with_outcome(DispatchOutcome::Unreachable);
        let outcome = client.send_events(&[]).await;
        // An empty batch attempts nothing, so nothing is learned.
        assert_eq!(outcome, DispatchOutcome::AllDelivered);
        assert!(!DispatchOutcome::Unreachable.reachable());
        assert!(DispatchOutcome::PartiallyDelivered { delivered: 1, rejected: 1 }.reachable());
    }
}
