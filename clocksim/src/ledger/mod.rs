/*
SPDX-License-Identifier: MIT
*/

//! The dispatch ledger — the sole source of truth for "already handled".
//!
//! One row per (shift id, personnel id) with two nullable sent-at stamps.
//! The per-cell state machine is `unset → sent`, fired on dispatch
//! *attempt* (not confirmed delivery), and one-way except for the
//! immediate mode's purge after confirmed full delivery. Absence of a
//! stamp always means "not yet attempted", never "failed".
//!
//! [`DispatchLedger`] is the storage seam: any durable key-value or
//! relational store with this row shape satisfies it. [`MemoryLedger`] is
//! the in-process reference implementation used by the binary and tests.
//!
//! The module also hosts the [`RosterRepository`] seam for uploaded
//! roster files (id → payload + processing status), replacing what was
//! once a single mutable "currently uploaded roster" slot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

// ── LedgerKey ─────────────────────────────────────────────────────────────────

/// Identity of one ledger row: one person on one shift instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub shift_id: String,
    pub personnel_id: String,
}

impl LedgerKey {
    pub fn new(shift_id: impl Into<String>, personnel_id: impl Into<String>) -> LedgerKey {
        LedgerKey {
            shift_id: shift_id.into(),
            personnel_id: personnel_id.into(),
        }
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.shift_id, self.personnel_id)
    }
}

// ── Entries and stats ─────────────────────────────────────────────────────────

/// One ledger row. Created implicitly on first mark (upsert), destroyed
/// only by [`DispatchLedger::purge`] or [`DispatchLedger::cleanup_older_than`].
#[derive(Debug, Clone, Default)]
pub struct LedgerEntry {
    pub in_sent_at: Option<DateTime<Utc>>,
    pub out_sent_at: Option<DateTime<Utc>>,
}

/// Aggregate counts for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    /// Number of rows.
    pub total: usize,
    /// Rows with an IN stamp.
    pub in_count: usize,
    /// Rows with an OUT stamp.
    pub out_count: usize,
}

// ── DispatchLedger ────────────────────────────────────────────────────────────

/// Idempotency store tracking which IN/OUT events have been attempted.
///
/// All operations are keyed by [`LedgerKey`]. Marks are idempotent
/// upserts — safe to repeat, last write wins, and marking one kind never
/// touches the other kind's stamp.
pub trait DispatchLedger {
    fn has_in_sent(&self, key: &LedgerKey) -> bool;
    fn has_out_sent(&self, key: &LedgerKey) -> bool;

    fn mark_in_sent(&mut self, key: &LedgerKey, at: DateTime<Utc>);
    fn mark_out_sent(&mut self, key: &LedgerKey, at: DateTime<Utc>);

    /// Deletes exactly the given rows. Returns the number removed.
    /// Used only by immediate mode after confirmed full delivery.
    fn purge(&mut self, keys: &[LedgerKey]) -> usize;

    /// Routine retention: deletes rows whose IN and OUT stamps are both
    /// either absent or older than `cutoff`. Returns the number removed.
    fn cleanup_older_than(&mut self, cutoff: DateTime<Utc>) -> usize;

    fn stats(&self) -> LedgerStats;
}

// ── MemoryLedger ──────────────────────────────────────────────────────────────

/// HashMap-backed reference implementation of [`DispatchLedger`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: HashMap<LedgerKey, LedgerEntry>,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }
}

impl DispatchLedger for MemoryLedger {
    fn has_in_sent(&self, key: &LedgerKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.in_sent_at.is_some())
    }

    fn has_out_sent(&self, key: &LedgerKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.out_sent_at.is_some())
    }

    fn mark_in_sent(&mut self, key: &LedgerKey, at: DateTime<Utc>) {
        self.entries.entry(key.clone()).or_default().in_sent_at = Some(at);
        debug!(key = %key, "Marked IN sent");
    }

    fn mark_out_sent(&mut self, key: &LedgerKey, at: DateTime<Utc>) {
        self.entries.entry(key.clone()).or_default().out_sent_at = Some(at);
        debug!(key = %key, "Marked OUT sent");
    }

    fn purge(&mut self, keys: &[LedgerKey]) -> usize {
        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count();

        if removed > 0 {
            info!(removed, "Purged delivered ledger rows");
        }
        removed
    }

    fn cleanup_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale = |stamp: &Option<DateTime<Utc>>| stamp.is_none_or(|at| at < cutoff);

        let before = self.entries.len();
        self.entries
            .retain(|_, e| !(stale(&e.in_sent_at) && stale(&e.out_sent_at)));
        let removed = before - self.entries.len();

        if removed > 0 {
            info!(removed, %cutoff, "Cleaned up stale ledger rows");
        }
        removed
    }

    fn stats(&self) -> LedgerStats {
        LedgerStats {
            total: self.entries.len(),
            in_count: self
                .entries
                .values()
                .filter(|e| e.in_sent_at.is_some())
                .count(),
            out_count: self
                .entries
                .values()
                .filter(|e| e.out_sent_at.is_some())
                .count(),
        }
    }
}

// ── Roster repository ─────────────────────────────────────────────────────────

/// Processing status of an uploaded roster file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RosterFileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RosterFileStatus::Pending => "pending",
            RosterFileStatus::Processing => "processing",
            RosterFileStatus::Completed => "completed",
            RosterFileStatus::Failed => "failed",
        })
    }
}

/// One uploaded roster, addressable by an opaque file id.
#[derive(Debug, Clone)]
pub struct RosterFile {
    pub id: String,
    pub uploaded_at: DateTime<Utc>,
    pub assignment_count: usize,
    /// The raw payload as received (envelope or bare record array).
    pub payload: Value,
    pub status: RosterFileStatus,
}

/// Persisted multi-record store for uploaded rosters.
pub trait RosterRepository {
    fn store(&mut self, file: RosterFile);
    fn get(&self, id: &str) -> Option<RosterFile>;
    /// Returns `false` when no file with `id` exists.
    fn update_status(&mut self, id: &str, status: RosterFileStatus) -> bool;
    /// Deletes files uploaded before `cutoff`. Returns the number removed.
    fn cleanup_older_than(&mut self, cutoff: DateTime<Utc>) -> usize;
}

/// HashMap-backed reference implementation of [`RosterRepository`].
#[derive(Debug, Default)]
pub struct MemoryRosterRepository {
    files: HashMap<String, RosterFile>,
}

impl MemoryRosterRepository {
    pub fn new() -> MemoryRosterRepository {
        MemoryRosterRepository::default()
    }
}

impl RosterRepository for MemoryRosterRepository {
    fn store(&mut self, file: RosterFile) {
        info!(
            id = %file.id,
            assignments = file.assignment_count,
            "Stored roster file"
        );
        self.files.insert(file.id.clone(), file);
    }

    fn get(&self, id: &str) -> Option<RosterFile> {
        self.files.get(id).cloned()
    }

    fn update_status(&mut self, id: &str, status: RosterFileStatus) -> bool {
        match self.files.get_mut(id) {
            Some(file) => {
                info!(id = %id, %status, "Updated roster file status");
                file.status = status;
                true
            }
            None => false,
        }
    }

    fn cleanup_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.files.len();
        self.files.retain(|_, f| f.uploaded_at >= cutoff);
        let removed = before - self.files.len();

        if removed > 0 {
            info!(removed, "Cleaned up old roster files");
        }
        removed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(n: u32) -> LedgerKey {
        LedgerKey::new(format!("SHIFT{n:03}"), format!("P{n:03}"))
    }

    // ── Marks and checks ──────────────────────────────────────────────────────

    #[test]
    fn fresh_key_has_nothing_sent() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.has_in_sent(&key(1)));
        assert!(!ledger.has_out_sent(&key(1)));
    }

    #[test]
    fn marking_in_does_not_affect_out_or_other_keys() {
        let mut ledger = MemoryLedger::new();
        let now = Utc::now();

        ledger.mark_in_sent(&key(1), now);

        assert!(ledger.has_in_sent(&key(1)));
        assert!(!ledger.has_out_sent(&key(1)), "OUT cell must stay unset");
        assert!(!ledger.has_in_sent(&key(2)), "unrelated key must stay unset");
    }

    #[test]
    fn marks_are_idempotent_upserts() {
        let mut ledger = MemoryLedger::new();
        let first = Utc::now();
        let later = first + Duration::minutes(5);

        ledger.mark_in_sent(&key(1), first);
        ledger.mark_in_sent(&key(1), later);
        ledger.mark_out_sent(&key(1), later);

        assert!(ledger.has_in_sent(&key(1)));
        assert_eq!(ledger.stats().total, 1, "repeat marks create no new rows");
    }

    // ── Purge ─────────────────────────────────────────────────────────────────

    #[test]
    fn purge_removes_only_the_given_keys() {
        let mut ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger.mark_in_sent(&key(1), now);
        ledger.mark_in_sent(&key(2), now);

        let removed = ledger.purge(&[key(1), key(99)]);

        assert_eq!(removed, 1, "missing keys do not count");
        assert!(!ledger.has_in_sent(&key(1)));
        assert!(ledger.has_in_sent(&key(2)));
    }

    // ── Retention cleanup ─────────────────────────────────────────────────────

    #[test]
    fn cleanup_removes_rows_with_only_stale_or_absent_stamps() {
        let mut ledger = MemoryLedger::new();
        let old = Utc::now() - Duration::days(3);
        let fresh = Utc::now();
        let cutoff = Utc::now() - Duration::days(2);

        ledger.mark_in_sent(&key(1), old); // stale IN, absent OUT → removed
        ledger.mark_in_sent(&key(2), old); // stale IN, fresh OUT → kept
        ledger.mark_out_sent(&key(2), fresh);
        ledger.mark_out_sent(&key(3), fresh); // absent IN, fresh OUT → kept

        let removed = ledger.cleanup_older_than(cutoff);

        assert_eq!(removed, 1);
        assert!(!ledger.has_in_sent(&key(1)));
        assert!(ledger.has_out_sent(&key(2)));
        assert!(ledger.has_out_sent(&key(3)));
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    #[test]
    fn stats_count_rows_and_stamps() {
        let mut ledger = MemoryLedger::new();
        let now = Utc::now();

        ledger.mark_in_sent(&key(1), now);
        ledger.mark_in_sent(&key(2), now);
        ledger.mark_out_sent(&key(2), now);

        assert_eq!(
            ledger.stats(),
            LedgerStats {
                total: 2,
                in_count: 2,
                out_count: 1
            }
        );
    }

    // ── Roster repository ─────────────────────────────────────────────────────

    fn roster_file(id: &str, uploaded_at: DateTime<Utc>) -> RosterFile {
        RosterFile {
            id: id.into(),
            uploaded_at,
            assignment_count: 1,
            payload: serde_json::json!([]),
            status: RosterFileStatus::Pending,
        }
    }

    #[test]
    fn roster_file_status_transitions() {
        let mut repo = MemoryRosterRepository::new();
        repo.store(roster_file("f1", Utc::now()));

        assert_eq!(repo.get("f1").unwrap().status, RosterFileStatus::Pending);

        assert!(repo.update_status("f1", RosterFileStatus::Processing));
        assert_eq!(repo.get("f1").unwrap().status, RosterFileStatus::Processing);

        assert!(repo.update_status("f1", RosterFileStatus::Completed));
        assert!(!repo.update_status("missing", RosterFileStatus::Failed));
    }

    #[test]
    fn roster_cleanup_keeps_recent_files() {
        let mut repo = MemoryRosterRepository::new();
        repo.store(roster_file("old", Utc::now() - Duration::days(10)));
        repo.store(roster_file("new", Utc::now()));

        let removed = repo.cleanup_older_than(Utc::now() - Duration::days(7));

        assert_eq!(removed, 1);
        assert!(repo.get("old").is_none());
        assert!(repo.get("new").is_some());
    }
}
