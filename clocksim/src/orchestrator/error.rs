/*
SPDX-License-Identifier: MIT
*/

//! Structured error types for the cycle orchestrator.
//!
//! Only *unrecoverable setup* problems surface as [`CycleError`]. The
//! per-event failure taxonomy never does:
//!
//! * unparseable roster records are skipped and counted
//!   (`CycleSummary::parse_failures`)
//! * per-event rejection by the backend is folded into
//!   `DispatchOutcome::PartiallyDelivered`
//! * an unreachable backend is reported via
//!   `CycleSummary::backend_available`, not raised
//!
//! A cycle therefore either returns a summary with counts or fails before
//! any event was attempted.

use thiserror::Error;

/// Top-level failure of one orchestrator run.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The roster source could not supply assignments. Aborts this cycle
    /// only — the process keeps running and the next trigger retries.
    #[error("roster fetch failed: {0:#}")]
    RosterFetch(#[source] anyhow::Error),

    /// No uploaded roster file with this id exists.
    #[error("roster file '{id}' not found")]
    RosterFileNotFound { id: String },

    /// The uploaded roster file carries no records at all (wrong envelope
    /// shape or an empty result list). The file is marked failed.
    #[error("roster file '{id}' contains no records")]
    EmptyRosterFile { id: String },

    /// The mode string is not a recognised simulation mode.
    #[error("unknown simulation mode: '{0}' (valid: immediate, realtime)")]
    UnknownMode(String),
}
