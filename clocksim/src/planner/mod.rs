/*
SPDX-License-Identifier: MIT
*/

//! Deterministic event planning with bounded jitter.
//!
//! For every [`Assignment`] the planner derives a seed from the pair
//! (shift id, personnel id) with an explicit FNV-1a 64 hash, feeds it
//! into a seeded PRNG and draws two bounded minute offsets:
//!
//! * IN  offset uniform in [-5, 10] around the planned start
//! * OUT offset uniform in [-10, 15] around the planned end
//!
//! # Determinism contract
//! `plan()` called any number of times for the same assignment — in the
//! same process or after a restart — yields identical offsets and
//! identical clocked timestamps. The hash is explicit and versioned
//! precisely so no runtime-randomized string hash can leak in. The two
//! correlation identifiers on each event are freshly random per call and
//! are *not* part of the guarantee.
//!
//! There is no structural enforcement that the OUT timestamp exceeds the
//! IN timestamp; the ranges make an inversion impossible for any shift
//! longer than 25 minutes.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::event::{ClockEvent, EventKind};
use crate::ledger::LedgerKey;
use crate::roster::Assignment;

// ── Jitter bounds (minutes, inclusive) ────────────────────────────────────────

const IN_OFFSET_MIN: i64 = -5;
const IN_OFFSET_MAX: i64 = 10;
const OUT_OFFSET_MIN: i64 = -10;
const OUT_OFFSET_MAX: i64 = 15;

// ── Planned events ────────────────────────────────────────────────────────────

/// A wire-ready event explicitly paired with the ledger key it belongs
/// to, so reconciliation never has to guess which assignment produced it.
#[derive(Debug, Clone)]
pub struct PlannedEvent {
    pub event: ClockEvent,
    pub key: LedgerKey,
    pub kind: EventKind,
    /// Zone-aware clocked instant — what `event.clocked_datetime` renders.
    pub clocked_at: DateTime<Tz>,
}

/// The IN/OUT pair planned for one assignment, with the drawn offsets.
#[derive(Debug, Clone)]
pub struct PlannedPair {
    pub clock_in: PlannedEvent,
    pub clock_out: PlannedEvent,
    pub in_offset_minutes: i64,
    pub out_offset_minutes: i64,
}

// ── EventPlanner ──────────────────────────────────────────────────────────────

/// Produces jittered IN/OUT event pairs for assignments.
///
/// Stateless apart from the device/sender identity stamped onto every
/// event; cheap to clone and share.
#[derive(Debug, Clone)]
pub struct EventPlanner {
    device_id: String,
    send_from: String,
}

impl EventPlanner {
    pub fn new(device_id: impl Into<String>, send_from: impl Into<String>) -> EventPlanner {
        EventPlanner {
            device_id: device_id.into(),
            send_from: send_from.into(),
        }
    }

    /// Plan the IN/OUT pair for `assignment`.
    ///
    /// The IN offset is always drawn before the OUT offset — the draw
    /// order is part of the determinism contract.
    pub fn plan(&self, assignment: &Assignment) -> PlannedPair {
        let key = LedgerKey::new(&assignment.shift_id, &assignment.personnel_id);
        let mut rng = StdRng::seed_from_u64(seed_for(&key));

        let in_offset_minutes = rng.gen_range(IN_OFFSET_MIN..=IN_OFFSET_MAX);
        let out_offset_minutes = rng.gen_range(OUT_OFFSET_MIN..=OUT_OFFSET_MAX);

        let in_at = assignment.planned_start + Duration::minutes(in_offset_minutes);
        let out_at = assignment.planned_end + Duration::minutes(out_offset_minutes);

        debug!(
            shift = %assignment.shift_id,
            personnel = %assignment.personnel_id,
            in_offset_minutes,
            out_offset_minutes,
            "Planned event pair"
        );

        PlannedPair {
            clock_in: PlannedEvent {
                event: ClockEvent::new(
                    EventKind::In,
                    assignment,
                    in_at,
                    &self.device_id,
                    &self.send_from,
                ),
                key: key.clone(),
                kind: EventKind::In,
                clocked_at: in_at,
            },
            clock_out: PlannedEvent {
                event: ClockEvent::new(
                    EventKind::Out,
                    assignment,
                    out_at,
                    &self.device_id,
                    &self.send_from,
                ),
                key,
                kind: EventKind::Out,
                clocked_at: out_at,
            },
            in_offset_minutes,
            out_offset_minutes,
        }
    }
}

// ── Seed derivation ───────────────────────────────────────────────────────────

/// Stable, process-independent seed for a ledger key.
///
/// Version 1: FNV-1a 64 over `"{shift}-{person}"`. Bump the format, not
/// the behavior, if the seed derivation ever needs to change.
fn seed_for(key: &LedgerKey) -> u64 {
    fnv1a64(format!("{}-{}", key.shift_id, key.personnel_id).as_bytes())
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ── Tests ─────────────────────────────────────────────────────────────────────
