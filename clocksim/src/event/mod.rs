/*
SPDX-License-Identifier: MIT
*/

//! Wire-ready clock events.
//!
//! [`ClockEvent`] mirrors the time-attendance backend's ingestion shape:
//! fixed-width string fields, a 14-digit compact timestamp, and a status
//! of exactly `"IN"` or `"OUT"`. Over-long inputs are silently truncated
//! at construction — the backend truncates anyway, so doing it here keeps
//! what we log identical to what the backend stores.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use crate::roster::Assignment;

// ── Field ceilings (backend contract) ─────────────────────────────────────────

const MAX_PLANT: usize = 4;
const MAX_DEVICE_ID: usize = 15;
const MAX_PERSONNEL_ID: usize = 8;
const MAX_CORRELATION_ID: usize = 40;
const MAX_SEND_FROM: usize = 15;

// ── EventKind ─────────────────────────────────────────────────────────────────

/// Direction of a clock event.
///
/// Serialized as exactly `"IN"` / `"OUT"` — the only values the backend
/// accepts for `ClockedStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    In,
    Out,
}

impl EventKind {
    /// The wire string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::In => "IN",
            EventKind::Out => "OUT",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ClockEvent ────────────────────────────────────────────────────────────────

/// One clock event in the backend's ingestion shape.
///
/// Immutable once constructed. The two correlation identifiers
/// (`ClockingId` for delivery tracking, `RequestId` for the request) are
/// generated fresh on every planning call and are therefore *not* covered
/// by the planner's determinism guarantee.
#[derive(Debug, Clone, Serialize)]
pub struct ClockEvent {
    /// Plant code, ≤ 4 chars.
    #[serde(rename = "BuWerks")]
    pub plant: String,

    /// 14-digit `YYYYMMDDHHMMSS`, local to the configured zone. No
    /// separators, no zone marker.
    #[serde(rename = "ClockedDateTime")]
    pub clocked_datetime: String,

    /// Device the event claims to originate from, ≤ 15 chars.
    #[serde(rename = "ClockedDeviceId")]
    pub device_id: String,

    #[serde(rename = "ClockedStatus")]
    pub status: EventKind,

    /// Delivery-tracking id, ≤ 40 chars, fresh per planning call.
    #[serde(rename = "ClockingId")]
    pub clocking_id: String,

    /// ≤ 8 chars, silently truncated (not rejected).
    #[serde(rename = "PersonnelId")]
    pub personnel_id: String,

    /// Request id, ≤ 40 chars, fresh per planning call.
    #[serde(rename = "RequestId")]
    pub request_id: String,

    /// Sender identifier, ≤ 15 chars.
    #[serde(rename = "SendFrom")]
    pub send_from: String,
}

impl ClockEvent {
    /// Build an event of `kind` for `assignment`, clocked at `clocked_at`.
    pub fn new(
        kind: EventKind,
        assignment: &Assignment,
        clocked_at: DateTime<Tz>,
        device_id: &str,
        send_from: &str,
    ) -> ClockEvent {
        ClockEvent {
            plant: truncated(&assignment.plant, MAX_PLANT),
            clocked_datetime: format_compact_timestamp(clocked_at),
            device_id: truncated(device_id, MAX_DEVICE_ID),
            status: kind,
            clocking_id: truncated(&Uuid::new_v4().to_string(), MAX_CORRELATION_ID),
            personnel_id: truncated(&assignment.personnel_id, MAX_PERSONNEL_ID),
            request_id: truncated(&Uuid::new_v4().to_string(), MAX_CORRELATION_ID),
            send_from: truncated(send_from, MAX_SEND_FROM),
        }
    }
}

/// Renders a zone-local instant as the backend's 14-digit timestamp.
pub fn format_compact_timestamp(at: DateTime<Tz>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Truncation to the backend ceilings: keep the first `max` chars.
fn truncated(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
