/*
SPDX-License-Identifier: MIT
*/

//! Roster payload types, the normalized [`Assignment`], and the upstream
//! date/duration encodings.
//!
//! Two distinct types model the two sides of the ingestion boundary:
//!
//! ```text
//! backend ──(JSON envelope)──► RawRosterRecord ──(from_raw)──► Assignment
//!                               ↑ wire shape                    ↑ normalized,
//!                               verbatim field names             zone-aware
//! ```
//!
//! `Assignment` is immutable: constructed once per ingestion, never
//! mutated, discarded after a cycle completes.
//!
//! # Upstream encodings
//! The roster source renders an absolute instant as `/Date(<epoch-ms>)/`
//! and a duration-since-midnight as `PT<h>H<m>M<s>S`. Both codecs here
//! round-trip bit-exact — anything this crate emits in those formats
//! re-parses to the original value.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a single roster record could not be turned into an [`Assignment`].
///
/// Parse failures never abort a cycle — the orchestrator skips the record
/// and counts it (see [`parse_assignments`]).
#[derive(Debug, Error)]
pub enum ParseError {
    /// The record (or its `__metadata` wrapper) is not the expected shape.
    #[error("malformed roster record: {0}")]
    BadRecord(#[from] serde_json::Error),

    /// The `deployment_date` field is not `/Date(<epoch-ms>)/`.
    #[error("invalid instant encoding: '{value}'")]
    BadInstant { value: String },

    /// A planned-time field is not `PT<h>H<m>M<s>S`.
    #[error("invalid duration encoding: '{value}'")]
    BadDuration { value: String },

    /// Midnight of the deployment date does not exist in the configured
    /// zone (DST gap). Practically unreachable for midnight, but the
    /// conversion is total rather than panicking.
    #[error("midnight of {date} does not exist in zone {zone}")]
    NonexistentLocalTime { date: NaiveDate, zone: Tz },
}

// ── Upstream encodings ────────────────────────────────────────────────────────

static INSTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Date\((\d+)\)/").expect("invalid instant pattern"));

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").expect("invalid duration pattern")
});

/// Parses the `/Date(<epoch-milliseconds>)/` instant encoding.
pub fn parse_epoch_millis(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let caps = INSTANT_RE
        .captures(value)
        .ok_or_else(|| ParseError::BadInstant {
            value: value.to_string(),
        })?;

    let millis: i64 = caps[1].parse().map_err(|_| ParseError::BadInstant {
        value: value.to_string(),
    })?;

    DateTime::from_timestamp_millis(millis).ok_or_else(|| ParseError::BadInstant {
        value: value.to_string(),
    })
}

/// Renders an instant in the `/Date(<epoch-milliseconds>)/` encoding.
pub fn encode_epoch_millis(instant: DateTime<Utc>) -> String {
    format!("/Date({})/", instant.timestamp_millis())
}

/// Parses the `PT<h>H<m>M<s>S` duration-since-midnight encoding.
///
/// Each component is optional on input (`PT8H` is accepted), matching the
/// upstream producer.
pub fn parse_duration(value: &str) -> Result<Duration, ParseError> {
    let caps = DURATION_RE
        .captures(value)
        .ok_or_else(|| ParseError::BadDuration {
            value: value.to_string(),
        })?;

    // A bare "PT" matches the pattern but carries no components — reject it.
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return Err(ParseError::BadDuration {
            value: value.to_string(),
        });
    }

    let component = |i: usize| -> i64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    Ok(Duration::hours(component(1))
        + Duration::minutes(component(2))
        + Duration::seconds(component(3)))
}

/// Renders a duration in the `PT<h>H<m>M<s>S` encoding.
///
/// Always emits all three components so the output is self-describing:
/// eight hours renders as `PT8H0M0S`.
pub fn encode_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    format!("PT{}H{}M{}S", total / 3600, (total % 3600) / 60, total % 60)
}

// ── Wire shape ────────────────────────────────────────────────────────────────

/// One roster record as delivered by the upstream system, verbatim.
///
/// Field names mirror the wire exactly (a mix of PascalCase and
/// snake_case — the upstream is not consistent, and this type does not
/// paper over that). Kept private to the parsing boundary; everything
/// downstream works with [`Assignment`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawRosterRecord {
    #[serde(rename = "PersonnelId")]
    pub personnel_id: String,
    #[serde(default)]
    pub personnel_first_name: String,
    #[serde(default)]
    pub personnel_last_name: String,
    #[serde(rename = "PersonnelType", default)]
    pub personnel_type: String,
    #[serde(rename = "SecSeqNum", default)]
    pub sec_seq_num: String,
    #[serde(rename = "PrimarySeqNum", default)]
    pub primary_seq_num: String,
    #[serde(default)]
    pub demand_item_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub deployment_location: String,
    /// Absolute instant of the deployment day, `/Date(<epoch-ms>)/`.
    pub deployment_date: String,
    /// Unique identifier per shift per day.
    #[serde(rename = "deploymentItm")]
    pub deployment_item: String,
    #[serde(default)]
    pub planner_group_id: String,
    pub plant: String,
    /// Shift start as a duration from midnight, `PT<h>H<m>M<s>S`.
    pub planned_start_time: String,
    /// Shift end as a duration from midnight, `PT<h>H<m>M<s>S`.
    pub planned_end_time: String,
    #[serde(default)]
    pub demand_type: String,
}

// ── Assignment ────────────────────────────────────────────────────────────────

/// A normalized planned shift for one person at one site and time.
///
/// One `Assignment` maps to exactly one ledger key (`shift_id`,
/// `personnel_id`) and two planned clock events per planning call.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Unique id for one deployment instance within a roster.
    pub shift_id: String,
    pub personnel_id: String,
    pub first_name: String,
    pub last_name: String,
    /// Site/plant code, forwarded onto the wire (truncated to 4 there).
    pub plant: String,
    pub planner_group_id: String,
    pub demand_item_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub location: String,
    /// Calendar day of the deployment (UTC day of the roster instant).
    pub date: NaiveDate,
    /// Zone-local planned shift start.
    pub planned_start: DateTime<Tz>,
    /// Zone-local planned shift end.
    pub planned_end: DateTime<Tz>,
}

impl Assignment {
    /// Normalizes a [`RawRosterRecord`] into an `Assignment`.
    ///
    /// The deployment day's midnight is taken in `tz`, then the planned
    /// start/end durations are added — so a `PT8H0M0S` start is 08:00
    /// local regardless of the zone's UTC offset.
    pub fn from_raw(raw: &RawRosterRecord, tz: Tz) -> Result<Assignment, ParseError> {
        let day = parse_epoch_millis(&raw.deployment_date)?.date_naive();

        let midnight = day
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| naive.and_local_timezone(tz).earliest())
            .ok_or(ParseError::NonexistentLocalTime { date: day, zone: tz })?;

        let planned_start = midnight + parse_duration(&raw.planned_start_time)?;
        let planned_end = midnight + parse_duration(&raw.planned_end_time)?;

        Ok(Assignment {
            shift_id: raw.deployment_item.clone(),
            personnel_id: raw.personnel_id.clone(),
            first_name: raw.personnel_first_name.clone(),
            last_name: raw.personnel_last_name.clone(),
            plant: raw.plant.clone(),
            planner_group_id: raw.planner_group_id.clone(),
            demand_item_id: raw.demand_item_id.clone(),
            customer_id: raw.customer_id.clone(),
            customer_name: raw.customer_name.clone(),
            location: raw.deployment_location.clone(),
            date: day,
            planned_start,
            planned_end,
        })
    }
}

// ── Envelope extraction ───────────────────────────────────────────────────────

/// Pulls the record list out of a roster payload.
///
/// Accepts either the full envelope (`list_item.data.d.results`) or a
/// bare JSON array of records. Returns an empty list for anything else.
pub fn extract_records(payload: &Value) -> Vec<Value> {
    if let Some(array) = payload.as_array() {
        return array.clone();
    }

    payload
        .get("list_item")
        .and_then(|v| v.get("data"))
        .and_then(|v| v.get("d"))
        .and_then(|v| v.get("results"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Result of a skip-and-count parse over raw roster records.
#[derive(Debug)]
pub struct ParsedRoster {
    pub assignments: Vec<Assignment>,
    /// Records that could not be parsed. Counted, never fatal.
    pub skipped: usize,
}

/// Parses raw records into assignments, skipping malformed entries.
///
/// Each record may be a result item wrapping `__metadata` or the bare
/// metadata object itself. Order of the input is preserved in the output.
pub fn parse_assignments(records: &[Value], tz: Tz) -> ParsedRoster {
    let mut assignments = Vec::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in records {
        let meta = record.get("__metadata").unwrap_or(record);

        let parsed = serde_json::from_value::<RawRosterRecord>(meta.clone())
            .map_err(ParseError::from)
            .and_then(|raw| Assignment::from_raw(&raw, tz));

        match parsed {
            Ok(assignment) => assignments.push(assignment),
            Err(e) => {
                warn!("Skipping unparseable roster record: {}", e);
                skipped += 1;
            }
        }
    }

    ParsedRoster {
        assignments,
        skipped,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    const TZ: Tz = chrono_tz::Asia::Singapore;

    fn sample_metadata() -> Value {
        json!({
            "PersonnelId": "P001",
            "personnel_first_name": "John",
            "personnel_last_name": "Doe",
            "PersonnelType": "Officer",
            "SecSeqNum": "01",
            "PrimarySeqNum": "001",
            "demand_item_id": "D001",
            "customer_id": "C001",
            "customer_name": "Test Customer",
            "deployment_location": "Site A",
            "deployment_date": "/Date(1733097600000)/",
            "deploymentItm": "DEPLOY001",
            "planner_group_id": "PG001",
            "plant": "PLANT001",
            "planned_start_time": "PT8H0M0S",
            "planned_end_time": "PT17H0M0S",
            "demand_type": "Regular"
        })
    }

    // ── Instant codec ─────────────────────────────────────────────────────────

    #[test]
    fn epoch_millis_round_trips() {
        let parsed = parse_epoch_millis("/Date(1733097600000)/").unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_733_097_600_000);
        assert_eq!(encode_epoch_millis(parsed), "/Date(1733097600000)/");
    }

    #[test]
    fn invalid_instant_is_rejected() {
        assert!(parse_epoch_millis("2024-12-02").is_err());
        assert!(parse_epoch_millis("/Date()/").is_err());
    }

    // ── Duration codec ────────────────────────────────────────────────────────

    #[test]
    fn duration_round_trips() {
        let d = parse_duration("PT8H0M0S").unwrap();
        assert_eq!(d, Duration::hours(8));
        assert_eq!(encode_duration(d), "PT8H0M0S");
    }

    #[test]
    fn duration_components_are_optional_on_input() {
        assert_eq!(parse_duration("PT10H").unwrap(), Duration::hours(10));
        assert_eq!(parse_duration("PT45M").unwrap(), Duration::minutes(45));
        assert_eq!(
            parse_duration("PT10H15M30S").unwrap(),
            Duration::hours(10) + Duration::minutes(15) + Duration::seconds(30)
        );
    }

    #[test]
    fn bare_pt_and_garbage_are_rejected() {
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("8 hours").is_err());
        assert!(parse_duration("P1DT8H").is_err());
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    #[test]
    fn from_raw_localizes_planned_times() {
        let raw: RawRosterRecord = serde_json::from_value(sample_metadata()).unwrap();
        let a = Assignment::from_raw(&raw, TZ).unwrap();

        assert_eq!(a.shift_id, "DEPLOY001");
        assert_eq!(a.personnel_id, "P001");
        // /Date(1733097600000)/ = 2024-12-02 00:00 UTC
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2024, 12, 2).unwrap());
        assert_eq!(a.planned_start.hour(), 8);
        assert_eq!(a.planned_start.minute(), 0);
        assert_eq!(a.planned_end.hour(), 17);
        assert_eq!(a.planned_end.timezone(), TZ);
    }

    #[test]
    fn from_raw_rejects_bad_duration() {
        let mut meta = sample_metadata();
        meta["planned_start_time"] = json!("eight o'clock");
        let raw: RawRosterRecord = serde_json::from_value(meta).unwrap();
        assert!(Assignment::from_raw(&raw, TZ).is_err());
    }

    // ── Envelope extraction ───────────────────────────────────────────────────

    #[test]
    fn extract_records_handles_envelope_and_bare_array() {
        let envelope = json!({
            "FunctionName": "RosterPush",
            "list_item": { "data": { "d": { "results": [
                { "__metadata": sample_metadata() }
            ]}}}
        });
        assert_eq!(extract_records(&envelope).len(), 1);

        let bare = json!([sample_metadata(), sample_metadata()]);
        assert_eq!(extract_records(&bare).len(), 2);

        assert!(extract_records(&json!({"unexpected": true})).is_empty());
    }

    #[test]
    fn parse_assignments_skips_and_counts_bad_records() {
        let records = vec![
            json!({ "__metadata": sample_metadata() }),
            json!({ "__metadata": { "PersonnelId": "P002" } }), // missing fields
            sample_metadata(),                                  // bare metadata form
        ];

        let parsed = parse_assignments(&records, TZ);
        assert_eq!(parsed.assignments.len(), 2);
        assert_eq!(parsed.skipped, 1);
    }
}
