/*
SPDX-License-Identifier: MIT
*/

//! Clocksim – time-attendance clock-event simulator
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/        – YAML runtime settings
//! ├── roster/        – envelope parsing, wire codecs, Assignment
//! ├── event/         – ClockEvent wire record + field ceilings
//! ├── planner/       – deterministic jittered IN/OUT planning
//! ├── ledger/        – dispatch ledger + roster-file repository
//! ├── transport/     – roster source / dispatch client seams
//! └── orchestrator/  – catch-up, immediate and realtime cycles
//! ```

pub mod config;
pub mod event;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod roster;
pub mod transport;
