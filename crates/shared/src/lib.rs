//! Taskloom persisted formats - condition trees and schedule files on disk
//!
//! This crate owns everything that crosses the disk boundary:
//! - Condition tree DTOs, tagged by `type`
//! - Schedule entry and schedule file DTOs
//! - UTC normalization of time-window fields
//!
//! # Design Principles
//!
//! 1. **Lenient reads** - a malformed node or entry degrades to a safe default
//!    (or is skipped) with a `tracing` warning, never a failed load
//! 2. **Configuration only** - runtime state is rebuilt on decode
//! 3. **Zone independent** - wall-clock fields are stored as UTC plus zone id
//! 4. **No domain IDs** - use raw `uuid::Uuid` in DTOs

pub mod condition;
pub mod schedule;
pub mod time_format;

pub use condition::{
    decode_condition, encode_condition, ConditionDto, DecodeOptions, CONDITION_FORMAT_VERSION,
};
pub use schedule::{
    decode_schedule, encode_schedule, ScheduleEntryDto, ScheduleFileDto, SCHEDULE_FORMAT_VERSION,
};
