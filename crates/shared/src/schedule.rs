//! Persisted schedule file.
//!
//! A schedule file is an object `{ "version": 1, "entries": [...] }`. A bare
//! array of entries is also accepted. Entries that cannot be read are
//! skipped with a warning so one bad entry does not lose the rest.
//!
//! Only configuration and run statistics are stored. An entry saved while
//! it was running comes back idle.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use taskloom_domain::{
    ConditionContext, DomainError, EntryState, ExecutionRecord, ExecutionResult, ScheduleEntry,
    ScheduleEntryId, StopReason,
};

use crate::condition::{ConditionDto, DecodeOptions, LogicalDto};

pub const SCHEDULE_FORMAT_VERSION: u32 = 1;

/// Reason recorded for entries stored as disabled without one.
const DEFAULT_DISABLED_REASON: &str = "Disabled";

fn default_version() -> u32 {
    SCHEDULE_FORMAT_VERSION
}

fn default_true() -> bool {
    true
}

fn empty_or() -> ConditionDto {
    ConditionDto::Or(LogicalDto::new(Vec::new()))
}

// =============================================================================
// Entry
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntryDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: Uuid,
    pub name: String,
    pub task_name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default = "ConditionDto::empty_and")]
    pub start_conditions: ConditionDto,
    #[serde(default = "empty_or")]
    pub stop_conditions: ConditionDto,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_reason: Option<StopReason>,
    #[serde(default)]
    pub history: Vec<ExecutionRecord>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleEntryDto {
    pub fn from_entry(entry: &ScheduleEntry, reference: NaiveDate) -> Self {
        let enabled = entry.state() != EntryState::Disabled;
        Self {
            version: SCHEDULE_FORMAT_VERSION,
            id: entry.id().to_uuid(),
            name: entry.name().to_string(),
            task_name: entry.task_name().to_string(),
            priority: entry.priority(),
            enabled,
            disabled_reason: entry.disabled_reason().map(str::to_string),
            start_conditions: ConditionDto::from_condition(entry.start_conditions(), reference),
            stop_conditions: ConditionDto::from_condition(entry.stop_conditions(), reference),
            run_count: entry.run_count(),
            last_run_started_at: entry.last_run_started_at(),
            last_run_ended_at: entry.last_run_ended_at(),
            last_result: entry.last_result(),
            last_stop_reason: entry.stop_reason(),
            history: entry.history().cloned().collect(),
            created_at: entry.created_at(),
        }
    }

    /// Rebuilds an idle (or disabled) entry with freshly decoded trees.
    pub fn to_entry(&self, ctx: &ConditionContext<'_>, options: &DecodeOptions) -> Result<ScheduleEntry, DomainError> {
        let entry = ScheduleEntry::new(
            self.name.clone(),
            self.task_name.clone(),
            self.start_conditions.to_condition(ctx, options),
            self.stop_conditions.to_condition(ctx, options),
            self.created_at,
        )?
        .with_id(ScheduleEntryId::from_uuid(self.id))
        .with_priority(self.priority)
        .with_run_stats(
            self.run_count,
            self.last_run_started_at,
            self.last_run_ended_at,
            self.last_result,
        )
        .with_stop_reason(self.last_stop_reason)
        .with_history(self.history.iter().cloned());

        Ok(if self.enabled {
            entry
        } else {
            let reason = self
                .disabled_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_DISABLED_REASON.to_string());
            entry.with_disabled(reason)
        })
    }
}

// =============================================================================
// File
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFileDto {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<ScheduleEntryDto>,
}

/// Serializes entries as a pretty-printed schedule file.
pub fn encode_schedule(entries: &[ScheduleEntry], reference: NaiveDate) -> Result<String, serde_json::Error> {
    let file = ScheduleFileDto {
        version: SCHEDULE_FORMAT_VERSION,
        entries: entries
            .iter()
            .map(|entry| ScheduleEntryDto::from_entry(entry, reference))
            .collect(),
    };
    serde_json::to_string_pretty(&file)
}

/// Parses a schedule file, skipping entries that cannot be read.
///
/// Fails when `json` is not JSON or is neither an object with `entries` nor
/// an array.
pub fn decode_schedule(
    json: &str,
    ctx: &ConditionContext<'_>,
    options: &DecodeOptions,
) -> Result<Vec<ScheduleEntry>, serde_json::Error> {
    let root: Value = serde_json::from_str(json)?;
    let raw_entries = match root {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("entries") {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(serde_json::Error::custom("`entries` must be an array")),
            None => Vec::new(),
        },
        _ => {
            return Err(serde_json::Error::custom(
                "schedule file must be an object or an array",
            ))
        }
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (index, raw) in raw_entries.into_iter().enumerate() {
        let dto = match ScheduleEntryDto::deserialize(&raw) {
            Ok(dto) => dto,
            Err(error) => {
                tracing::warn!(index, error = %error, "Skipping unreadable schedule entry");
                continue;
            }
        };
        match dto.to_entry(ctx, options) {
            Ok(entry) => entries.push(entry),
            Err(error) => {
                tracing::warn!(index, name = %dto.name, error = %error, "Skipping invalid schedule entry");
            }
        }
    }
    Ok(entries)
}
