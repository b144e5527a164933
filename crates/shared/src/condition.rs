//! Persisted condition trees.
//!
//! Each node is a JSON object tagged by `type` (`AND`, `TIME_WINDOW`, ...).
//! Only configuration is stored. Runtime state such as latches, kill counts,
//! and the currently drawn target is rebuilt when the tree is decoded.
//!
//! ## Versioning Policy
//!
//! - Every node carries a `version`; missing versions read as the current one
//! - New node types can be added (forward compatible)
//! - Unknown node types decode to an empty AND
//! - A malformed node decodes to a safe default for its type; its siblings
//!   are unaffected
//!
//! ## Time windows
//!
//! Window times and dates are written as UTC (`timeFormat: "UTC"`) together
//! with the zone they were configured in. See [`crate::time_format`].

use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use taskloom_domain::condition::time::weekday_name;
use taskloom_domain::condition::{
    DayOfWeekCondition, IntervalCondition, LocationCondition, LocationTarget, LockCondition,
    NpcKillCountCondition, RepeatCycle, ResourceCountCondition, ResourceMode,
    SingleTriggerTimeCondition, SkillLevelCondition, SkillXpCondition, TimeWindowCondition,
    TimeWindowSchedule,
};
use taskloom_domain::{Condition, ConditionContext, LogicalCondition, LogicalOperator, Skill, WorldPoint};

use crate::time_format::{
    format_date, format_time, local_date_to_utc, local_time_to_utc, parse_date, parse_time,
    parse_zone, utc_date_to_local, utc_time_to_local, UTC_TIME_FORMAT,
};

/// Current version written to every node.
pub const CONDITION_FORMAT_VERSION: u32 = 1;

/// Interval used when a persisted interval cannot be read.
pub const FALLBACK_INTERVAL_SECONDS: i64 = 300;

fn default_version() -> u32 {
    CONDITION_FORMAT_VERSION
}

fn default_one() -> u32 {
    1
}

// =============================================================================
// Decode options
// =============================================================================

/// How stored wall-clock values are brought back into a local zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Date on which stored UTC times of day are converted.
    pub reference_date: NaiveDate,
    /// Zone to decode into instead of the zone stored with each node.
    pub target_zone: Option<Tz>,
}

impl DecodeOptions {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            target_zone: None,
        }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self::new(now.date_naive())
    }

    pub fn with_target_zone(mut self, zone: Tz) -> Self {
        self.target_zone = Some(zone);
        self
    }
}

// =============================================================================
// Node DTOs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcKillCountDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub npc_name: String,
    pub target_count_min: i64,
    pub target_count_max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLevelDto {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Skill name, `OVERALL` for the total level.
    pub skill: String,
    pub target_level_min: i64,
    pub target_level_max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillXpDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub skill: String,
    pub target_xp_min: i64,
    pub target_xp_max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCountDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub item_name: String,
    #[serde(default)]
    pub mode: ResourceMode,
    pub target_amount_min: i64,
    pub target_amount_max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationAreaDto {
    #[serde(rename_all = "camelCase")]
    Position {
        x: i32,
        y: i32,
        plane: i32,
        max_distance: u32,
    },
    #[serde(rename_all = "camelCase")]
    Area {
        min_x: i32,
        min_y: i32,
        max_x: i32,
        max_y: i32,
        plane: i32,
    },
    #[serde(rename_all = "camelCase")]
    Region { region_ids: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    pub area: LocationAreaDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub interval_seconds: i64,
    /// Present only for randomized intervals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i64>,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_repeats: u32,
}

impl IntervalDto {
    pub fn every_seconds(interval_seconds: i64) -> Self {
        Self {
            version: CONDITION_FORMAT_VERSION,
            interval_seconds,
            min_interval_seconds: None,
            max_interval_seconds: None,
            initial_delay_seconds: None,
            max_repeats: 0,
        }
    }

    fn from_domain(condition: &IntervalCondition) -> Self {
        let randomized = condition.is_randomized();
        Self {
            version: CONDITION_FORMAT_VERSION,
            interval_seconds: condition.interval().num_seconds(),
            min_interval_seconds: randomized.then(|| condition.min_interval().num_seconds()),
            max_interval_seconds: randomized.then(|| condition.max_interval().num_seconds()),
            initial_delay_seconds: condition.initial_delay().map(|delay| delay.num_seconds()),
            max_repeats: condition.repeats().max_repeats(),
        }
    }

    /// Fails when a persisted duration does not fit a chrono duration or
    /// would push the first trigger past the representable range.
    fn to_domain(&self, now: DateTime<Utc>) -> Result<IntervalCondition, String> {
        let mut condition = match (self.min_interval_seconds, self.max_interval_seconds) {
            (Some(min), Some(max)) if min != max => IntervalCondition::randomized(
                persisted_seconds("minIntervalSeconds", min, now)?,
                persisted_seconds("maxIntervalSeconds", max, now)?,
                now,
            ),
            _ => IntervalCondition::new(persisted_seconds("intervalSeconds", self.interval_seconds, now)?, now),
        };
        if let Some(delay) = self.initial_delay_seconds {
            condition = condition.with_initial_delay(persisted_seconds("initialDelaySeconds", delay, now)?, now);
        }
        if self.max_repeats > 0 {
            condition = condition.with_max_repeats(self.max_repeats);
        }
        Ok(condition)
    }
}

fn persisted_seconds(field: &str, seconds: i64, now: DateTime<Utc>) -> Result<Duration, String> {
    Duration::try_seconds(seconds)
        .filter(|duration| now.checked_add_signed(*duration).is_some())
        .ok_or_else(|| format!("{} of {} is out of range", field, seconds))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTriggerDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub target_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// `UTC` when times and dates are normalized. Absent in legacy files,
    /// whose values are local to the decode zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub repeat_cycle: RepeatCycle,
    #[serde(default = "default_one")]
    pub repeat_interval: u32,
    #[serde(default)]
    pub use_randomization: bool,
    #[serde(default)]
    pub randomize_minutes: u32,
    #[serde(default)]
    pub max_repeats: u32,
}

impl TimeWindowDto {
    fn from_domain(condition: &TimeWindowCondition, reference: NaiveDate) -> Self {
        let schedule = condition.schedule();
        let zone = schedule.zone;
        Self {
            version: CONDITION_FORMAT_VERSION,
            start_time: format_time(local_time_to_utc(schedule.start_time, zone, reference)),
            end_time: format_time(local_time_to_utc(schedule.end_time, zone, reference)),
            start_date: Some(format_date(local_date_to_utc(schedule.start_date, zone))),
            end_date: Some(format_date(local_date_to_utc(schedule.end_date, zone))),
            time_format: Some(UTC_TIME_FORMAT.to_string()),
            zone_id: Some(zone.name().to_string()),
            repeat_cycle: schedule.repeat_cycle,
            repeat_interval: schedule.repeat_interval,
            use_randomization: schedule.use_randomization,
            randomize_minutes: schedule.randomize_minutes,
            max_repeats: condition.repeats().max_repeats(),
        }
    }

    /// Rebuilds the local schedule. Stored UTC values are converted into the
    /// target zone when one is requested, otherwise into the stored zone.
    pub fn to_schedule(&self, options: &DecodeOptions) -> Result<TimeWindowSchedule, String> {
        let stored_zone = self.zone_id.as_deref().and_then(|name| {
            let zone = parse_zone(name);
            if zone.is_none() {
                tracing::warn!(zone_id = name, "Unknown zone in persisted time window, using UTC");
            }
            zone
        });
        let zone = options.target_zone.or(stored_zone).unwrap_or(Tz::UTC);

        let start_time = parse_time(&self.start_time)
            .ok_or_else(|| format!("invalid start time '{}'", self.start_time))?;
        let end_time =
            parse_time(&self.end_time).ok_or_else(|| format!("invalid end time '{}'", self.end_time))?;
        let start_date = match self.start_date.as_deref() {
            Some(text) => parse_date(text).ok_or_else(|| format!("invalid start date '{}'", text))?,
            None => TimeWindowSchedule::unlimited_start_date(),
        };
        let end_date = match self.end_date.as_deref() {
            Some(text) => parse_date(text).ok_or_else(|| format!("invalid end date '{}'", text))?,
            None => TimeWindowSchedule::unlimited_end_date(),
        };

        let is_utc = self
            .time_format
            .as_deref()
            .is_some_and(|format| format.eq_ignore_ascii_case(UTC_TIME_FORMAT));
        let reference = options.reference_date;
        let schedule = if is_utc {
            TimeWindowSchedule::daily(
                utc_time_to_local(start_time, zone, reference),
                utc_time_to_local(end_time, zone, reference),
                zone,
            )
            .with_dates(utc_date_to_local(start_date, zone), utc_date_to_local(end_date, zone))
        } else {
            TimeWindowSchedule::daily(start_time, end_time, zone).with_dates(start_date, end_date)
        };
        let schedule = schedule.with_cycle(self.repeat_cycle, self.repeat_interval);

        Ok(if self.use_randomization {
            schedule.with_randomization(self.randomize_minutes)
        } else {
            schedule
        })
    }

    fn fallback() -> Self {
        let schedule = TimeWindowSchedule::default();
        Self {
            version: CONDITION_FORMAT_VERSION,
            start_time: format_time(schedule.start_time),
            end_time: format_time(schedule.end_time),
            start_date: None,
            end_date: None,
            time_format: Some(UTC_TIME_FORMAT.to_string()),
            zone_id: Some(Tz::UTC.name().to_string()),
            repeat_cycle: schedule.repeat_cycle,
            repeat_interval: schedule.repeat_interval,
            use_randomization: false,
            randomize_minutes: 0,
            max_repeats: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayOfWeekDto {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Upper-case day names, e.g. `MONDAY`.
    pub active_days: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub max_per_day: u32,
    #[serde(default)]
    pub max_per_week: u32,
    #[serde(default)]
    pub max_repeats: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalDto>,
}

impl DayOfWeekDto {
    fn all_days() -> Self {
        let days = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        Self {
            version: CONDITION_FORMAT_VERSION,
            active_days: days.iter().map(|day| day_key(*day)).collect(),
            zone_id: None,
            max_per_day: 0,
            max_per_week: 0,
            max_repeats: 0,
            interval: None,
        }
    }
}

fn day_key(day: Weekday) -> String {
    weekday_name(day).to_ascii_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalDto {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub conditions: Vec<ConditionDto>,
}

impl LogicalDto {
    pub fn new(conditions: Vec<ConditionDto>) -> Self {
        Self {
            version: CONDITION_FORMAT_VERSION,
            conditions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub condition: Box<ConditionDto>,
}

/// Locks are never persisted as held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDto {
    #[serde(default = "default_version")]
    pub version: u32,
    pub reason: String,
}

// =============================================================================
// Tree node
// =============================================================================

/// One node of a persisted condition tree.
///
/// Deserialization never fails on a well-formed JSON value; see the
/// versioning policy in the module docs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionDto {
    NpcKillCount(NpcKillCountDto),
    SkillLevel(SkillLevelDto),
    SkillXp(SkillXpDto),
    Resource(ResourceCountDto),
    Location(LocationDto),
    Interval(IntervalDto),
    SingleTrigger(SingleTriggerDto),
    TimeWindow(TimeWindowDto),
    DayOfWeek(DayOfWeekDto),
    And(LogicalDto),
    Or(LogicalDto),
    Not(NotDto),
    Lock(LockDto),
}

impl<'de> Deserialize<'de> for ConditionDto {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn parse_node<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

impl ConditionDto {
    pub fn empty_and() -> Self {
        ConditionDto::And(LogicalDto::new(Vec::new()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConditionDto::NpcKillCount(_) => "NPC_KILL_COUNT",
            ConditionDto::SkillLevel(_) => "SKILL_LEVEL",
            ConditionDto::SkillXp(_) => "SKILL_XP",
            ConditionDto::Resource(_) => "RESOURCE",
            ConditionDto::Location(_) => "LOCATION",
            ConditionDto::Interval(_) => "INTERVAL",
            ConditionDto::SingleTrigger(_) => "SINGLE_TRIGGER",
            ConditionDto::TimeWindow(_) => "TIME_WINDOW",
            ConditionDto::DayOfWeek(_) => "DAY_OF_WEEK",
            ConditionDto::And(_) => "AND",
            ConditionDto::Or(_) => "OR",
            ConditionDto::Not(_) => "NOT",
            ConditionDto::Lock(_) => "LOCK",
        }
    }

    /// Default substituted for a node of `type_name` that cannot be read.
    ///
    /// Time nodes fall back to permissive schedules (every five minutes, all
    /// days, the whole day). Everything else becomes an empty AND.
    pub fn safe_default(type_name: &str) -> Self {
        match type_name {
            "INTERVAL" => ConditionDto::Interval(IntervalDto::every_seconds(FALLBACK_INTERVAL_SECONDS)),
            "DAY_OF_WEEK" => ConditionDto::DayOfWeek(DayOfWeekDto::all_days()),
            "TIME_WINDOW" => ConditionDto::TimeWindow(TimeWindowDto::fallback()),
            _ => Self::empty_and(),
        }
    }

    /// Lenient decode of one node. Children of logical nodes are decoded
    /// independently.
    pub fn from_value(value: &Value) -> Self {
        let Some(type_name) = value.get("type").and_then(Value::as_str) else {
            tracing::warn!("Persisted condition has no type, using an empty AND");
            return Self::empty_and();
        };

        let decoded = match type_name {
            "NPC_KILL_COUNT" => parse_node(value).map(ConditionDto::NpcKillCount),
            "SKILL_LEVEL" => parse_node(value).map(ConditionDto::SkillLevel),
            "SKILL_XP" => parse_node(value).map(ConditionDto::SkillXp),
            "RESOURCE" => parse_node(value).map(ConditionDto::Resource),
            "LOCATION" => parse_node(value).map(ConditionDto::Location),
            "INTERVAL" => parse_node(value).map(ConditionDto::Interval),
            "SINGLE_TRIGGER" => parse_node(value).map(ConditionDto::SingleTrigger),
            "TIME_WINDOW" => parse_node(value).map(ConditionDto::TimeWindow),
            "DAY_OF_WEEK" => parse_node(value).map(ConditionDto::DayOfWeek),
            "AND" => parse_node(value).map(ConditionDto::And),
            "OR" => parse_node(value).map(ConditionDto::Or),
            "NOT" => parse_node(value).map(ConditionDto::Not),
            "LOCK" => parse_node(value).map(ConditionDto::Lock),
            other => {
                tracing::warn!(condition_type = other, "Unknown condition type, using an empty AND");
                return Self::empty_and();
            }
        };

        decoded.unwrap_or_else(|error| {
            tracing::warn!(
                condition_type = type_name,
                error = %error,
                "Malformed persisted condition, using safe default"
            );
            Self::safe_default(type_name)
        })
    }

    // -------------------------------------------------------------------------
    // Domain -> DTO
    // -------------------------------------------------------------------------

    /// Captures the configuration of `condition`. Window times are converted
    /// to UTC on `reference`.
    pub fn from_condition(condition: &Condition, reference: NaiveDate) -> Self {
        match condition {
            Condition::NpcKillCount(c) => ConditionDto::NpcKillCount(NpcKillCountDto {
                version: CONDITION_FORMAT_VERSION,
                npc_name: c.pattern().as_str().to_string(),
                target_count_min: i64::from(c.target_min()),
                target_count_max: i64::from(c.target_max()),
            }),
            Condition::SkillLevel(c) => ConditionDto::SkillLevel(SkillLevelDto {
                version: CONDITION_FORMAT_VERSION,
                skill: skill_key(c.skill()),
                target_level_min: i64::from(c.target_min()),
                target_level_max: i64::from(c.target_max()),
            }),
            Condition::SkillXp(c) => ConditionDto::SkillXp(SkillXpDto {
                version: CONDITION_FORMAT_VERSION,
                skill: skill_key(c.skill()),
                target_xp_min: saturating_i64(c.target_min()),
                target_xp_max: saturating_i64(c.target_max()),
            }),
            Condition::Resource(c) => ConditionDto::Resource(ResourceCountDto {
                version: CONDITION_FORMAT_VERSION,
                item_name: c.pattern().as_str().to_string(),
                mode: c.mode(),
                target_amount_min: i64::from(c.target_min()),
                target_amount_max: i64::from(c.target_max()),
            }),
            Condition::Location(c) => ConditionDto::Location(LocationDto {
                version: CONDITION_FORMAT_VERSION,
                name: c.name().to_string(),
                area: match c.target() {
                    LocationTarget::Position {
                        point,
                        max_distance,
                    } => LocationAreaDto::Position {
                        x: point.x,
                        y: point.y,
                        plane: point.plane,
                        max_distance: *max_distance,
                    },
                    LocationTarget::Area {
                        min_x,
                        min_y,
                        max_x,
                        max_y,
                        plane,
                    } => LocationAreaDto::Area {
                        min_x: *min_x,
                        min_y: *min_y,
                        max_x: *max_x,
                        max_y: *max_y,
                        plane: *plane,
                    },
                    LocationTarget::Region { region_ids } => LocationAreaDto::Region {
                        region_ids: region_ids.iter().copied().collect(),
                    },
                },
            }),
            Condition::Interval(c) => ConditionDto::Interval(IntervalDto::from_domain(c)),
            Condition::SingleTrigger(c) => ConditionDto::SingleTrigger(SingleTriggerDto {
                version: CONDITION_FORMAT_VERSION,
                target_time: c.target_time(),
            }),
            Condition::TimeWindow(c) => ConditionDto::TimeWindow(TimeWindowDto::from_domain(c, reference)),
            Condition::DayOfWeek(c) => ConditionDto::DayOfWeek(DayOfWeekDto {
                version: CONDITION_FORMAT_VERSION,
                active_days: c.days().iter().map(|day| day_key(*day)).collect(),
                zone_id: Some(c.zone().name().to_string()),
                max_per_day: c.max_per_day(),
                max_per_week: c.max_per_week(),
                max_repeats: c.repeats().max_repeats(),
                interval: c.interval().map(IntervalDto::from_domain),
            }),
            Condition::Logical(c) => {
                let children = LogicalDto::new(
                    c.children()
                        .iter()
                        .map(|child| Self::from_condition(child, reference))
                        .collect(),
                );
                match c.operator() {
                    LogicalOperator::And => ConditionDto::And(children),
                    LogicalOperator::Or => ConditionDto::Or(children),
                }
            }
            Condition::Not(c) => ConditionDto::Not(NotDto {
                version: CONDITION_FORMAT_VERSION,
                condition: Box::new(Self::from_condition(c.inner(), reference)),
            }),
            Condition::Lock(c) => ConditionDto::Lock(LockDto {
                version: CONDITION_FORMAT_VERSION,
                reason: c.reason().to_string(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // DTO -> domain
    // -------------------------------------------------------------------------

    /// Rebuilds a fresh condition. Values that parse as JSON but make no
    /// sense (unknown skill, bad time string) fall back to the node's safe
    /// default.
    pub fn to_condition(&self, ctx: &ConditionContext<'_>, options: &DecodeOptions) -> Condition {
        match self.try_to_condition(ctx, options) {
            Ok(condition) => condition,
            Err(reason) => {
                tracing::warn!(
                    condition_type = self.type_name(),
                    reason = %reason,
                    "Invalid persisted condition, using safe default"
                );
                let fallback = Self::safe_default(self.type_name());
                fallback
                    .try_to_condition(ctx, options)
                    .unwrap_or_else(|_| Condition::Logical(LogicalCondition::and()))
            }
        }
    }

    fn try_to_condition(&self, ctx: &ConditionContext<'_>, options: &DecodeOptions) -> Result<Condition, String> {
        let now = ctx.now();
        let condition = match self {
            ConditionDto::NpcKillCount(dto) => {
                NpcKillCountCondition::new(&dto.npc_name, dto.target_count_min, dto.target_count_max, ctx).into()
            }
            ConditionDto::SkillLevel(dto) => {
                let skill = parse_skill(&dto.skill)?;
                SkillLevelCondition::new(skill, dto.target_level_min, dto.target_level_max, ctx).into()
            }
            ConditionDto::SkillXp(dto) => {
                let skill = parse_skill(&dto.skill)?;
                SkillXpCondition::new(skill, dto.target_xp_min, dto.target_xp_max, ctx).into()
            }
            ConditionDto::Resource(dto) => ResourceCountCondition::new(
                &dto.item_name,
                dto.mode,
                dto.target_amount_min,
                dto.target_amount_max,
                ctx,
            )
            .into(),
            ConditionDto::Location(dto) => {
                let name = dto.name.clone();
                let condition = match &dto.area {
                    LocationAreaDto::Position {
                        x,
                        y,
                        plane,
                        max_distance,
                    } => LocationCondition::at_position(name, WorldPoint::new(*x, *y, *plane), *max_distance),
                    LocationAreaDto::Area {
                        min_x,
                        min_y,
                        max_x,
                        max_y,
                        plane,
                    } => LocationCondition::in_area(name, *min_x, *min_y, *max_x, *max_y, *plane),
                    LocationAreaDto::Region { region_ids } => {
                        LocationCondition::in_regions(name, region_ids.iter().copied())
                    }
                };
                condition.into()
            }
            ConditionDto::Interval(dto) => dto.to_domain(now)?.into(),
            ConditionDto::SingleTrigger(dto) => SingleTriggerTimeCondition::at(dto.target_time, now).into(),
            ConditionDto::TimeWindow(dto) => {
                let schedule = dto.to_schedule(options)?;
                let mut condition = TimeWindowCondition::new(schedule, ctx);
                if dto.max_repeats > 0 {
                    condition = condition.with_max_repeats(dto.max_repeats);
                }
                condition.into()
            }
            ConditionDto::DayOfWeek(dto) => {
                let days = dto
                    .active_days
                    .iter()
                    .map(|name| {
                        name.trim()
                            .parse::<Weekday>()
                            .map_err(|_| format!("unknown day '{}'", name))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let zone = match options.target_zone {
                    Some(zone) => zone,
                    None => match dto.zone_id.as_deref() {
                        Some(name) => parse_zone(name).ok_or_else(|| format!("unknown zone '{}'", name))?,
                        None => Tz::UTC,
                    },
                };
                let mut condition = DayOfWeekCondition::new(days, zone)
                    .with_daily_limit(dto.max_per_day)
                    .with_weekly_limit(dto.max_per_week);
                if let Some(interval) = &dto.interval {
                    match interval.to_domain(now) {
                        Ok(interval) => condition = condition.with_interval(interval),
                        Err(reason) => {
                            tracing::warn!(reason = %reason, "Dropping invalid interval from persisted day of week")
                        }
                    }
                }
                if dto.max_repeats > 0 {
                    condition = condition.with_max_repeats(dto.max_repeats);
                }
                condition.into()
            }
            ConditionDto::And(dto) => Self::logical(LogicalOperator::And, dto, ctx, options),
            ConditionDto::Or(dto) => Self::logical(LogicalOperator::Or, dto, ctx, options),
            ConditionDto::Not(dto) => Condition::not(dto.condition.to_condition(ctx, options)),
            ConditionDto::Lock(dto) => LockCondition::new(dto.reason.clone()).into(),
        };
        Ok(condition)
    }

    fn logical(
        operator: LogicalOperator,
        dto: &LogicalDto,
        ctx: &ConditionContext<'_>,
        options: &DecodeOptions,
    ) -> Condition {
        let mut logical = LogicalCondition::new(operator);
        for child in &dto.conditions {
            logical.add(child.to_condition(ctx, options));
        }
        Condition::Logical(logical)
    }
}

fn skill_key(skill: Skill) -> String {
    if skill.is_total() {
        "OVERALL".to_string()
    } else {
        skill.display_name().to_ascii_uppercase()
    }
}

fn parse_skill(name: &str) -> Result<Skill, String> {
    name.parse::<Skill>().map_err(|error| error.to_string())
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// JSON entry points
// =============================================================================

/// Serializes a condition tree to pretty JSON.
pub fn encode_condition(condition: &Condition, reference: NaiveDate) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ConditionDto::from_condition(condition, reference))
}

/// Parses a condition tree. Fails only when `json` is not JSON at all.
pub fn decode_condition(
    json: &str,
    ctx: &ConditionContext<'_>,
    options: &DecodeOptions,
) -> Result<Condition, serde_json::Error> {
    let dto: ConditionDto = serde_json::from_str(json)?;
    Ok(dto.to_condition(ctx, options))
}
