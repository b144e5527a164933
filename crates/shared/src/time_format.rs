//! UTC normalization for persisted wall-clock fields.
//!
//! Time windows are configured in a local zone but stored as UTC so that a
//! schedule written on one machine means the same instants on another. A
//! time of day only maps to UTC relative to a date (DST), so every
//! conversion takes a reference date. Dates are converted at local noon,
//! which never falls into a DST gap.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use taskloom_domain::condition::time::resolve_local;
use taskloom_domain::condition::TimeWindowSchedule;

/// Marker written to `timeFormat` when times and dates are stored as UTC.
pub const UTC_TIME_FORMAT: &str = "UTC";

const TIME_FORMAT: &str = "%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

// =============================================================================
// Conversions
// =============================================================================

/// Local time of day in `zone` on `reference`, expressed as a UTC time of day.
pub fn local_time_to_utc(time: NaiveTime, zone: Tz, reference: NaiveDate) -> NaiveTime {
    resolve_local(zone, reference.and_time(time)).time()
}

/// UTC time of day on `reference`, expressed in `zone`.
pub fn utc_time_to_local(time: NaiveTime, zone: Tz, reference: NaiveDate) -> NaiveTime {
    Utc.from_utc_datetime(&reference.and_time(time))
        .with_timezone(&zone)
        .time()
}

/// Converts a local date through noon. The unlimited sentinels pass through.
pub fn local_date_to_utc(date: NaiveDate, zone: Tz) -> NaiveDate {
    if is_sentinel(date) {
        return date;
    }
    resolve_local(zone, date.and_time(noon())).date_naive()
}

pub fn utc_date_to_local(date: NaiveDate, zone: Tz) -> NaiveDate {
    if is_sentinel(date) {
        return date;
    }
    Utc.from_utc_datetime(&date.and_time(noon()))
        .with_timezone(&zone)
        .date_naive()
}

fn is_sentinel(date: NaiveDate) -> bool {
    date == TimeWindowSchedule::unlimited_start_date() || date == TimeWindowSchedule::unlimited_end_date()
}

// =============================================================================
// Text forms
// =============================================================================

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts `HH:MM:SS`, `HH:MM:SS.fff` and `HH:MM`.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// IANA zone name, e.g. `Europe/London`.
pub fn parse_zone(text: &str) -> Option<Tz> {
    text.trim().parse::<Tz>().ok()
}
