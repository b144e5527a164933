use chrono::{DateTime, Datelike, IsoWeek, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use super::{resolve_local, IntervalCondition, RepeatTracker};
use crate::condition::ConditionContext;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Satisfied on an explicit set of weekdays, evaluated in `zone`.
///
/// Optional per-day and per-week budgets count valid resets. An embedded
/// interval, when present, must also be satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct DayOfWeekCondition {
    days: Vec<Weekday>,
    zone: Tz,
    max_per_day: u32,
    max_per_week: u32,
    day_counter: Option<(NaiveDate, u32)>,
    week_counter: Option<(IsoWeek, u32)>,
    interval: Option<IntervalCondition>,
    repeats: RepeatTracker,
    satisfied: bool,
}

impl DayOfWeekCondition {
    pub fn new(days: impl IntoIterator<Item = Weekday>, zone: Tz) -> Self {
        let mut days: Vec<Weekday> = days.into_iter().collect();
        days.sort_by_key(|day| day.num_days_from_monday());
        days.dedup();
        Self {
            days,
            zone,
            max_per_day: 0,
            max_per_week: 0,
            day_counter: None,
            week_counter: None,
            interval: None,
            repeats: RepeatTracker::default(),
            satisfied: false,
        }
    }

    pub fn weekdays(zone: Tz) -> Self {
        Self::new(WEEK[..5].iter().copied(), zone)
    }

    pub fn weekends(zone: Tz) -> Self {
        Self::new([Weekday::Sat, Weekday::Sun], zone)
    }

    pub fn all_days(zone: Tz) -> Self {
        Self::new(WEEK, zone)
    }

    /// 0 means unlimited.
    pub fn with_daily_limit(mut self, max_per_day: u32) -> Self {
        self.max_per_day = max_per_day;
        self
    }

    /// 0 means unlimited.
    pub fn with_weekly_limit(mut self, max_per_week: u32) -> Self {
        self.max_per_week = max_per_week;
        self
    }

    pub fn with_interval(mut self, interval: IntervalCondition) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_max_repeats(mut self, max_repeats: u32) -> Self {
        self.repeats.set_max_repeats(max_repeats);
        self
    }

    pub fn days(&self) -> &[Weekday] {
        &self.days
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn max_per_week(&self) -> u32 {
        self.max_per_week
    }

    pub fn interval(&self) -> Option<&IntervalCondition> {
        self.interval.as_ref()
    }

    pub fn repeats(&self) -> &RepeatTracker {
        &self.repeats
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub fn resets_on(&self, date: NaiveDate) -> u32 {
        match self.day_counter {
            Some((day, count)) if day == date => count,
            _ => 0,
        }
    }

    pub fn resets_in(&self, week: IsoWeek) -> u32 {
        match self.week_counter {
            Some((counted, count)) if counted == week => count,
            _ => 0,
        }
    }

    pub fn is_daily_limit_reached(&self, now: DateTime<Utc>) -> bool {
        self.max_per_day > 0 && self.resets_on(self.local_date(now)) >= self.max_per_day
    }

    pub fn is_weekly_limit_reached(&self, now: DateTime<Utc>) -> bool {
        self.max_per_week > 0 && self.resets_in(self.local_date(now).iso_week()) >= self.max_per_week
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if self.satisfied {
            return true;
        }
        if self.repeats.is_paused() || !self.repeats.can_trigger_again() {
            return false;
        }
        let now = ctx.now();
        if !self.is_active_day(self.local_date(now))
            || self.is_daily_limit_reached(now)
            || self.is_weekly_limit_reached(now)
        {
            return false;
        }
        if let Some(interval) = self.interval.as_mut() {
            if !interval.is_satisfied(ctx) {
                return false;
            }
        }
        self.satisfied = true;
        true
    }

    pub fn progress(&self, ctx: &ConditionContext<'_>) -> f64 {
        if self.satisfied {
            return 100.0;
        }
        let now = ctx.now();
        if !self.is_active_day(self.local_date(now))
            || self.is_daily_limit_reached(now)
            || self.is_weekly_limit_reached(now)
        {
            return 0.0;
        }
        self.interval
            .as_ref()
            .map_or(100.0, |interval| interval.progress(ctx))
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        if self.satisfied {
            self.repeats.record_valid_reset();
            let today = self.local_date(ctx.now());
            let day_count = self.resets_on(today) + 1;
            let week_count = self.resets_in(today.iso_week()) + 1;
            self.day_counter = Some((today, day_count));
            self.week_counter = Some((today.iso_week(), week_count));
        }
        self.satisfied = false;
        if let Some(interval) = self.interval.as_mut() {
            interval.reset(randomize, ctx);
        }
    }

    /// Start of the next day on which this condition may trigger, or `now`
    /// when today still qualifies.
    pub fn next_trigger_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.repeats.can_trigger_again() || self.days.is_empty() {
            return None;
        }
        let today = self.local_date(now);
        let mut date = today;
        for offset in 0..=14 {
            let weekly_ok = self.max_per_week == 0
                || date.iso_week() != today.iso_week()
                || !self.is_weekly_limit_reached(now);
            let daily_ok = offset > 0 || !self.is_daily_limit_reached(now);
            if self.is_active_day(date) && weekly_ok && daily_ok {
                if offset == 0 {
                    return match &self.interval {
                        Some(interval) => interval.next_trigger_time().map(|next| next.max(now)),
                        None => Some(now),
                    };
                }
                return Some(resolve_local(self.zone, date.and_time(NaiveTime::MIN)));
            }
            date = date.succ_opt()?;
        }
        None
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.repeats.pause(now);
        if let Some(interval) = self.interval.as_mut() {
            interval.pause(now);
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.repeats.resume(now);
        if let Some(interval) = self.interval.as_mut() {
            interval.resume(now);
        }
    }

    pub fn describe(&self) -> String {
        if self.days.is_empty() {
            return "No active days".to_string();
        }
        let mut description = if self.days.len() == 7 {
            "Every day".to_string()
        } else if self.days == WEEK[..5] {
            "Weekdays".to_string()
        } else if self.days == [Weekday::Sat, Weekday::Sun] {
            "Weekends".to_string()
        } else {
            let names: Vec<&str> = self.days.iter().map(|day| weekday_name(*day)).collect();
            format!("On {}", names.join(", "))
        };
        if self.max_per_day > 0 {
            description.push_str(&format!(" (max {} per day)", self.max_per_day));
        }
        if self.max_per_week > 0 {
            description.push_str(&format!(" (max {} per week)", self.max_per_week));
        }
        if let Some(interval) = &self.interval {
            description.push_str(&format!(", {}", interval.describe()));
        }
        description
    }

    fn is_active_day(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.zone).date_naive()
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::test_support::{ctx, fixed_time, minutes};
    use crate::game::GameSnapshot;
    use chrono::{Duration, TimeZone};

    // fixed_time() is a Tuesday evening in UTC.

    #[test]
    fn satisfied_on_listed_day() {
        let game = GameSnapshot::new();
        let mut weekdays = DayOfWeekCondition::weekdays(Tz::UTC);
        assert!(weekdays.is_satisfied(&ctx(fixed_time(), &game)));

        let mut weekends = DayOfWeekCondition::weekends(Tz::UTC);
        assert!(!weekends.is_satisfied(&ctx(fixed_time(), &game)));
        assert_eq!(weekends.progress(&ctx(fixed_time(), &game)), 0.0);
    }

    #[test]
    fn empty_day_set_is_never_satisfied() {
        let game = GameSnapshot::new();
        let mut condition = DayOfWeekCondition::new([], Tz::UTC);
        assert!(!condition.is_satisfied(&ctx(fixed_time(), &game)));
        assert_eq!(condition.next_trigger_time(fixed_time()), None);
        assert_eq!(condition.describe(), "No active days");
    }

    #[test]
    fn day_is_evaluated_in_zone() {
        let game = GameSnapshot::new();
        // 22:13 UTC on Tuesday is already Wednesday at UTC+3
        let plus_three: Tz = "Etc/GMT-3".parse().unwrap();
        let mut wednesday = DayOfWeekCondition::new([Weekday::Wed], plus_three);
        assert!(wednesday.is_satisfied(&ctx(fixed_time(), &game)));
    }

    #[test]
    fn daily_limit_blocks_until_next_day() {
        let game = GameSnapshot::new();
        let t0 = Utc.with_ymd_and_hms(2023, 11, 14, 10, 0, 0).unwrap();
        let mut condition = DayOfWeekCondition::all_days(Tz::UTC).with_daily_limit(1);
        assert!(condition.is_satisfied(&ctx(t0, &game)));
        condition.reset(false, &ctx(t0, &game));
        assert_eq!(condition.resets_on(t0.date_naive()), 1);

        assert!(!condition.is_satisfied(&ctx(t0 + minutes(60), &game)));
        assert_eq!(
            condition.next_trigger_time(t0),
            Some(Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap())
        );
        assert!(condition.is_satisfied(&ctx(t0 + Duration::days(1), &game)));
    }

    #[test]
    fn weekly_limit_rolls_over_on_monday() {
        let game = GameSnapshot::new();
        let t0 = fixed_time();
        let mut condition = DayOfWeekCondition::all_days(Tz::UTC).with_weekly_limit(2);
        for day in 0..2 {
            let now = t0 + Duration::days(day);
            assert!(condition.is_satisfied(&ctx(now, &game)));
            condition.reset(false, &ctx(now, &game));
        }
        assert!(!condition.is_satisfied(&ctx(t0 + Duration::days(2), &game)));
        // Tuesday + 6 days is the following Monday
        assert!(condition.is_satisfied(&ctx(t0 + Duration::days(6), &game)));
    }

    #[test]
    fn unsatisfied_reset_does_not_consume_budget() {
        let game = GameSnapshot::new();
        let mut condition = DayOfWeekCondition::weekends(Tz::UTC).with_daily_limit(1);
        condition.reset(false, &ctx(fixed_time(), &game));
        assert_eq!(condition.resets_on(fixed_time().date_naive()), 0);
        assert_eq!(condition.repeats().valid_reset_count(), 0);
    }

    #[test]
    fn embedded_interval_must_also_fire() {
        let game = GameSnapshot::new();
        let t0 = fixed_time();
        let interval = IntervalCondition::every_minutes(30, t0).with_initial_delay(minutes(10), t0);
        let mut condition = DayOfWeekCondition::weekdays(Tz::UTC).with_interval(interval);
        assert!(!condition.is_satisfied(&ctx(t0, &game)));
        assert_eq!(condition.next_trigger_time(t0), Some(t0 + minutes(10)));
        assert!(condition.is_satisfied(&ctx(t0 + minutes(10), &game)));
    }

    #[test]
    fn next_trigger_is_start_of_next_active_day() {
        let weekends = DayOfWeekCondition::weekends(Tz::UTC);
        assert_eq!(
            weekends.next_trigger_time(fixed_time()),
            Some(Utc.with_ymd_and_hms(2023, 11, 18, 0, 0, 0).unwrap())
        );
        let weekdays = DayOfWeekCondition::weekdays(Tz::UTC);
        assert_eq!(weekdays.next_trigger_time(fixed_time()), Some(fixed_time()));
    }

    #[test]
    fn describe_names_common_sets() {
        assert_eq!(DayOfWeekCondition::all_days(Tz::UTC).describe(), "Every day");
        assert_eq!(DayOfWeekCondition::weekdays(Tz::UTC).describe(), "Weekdays");
        assert_eq!(DayOfWeekCondition::weekends(Tz::UTC).describe(), "Weekends");
        assert_eq!(
            DayOfWeekCondition::new([Weekday::Fri, Weekday::Mon, Weekday::Fri], Tz::UTC)
                .with_daily_limit(2)
                .describe(),
            "On Monday, Friday (max 2 per day)"
        );
    }
}
