use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use super::{resolve_local, RepeatCycle, RepeatTracker};
use crate::condition::ConditionContext;

/// Static description of a recurring local wall-clock window.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindowSchedule {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub repeat_cycle: RepeatCycle,
    pub repeat_interval: u32,
    pub use_randomization: bool,
    /// Maximum shift of each window edge, in minutes.
    pub randomize_minutes: u32,
    pub zone: Tz,
}

impl TimeWindowSchedule {
    /// Sentinel meaning "no lower date bound".
    pub fn unlimited_start_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Sentinel meaning "no upper date bound".
    pub fn unlimited_end_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2100, 12, 31).unwrap_or(NaiveDate::MAX)
    }

    pub fn daily(start_time: NaiveTime, end_time: NaiveTime, zone: Tz) -> Self {
        Self {
            start_time,
            end_time,
            start_date: Self::unlimited_start_date(),
            end_date: Self::unlimited_end_date(),
            repeat_cycle: RepeatCycle::Days,
            repeat_interval: 1,
            use_randomization: false,
            randomize_minutes: 0,
            zone,
        }
    }

    pub fn with_dates(mut self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn with_cycle(mut self, repeat_cycle: RepeatCycle, repeat_interval: u32) -> Self {
        self.repeat_cycle = repeat_cycle;
        self.repeat_interval = repeat_interval;
        self
    }

    pub fn with_randomization(mut self, randomize_minutes: u32) -> Self {
        self.use_randomization = randomize_minutes > 0;
        self.randomize_minutes = randomize_minutes;
        self
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_time <= self.start_time
    }

    pub fn has_unlimited_dates(&self) -> bool {
        self.start_date == Self::unlimited_start_date() && self.end_date == Self::unlimited_end_date()
    }

    fn normalized(mut self) -> Self {
        self.repeat_interval = self.repeat_interval.max(1);
        if self.end_date < self.start_date {
            std::mem::swap(&mut self.start_date, &mut self.end_date);
        }
        self
    }

    /// The day's full window, as instants. Crosses into the next day when
    /// the end time is not after the start time.
    fn outer_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = resolve_local(self.zone, date.and_time(self.start_time));
        let end_date = if self.crosses_midnight() {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        let end = resolve_local(self.zone, end_date.and_time(self.end_time));
        (start, end)
    }

    fn is_active_day(&self, date: NaiveDate) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        let days = (date - self.start_date).num_days();
        let n = i64::from(self.repeat_interval.max(1));
        match self.repeat_cycle {
            RepeatCycle::Days => days % n == 0,
            RepeatCycle::Weeks => days % (7 * n) == 0,
            RepeatCycle::OneTime | RepeatCycle::Minutes | RepeatCycle::Hours => true,
        }
    }

    fn search_span_days(&self) -> i64 {
        let n = i64::from(self.repeat_interval.max(1));
        match self.repeat_cycle {
            RepeatCycle::Days => n + 1,
            RepeatCycle::Weeks => 7 * n + 1,
            RepeatCycle::OneTime | RepeatCycle::Minutes | RepeatCycle::Hours => 2,
        }
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.zone).date_naive()
    }
}

impl Default for TimeWindowSchedule {
    fn default() -> Self {
        Self::daily(NaiveTime::MIN, NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN), Tz::UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    day: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Satisfied while the current instant is inside the active window.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindowCondition {
    schedule: TimeWindowSchedule,
    repeats: RepeatTracker,
    window: Option<Window>,
    satisfied: bool,
}

impl TimeWindowCondition {
    pub fn new(schedule: TimeWindowSchedule, ctx: &ConditionContext<'_>) -> Self {
        let schedule = schedule.normalized();
        let max_repeats = if schedule.repeat_cycle == RepeatCycle::OneTime {
            1
        } else {
            0
        };
        let mut condition = Self {
            schedule,
            repeats: RepeatTracker::new(max_repeats),
            window: None,
            satisfied: false,
        };
        condition.window = condition
            .first_window_from(ctx.now(), ctx.now())
            .map(|window| condition.randomize(window, ctx));
        condition
    }

    pub fn with_max_repeats(mut self, max_repeats: u32) -> Self {
        self.repeats.set_max_repeats(max_repeats);
        self
    }

    pub fn schedule(&self) -> &TimeWindowSchedule {
        &self.schedule
    }

    pub fn repeats(&self) -> &RepeatTracker {
        &self.repeats
    }

    pub fn satisfied(&self) -> bool {
        self.satisfied
    }

    /// Bounds of the window currently being waited on or inside.
    pub fn current_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.window.map(|window| (window.start, window.end))
    }

    pub fn next_trigger_time(&self) -> Option<DateTime<Utc>> {
        if self.repeats.can_trigger_again() {
            self.window.map(|window| window.start)
        } else {
            None
        }
    }

    pub fn is_satisfied(&mut self, ctx: &ConditionContext<'_>) -> bool {
        if self.satisfied {
            return true;
        }
        if self.repeats.is_paused() || !self.repeats.can_trigger_again() {
            return false;
        }
        let now = ctx.now();
        if let Some(window) = self.window {
            if now >= window.end {
                // Missed without being observed: move on to the next open window.
                self.window = self
                    .first_window_from(now, now)
                    .map(|window| self.randomize(window, ctx));
            }
        }
        if let Some(window) = self.window {
            if window.start <= now && now < window.end {
                self.satisfied = true;
            }
        }
        self.satisfied
    }

    pub fn progress(&self) -> f64 {
        if self.satisfied {
            100.0
        } else {
            0.0
        }
    }

    pub fn reset(&mut self, randomize: bool, ctx: &ConditionContext<'_>) {
        let now = ctx.now();
        let next = if self.satisfied {
            self.repeats.record_valid_reset();
            self.satisfied = false;
            if self.repeats.can_trigger_again() {
                self.next_window_after_valid(now)
            } else {
                None
            }
        } else {
            self.first_window_from(now, now)
        };
        self.window = match next {
            Some(window) if randomize => Some(self.randomize(window, ctx)),
            other => other,
        };
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.repeats.pause(now);
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.repeats.resume(now);
    }

    pub fn describe(&self) -> String {
        let schedule = &self.schedule;
        let mut description = format!(
            "Time Window: {} to {}",
            schedule.start_time.format("%H:%M"),
            schedule.end_time.format("%H:%M")
        );
        let n = schedule.repeat_interval;
        match schedule.repeat_cycle {
            RepeatCycle::OneTime => description.push_str(" (one time)"),
            RepeatCycle::Days if n == 1 => {}
            cycle => description.push_str(&format!(
                " every {} {}{}",
                n,
                cycle.unit_name(),
                if n == 1 { "" } else { "s" }
            )),
        }
        if schedule.use_randomization && schedule.randomize_minutes > 0 {
            description.push_str(&format!(" ±{}m", schedule.randomize_minutes));
        }
        if schedule.zone != Tz::UTC {
            description.push_str(&format!(" ({})", schedule.zone.name()));
        }
        description
    }

    /// First active day's window, starting the search at `from`'s local
    /// date (minus one for windows spilling over midnight), whose end lies
    /// after `now`.
    fn first_window_from(&self, from: DateTime<Utc>, now: DateTime<Utc>) -> Option<Window> {
        let first_day = (self.schedule.local_date(from) - Duration::days(1)).max(self.schedule.start_date);
        self.search_from_day(first_day, now)
    }

    fn search_from_day(&self, first_day: NaiveDate, now: DateTime<Utc>) -> Option<Window> {
        let span = self.schedule.search_span_days() + 1;
        let mut day = first_day;
        for _ in 0..=span {
            if day > self.schedule.end_date {
                return None;
            }
            if self.schedule.is_active_day(day) {
                let (start, end) = self.schedule.outer_window(day);
                if end > now {
                    return Some(Window { day, start, end });
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    fn next_window_after_valid(&self, now: DateTime<Utc>) -> Option<Window> {
        let current = self.window?;
        match self.schedule.repeat_cycle {
            RepeatCycle::OneTime => None,
            RepeatCycle::Days | RepeatCycle::Weeks => {
                self.search_from_day(current.day.succ_opt()?, now)
            }
            cycle @ (RepeatCycle::Minutes | RepeatCycle::Hours) => {
                let step = cycle.step(self.schedule.repeat_interval)?;
                let candidate = now.checked_add_signed(step)?;
                let (_, outer_end) = self.schedule.outer_window(current.day);
                if candidate < outer_end {
                    Some(Window {
                        day: current.day,
                        start: candidate,
                        end: outer_end,
                    })
                } else {
                    self.search_from_day(current.day.succ_opt()?, candidate)
                }
            }
        }
    }

    /// Shifts each edge independently by up to the configured minutes,
    /// capped at a quarter of the window so it never collapses.
    fn randomize(&self, window: Window, ctx: &ConditionContext<'_>) -> Window {
        if !self.schedule.use_randomization || self.schedule.randomize_minutes == 0 {
            return window;
        }
        let length_minutes = (window.end - window.start).num_minutes();
        let cap = i64::from(self.schedule.randomize_minutes).min(length_minutes / 4);
        if cap <= 0 {
            return window;
        }
        Window {
            day: window.day,
            start: window.start + Duration::minutes(ctx.roll(-cap, cap)),
            end: window.end + Duration::minutes(ctx.roll(-cap, cap)),
        }
    }
}
