//! Pure scheduling math: turns a step's timing declaration into a concrete
//! UTC send instant, honoring business hours, holidays, and rate-window
//! jitter.
//!
//! Nothing here touches the database; the sweeper and processor pass in
//! whatever window counts they already queried.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use entity::{business_hours, sequence_step};
use std::str::FromStr;

pub const MAX_EMAILS_PER_MINUTE: i64 = 50;
pub const MAX_EMAILS_PER_HOUR: i64 = 1000;
pub const DISTRIBUTION_WINDOW_MINUTES: i64 = 15;
const MAX_BUSINESS_DAY_ADVANCES: u32 = 14;
const MAX_RATE_RETRIES: u32 = 5;
const DEMO_MAX_DELAY_MINUTES: i64 = 8 * 60;
const DEFAULT_DELAY_MINUTES: i64 = 30;

/// Injectable source of randomness so scheduler tests are deterministic.
/// `next_minute(bound)` returns a uniform integer in `[0, bound)`.
pub trait ScheduleRng {
    fn next_minute(&mut self, bound: i64) -> i64;
}

/// Thin wrapper over `rand::rngs::StdRng` for production use.
pub struct StdScheduleRng(rand::rngs::StdRng);

impl StdScheduleRng {
    pub fn from_entropy() -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::StdRng::from_entropy())
    }

    pub fn from_seed(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(rand::rngs::StdRng::seed_from_u64(seed))
    }
}

impl ScheduleRng for StdScheduleRng {
    fn next_minute(&mut self, bound: i64) -> i64 {
        use rand::Rng;
        if bound <= 0 {
            return 0;
        }
        self.0.gen_range(0..bound)
    }
}

/// Effective business hours for a (sequence, contact) scheduling decision —
/// already resolved from sequence-level override vs. user-level default.
#[derive(Debug, Clone)]
pub struct BusinessHoursWindow {
    pub timezone: Tz,
    /// Bitmask over Mon=0..Sun=6.
    pub work_days: i32,
    /// Minutes since midnight, wall clock in `timezone`.
    pub work_hours_start: i32,
    pub work_hours_end: i32,
    pub holidays: Vec<NaiveDate>,
}

impl BusinessHoursWindow {
    pub fn from_model(
        model: &business_hours::Model,
        holidays: Vec<NaiveDate>,
    ) -> anyhow::Result<Self> {
        let timezone = Tz::from_str(&model.timezone)
            .map_err(|_| anyhow::anyhow!("unknown timezone: {}", model.timezone))?;
        Ok(BusinessHoursWindow {
            timezone,
            work_days: model.work_days,
            work_hours_start: model.work_hours_start,
            work_hours_end: model.work_hours_end,
            holidays,
        })
    }

    fn is_work_day(&self, weekday: chrono::Weekday) -> bool {
        let bit = weekday.num_days_from_monday();
        self.work_days & (1 << bit) != 0
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// True when `local` falls on a work day, inside the work-hours window,
    /// and is not a holiday.
    fn is_within_hours(&self, local: DateTime<Tz>) -> bool {
        if self.is_holiday(local.date_naive()) || !self.is_work_day(local.weekday()) {
            return false;
        }
        let minute_of_day = local.hour() as i32 * 60 + local.minute() as i32;
        minute_of_day >= self.work_hours_start && minute_of_day < self.work_hours_end
    }

    /// Next valid business-day start (at `work_hours_start`) at or after `local`.
    fn next_business_start(&self, local: DateTime<Tz>) -> DateTime<Tz> {
        let mut day = local.date_naive();
        for _ in 0..(MAX_BUSINESS_DAY_ADVANCES + 1) {
            if self.is_work_day(day.weekday()) && !self.is_holiday(day) {
                if let Some(candidate) = self.at_minute_of_day(day, self.work_hours_start) {
                    if candidate >= local || day != local.date_naive() {
                        return candidate;
                    }
                }
            }
            day = day.succ_opt().unwrap_or(day);
        }
        local
    }

    fn at_minute_of_day(&self, day: NaiveDate, minute: i32) -> Option<DateTime<Tz>> {
        let naive = day.and_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)?;
        match self.timezone.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => Some(dt),
            chrono::LocalResult::Ambiguous(dt, _) => Some(dt),
            chrono::LocalResult::None => None,
        }
    }
}

/// Counts the scheduler needs to apply the rate-window jitter in step 6.
/// The caller (sweeper/processor) supplies these from a single query against
/// `sequence_contact.next_scheduled_at`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowCounts {
    pub same_minute: i64,
    pub same_hour: i64,
}

fn base_delay_minutes(step: &sequence_step::Model, demo_mode: bool) -> i64 {
    let minutes = match step.step_type {
        sequence_step::StepType::Wait => match (step.delay_amount, step.delay_unit) {
            (Some(amount), Some(unit)) => to_minutes(amount, unit),
            _ => DEFAULT_DELAY_MINUTES,
        },
        sequence_step::StepType::AutomatedEmail | sequence_step::StepType::ManualEmail => {
            match step.timing {
                sequence_step::StepTiming::Immediate => 0,
                sequence_step::StepTiming::Delay => match step.delay_amount {
                    Some(amount) => {
                        to_minutes(amount, step.delay_unit.unwrap_or(sequence_step::DelayUnit::Minutes))
                    }
                    None => DEFAULT_DELAY_MINUTES,
                },
            }
        }
    };

    if demo_mode {
        minutes.min(DEMO_MAX_DELAY_MINUTES)
    } else {
        minutes
    }
}

fn to_minutes(amount: i32, unit: sequence_step::DelayUnit) -> i64 {
    let amount = amount as i64;
    match unit {
        sequence_step::DelayUnit::Minutes => amount,
        sequence_step::DelayUnit::Hours => amount * 60,
        sequence_step::DelayUnit::Days => amount * 60 * 24,
    }
}

/// Produce the next eligible send instant.
///
/// On any internal failure (e.g. an unparseable timezone slipping through),
/// falls back to `now + 1h` per the spec's stated failure semantics.
pub fn compute_next_send(
    now: DateTime<Utc>,
    step: &sequence_step::Model,
    business_hours: Option<&BusinessHoursWindow>,
    demo_mode: bool,
    window_counts: WindowCounts,
    rng: &mut dyn ScheduleRng,
) -> DateTime<Utc> {
    match try_compute_next_send(now, step, business_hours, demo_mode, window_counts, rng) {
        Ok(when) => when,
        Err(e) => {
            tracing::error!("scheduler failed, falling back to now+1h: {:?}", e);
            now + ChronoDuration::hours(1)
        }
    }
}

fn try_compute_next_send(
    now: DateTime<Utc>,
    step: &sequence_step::Model,
    business_hours: Option<&BusinessHoursWindow>,
    demo_mode: bool,
    window_counts: WindowCounts,
    rng: &mut dyn ScheduleRng,
) -> anyhow::Result<DateTime<Utc>> {
    let base_minutes = base_delay_minutes(step, demo_mode);
    let mut target = now + ChronoDuration::minutes(base_minutes);

    let Some(hours) = business_hours else {
        return Ok(target);
    };
    if demo_mode {
        return Ok(target);
    }

    let mut local = target.with_timezone(&hours.timezone);
    local = advance_into_business_hours(hours, local, rng)?;

    for _ in 0..MAX_RATE_RETRIES {
        let utc_candidate = local.with_timezone(&Utc);
        let (over_minute, over_hour) = rate_window_exceeded(utc_candidate, window_counts);
        if !over_minute && !over_hour {
            target = utc_candidate;
            return Ok(target);
        }

        if over_hour {
            let next_hour = local.date_naive().and_hms_opt(
                ((local.hour() + 1) % 24) as u32,
                0,
                0,
            );
            if let Some(naive) = next_hour {
                local = match hours.timezone.from_local_datetime(&naive) {
                    chrono::LocalResult::Single(dt) => dt,
                    chrono::LocalResult::Ambiguous(dt, _) => dt,
                    chrono::LocalResult::None => local + ChronoDuration::hours(1),
                };
            } else {
                local += ChronoDuration::hours(1);
            }
            let jitter = rng.next_minute(60);
            local += ChronoDuration::minutes(jitter);
        } else {
            let jitter = rng.next_minute(DISTRIBUTION_WINDOW_MINUTES);
            local += ChronoDuration::minutes(jitter);
        }

        local = advance_into_business_hours(hours, local, rng)?;
    }

    Ok(local.with_timezone(&Utc))
}

fn advance_into_business_hours(
    hours: &BusinessHoursWindow,
    mut local: DateTime<Tz>,
    rng: &mut dyn ScheduleRng,
) -> anyhow::Result<DateTime<Tz>> {
    for _ in 0..=MAX_BUSINESS_DAY_ADVANCES {
        if hours.is_within_hours(local) {
            return Ok(local);
        }
        let start = hours.next_business_start(local);
        let window = (hours.work_hours_end - hours.work_hours_start).max(1) as i64;
        let offset = rng.next_minute(window);
        local = start + ChronoDuration::minutes(offset);
        if hours.is_within_hours(local) {
            return Ok(local);
        }
        local = hours.next_business_start(local + ChronoDuration::days(1));
    }
    Ok(local)
}

fn rate_window_exceeded(candidate_utc: DateTime<Utc>, counts: WindowCounts) -> (bool, bool) {
    let _ = candidate_utc;
    (
        counts.same_minute >= MAX_EMAILS_PER_MINUTE,
        counts.same_hour >= MAX_EMAILS_PER_HOUR,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedRng(i64);
    impl ScheduleRng for FixedRng {
        fn next_minute(&mut self, bound: i64) -> i64 {
            if bound <= 0 {
                0
            } else {
                self.0 % bound
            }
        }
    }

    fn immediate_step() -> sequence_step::Model {
        sequence_step::Model {
            id: 1,
            sequence_id: 1,
            order: 0,
            step_type: sequence_step::StepType::ManualEmail,
            timing: sequence_step::StepTiming::Immediate,
            delay_amount: None,
            delay_unit: None,
            subject: Some("Hello".into()),
            html_content: Some("<p>Hi</p>".into()),
            reply_to_thread: false,
            previous_step_id: None,
        }
    }

    fn delay_step(amount: i32, unit: sequence_step::DelayUnit) -> sequence_step::Model {
        sequence_step::Model {
            id: 2,
            sequence_id: 1,
            order: 1,
            step_type: sequence_step::StepType::AutomatedEmail,
            timing: sequence_step::StepTiming::Delay,
            delay_amount: Some(amount),
            delay_unit: Some(unit),
            subject: Some("Follow up".into()),
            html_content: Some("<p>...</p>".into()),
            reply_to_thread: true,
            previous_step_id: Some(1),
        }
    }

    fn business_hours_9_to_5() -> BusinessHoursWindow {
        BusinessHoursWindow {
            timezone: Tz::UTC,
            work_days: 0b0011111, // Mon-Fri
            work_hours_start: 9 * 60,
            work_hours_end: 17 * 60,
            holidays: vec![],
        }
    }

    #[test]
    fn s1_immediate_step_no_business_hours_sends_now() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let step = immediate_step();
        let mut rng = FixedRng(0);
        let when = compute_next_send(now, &step, None, false, WindowCounts::default(), &mut rng);
        assert_eq!(when, now);
    }

    #[test]
    fn s2_two_day_delay_lands_within_business_hours() {
        // Monday 16:30 UTC + 2 days = Wednesday 16:30 UTC, outside 09:00-17:00? it's inside.
        // Use a later launch time so the +2 day target falls after hours.
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 20, 0, 0).unwrap(); // Monday 20:00
        let step = delay_step(2, sequence_step::DelayUnit::Days);
        let hours = business_hours_9_to_5();
        let mut rng = FixedRng(5);
        let when = compute_next_send(now, &step, Some(&hours), false, WindowCounts::default(), &mut rng);
        assert_eq!(when.weekday(), chrono::Weekday::Wed);
        let minute_of_day = when.hour() * 60 + when.minute();
        assert!(minute_of_day >= 9 * 60 && minute_of_day < 17 * 60);
    }

    #[test]
    fn s3_weekend_spillover_lands_on_monday() {
        // Friday 16:30 UTC + 1 hour = Friday 17:30, outside hours -> next business day is Monday.
        let now = Utc.with_ymd_and_hms(2024, 6, 7, 16, 30, 0).unwrap(); // Friday
        let step = delay_step(1, sequence_step::DelayUnit::Hours);
        let hours = business_hours_9_to_5();
        let mut rng = FixedRng(3);
        let when = compute_next_send(now, &step, Some(&hours), false, WindowCounts::default(), &mut rng);
        assert_eq!(when.weekday(), chrono::Weekday::Mon);
        let minute_of_day = when.hour() * 60 + when.minute();
        assert!(minute_of_day >= 9 * 60 && minute_of_day < 17 * 60);
    }

    #[test]
    fn demo_mode_skips_business_hours_and_caps_delay() {
        let now = Utc.with_ymd_and_hms(2024, 6, 7, 16, 30, 0).unwrap();
        let step = delay_step(30, sequence_step::DelayUnit::Days);
        let hours = business_hours_9_to_5();
        let mut rng = FixedRng(0);
        let when = compute_next_send(now, &step, Some(&hours), true, WindowCounts::default(), &mut rng);
        assert_eq!(when, now + ChronoDuration::minutes(DEMO_MAX_DELAY_MINUTES));
    }

    #[test]
    fn hour_over_cap_advances_to_next_hour() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let step = immediate_step();
        let hours = business_hours_9_to_5();
        let counts = WindowCounts {
            same_minute: 0,
            same_hour: MAX_EMAILS_PER_HOUR,
        };
        let mut rng = FixedRng(10);
        let when = compute_next_send(now, &step, Some(&hours), false, counts, &mut rng);
        assert!(when > now);
    }

    #[test]
    fn missing_delay_fields_default_to_thirty_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let mut step = delay_step(0, sequence_step::DelayUnit::Minutes);
        step.delay_amount = None;
        step.delay_unit = None;
        let mut rng = FixedRng(0);
        let when = compute_next_send(now, &step, None, false, WindowCounts::default(), &mut rng);
        assert_eq!(when, now + ChronoDuration::minutes(DEFAULT_DELAY_MINUTES));
    }
}
