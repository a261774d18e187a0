//! Interval schedules and start-time calculation.
//!
//! A pipeline schedule is expressed the way users enter it: a local start
//! date and time in an IANA time zone, plus an interval count and unit. This
//! module turns those fields into a UTC start instant and computes the
//! occurrences `start, start + interval, start + 2 * interval, ...`.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::{IntervalScheduleId, PipelineId, ScheduleId, TriggerId};

/// Errors that can occur when validating or evaluating schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Interval must be a positive integer.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Unknown interval unit.
    #[error("invalid interval unit: {0}")]
    InvalidUnit(String),

    /// The local start time falls into a daylight-saving gap.
    #[error("local time {time} does not exist in {timezone}")]
    NonexistentLocalTime { time: String, timezone: String },
}

/// Unit of a schedule interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl IntervalUnit {
    /// Identifier used in storage and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Days => "days",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Seconds => "seconds",
        }
    }

    /// Length of `every` units.
    pub fn duration(&self, every: u32) -> Duration {
        let every = i64::from(every);
        match self {
            IntervalUnit::Days => Duration::days(every),
            IntervalUnit::Hours => Duration::hours(every),
            IntervalUnit::Minutes => Duration::minutes(every),
            IntervalUnit::Seconds => Duration::seconds(every),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalUnit {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "days" => Ok(IntervalUnit::Days),
            "hours" => Ok(IntervalUnit::Hours),
            "minutes" => Ok(IntervalUnit::Minutes),
            "seconds" => Ok(IntervalUnit::Seconds),
            _ => Err(ScheduleError::InvalidUnit(s.to_string())),
        }
    }
}

/// A reusable `(every, period)` pair referenced by periodic triggers.
///
/// Storage keeps at most one row per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    pub id: IntervalScheduleId,
    pub every: u32,
    pub period: IntervalUnit,
}

impl IntervalSchedule {
    /// Length of one interval.
    pub fn duration(&self) -> Duration {
        self.period.duration(self.every)
    }

    /// Next occurrence of a trigger starting at `start` strictly after `after`.
    pub fn next_after(&self, start: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_occurrence(start, self.duration(), after)
    }
}

/// Periodic task record consumed by a scheduler.
///
/// One trigger exists per scheduled pipeline. It fires the registered task
/// with the pipeline id at `start_time` and every interval after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTrigger {
    pub id: TriggerId,
    /// Unique name, `pipeline-{id}`.
    pub name: String,
    /// Registered task to invoke.
    pub task: String,
    pub pipeline_id: PipelineId,
    pub interval: IntervalSchedule,
    pub start_time: DateTime<Utc>,
    pub enabled: bool,
    /// When a scheduler last fired this trigger.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl PeriodicTrigger {
    /// Next time this trigger is due strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval.next_after(self.start_time, after)
    }

    /// Whether an occurrence falls in `(since, now]`.
    pub fn is_due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_after(since).is_some_and(|next| next <= now)
    }
}

/// The schedule attached to a pipeline, as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSchedule {
    pub id: ScheduleId,
    pub pipeline_id: PipelineId,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    /// IANA time zone name the start date/time is interpreted in.
    pub time_zone: String,
    pub interval: u32,
    pub unit: IntervalUnit,
    /// Whether the periodic trigger is enabled.
    pub published: bool,
    /// Trigger created for this schedule.
    pub trigger_id: Option<TriggerId>,
}

impl PipelineSchedule {
    /// Start instant in UTC.
    pub fn start(&self) -> Result<DateTime<Utc>, ScheduleError> {
        combine_start(self.start_date, self.start_time, &self.time_zone)
    }
}

/// Fields needed to create or update a pipeline's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDraft {
    pub pipeline_id: PipelineId,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub time_zone: String,
    pub interval: u32,
    pub unit: IntervalUnit,
    pub published: bool,
}

impl ScheduleDraft {
    /// Create a published schedule draft in UTC.
    pub fn new(
        pipeline_id: PipelineId,
        start_date: NaiveDate,
        start_time: NaiveTime,
        interval: u32,
        unit: IntervalUnit,
    ) -> Self {
        Self {
            pipeline_id,
            start_date,
            start_time,
            time_zone: "UTC".to_string(),
            interval,
            unit,
            published: true,
        }
    }

    /// Set the time zone.
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    /// Set the published flag.
    pub fn with_published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Check the interval and compute the UTC start instant.
    pub fn validate(&self) -> Result<DateTime<Utc>, ScheduleError> {
        if self.interval == 0 {
            return Err(ScheduleError::InvalidInterval(
                "interval must be greater than zero".into(),
            ));
        }
        combine_start(self.start_date, self.start_time, &self.time_zone)
    }
}

/// Interpret a local date and time in the named time zone.
///
/// Ambiguous times (clocks turned back) resolve to the earlier instant;
/// times inside a daylight-saving gap are rejected.
pub fn combine_start(
    date: NaiveDate,
    time: NaiveTime,
    time_zone: &str,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz: Tz = time_zone
        .parse()
        .map_err(|_| ScheduleError::InvalidTimezone(time_zone.to_string()))?;

    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NonexistentLocalTime {
            time: naive.to_string(),
            timezone: time_zone.to_string(),
        })
}

/// Next occurrence of `start + k * interval` strictly after `after`.
///
/// The first occurrence is `start` itself. Returns `None` when the interval is
/// not positive.
pub fn next_occurrence(
    start: DateTime<Utc>,
    interval: Duration,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step_ms = interval.num_milliseconds();
    if step_ms <= 0 {
        return None;
    }
    if after < start {
        return Some(start);
    }

    let elapsed_ms = (after - start).num_milliseconds();
    let k = elapsed_ms / step_ms + 1;
    Some(start + Duration::milliseconds(k * step_ms))
}
