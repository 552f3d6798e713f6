//! Monitoring-window evaluation
//!
//! Decides whether an instant falls inside the window during which metrics may be
//! collected. Evaluation is a pure function of the instant and [`MonitorModeConfig`];
//! the caller supplies the time zone (local time in production).

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

/// Monitoring mode pushed by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorMode {
    /// Always active
    #[default]
    Continuous,
    /// Active on given weekdays between two times of day
    Scheduled,
    /// Active until an end instant
    Countdown,
    /// Mode this agent does not know; evaluated as active
    #[serde(other)]
    Unknown,
}

/// Weekly schedule for [`MonitorMode::Scheduled`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Weekday codes, "1" = Monday .. "7" = Sunday; empty means every day
    #[serde(default, deserialize_with = "deserialize_days")]
    pub days: Vec<String>,

    /// "HH:MM", inclusive
    #[serde(default)]
    pub start_time: Option<String>,

    /// "HH:MM", inclusive
    #[serde(default)]
    pub end_time: Option<String>,
}

/// End instant for [`MonitorMode::Countdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    /// ISO-8601 timestamp; a trailing `Z` (or offset) compares in UTC, otherwise local time
    #[serde(default)]
    pub end_time: Option<String>,

    /// Informational duration in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Monitoring mode descriptor; replaced wholesale on update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorModeConfig {
    #[serde(default)]
    pub mode: MonitorMode,

    #[serde(default, deserialize_with = "null_as_default")]
    pub schedule: Schedule,

    #[serde(default, deserialize_with = "null_as_default")]
    pub countdown: Countdown,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_days<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Day {
        Text(String),
        Number(i64),
    }

    let days: Option<Vec<Day>> = Option::deserialize(deserializer)?;
    Ok(days
        .unwrap_or_default()
        .into_iter()
        .map(|d| match d {
            Day::Text(s) => s.trim().to_string(),
            Day::Number(n) => n.to_string(),
        })
        .collect())
}

/// Snapshot of the window state, embedded in heartbeats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatus {
    pub mode: MonitorMode,
    pub is_monitoring_time: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_weekday: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<Countdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
}

#[derive(Debug)]
struct WindowError(String);

impl MonitorModeConfig {
    /// Continuous monitoring
    pub fn continuous() -> Self {
        Self::default()
    }

    /// Whether metrics may be collected at `now`
    ///
    /// Configuration errors evaluate as active.
    pub fn is_active_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self.mode {
            MonitorMode::Continuous => true,
            MonitorMode::Scheduled => match self.schedule.contains(now) {
                Ok(active) => active,
                Err(WindowError(reason)) => {
                    warn!("Invalid monitoring schedule ({}), defaulting to active", reason);
                    true
                }
            },
            MonitorMode::Countdown => self
                .countdown
                .remaining_at(now)
                .is_some_and(|r| r > chrono::Duration::zero()),
            MonitorMode::Unknown => {
                warn!("Unknown monitoring mode, defaulting to active");
                true
            }
        }
    }

    /// Status snapshot at `now`
    pub fn status_at<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        last_update: Option<DateTime<Utc>>,
    ) -> WindowStatus {
        let mut status = WindowStatus {
            mode: self.mode,
            is_monitoring_time: self.is_active_at(now),
            last_update,
            schedule: None,
            current_weekday: None,
            current_time: None,
            countdown: None,
            remaining_seconds: None,
        };

        match self.mode {
            MonitorMode::Scheduled => {
                status.schedule = Some(self.schedule.clone());
                if !self.schedule.is_empty() {
                    status.current_weekday = Some(weekday_code(now));
                    status.current_time = Some(now.naive_local().format("%H:%M").to_string());
                }
            }
            MonitorMode::Countdown => {
                status.countdown = Some(self.countdown.clone());
                if self.countdown.end_time.is_some() {
                    status.remaining_seconds =
                        Some(self.countdown.remaining_at(now).map_or(0, |r| r.num_seconds().max(0)));
                }
            }
            _ => {}
        }

        status
    }
}

impl Schedule {
    /// Whether no restriction is configured
    pub fn is_empty(&self) -> bool {
        self.days.is_empty() && self.start_time.is_none() && self.end_time.is_none()
    }

    fn contains<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<bool, WindowError> {
        if self.is_empty() {
            return Ok(true);
        }

        let today = weekday_code(now);
        if !self.days.is_empty() && !self.days.contains(&today) {
            debug!(weekday = %today, days = ?self.days, "Outside scheduled days");
            return Ok(false);
        }

        let (Some(start), Some(end)) = (&self.start_time, &self.end_time) else {
            return Ok(true);
        };

        let start = parse_time_of_day(start)?;
        let end = parse_time_of_day(end)?;
        let local = now.naive_local().time();
        // Minute granularity, both ends inclusive
        let current = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
            .ok_or_else(|| WindowError("invalid current time".to_string()))?;

        Ok(start <= current && current <= end)
    }
}

impl Countdown {
    /// Time until the end instant (negative once passed); `None` when unset or unparsable
    fn remaining_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<chrono::Duration> {
        let raw = self.end_time.as_deref().map(str::trim).filter(|s| !s.is_empty())?;

        if let Ok(end) = DateTime::parse_from_rfc3339(raw) {
            return Some(end.with_timezone(&Utc) - now.with_timezone(&Utc));
        }

        match parse_local_datetime(raw) {
            Some(end) => Some(end - now.naive_local()),
            None => {
                warn!(end_time = %raw, "Unparsable countdown end time");
                None
            }
        }
    }
}

/// ISO weekday code, "1" = Monday
fn weekday_code<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    now.naive_local().weekday().number_from_monday().to_string()
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime, WindowError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(|t| NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t))
        .map_err(|e| WindowError(format!("bad time '{}': {}", raw, e)))
}

fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
