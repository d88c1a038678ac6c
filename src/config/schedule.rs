//! Calendar schedules for the retention jobs.
//!
//! ```toml
//! [jobs.archiver.schedule]
//! every = "week"
//! weekday = "sunday"
//! hour = 3
//!
//! [jobs.pruner.schedule]
//! every = "month"
//! day = 1
//! hour = 4
//! ```
//!
//! All times are UTC.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "every", rename_all = "snake_case", deny_unknown_fields)]
pub enum Schedule {
    /// Once a week on `weekday` at `hour:minute`.
    Week {
        #[serde(default)]
        weekday: DayOfWeek,
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },

    /// Once a month on `day` (1-28) at `hour:minute`.
    Month {
        #[serde(default = "default_day")]
        day: u32,
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
}

fn default_day() -> u32 {
    1
}

impl Schedule {
    pub fn weekly(weekday: DayOfWeek, hour: u32, minute: u32) -> Self {
        Schedule::Week {
            weekday,
            hour,
            minute,
        }
    }

    pub fn monthly(day: u32, hour: u32, minute: u32) -> Self {
        Schedule::Month { day, hour, minute }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (hour, minute) = match self {
            Schedule::Week { hour, minute, .. } => (*hour, *minute),
            Schedule::Month { day, hour, minute } => {
                // Days past 28 do not exist in every month.
                if !(1..=28).contains(day) {
                    return Err(ConfigError::Validation(format!(
                        "schedule day must be between 1 and 28, got {day}"
                    )));
                }
                (*hour, *minute)
            }
        };
        if hour > 23 || minute > 59 {
            return Err(ConfigError::Validation(format!(
                "invalid schedule time {hour:02}:{minute:02}"
            )));
        }
        Ok(())
    }

    /// The first fire time strictly after `now`.
    ///
    /// Returns `None` only for an invalid schedule.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Schedule::Week {
                weekday,
                hour,
                minute,
            } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                let target = weekday.to_chrono();
                let today = now.date_naive();
                let offset = (7 + target.num_days_from_monday()
                    - today.weekday().num_days_from_monday())
                    % 7;

                let mut date = today.checked_add_days(Days::new(offset.into()))?;
                if at(date, time) <= now {
                    date = date.checked_add_days(Days::new(7))?;
                }
                Some(at(date, time))
            }
            Schedule::Month { day, hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                let this_month = NaiveDate::from_ymd_opt(now.year(), now.month(), day)?;
                let date = if at(this_month, time) > now {
                    this_month
                } else {
                    this_month.checked_add_months(Months::new(1))?
                };
                Some(at(date, time))
            }
        }
    }
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    #[default]
    Sunday,
}

impl DayOfWeek {
    pub fn to_chrono(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }
}
