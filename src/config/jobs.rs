//! Retention job configuration.
//!
//! # Example
//!
//! ```toml
//! [jobs.archiver]
//! enabled = true
//! hot_retention = { months = 3 }
//! bucket_strategy = "message_month"
//!
//! [jobs.archiver.schedule]
//! every = "week"
//! weekday = "sunday"
//! hour = 3
//!
//! [jobs.archiver.safety]
//! dry_run = false
//! max_concurrency = 4
//!
//! [jobs.pruner]
//! cold_retention = { years = 1 }
//! ```

use chrono::{DateTime, Days, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::{ConfigError, DayOfWeek, Schedule};

/// Configuration for both retention jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    #[serde(default)]
    pub archiver: ArchiverJobConfig,

    #[serde(default)]
    pub pruner: PrunerJobConfig,
}

impl JobsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.archiver.schedule.validate()?;
        self.archiver.safety.validate("jobs.archiver")?;
        if self.archiver.hot_retention.is_zero() {
            return Err(ConfigError::Validation(
                "jobs.archiver.hot_retention must be greater than zero".into(),
            ));
        }

        self.pruner.schedule.validate()?;
        self.pruner.safety.validate("jobs.pruner")?;
        if self.pruner.cold_retention.is_zero() {
            return Err(ConfigError::Validation(
                "jobs.pruner.cold_retention must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Archiver job: moves old messages from the record store to cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ArchiverJobConfig {
    /// Whether the scheduler runs the archiver.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When to run. Default: every Sunday at 03:00 UTC.
    #[serde(default = "default_archiver_schedule")]
    pub schedule: Schedule,

    /// Messages older than this are archived.
    /// Default: 3 months
    #[serde(default = "default_hot_retention")]
    pub hot_retention: RetentionPeriod,

    /// How archived messages are grouped into blobs.
    #[serde(default)]
    pub bucket_strategy: BucketStrategy,

    /// Read each blob back and compare its SHA-256 before deleting records.
    /// Default: true
    #[serde(default = "default_true")]
    pub verify_writes: bool,

    #[serde(default)]
    pub safety: JobSafety,
}

impl Default for ArchiverJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_archiver_schedule(),
            hot_retention: default_hot_retention(),
            bucket_strategy: BucketStrategy::default(),
            verify_writes: true,
            safety: JobSafety::default(),
        }
    }
}

fn default_archiver_schedule() -> Schedule {
    Schedule::weekly(DayOfWeek::Sunday, 3, 0)
}

fn default_hot_retention() -> RetentionPeriod {
    RetentionPeriod::months(3)
}

/// Pruner job: expires archive blobs from cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PrunerJobConfig {
    /// Whether the scheduler runs the pruner.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When to run. Default: the 1st of every month at 04:00 UTC.
    #[serde(default = "default_pruner_schedule")]
    pub schedule: Schedule,

    /// Blobs created longer ago than this are deleted.
    /// Default: 1 year
    #[serde(default = "default_cold_retention")]
    pub cold_retention: RetentionPeriod,

    #[serde(default)]
    pub safety: JobSafety,
}

impl Default for PrunerJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_pruner_schedule(),
            cold_retention: default_cold_retention(),
            safety: JobSafety::default(),
        }
    }
}

fn default_pruner_schedule() -> Schedule {
    Schedule::monthly(1, 4, 0)
}

fn default_cold_retention() -> RetentionPeriod {
    RetentionPeriod::years(1)
}

/// A calendar-aware retention age.
///
/// Months and years follow the calendar (three months before May 31 is
/// February 29 or 28), so they are not fixed-length durations. `hours`
/// allows periods shorter than a day and is subtracted last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionPeriod {
    #[serde(default)]
    pub years: u32,
    #[serde(default)]
    pub months: u32,
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
}

impl RetentionPeriod {
    pub fn years(years: u32) -> Self {
        Self {
            years,
            ..Self::default()
        }
    }

    pub fn months(months: u32) -> Self {
        Self {
            months,
            ..Self::default()
        }
    }

    pub fn days(days: u32) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    pub fn hours(hours: u32) -> Self {
        Self {
            hours,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0 && self.hours == 0
    }

    /// `now` minus this period, or `None` if that underflows the calendar.
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let total_months = self.years.checked_mul(12)?.checked_add(self.months)?;
        now.checked_sub_months(Months::new(total_months))?
            .checked_sub_days(Days::new(self.days.into()))?
            .checked_sub_signed(TimeDelta::hours(self.hours.into()))
    }
}

impl std::fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.years > 0 {
            parts.push(format!("{}y", self.years));
        }
        if self.months > 0 {
            parts.push(format!("{}mo", self.months));
        }
        if self.days > 0 {
            parts.push(format!("{}d", self.days));
        }
        if self.hours > 0 {
            parts.push(format!("{}h", self.hours));
        }
        if parts.is_empty() {
            parts.push("0d".to_string());
        }
        f.write_str(&parts.join(""))
    }
}

/// How the archiver assigns messages to year-month buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum BucketStrategy {
    /// Each message goes into the bucket of its own timestamp; one run may
    /// write several blobs per conversation.
    #[default]
    MessageMonth,

    /// Every message archived in a run goes into the month of the run's
    /// retention threshold.
    RunMonth,
}

/// Safety and throughput settings shared by both jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct JobSafety {
    /// If true, log what would be archived or deleted without changing
    /// anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Conversations (archiver) or objects (pruner) processed concurrently.
    /// Default: 4
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for each individual store call, in seconds.
    /// Default: 30
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// Items requested per page when enumerating a store.
    /// Default: 100
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// How long a lease stays valid if its holder never releases it, in seconds.
    /// Default: 900
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for JobSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrency: default_max_concurrency(),
            store_timeout_secs: default_store_timeout_secs(),
            page_size: default_page_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl JobSafety {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Validation(format!(
                "{section}.safety.max_concurrency must be at least 1"
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Validation(format!(
                "{section}.safety.page_size must be at least 1"
            )));
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "{section}.safety.store_timeout_secs must be at least 1"
            )));
        }
        if self.lease_ttl_secs < self.store_timeout_secs {
            return Err(ConfigError::Validation(format!(
                "{section}.safety.lease_ttl_secs must not be shorter than store_timeout_secs"
            )));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.store_timeout_secs)
    }

    pub fn lease_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_ttl_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    4
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

fn default_lease_ttl_secs() -> u64 {
    900
}
