//! In-process scheduling for the retention jobs.
//!
//! Each worker sleeps until its schedule's next fire time, runs one pass and
//! repeats. Workers run until their task is cancelled.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use super::{ArchiveError, Archiver, PruneError, Pruner};
use crate::config::Schedule;

/// Starts the archiver as a background task.
pub async fn start_archival_worker(archiver: Arc<Archiver>) {
    let config = archiver.config().clone();
    if !config.enabled {
        tracing::info!("Archiver worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        schedule = ?config.schedule,
        hot_retention = %config.hot_retention,
        bucket_strategy = ?config.bucket_strategy,
        dry_run = config.safety.dry_run,
        "Starting archiver worker{}",
        dry_run_msg
    );

    while sleep_until_next_run("archiver", &config.schedule).await {
        match archiver.run_archival(Utc::now(), config.hot_retention).await {
            Ok(report) => {
                if report.has_changes() || report.conversations_failed > 0 {
                    tracing::info!(
                        archived = report.archived,
                        deleted = report.deleted,
                        blobs_written = report.blobs_written,
                        skipped_malformed = report.skipped_malformed,
                        skipped_locked = report.skipped_locked,
                        conversations_failed = report.conversations_failed,
                        duration_ms = report.duration_ms,
                        "Archival run complete{}",
                        dry_run_msg
                    );
                } else {
                    tracing::debug!("Archival run complete, nothing to archive");
                }
            }
            Err(ArchiveError::AllConversationsFailed(report)) => {
                tracing::error!(
                    conversations_failed = report.conversations_failed,
                    "Archival run failed for every conversation"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running archival");
            }
        }
    }
}

/// Starts the pruner as a background task.
pub async fn start_pruning_worker(pruner: Arc<Pruner>) {
    let config = pruner.config().clone();
    if !config.enabled {
        tracing::info!("Pruner worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        schedule = ?config.schedule,
        cold_retention = %config.cold_retention,
        dry_run = config.safety.dry_run,
        "Starting pruner worker{}",
        dry_run_msg
    );

    while sleep_until_next_run("pruner", &config.schedule).await {
        match pruner.run_pruning(Utc::now(), config.cold_retention).await {
            Ok(report) => {
                if report.expired > 0 {
                    tracing::info!(
                        scanned = report.scanned,
                        expired = report.expired,
                        deleted = report.deleted_count,
                        failed = report.failed,
                        duration_ms = report.duration_ms,
                        "Pruning run complete{}",
                        dry_run_msg
                    );
                } else {
                    tracing::debug!(scanned = report.scanned, "Pruning run complete, nothing expired");
                }
            }
            Err(PruneError::AlreadyRunning) => {
                tracing::warn!("Skipping pruning run, another instance holds the job lease");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running pruning");
            }
        }
    }
}

/// Sleep until the schedule next fires. Returns false if it never will.
async fn sleep_until_next_run(job: &str, schedule: &Schedule) -> bool {
    let now = Utc::now();
    let Some((next, wait)) = time_until_next_run(schedule, now) else {
        tracing::error!(job, schedule = ?schedule, "Schedule has no next run, stopping worker");
        return false;
    };

    tracing::debug!(job, next_run = %next, "Waiting for next scheduled run");
    tokio::time::sleep(wait).await;
    true
}

fn time_until_next_run(
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, Duration)> {
    let next = schedule.next_after(now)?;
    let wait = (next - now).to_std().unwrap_or_default();
    Some((next, wait))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::{ArchiverJobConfig, DayOfWeek, PrunerJobConfig};

    #[test]
    fn test_wait_until_weekly_run() {
        // Saturday 2024-08-31 03:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 8, 31, 3, 0, 0).unwrap();
        let schedule = Schedule::weekly(DayOfWeek::Sunday, 3, 0);

        let (next, wait) = time_until_next_run(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 9, 1, 3, 0, 0).unwrap());
        assert_eq!(wait, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_wait_until_monthly_run() {
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 4, 0, 0).unwrap();
        let (next, _) = time_until_next_run(&Schedule::monthly(1, 4, 0), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 10, 1, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_schedule_has_no_next_run() {
        let schedule = Schedule::weekly(DayOfWeek::Monday, 25, 0);
        assert!(time_until_next_run(&schedule, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_disabled_workers_return_immediately() {
        use crate::{
            archive::MemoryColdStore, leases::MemoryLeaseStore, records::MemoryRecordStore,
        };

        let cold = Arc::new(MemoryColdStore::new());
        let leases = Arc::new(MemoryLeaseStore::new());
        let archiver = Archiver::new(
            Arc::new(MemoryRecordStore::new()),
            cold.clone(),
            leases.clone(),
            "chat-archives",
            ArchiverJobConfig {
                enabled: false,
                ..ArchiverJobConfig::default()
            },
        );
        let pruner = Pruner::new(
            cold,
            leases,
            "chat-archives",
            PrunerJobConfig {
                enabled: false,
                ..PrunerJobConfig::default()
            },
        );

        start_archival_worker(Arc::new(archiver)).await;
        start_pruning_worker(Arc::new(pruner)).await;
    }
}
