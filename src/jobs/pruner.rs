//! Pruner: expires archive blobs from cold storage.
//!
//! Each object is judged on its own creation time, and a failed delete is
//! counted without stopping the pass. A job-level lease keeps two pruning
//! passes from overlapping.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::{error::PruneError, timeout::with_timeout};
use crate::{
    archive::{ColdStore, ObjectInfo, listing_prefix, parse_archive_key},
    config::{PrunerJobConfig, RetentionPeriod},
    leases::{LeaseStore, job_lease_key, new_holder_id},
    models::PageRequest,
    observability::metrics,
};

const JOB_NAME: &str = "pruner";

/// Results from a single pruning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Whether the run only logged what it would have deleted.
    pub dry_run: bool,
    /// Objects listed under the archive prefix.
    pub scanned: u64,
    /// Objects older than the cold retention threshold.
    pub expired: u64,
    /// Objects deleted.
    pub deleted_count: u64,
    /// Expired objects whose delete failed; retried next run.
    pub failed: u64,
    /// Objects under the prefix that are not archive blobs; never deleted.
    pub ignored: u64,
    /// Duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl PruneReport {
    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }

    fn status(&self) -> &'static str {
        match (self.deleted_count, self.failed) {
            (_, 0) => "success",
            (0, _) => "error",
            _ => "partial",
        }
    }
}

/// Deletes archive blobs older than the cold retention period.
pub struct Pruner {
    cold: Arc<dyn ColdStore>,
    leases: Arc<dyn LeaseStore>,
    prefix: String,
    config: PrunerJobConfig,
}

impl Pruner {
    pub fn new(
        cold: Arc<dyn ColdStore>,
        leases: Arc<dyn LeaseStore>,
        prefix: impl Into<String>,
        config: PrunerJobConfig,
    ) -> Self {
        Self {
            cold,
            leases,
            prefix: prefix.into(),
            config,
        }
    }

    pub fn config(&self) -> &PrunerJobConfig {
        &self.config
    }

    /// Delete every archive blob with `created_at < now - cold_retention`.
    #[instrument(
        skip(self, cold_retention),
        fields(
            cold_retention = %cold_retention,
            dry_run = self.config.safety.dry_run,
            cold = self.cold.backend_name(),
        )
    )]
    pub async fn run_pruning(
        &self,
        now: DateTime<Utc>,
        cold_retention: RetentionPeriod,
    ) -> Result<PruneReport, PruneError> {
        let start = Instant::now();
        let threshold = cold_retention
            .threshold(now)
            .ok_or(PruneError::InvalidThreshold {
                now,
                retention: cold_retention,
            })?;

        let safety = &self.config.safety;
        let lease_key = job_lease_key(JOB_NAME);
        let holder = new_holder_id();
        let acquired = with_timeout(
            safety.store_timeout(),
            self.leases.try_acquire(&lease_key, &holder, safety.lease_ttl()),
        )
        .await?;
        if !acquired {
            return Err(PruneError::AlreadyRunning);
        }

        let mut report = PruneReport {
            dry_run: safety.dry_run,
            ..PruneReport::default()
        };
        let result = self.prune_all(threshold, &mut report).await;

        match with_timeout(safety.store_timeout(), self.leases.release(&lease_key, &holder)).await
        {
            Ok(true) => {}
            Ok(false) => warn!(lease_key = %lease_key, "Pruner lease expired before it was released"),
            Err(e) => warn!(lease_key = %lease_key, error = %e, "Failed to release pruner lease"),
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        let duration_secs = start.elapsed().as_secs_f64();

        if let Err(e) = result {
            metrics::record_job_run(JOB_NAME, "error", duration_secs);
            return Err(e);
        }

        metrics::record_job_run(JOB_NAME, report.status(), duration_secs);
        if !report.dry_run {
            metrics::record_pruned_objects("deleted", report.deleted_count);
            metrics::record_pruned_objects("failed", report.failed);
        }
        Ok(report)
    }

    async fn prune_all(
        &self,
        threshold: DateTime<Utc>,
        report: &mut PruneReport,
    ) -> Result<(), PruneError> {
        let safety = &self.config.safety;
        let prefix = listing_prefix(&self.prefix);
        let mut page = PageRequest::first(safety.page_size);

        loop {
            let objects = with_timeout(
                safety.store_timeout(),
                self.cold.list_objects(&prefix, page),
            )
            .await?;
            report.scanned += objects.items.len() as u64;

            let mut expired = Vec::new();
            for object in objects.items {
                if parse_archive_key(&self.prefix, &object.key).is_none() {
                    debug!(key = %object.key, "Ignoring object that is not an archive blob");
                    report.ignored += 1;
                } else if object.created_at < threshold {
                    expired.push(object);
                }
            }
            report.expired += expired.len() as u64;

            if safety.dry_run {
                for object in &expired {
                    info!(
                        key = %object.key,
                        created_at = %object.created_at,
                        "DRY RUN: Would delete archive blob"
                    );
                }
            } else {
                let results: Vec<bool> = stream::iter(expired)
                    .map(|object| self.delete_expired(object))
                    .buffer_unordered(safety.max_concurrency)
                    .collect()
                    .await;
                for deleted in results {
                    if deleted {
                        report.deleted_count += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }

            match objects.next_cursor {
                Some(cursor) => page = PageRequest::after(cursor, safety.page_size),
                None => return Ok(()),
            }
        }
    }

    async fn delete_expired(&self, object: ObjectInfo) -> bool {
        match with_timeout(
            self.config.safety.store_timeout(),
            self.cold.delete_object(&object.key),
        )
        .await
        {
            Ok(()) => {
                debug!(
                    key = %object.key,
                    created_at = %object.created_at,
                    "Deleted expired archive blob"
                );
                true
            }
            Err(e) => {
                error!(key = %object.key, error = %e, "Failed to delete expired archive blob");
                false
            }
        }
    }
}
