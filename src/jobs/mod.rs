//! Retention jobs.
//!
//! - **Archiver**: moves messages older than the hot retention period from
//!   the record store into per-month archive blobs, deleting the records only
//!   once their blobs are durable.
//! - **Pruner**: deletes archive blobs older than the cold retention period.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `config/jobs.rs`
//! 2. Run function that performs a single pass and returns a report
//! 3. Worker function that runs passes on a weekly or monthly schedule
//! 4. Metrics for monitoring operations
//!
//! # Example
//!
//! ```toml
//! [jobs.archiver]
//! hot_retention = { months = 3 }
//!
//! [jobs.archiver.schedule]
//! every = "week"
//! weekday = "sunday"
//! hour = 3
//!
//! [jobs.pruner]
//! cold_retention = { years = 1 }
//!
//! [jobs.pruner.schedule]
//! every = "month"
//! day = 1
//! hour = 4
//! ```

mod archiver;
mod error;
mod pruner;
mod scheduler;
mod timeout;

pub use archiver::{ArchivalReport, Archiver};
pub use error::{ArchiveError, PruneError};
pub use pruner::{PruneReport, Pruner};
pub use scheduler::{start_archival_worker, start_pruning_worker};
