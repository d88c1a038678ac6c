//! Message retention pipeline for a family chat app.
//!
//! Two jobs keep the live record store small:
//!
//! - the [`Archiver`](jobs::Archiver) moves messages past the hot retention
//!   period into per-conversation, per-month JSON blobs in cold storage;
//! - the [`Pruner`](jobs::Pruner) deletes cold blobs past the cold retention
//!   period.
//!
//! Storage is abstracted behind [`RecordStore`](records::RecordStore),
//! [`ColdStore`](archive::ColdStore) and [`LeaseStore`](leases::LeaseStore),
//! each with an in-memory backend and feature-gated production backends.

pub mod archive;
pub mod config;
pub mod jobs;
pub mod leases;
pub mod models;
pub mod observability;
pub mod records;

#[cfg(test)]
mod tests;
