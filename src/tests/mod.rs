//! End-to-end tests for the retention pipeline.
//!
//! These drive the archiver and pruner through the store traits, using the
//! in-memory backends plus fault-injecting wrappers from [`support`].

mod retention_e2e;
mod support;
