use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{error::LeaseResult, traits::LeaseStore};

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local lease store.
///
/// Only excludes holders within the same process; use Redis when several
/// instances run the jobs.
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: DashMap<String, Lease>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of `key`, if the lease is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.leases
            .get(key)
            .filter(|lease| !lease.is_expired())
            .map(|lease| lease.holder.clone())
    }

    /// Number of leases held, expired or not.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> LeaseResult<bool> {
        let lease = Lease {
            holder: holder.to_string(),
            expires_at: Instant::now() + ttl,
        };

        // Holders that crashed never release; drop their leases here.
        self.leases.retain(|_, lease| !lease.is_expired());

        // Entry API keeps the check-and-insert atomic per key.
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().is_expired() {
                    e.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(e) => {
                e.insert(lease);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> LeaseResult<bool> {
        let removed = self
            .leases
            .remove_if(key, |_, lease| lease.holder == holder);
        Ok(removed.is_some_and(|(_, lease)| !lease.is_expired()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
