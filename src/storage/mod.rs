//! Storage abstraction — persistence plus distributed lease locking.
//!
//! A `Storage` instance owns the cluster's job records and its lock table;
//! multiple scheduler processes share one backend and coordinate through it.
//! Reference implementations:
//! - [`memory`] — process-local hash maps behind a mutex
//! - [`file`] — a single multi-format document rewritten atomically
//!
//! Every read and write moves **owned copies**: a caller can never alias or
//! mutate a backend's internal state through a returned record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::JobRecord;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// A lease lock held by one scheduler instance for one activation tick.
///
/// At most one unexpired entry exists per job id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub job_id: String,
    pub owner: String,
    pub expires: DateTime<Utc>,
}

impl LockEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Persistence + coordination contract consumed by the scheduler core.
///
/// Implementations must be safe to share across tasks and processes;
/// concurrent mutation by peers is expected.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upsert a record by id.
    async fn save(&self, record: &JobRecord) -> Result<()>;

    /// Fetch a copy of one record. [`Error::JobNotFound`](crate::Error::JobNotFound)
    /// for unknown ids.
    async fn get(&self, id: &str) -> Result<JobRecord>;

    /// Remove a record and any lock it holds.
    /// [`Error::JobNotFound`](crate::Error::JobNotFound) for unknown ids.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Snapshot of every record.
    async fn list(&self) -> Result<Vec<JobRecord>>;

    /// Records due at `now`: not paused, `next_run` present and `<= now`.
    /// Order is not significant; the scheduler filters by local binding.
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>>;

    /// Try to take the execution lease for a job. Atomic compare-and-set:
    /// grants when no entry exists, the entry has expired, or the entry
    /// already belongs to `owner_id` (re-acquisition pushes `expires` out by
    /// another `ttl`). `Ok(false)` means another owner holds an unexpired
    /// lease.
    async fn acquire_lock(&self, job_id: &str, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Release a lease. Only the recorded owner releases anything; a
    /// mismatched owner or a missing lock is a silent no-op.
    async fn release_lock(&self, job_id: &str, owner_id: &str) -> Result<()>;

    /// Release backing resources.
    async fn close(&self) -> Result<()>;
}

/// Lease TTLs arrive as `std::time::Duration`; clamp the (pathological)
/// overflow case to chrono's maximum instead of failing an acquire.
pub(crate) fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX)
}
