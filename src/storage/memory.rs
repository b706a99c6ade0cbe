//! In-memory storage — the default backend, and the reference for the
//! `Storage` contract's semantics.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ttl_to_chrono, LockEntry, Storage};
use crate::error::{Error, Result};
use crate::job::JobRecord;

/// Records and locks in two hash maps behind one mutex. Lock expiry is
/// evaluated against the current time on each acquire.
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    locks: HashMap<String, LockEntry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.inner
            .lock()
            .records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<JobRecord> {
        self.inner
            .lock()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.records.remove(id).is_none() {
            return Err(Error::JobNotFound(id.to_string()));
        }
        inner.locks.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.inner.lock().records.values().cloned().collect())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect())
    }

    async fn acquire_lock(&self, job_id: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        if let Some(held) = inner.locks.get(job_id) {
            if !held.is_expired(now) && held.owner != owner_id {
                return Ok(false);
            }
        }
        inner.locks.insert(
            job_id.to_string(),
            LockEntry {
                job_id: job_id.to_string(),
                owner: owner_id.to_string(),
                expires: now + ttl_to_chrono(ttl),
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, job_id: &str, owner_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .locks
            .get(job_id)
            .map_or(false, |held| held.owner == owner_id)
        {
            inner.locks.remove(job_id);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
