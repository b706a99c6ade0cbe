//! `cronlease` — embeddable distributed job scheduler.
//!
//! Register named jobs against cron, fixed-interval, or one-shot schedules;
//! point a cluster of peer processes at one shared storage backend, and each
//! due activation runs **at most once** cluster-wide, coordinated through
//! TTL lease locks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────┐      ┌─────────────────────────────┐
//! │  Process A                  │      │  Process B                  │
//! │   Scheduler                 │      │   Scheduler                 │
//! │    ├─ bindings (fn+schedule)│      │    ├─ bindings (fn+schedule)│
//! │    └─ run loop              │      │    └─ run loop              │
//! │        timer │ poll │ wake  │      │        timer │ poll │ wake  │
//! └──────┬──────────────────────┘      └──────┬──────────────────────┘
//!        │   due_jobs / acquire_lock / save   │
//!        ▼                                    ▼
//!       ┌──────────────────────────────────────┐
//!       │  Storage (shared)                    │
//!       │   job records  +  lease lock table   │
//!       └──────────────────────────────────────┘
//! ```
//!
//! Only job *records* (metadata, counters, activation times) are persisted.
//! The callable itself lives in each process's binding map — every peer must
//! register the same job ids with equivalent logic, and a peer without a
//! local binding skips the job even when it is due.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cronlease::{FileStorage, JobOptions, Scheduler};
//!
//! # async fn demo() -> cronlease::Result<()> {
//! let storage = Arc::new(FileStorage::open("data/jobs.yaml").await?);
//! let scheduler = Scheduler::builder()
//!     .storage(storage)
//!     .poll_interval(Duration::from_secs(30))
//!     .build();
//!
//! scheduler
//!     .add_cron_job(
//!         "nightly-report",
//!         "Nightly report",
//!         "0 3 * * *",
//!         JobOptions::new()
//!             .max_retries(2)
//!             .timeout(Duration::from_secs(120))
//!             .on_error(|id, err| eprintln!("{id} failed: {err}")),
//!         |_ctx| async move {
//!             // ... produce the report ...
//!             Ok(())
//!         },
//!     )
//!     .await?;
//!
//! scheduler.start()?;
//! # Ok(())
//! # }
//! ```

pub mod cron;
pub mod error;
pub mod instance;
pub mod job;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod storage;
mod wake;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use cron::CronExpr;
pub use error::{Error, Result};
pub use instance::derive_instance_id;
pub use job::{JobInfo, JobOptions, JobRecord, JobResult, JobStatus};
pub use retry::RetryPolicy;
pub use schedule::{CronSchedule, IntervalSchedule, OneShotSchedule, Schedule};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerEvent};
pub use storage::{FileStorage, LockEntry, MemoryStorage, Storage};

// Re-export the token type job functions receive, so embedders never need
// to depend on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
