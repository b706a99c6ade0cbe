//! Job data model — persisted records, read-only views, and per-job
//! execution options.
//!
//! Only [`JobRecord`] is ever persisted. The callable, its schedule, and its
//! callbacks live in each process's local binding map — peers must register
//! the same job ids themselves with equivalent logic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;

/// Outcome of one invocation of a job function.
pub type JobResult = anyhow::Result<()>;

pub(crate) type BoxedJobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// Type-erased job callable. Receives a cancellation token that fires on
/// per-attempt timeout and on scheduler shutdown.
pub(crate) type JobFn = Arc<dyn Fn(CancellationToken) -> BoxedJobFuture + Send + Sync>;

pub(crate) type SuccessHook = Arc<dyn Fn(&str) + Send + Sync>;
pub(crate) type ErrorHook = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a job record.
///
/// Serialized as a stable integer code so every storage codec encodes it
/// identically: Pending=0, Running=1, Completed=2, Failed=3, Cancelled=4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed => 2,
            JobStatus::Failed => 3,
            JobStatus::Cancelled => 4,
        }
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::Running),
            2 => Ok(JobStatus::Completed),
            3 => Ok(JobStatus::Failed),
            4 => Ok(JobStatus::Cancelled),
            other => Err(format!("invalid job status code: {other}")),
        }
    }
}

/// Persisted per-job state: metadata, counters, and activation timestamps.
///
/// `next_run = None` means no further activation — such records never appear
/// in a due-set. While `paused` is set, `next_run` may be stale; a consumer
/// must check `paused` before deeming a record due (see
/// [`JobRecord::is_due`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobRecord {
    /// A fresh Pending record with its first activation precomputed.
    pub fn new(id: impl Into<String>, name: impl Into<String>, next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: JobStatus::Pending,
            paused: false,
            last_run: None,
            next_run,
            run_count: 0,
            error_count: 0,
            last_error: None,
        }
    }

    /// Whether this record is due at `now`: not paused, has a next
    /// activation, and that activation is not in the future.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.next_run.map_or(false, |next| next <= now)
    }
}

/// Read-only snapshot of a job handed out by `get`/`list`.
#[derive(Clone, Debug, PartialEq)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub paused: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl From<JobRecord> for JobInfo {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            status: record.status,
            paused: record.paused,
            last_run: record.last_run,
            next_run: record.next_run,
            run_count: record.run_count,
            error_count: record.error_count,
            last_error: record.last_error,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-job options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution governance for a single job: retries, per-attempt timeout,
/// retry pacing, and lifecycle callbacks.
#[derive(Clone, Default)]
pub struct JobOptions {
    pub(crate) max_retries: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) on_success: Option<SuccessHook>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra attempts after the first failure (default 0: a single attempt).
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Per-attempt timeout. On expiry the attempt's cancellation token fires
    /// and the attempt counts as failed.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay policy between failed attempts (default: immediate).
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Called with the job id after a successful execution.
    pub fn on_success(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the job id and final error after retries are exhausted.
    pub fn on_error(mut self, hook: impl Fn(&str, &anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOptions")
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn full_record() -> JobRecord {
        JobRecord {
            id: "report".into(),
            name: "Nightly report".into(),
            status: JobStatus::Failed,
            paused: true,
            last_run: Some(Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap()),
            next_run: Some(Utc.with_ymd_and_hms(2024, 1, 16, 3, 0, 0).unwrap()),
            run_count: 41,
            error_count: 3,
            last_error: Some("x".into()),
        }
    }

    #[test]
    fn status_integer_codes_are_stable() {
        assert_eq!(u8::from(JobStatus::Pending), 0);
        assert_eq!(u8::from(JobStatus::Running), 1);
        assert_eq!(u8::from(JobStatus::Completed), 2);
        assert_eq!(u8::from(JobStatus::Failed), 3);
        assert_eq!(u8::from(JobStatus::Cancelled), 4);
    }

    #[test]
    fn status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&JobStatus::Completed).unwrap(), "2");
        let back: JobStatus = serde_json::from_str("4").unwrap();
        assert_eq!(back, JobStatus::Cancelled);
    }

    #[test]
    fn status_rejects_unknown_code() {
        assert!(serde_json::from_str::<JobStatus>("9").is_err());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = full_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_deserializes_with_minimal_fields() {
        let json = serde_json::json!({ "id": "j1", "name": "Job one" });
        let record: JobRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert!(!record.paused);
        assert!(record.last_run.is_none());
        assert!(record.next_run.is_none());
        assert_eq!(record.run_count, 0);
        assert_eq!(record.error_count, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn is_due_requires_unpaused_and_elapsed_next_run() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        let mut record = JobRecord::new("j1", "Job one", Some(now - chrono::Duration::minutes(1)));
        assert!(record.is_due(now));

        // next_run exactly at now is due.
        record.next_run = Some(now);
        assert!(record.is_due(now));

        record.next_run = Some(now + chrono::Duration::minutes(1));
        assert!(!record.is_due(now));

        // Terminal records are never due.
        record.next_run = None;
        assert!(!record.is_due(now));

        // Paused records are never due, even with a stale next_run.
        record.next_run = Some(now - chrono::Duration::hours(1));
        record.paused = true;
        assert!(!record.is_due(now));
    }

    #[test]
    fn info_mirrors_record_fields() {
        let record = full_record();
        let info = JobInfo::from(record.clone());
        assert_eq!(info.id, record.id);
        assert_eq!(info.status, record.status);
        assert_eq!(info.run_count, record.run_count);
        assert_eq!(info.last_error, record.last_error);
    }

    #[test]
    fn options_builder_accumulates() {
        let opts = JobOptions::new()
            .max_retries(3)
            .timeout(Duration::from_secs(30))
            .on_success(|_| {})
            .on_error(|_, _| {});
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
        assert!(opts.on_success.is_some());
        assert!(opts.on_error.is_some());
    }

    #[test]
    fn options_default_is_single_attempt_no_timeout() {
        let opts = JobOptions::default();
        assert_eq!(opts.max_retries, 0);
        assert!(opts.timeout.is_none());
        assert!(opts.on_success.is_none());
        assert!(opts.on_error.is_none());
    }
}
