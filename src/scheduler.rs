//! Scheduler core — the local job registry, the event-driven run loop, due
//! dispatch, and per-execution governance.
//!
//! One loop task multiplexes four wake sources: a one-shot timer armed at
//! the next locally-known activation, a slower periodic storage poll that
//! picks up peer mutations, a non-blocking wake signal from mutating API
//! calls, and the shutdown token. Each due job is executed on its own task
//! after winning the storage lease and the per-instance overlap guard;
//! `stop` drains every outstanding task before returning.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::instance::derive_instance_id;
use crate::job::{BoxedJobFuture, JobFn, JobInfo, JobOptions, JobRecord, JobStatus};
use crate::schedule::{CronSchedule, IntervalSchedule, OneShotSchedule, Schedule};
use crate::storage::{MemoryStorage, Storage};
use crate::wake::{wake_channel, WakeHandle};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Broadcast notifications about execution lifecycle. Slow or absent
/// subscribers never block the scheduler.
#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    JobStarted { job_id: String, run_id: Uuid },
    JobCompleted { job_id: String, run_id: Uuid },
    JobFailed { job_id: String, run_id: Uuid, error: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fluent builder for [`Scheduler`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::time::Duration;
/// let scheduler = cronlease::Scheduler::builder()
///     .poll_interval(Duration::from_secs(30))
///     .lock_ttl(Duration::from_secs(300))
///     .instance_id("worker-1")
///     .build();
/// ```
pub struct SchedulerBuilder {
    storage: Option<Arc<dyn Storage>>,
    poll_interval: Option<Duration>,
    check_interval: Option<Duration>,
    lock_ttl: Duration,
    instance_id: Option<String>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            poll_interval: None,
            check_interval: None,
            lock_ttl: DEFAULT_LOCK_TTL,
            instance_id: None,
        }
    }

    /// Backend shared with peer schedulers (default: process-local
    /// [`MemoryStorage`]).
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Cadence of the background storage rescan (default 30s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Legacy alias for the poll cadence; only takes effect while
    /// `poll_interval` is left at its default.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Lifetime granted to an acquired execution lease (default 5 min).
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Lock-owner identity (default: derived `<hostname>-<pid>-<nanos>`).
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> Scheduler {
        let (wake_handle, wake_rx) = wake_channel();
        let (events, _) = broadcast::channel(64);
        Scheduler {
            inner: Arc::new(SchedulerInner {
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                instance_id: self.instance_id.unwrap_or_else(derive_instance_id),
                poll_interval: resolve_poll_interval(self.poll_interval, self.check_interval),
                lock_ttl: self.lock_ttl,
                bindings: parking_lot::RwLock::new(HashMap::new()),
                wake: parking_lot::Mutex::new(WakeState {
                    handle: wake_handle,
                    rx: Some(wake_rx),
                }),
                lifecycle: parking_lot::Mutex::new(Lifecycle::default()),
                events,
            }),
        }
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_poll_interval(poll: Option<Duration>, check: Option<Duration>) -> Duration {
    poll.or(check).unwrap_or(DEFAULT_POLL_INTERVAL)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Local association between a job id and its callable + schedule + options.
/// Never persisted; peers register their own bindings for the same ids.
struct JobBinding {
    id: String,
    func: JobFn,
    schedule: Arc<dyn Schedule>,
    options: JobOptions,
    /// Per-instance overlap guard: CAS false→true at dispatch, cleared when
    /// the execution task finishes.
    running: AtomicBool,
}

struct WakeState {
    handle: WakeHandle,
    rx: Option<mpsc::Receiver<()>>,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    shutdown: Option<CancellationToken>,
    tracker: Option<TaskTracker>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A scheduler instance. Cheap to clone; clones share the same registry,
/// run loop, and storage handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    storage: Arc<dyn Storage>,
    instance_id: String,
    poll_interval: Duration,
    lock_ttl: Duration,
    bindings: parking_lot::RwLock<HashMap<String, Arc<JobBinding>>>,
    wake: parking_lot::Mutex<WakeState>,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    /// A scheduler with all defaults (in-memory storage, 30s poll).
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The identity this instance presents when acquiring leases.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Subscribe to execution lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a job under `id` with an explicit [`Schedule`].
    ///
    /// Seeds a Pending record in storage unless a peer already created one
    /// (in that case the stored record is kept and the callable is only
    /// bound locally). Fails with [`Error::EmptyJobId`] or
    /// [`Error::JobAlreadyExists`] on a local collision.
    pub async fn add_job<S, F, Fut>(
        &self,
        id: &str,
        name: &str,
        schedule: S,
        options: JobOptions,
        func: F,
    ) -> Result<()>
    where
        S: Schedule + 'static,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let func: JobFn = Arc::new(move |token| Box::pin(func(token)) as BoxedJobFuture);
        self.add_bound(id, name, Arc::new(schedule), options, func)
            .await
    }

    /// Register a cron job. See [`CronExpr::parse`](crate::CronExpr::parse)
    /// for the accepted grammar.
    pub async fn add_cron_job<F, Fut>(
        &self,
        id: &str,
        name: &str,
        expression: &str,
        options: JobOptions,
        func: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_job(id, name, CronSchedule::parse(expression)?, options, func)
            .await
    }

    /// Register a fixed-interval job.
    pub async fn add_interval_job<F, Fut>(
        &self,
        id: &str,
        name: &str,
        every: Duration,
        options: JobOptions,
        func: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_job(id, name, IntervalSchedule::new(every)?, options, func)
            .await
    }

    /// Register a job that fires once, `delay` from now.
    pub async fn add_one_shot_job<F, Fut>(
        &self,
        id: &str,
        name: &str,
        delay: chrono::Duration,
        options: JobOptions,
        func: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_job(id, name, OneShotSchedule::after(delay)?, options, func)
            .await
    }

    /// Register a job that fires once at an absolute instant.
    pub async fn add_one_shot_job_at<F, Fut>(
        &self,
        id: &str,
        name: &str,
        at: DateTime<Utc>,
        options: JobOptions,
        func: F,
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_job(id, name, OneShotSchedule::at(at), options, func)
            .await
    }

    async fn add_bound(
        &self,
        id: &str,
        name: &str,
        schedule: Arc<dyn Schedule>,
        options: JobOptions,
        func: JobFn,
    ) -> Result<()> {
        if id.is_empty() {
            return Err(Error::EmptyJobId);
        }
        if self.inner.bindings.read().contains_key(id) {
            return Err(Error::JobAlreadyExists(id.to_string()));
        }

        match self.inner.storage.get(id).await {
            Ok(_) => {
                // A peer already seeded the record; only bind locally.
                tracing::debug!(job_id = %id, "record exists in storage, binding locally");
            }
            Err(Error::JobNotFound(_)) => {
                let record = JobRecord::new(id, name, schedule.next(Utc::now()));
                self.inner.storage.save(&record).await?;
            }
            Err(e) => return Err(e),
        }

        let binding = Arc::new(JobBinding {
            id: id.to_string(),
            func,
            schedule,
            options,
            running: AtomicBool::new(false),
        });
        {
            let mut bindings = self.inner.bindings.write();
            if bindings.contains_key(id) {
                return Err(Error::JobAlreadyExists(id.to_string()));
            }
            bindings.insert(id.to_string(), binding);
        }
        self.inner.signal_wake();
        tracing::info!(job_id = %id, name = %name, "job registered");
        Ok(())
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Unregister a locally-bound job and delete its record from storage.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        if !self.inner.bindings.read().contains_key(id) {
            return Err(Error::JobNotFound(id.to_string()));
        }
        match self.inner.storage.delete(id).await {
            Ok(()) => {}
            // A peer removed the record first; the local unbind still counts.
            Err(Error::JobNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.inner.bindings.write().remove(id);
        self.inner.signal_wake();
        tracing::info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Exclude a job from due-set queries. `next_run` is left untouched.
    pub async fn pause_job(&self, id: &str) -> Result<()> {
        let mut record = self.inner.storage.get(id).await?;
        record.paused = true;
        self.inner.storage.save(&record).await?;
        tracing::info!(job_id = %id, "job paused");
        Ok(())
    }

    /// Re-include a paused job, recomputing `next_run` from its local
    /// schedule. Requires the job to be bound on this instance.
    pub async fn resume_job(&self, id: &str) -> Result<()> {
        let binding = self
            .inner
            .bindings
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        let mut record = self.inner.storage.get(id).await?;
        record.paused = false;
        record.next_run = binding.schedule.next(Utc::now());
        self.inner.storage.save(&record).await?;
        self.inner.signal_wake();
        tracing::info!(job_id = %id, "job resumed");
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────────

    pub async fn get_job(&self, id: &str) -> Result<JobInfo> {
        Ok(self.inner.storage.get(id).await?.into())
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        Ok(self
            .inner
            .storage
            .list()
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the run loop. Must be called from within a Tokio runtime.
    /// Fails with [`Error::SchedulerRunning`] when already started.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.running {
            return Err(Error::SchedulerRunning);
        }

        let wake_rx = {
            let mut wake = self.inner.wake.lock();
            match wake.rx.take() {
                Some(rx) => rx,
                None => {
                    // Restart after a stop: the old receiver died with the
                    // previous loop, so re-plumb the channel.
                    let (handle, rx) = wake_channel();
                    wake.handle = handle;
                    rx
                }
            }
        };

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(run_loop(
            self.inner.clone(),
            wake_rx,
            shutdown.clone(),
            tracker.clone(),
        ));

        lifecycle.running = true;
        lifecycle.shutdown = Some(shutdown);
        lifecycle.tracker = Some(tracker);
        tracing::info!(instance_id = %self.inner.instance_id, "scheduler started");
        Ok(())
    }

    /// Stop the run loop and wait for the loop and every in-flight execution
    /// to finish. In-flight job functions observe cancellation through their
    /// token. Fails with [`Error::SchedulerStopped`] when not running.
    pub async fn stop(&self) -> Result<()> {
        let (shutdown, tracker) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.running {
                return Err(Error::SchedulerStopped);
            }
            lifecycle.running = false;
            (lifecycle.shutdown.take(), lifecycle.tracker.take())
        };
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        if let Some(tracker) = tracker {
            tracker.close();
            tracker.wait().await;
        }
        tracing::info!(instance_id = %self.inner.instance_id, "scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().running
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_loop(
    inner: Arc<SchedulerInner>,
    mut wake_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut poll = tokio::time::interval(inner.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The interval's immediate first tick doubles as the startup dispatch.

    let timer = tokio::time::sleep(inner.next_wake_delay());
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("run loop shutting down");
                break;
            }
            _ = &mut timer => {
                inner.dispatch(&shutdown, &tracker).await;
                timer.as_mut().reset(tokio::time::Instant::now() + inner.next_wake_delay());
            }
            _ = poll.tick() => {
                inner.dispatch(&shutdown, &tracker).await;
                timer.as_mut().reset(tokio::time::Instant::now() + inner.next_wake_delay());
            }
            Some(()) = wake_rx.recv() => {
                // Mutations only re-arm the timer; they never dispatch.
                timer.as_mut().reset(tokio::time::Instant::now() + inner.next_wake_delay());
            }
        }
    }
}

impl SchedulerInner {
    fn signal_wake(&self) {
        self.wake.lock().handle.signal();
    }

    /// Delay until the earliest locally-known activation, floored at zero
    /// and capped at the poll interval.
    fn next_wake_delay(&self) -> Duration {
        let now = Utc::now();
        let next = {
            let bindings = self.bindings.read();
            bindings
                .values()
                .filter_map(|b| b.schedule.next(now))
                .min()
        };
        let delay = match next {
            Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
            None => self.poll_interval,
        };
        delay.min(self.poll_interval)
    }

    /// One tick: fetch the due-set and try to win each job.
    async fn dispatch(self: &Arc<Self>, shutdown: &CancellationToken, tracker: &TaskTracker) {
        let now = Utc::now();
        let due = match self.storage.due_jobs(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "due-jobs query failed, skipping tick");
                return;
            }
        };

        for mut record in due {
            // Paused is authoritative even if a backend's due query missed it.
            if record.paused {
                continue;
            }
            let binding = match self.bindings.read().get(&record.id) {
                Some(binding) => binding.clone(),
                // Registered by a peer only — nothing to execute here.
                None => continue,
            };

            // Skip before touching the lease: re-acquiring would extend the
            // in-flight run's lease only for the CAS below to release it,
            // handing the activation to a peer mid-run.
            if binding.running.load(Ordering::Acquire) {
                tracing::debug!(job_id = %record.id, "previous activation still in flight, skipping");
                continue;
            }

            match self
                .storage
                .acquire_lock(&record.id, &self.instance_id, self.lock_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(job_id = %record.id, "lease held elsewhere, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = %record.id, error = %e, "lease acquire failed, skipping");
                    continue;
                }
            }

            if binding
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Previous activation still in flight on this instance.
                self.release_lease(&record.id).await;
                continue;
            }

            let run_id = Uuid::new_v4();
            record.status = JobStatus::Running;
            if let Err(e) = self.storage.save(&record).await {
                tracing::warn!(job_id = %record.id, error = %e, "failed to persist running status");
            }
            let _ = self.events.send(SchedulerEvent::JobStarted {
                job_id: record.id.clone(),
                run_id,
            });
            tracing::info!(job_id = %record.id, run_id = %run_id, "dispatching job");

            let task_inner = Arc::clone(self);
            let task_shutdown = shutdown.clone();
            tracker.spawn(async move {
                task_inner
                    .execute(binding, record, run_id, task_shutdown)
                    .await;
            });
        }
    }

    /// One full execution: the retry loop, then record update, lease
    /// release, overlap-guard clear, and callbacks.
    async fn execute(
        &self,
        binding: Arc<JobBinding>,
        mut record: JobRecord,
        run_id: Uuid,
        shutdown: CancellationToken,
    ) {
        let attempts = binding.options.max_retries + 1;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = binding.options.retry_policy.delay_for_attempt(attempt - 2);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }

            match self.run_attempt(&binding, shutdown.child_token()).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    if shutdown.is_cancelled() {
                        self.finish_cancelled(&binding, &mut record, run_id).await;
                        return;
                    }
                    tracing::debug!(
                        job_id = %binding.id,
                        run_id = %run_id,
                        attempt,
                        error = %e,
                        "attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        let finished_at = Utc::now();
        record.last_run = Some(finished_at);
        record.run_count += 1;
        match &last_err {
            None => {
                record.status = JobStatus::Completed;
                record.last_error = None;
            }
            Some(e) => {
                record.status = JobStatus::Failed;
                record.error_count += 1;
                record.last_error = Some(e.to_string());
            }
        }
        record.next_run = binding.schedule.next(finished_at);

        if let Err(e) = self.storage.save(&record).await {
            tracing::warn!(job_id = %binding.id, error = %e, "failed to persist job result");
        }
        self.release_lease(&binding.id).await;
        binding.running.store(false, Ordering::Release);

        match last_err {
            None => {
                tracing::info!(job_id = %binding.id, run_id = %run_id, "job completed");
                let _ = self.events.send(SchedulerEvent::JobCompleted {
                    job_id: binding.id.clone(),
                    run_id,
                });
                if let Some(hook) = &binding.options.on_success {
                    hook(&binding.id);
                }
            }
            Some(e) => {
                tracing::warn!(job_id = %binding.id, run_id = %run_id, error = %e, "job failed");
                let _ = self.events.send(SchedulerEvent::JobFailed {
                    job_id: binding.id.clone(),
                    run_id,
                    error: e.to_string(),
                });
                if let Some(hook) = &binding.options.on_error {
                    hook(&binding.id, &e);
                }
            }
        }
    }

    /// One attempt: invoke the callable under its per-attempt token, with
    /// the configured timeout and panic containment.
    async fn run_attempt(
        &self,
        binding: &JobBinding,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        let fut = (binding.func)(token.clone());
        // catch_unwind: a panicking job function counts as a failed attempt,
        // never as a dead scheduler.
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let result = match binding.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(result) => result,
                Err(_) => {
                    // Fire the token so anything the function spawned
                    // observes the deadline too.
                    token.cancel();
                    return Err(anyhow::anyhow!("job timed out after {limit:?}"));
                }
            },
            None => guarded.await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(panic) => Err(anyhow::anyhow!("job panicked: {}", panic_message(&panic))),
        }
    }

    /// Shutdown observed mid-execution: the activation was never completed.
    /// `next_run` stays put so the job is due again on the next start, and
    /// no callbacks fire.
    async fn finish_cancelled(&self, binding: &JobBinding, record: &mut JobRecord, run_id: Uuid) {
        record.status = JobStatus::Cancelled;
        record.last_run = Some(Utc::now());
        if let Err(e) = self.storage.save(record).await {
            tracing::warn!(job_id = %binding.id, error = %e, "failed to persist cancelled status");
        }
        self.release_lease(&binding.id).await;
        binding.running.store(false, Ordering::Release);
        tracing::info!(job_id = %binding.id, run_id = %run_id, "job cancelled by shutdown");
    }

    async fn release_lease(&self, job_id: &str) {
        if let Err(e) = self.storage.release_lock(job_id, &self.instance_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to release lease");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
