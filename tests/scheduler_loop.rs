//! Integration suite: drives real `Scheduler` instances against shared
//! backends and asserts the full dispatch/execution cycle.
//!
//! Covered here:
//! - retry loop runs to success and fires `on_success` exactly once
//! - pause suppresses activations, resume restores them
//! - removing a job mid-execution lets the in-flight run drain, then stops
//! - two schedulers on one backend fire a shared one-shot exactly once
//! - `stop` drains in-flight executions and marks them Cancelled
//! - wake signalling makes freshly-added jobs prompt despite a long poll
//! - per-attempt timeouts and panicking job functions mark the record Failed
//! - records without a local binding are skipped even when due
//! - scheduler state survives a file-backend reopen

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cronlease::{
    FileStorage, JobOptions, JobStatus, MemoryStorage, Scheduler, SchedulerEvent, Storage,
};

/// Poll the scheduler until the job reaches `status`, or panic after
/// `deadline`.
async fn wait_for_status(
    scheduler: &Scheduler,
    id: &str,
    status: JobStatus,
    deadline: Duration,
) -> cronlease::JobInfo {
    let start = tokio::time::Instant::now();
    loop {
        let info = scheduler.get_job(id).await.unwrap();
        if info.status == status {
            return info;
        }
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for {id} to reach {status:?}, currently {:?}",
            info.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until(what: &str, deadline: Duration, cond: impl Fn() -> bool) {
    let start = tokio::time::Instant::now();
    while !cond() {
        assert!(start.elapsed() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Retry loop ──────────────────────────────────────────────────────────

#[tokio::test]
async fn retries_until_success_and_fires_success_hook_once() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(100))
        .build();

    let attempts = Arc::new(AtomicU32::new(0));
    let successes = Arc::new(AtomicU32::new(0));
    let errors = Arc::new(AtomicU32::new(0));

    let options = {
        let successes = successes.clone();
        let errors = errors.clone();
        JobOptions::new()
            .max_retries(2)
            .on_success(move |_| {
                successes.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_, _| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
    };

    let job_attempts = attempts.clone();
    scheduler
        .add_one_shot_job(
            "flaky",
            "Flaky job",
            chrono::Duration::milliseconds(20),
            options,
            move |_ctx| {
                let attempts = job_attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("attempt {n} fails");
                    }
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    let info = wait_for_status(&scheduler, "flaky", JobStatus::Completed, Duration::from_secs(3)).await;
    scheduler.stop().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(successes.load(Ordering::SeqCst), 1, "on_success fires once");
    assert_eq!(errors.load(Ordering::SeqCst), 0, "on_error never fires");
    assert_eq!(info.run_count, 1, "three attempts are one run");
    assert_eq!(info.error_count, 0);
    assert!(info.last_error.is_none());
    assert!(info.next_run.is_none(), "one-shot is terminal after firing");
}

// ── Pause / resume ──────────────────────────────────────────────────────

#[tokio::test]
async fn pause_suppresses_activations_and_resume_restores_them() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(100))
        .build();

    let runs = Arc::new(AtomicU32::new(0));
    let job_runs = runs.clone();
    scheduler
        .add_interval_job(
            "ticker",
            "Ticker",
            Duration::from_millis(100),
            JobOptions::new(),
            move |_ctx| {
                let runs = job_runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    scheduler.pause_job("ticker").await.unwrap();
    // Let any activation that raced the pause drain before snapshotting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let at_pause = runs.load(Ordering::SeqCst);
    assert!(at_pause >= 1, "ticker should have run before the pause");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        runs.load(Ordering::SeqCst),
        at_pause,
        "no activations while paused"
    );

    scheduler.resume_job("ticker").await.unwrap();
    wait_until("post-resume activation", Duration::from_secs(2), || {
        runs.load(Ordering::SeqCst) > at_pause
    })
    .await;

    scheduler.stop().await.unwrap();
}

// ── Remove mid-cycle ────────────────────────────────────────────────────

#[tokio::test]
async fn remove_mid_execution_drains_in_flight_then_goes_quiet() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(50))
        .build();

    let started = Arc::new(AtomicU32::new(0));
    let finished = Arc::new(AtomicU32::new(0));
    let job_started = started.clone();
    let job_finished = finished.clone();
    scheduler
        .add_interval_job(
            "slow",
            "Slow job",
            Duration::from_millis(60),
            JobOptions::new(),
            move |_ctx| {
                let started = job_started.clone();
                let finished = job_finished.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    wait_until("first execution to start", Duration::from_secs(2), || {
        started.load(Ordering::SeqCst) >= 1
    })
    .await;

    scheduler.remove_job("slow").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(started.load(Ordering::SeqCst), 1, "no executions after remove");
    assert_eq!(finished.load(Ordering::SeqCst), 1, "in-flight run drained");

    scheduler.stop().await.unwrap();
}

// ── Cluster mutual exclusion ────────────────────────────────────────────

#[tokio::test]
async fn two_schedulers_sharing_a_backend_fire_a_one_shot_exactly_once() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let fired = Arc::new(AtomicU32::new(0));

    let mut peers = Vec::new();
    for peer_id in ["peer-a", "peer-b"] {
        let scheduler = Scheduler::builder()
            .storage(storage.clone())
            .instance_id(peer_id)
            .poll_interval(Duration::from_millis(50))
            .build();
        let fired = fired.clone();
        scheduler
            .add_one_shot_job(
                "solo",
                "Runs once cluster-wide",
                chrono::Duration::milliseconds(100),
                JobOptions::new(),
                move |_ctx| {
                    let fired = fired.clone();
                    async move {
                        fired.fetch_add(1, Ordering::SeqCst);
                        // Stay busy long enough for the loser to retry the
                        // lease while we hold it.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();
        scheduler.start().unwrap();
        peers.push(scheduler);
    }

    tokio::time::sleep(Duration::from_millis(800)).await;
    for scheduler in &peers {
        scheduler.stop().await.unwrap();
    }

    assert_eq!(
        fired.load(Ordering::SeqCst),
        1,
        "exactly one peer executes the shared one-shot"
    );
}

// ── Shutdown ────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_drains_in_flight_execution_and_marks_it_cancelled() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(50))
        .build();

    let entered = Arc::new(AtomicU32::new(0));
    let errors = Arc::new(AtomicU32::new(0));
    let job_entered = entered.clone();
    let hook_errors = errors.clone();
    scheduler
        .add_interval_job(
            "sleepy",
            "Sleepy job",
            Duration::from_millis(50),
            JobOptions::new().on_error(move |_, _| {
                hook_errors.fetch_add(1, Ordering::SeqCst);
            }),
            move |ctx| {
                let entered = job_entered.clone();
                async move {
                    entered.fetch_add(1, Ordering::SeqCst);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
                        _ = ctx.cancelled() => anyhow::bail!("interrupted"),
                    }
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    wait_until("execution to start", Duration::from_secs(2), || {
        entered.load(Ordering::SeqCst) >= 1
    })
    .await;

    let stop_started = tokio::time::Instant::now();
    scheduler.stop().await.unwrap();
    assert!(
        stop_started.elapsed() < Duration::from_secs(2),
        "stop should drain promptly once the function observes cancellation"
    );

    let info = scheduler.get_job("sleepy").await.unwrap();
    assert_eq!(info.status, JobStatus::Cancelled);
    assert_eq!(info.run_count, 0, "a cancelled activation is not a run");
    assert!(
        info.next_run.is_some(),
        "next_run is untouched so the job is due again on the next start"
    );
    assert_eq!(errors.load(Ordering::SeqCst), 0, "no callbacks on cancel");
}

// ── Wake signalling ─────────────────────────────────────────────────────

#[tokio::test]
async fn freshly_added_job_runs_promptly_despite_a_long_poll_interval() {
    // With a one-minute poll, promptness can only come from the wake signal
    // re-arming the local timer.
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_secs(60))
        .build();
    scheduler.start().unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let job_runs = runs.clone();
    scheduler
        .add_interval_job(
            "prompt",
            "Prompt job",
            Duration::from_millis(80),
            JobOptions::new(),
            move |_ctx| {
                let runs = job_runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    wait_until("two prompt activations", Duration::from_secs(2), || {
        runs.load(Ordering::SeqCst) >= 2
    })
    .await;
    scheduler.stop().await.unwrap();
}

// ── Failure modes ───────────────────────────────────────────────────────

#[tokio::test]
async fn timed_out_attempts_exhaust_retries_and_mark_failed() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(100))
        .build();

    let attempts = Arc::new(AtomicU32::new(0));
    let job_attempts = attempts.clone();
    scheduler
        .add_one_shot_job(
            "stuck",
            "Stuck job",
            chrono::Duration::milliseconds(20),
            JobOptions::new()
                .timeout(Duration::from_millis(100))
                .max_retries(1),
            move |_ctx| {
                let attempts = job_attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    let info = wait_for_status(&scheduler, "stuck", JobStatus::Failed, Duration::from_secs(3)).await;
    scheduler.stop().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2, "initial attempt plus one retry");
    assert_eq!(info.run_count, 1);
    assert_eq!(info.error_count, 1);
    assert!(
        info.last_error.as_deref().unwrap_or("").contains("timed out"),
        "last_error: {:?}",
        info.last_error
    );
}

#[tokio::test]
async fn panicking_job_is_contained_and_marked_failed() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(100))
        .build();

    let errors = Arc::new(AtomicU32::new(0));
    let hook_errors = errors.clone();
    scheduler
        .add_one_shot_job(
            "volatile",
            "Volatile job",
            chrono::Duration::milliseconds(20),
            JobOptions::new().on_error(move |_, _| {
                hook_errors.fetch_add(1, Ordering::SeqCst);
            }),
            |_ctx| async { panic!("boom") },
        )
        .await
        .unwrap();

    scheduler.start().unwrap();
    let info = wait_for_status(&scheduler, "volatile", JobStatus::Failed, Duration::from_secs(3)).await;

    assert_eq!(info.error_count, 1);
    assert!(
        info.last_error.as_deref().unwrap_or("").contains("panicked"),
        "last_error: {:?}",
        info.last_error
    );
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // The loop survived the panic: the scheduler still stops cleanly.
    scheduler.stop().await.unwrap();
}

// ── Peer-only records ───────────────────────────────────────────────────

#[tokio::test]
async fn due_record_without_a_local_binding_is_skipped() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let record = cronlease::JobRecord::new(
        "foreign",
        "Registered on another peer",
        Some(chrono::Utc::now() - chrono::Duration::seconds(5)),
    );
    storage.save(&record).await.unwrap();

    let scheduler = Scheduler::builder()
        .storage(storage.clone())
        .poll_interval(Duration::from_millis(50))
        .build();
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    scheduler.stop().await.unwrap();

    let untouched = storage.get("foreign").await.unwrap();
    assert_eq!(untouched.status, JobStatus::Pending);
    assert_eq!(untouched.run_count, 0);
    assert_eq!(untouched.next_run, record.next_run);
}

// ── Events ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_events_are_broadcast_in_order() {
    let scheduler = Scheduler::builder()
        .poll_interval(Duration::from_millis(100))
        .build();
    let mut events = scheduler.subscribe();

    scheduler
        .add_one_shot_job(
            "observed",
            "Observed job",
            chrono::Duration::milliseconds(20),
            JobOptions::new(),
            |_ctx| async { Ok(()) },
        )
        .await
        .unwrap();
    scheduler.start().unwrap();

    let started = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap()
        .unwrap();
    let completed = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap()
        .unwrap();
    scheduler.stop().await.unwrap();

    match started {
        SchedulerEvent::JobStarted { job_id, .. } => assert_eq!(job_id, "observed"),
        other => panic!("expected JobStarted, got {other:?}"),
    }
    match completed {
        SchedulerEvent::JobCompleted { job_id, .. } => assert_eq!(job_id, "observed"),
        other => panic!("expected JobCompleted, got {other:?}"),
    }
}

// ── File backend end-to-end ─────────────────────────────────────────────

#[tokio::test]
async fn scheduler_state_survives_a_file_backend_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.json");

    {
        let storage = Arc::new(FileStorage::open(&path).await.unwrap());
        let scheduler = Scheduler::builder()
            .storage(storage)
            .poll_interval(Duration::from_millis(50))
            .build();
        scheduler
            .add_one_shot_job(
                "persisted",
                "Persisted job",
                chrono::Duration::milliseconds(20),
                JobOptions::new(),
                |_ctx| async { Ok(()) },
            )
            .await
            .unwrap();
        scheduler.start().unwrap();
        wait_for_status(&scheduler, "persisted", JobStatus::Completed, Duration::from_secs(3)).await;
        scheduler.stop().await.unwrap();
    }

    let reopened = FileStorage::open(&path).await.unwrap();
    let record = reopened.get("persisted").await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.run_count, 1);
    assert!(record.last_run.is_some());
    assert!(record.next_run.is_none());
    assert!(record.last_error.is_none());
}
