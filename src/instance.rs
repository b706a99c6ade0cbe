//! Process-unique instance identity, used as lock ownership across a
//! cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock origin captured once, advanced by a monotonic clock. The wall
/// clock alone can step backwards under NTP slew, which would break the
/// suffix's ordering guarantee.
struct ClockBase {
    origin_nanos: u64,
    started: Instant,
}

static CLOCK: OnceLock<ClockBase> = OnceLock::new();
static LAST_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// Derive a `<hostname>-<pid>-<nanoseconds>` identity for this process.
///
/// The nanosecond suffix is strictly increasing within the process, so two
/// schedulers built back-to-back never share an identity. Good enough to
/// tell peer schedulers apart on a shared storage backend; deployments with
/// stronger naming (pod name, node id) should pass their own id to the
/// scheduler builder instead.
pub fn derive_instance_id() -> String {
    format!("{}-{}-{}", hostname(), std::process::id(), monotonic_nanos())
}

fn monotonic_nanos() -> u64 {
    let clock = CLOCK.get_or_init(|| ClockBase {
        origin_nanos: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
        started: Instant::now(),
    });
    let now = clock
        .origin_nanos
        .saturating_add(clock.started.elapsed().as_nanos() as u64);

    // Strictly increase even when the clock's resolution is coarser than
    // the call rate.
    let mut prev = LAST_SUFFIX.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_SUFFIX.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
