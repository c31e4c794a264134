use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_failed: AtomicU64,
    in_use: AtomicU64,
    peak_in_use: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_acquired() {
    increment(&COUNTERS.acquired);
    let now = COUNTERS.in_use.fetch_add(1, Ordering::Relaxed) + 1;
    COUNTERS.peak_in_use.fetch_max(now, Ordering::Relaxed);
}

pub fn record_released() {
    increment(&COUNTERS.released);
    let _ = COUNTERS
        .in_use
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

pub fn record_timed_out() {
    increment(&COUNTERS.timed_out);
}

pub fn record_cancelled() {
    increment(&COUNTERS.cancelled);
}

pub fn record_session_opened() {
    increment(&COUNTERS.sessions_opened);
}

pub fn record_session_failed() {
    increment(&COUNTERS.sessions_failed);
}

#[derive(Clone, Debug, Default)]
pub struct PoolMetricsSnapshot {
    pub acquired: u64,
    pub released: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub sessions_opened: u64,
    pub sessions_failed: u64,
    pub in_use: u64,
    pub peak_in_use: u64,
}

pub fn snapshot() -> PoolMetricsSnapshot {
    PoolMetricsSnapshot {
        acquired: COUNTERS.acquired.load(Ordering::Relaxed),
        released: COUNTERS.released.load(Ordering::Relaxed),
        timed_out: COUNTERS.timed_out.load(Ordering::Relaxed),
        cancelled: COUNTERS.cancelled.load(Ordering::Relaxed),
        sessions_opened: COUNTERS.sessions_opened.load(Ordering::Relaxed),
        sessions_failed: COUNTERS.sessions_failed.load(Ordering::Relaxed),
        in_use: COUNTERS.in_use.load(Ordering::Relaxed),
        peak_in_use: COUNTERS.peak_in_use.load(Ordering::Relaxed),
    }
}
