use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Stats {
    start_ms: AtomicU64,
    last_log_ms: AtomicU64,

    passes: AtomicU64,
    failed_passes: AtomicU64,
    quotes_fetched: AtomicU64,
    provider_failures: AtomicU64,
    latest_rows: AtomicU64,
    last_pass_ms: AtomicU64,
}

impl Stats {
    pub fn new(now_ms: u64) -> Arc<Self> {
        let s = Arc::new(Self::default());
        s.start_ms.store(now_ms, Ordering::Relaxed);
        s.last_log_ms.store(now_ms, Ordering::Relaxed);
        s
    }

    pub fn inc_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_pass(&self) {
        self.failed_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_quotes(&self, n: u64) {
        self.quotes_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_provider_failures(&self, n: u64) {
        self.provider_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_latest_rows(&self, n: u64) {
        self.latest_rows.store(n, Ordering::Relaxed);
    }

    pub fn set_last_pass_ms(&self, ms: u64) {
        self.last_pass_ms.store(ms, Ordering::Relaxed);
    }

    pub fn should_log(&self, now_ms: u64, every_sec: u64) -> bool {
        if every_sec == 0 { return false; }
        let last = self.last_log_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last) >= every_sec.saturating_mul(1000)
    }

    pub fn mark_logged(&self, now_ms: u64) {
        self.last_log_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let start = self.start_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            now_ms,
            up_sec: now_ms.saturating_sub(start) / 1000,
            passes: self.passes.load(Ordering::Relaxed),
            failed_passes: self.failed_passes.load(Ordering::Relaxed),
            quotes_fetched: self.quotes_fetched.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            latest_rows: self.latest_rows.load(Ordering::Relaxed),
            last_pass_ms: self.last_pass_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub now_ms: u64,
    pub up_sec: u64,
    pub passes: u64,
    pub failed_passes: u64,
    pub quotes_fetched: u64,
    pub provider_failures: u64,
    pub latest_rows: u64,
    pub last_pass_ms: u64,
}
