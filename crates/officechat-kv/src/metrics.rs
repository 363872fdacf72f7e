use crate::time::now_ms;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ReaperMetrics {
    start_ms: i64,
    pub cycles_total: AtomicU64,
    pub keys_reaped_total: AtomicU64,
    pub sweep_failures_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperStats {
    pub uptime_ms: u64,
    pub cycles_total: u64,
    pub keys_reaped_total: u64,
    pub sweep_failures_total: u64,
}

impl ReaperMetrics {
    pub fn new() -> Self {
        Self {
            start_ms: now_ms(),
            cycles_total: AtomicU64::new(0),
            keys_reaped_total: AtomicU64::new(0),
            sweep_failures_total: AtomicU64::new(0),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        now_ms().saturating_sub(self.start_ms).max(0) as u64
    }

    pub fn inc_cycle(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_reaped(&self, n: u64) {
        self.keys_reaped_total.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_failure(&self) {
        self.sweep_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReaperStats {
        ReaperStats {
            uptime_ms: self.uptime_ms(),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            keys_reaped_total: self.keys_reaped_total.load(Ordering::Relaxed),
            sweep_failures_total: self.sweep_failures_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for ReaperMetrics {
    fn default() -> Self {
        Self::new()
    }
}
