use std::sync::atomic::{AtomicU64, Ordering};

/// Global scheduler counters. All lock-free; they only ever increase while
/// the system runs.
#[derive(Debug, Default)]
pub struct Counters {
    active_ticks: AtomicU64,
    idle_ticks: AtomicU64,
    total_ticks: AtomicU64,
    snapshot_cycle: AtomicU64,
}

impl Counters {
    /// A worker executed one instruction.
    pub fn tick_active(&self) {
        self.active_ticks.fetch_add(1, Ordering::Relaxed);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker woke with nothing to run.
    pub fn tick_idle(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Next memory-snapshot number; globally monotonic.
    pub fn next_cycle(&self) -> u64 {
        self.snapshot_cycle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn active_ticks(&self) -> u64 {
        self.active_ticks.load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::Relaxed)
    }
}
