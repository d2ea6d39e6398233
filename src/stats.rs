// src/stats.rs

//! Pipeline counters.

use crate::arena::ArenaStats;
use serde::Serialize;

/// Per-worker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkerStats {
    /// Commands this worker has run.
    pub retired: u64,
    /// Times the worker was woken from its doorbell.
    pub wakeups: u64,
}

/// Snapshot of a pipeline's activity since construction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStats {
    pub commands_queued: u64,
    /// Writer index publications (full fragments, partial fragments before a
    /// stall, and drains).
    pub fragments_published: u64,
    /// Times `queue` found the ring full and had to wait for workers.
    pub producer_stalls: u64,
    pub drains: u64,
    pub workers: Vec<WorkerStats>,
    pub arena: ArenaStats,
}

impl PipelineStats {
    /// Commands retired by the slowest worker.
    pub fn min_retired(&self) -> u64 {
        self.workers.iter().map(|w| w.retired).min().unwrap_or(0)
    }
}
