//! Frame instrumentation.
//!
//! Two independent layers bracket every frame:
//! - a **scope** (`begin_scope`/`end_scope`), the fine-grained layer that
//!   nests and times code regions;
//! - a **block** (`begin_block`/`end_block`), a coarse named region with a
//!   millisecond budget that reports overruns.
//!
//! [`ScopeGuard`] and [`BlockGuard`] close their layer on drop, so both are
//! closed exactly once however the frame exits, including by unwinding.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

/// A coarse named region with a time budget.
#[derive(Debug, Clone)]
pub struct ProfileBlock {
    pub name: Arc<str>,
    pub started_at: Instant,
    pub budget: Duration,
}

impl ProfileBlock {
    pub fn start(name: Arc<str>, budget: Duration) -> Self {
        Self {
            name,
            started_at: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Instrumentation backend, shared by every guard that closes into it.
pub trait Profiler: Send + Sync {
    fn begin_scope(&self, name: &str);

    /// Close the innermost open scope named `name`.
    fn end_scope(&self, name: &str);

    fn begin_block(&self, block: &ProfileBlock);

    fn end_block(&self, block: &ProfileBlock);
}

/// Closes a profiling scope on drop.
pub struct ScopeGuard {
    profiler: Arc<dyn Profiler>,
    name: Arc<str>,
}

impl ScopeGuard {
    pub fn enter(profiler: Arc<dyn Profiler>, name: Arc<str>) -> Self {
        profiler.begin_scope(&name);
        Self { profiler, name }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.profiler.end_scope(&self.name);
    }
}

/// Closes a profile block on drop.
pub struct BlockGuard {
    profiler: Arc<dyn Profiler>,
    block: ProfileBlock,
}

impl BlockGuard {
    pub fn start(profiler: Arc<dyn Profiler>, name: Arc<str>, budget: Duration) -> Self {
        let block = ProfileBlock::start(name, budget);
        profiler.begin_block(&block);
        Self { profiler, block }
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.profiler.end_block(&self.block);
    }
}

/// Aggregate timings for one scope or block name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegionStats {
    pub count: u64,
    pub total_us: u64,
    pub max_us: u64,
    /// Blocks only: closures that ran past their budget.
    pub over_budget: u64,
}

impl RegionStats {
    fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.count += 1;
        self.total_us = self.total_us.saturating_add(us);
        self.max_us = self.max_us.max(us);
    }

    pub fn mean_us(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_us as f64 / self.count as f64
    }
}

/// All stats gathered by a [`TracingProfiler`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileReport {
    pub scopes: BTreeMap<String, RegionStats>,
    pub blocks: BTreeMap<String, RegionStats>,
}

#[derive(Default)]
struct Recorder {
    open_scopes: Vec<(String, Instant)>,
    report: ProfileReport,
}

/// Default profiler: logs through `tracing` and aggregates per-name stats.
///
/// Scopes log at `trace` when closed. Blocks log a `warn` when they run past
/// their budget.
#[derive(Default)]
pub struct TracingProfiler {
    recorder: Mutex<Recorder>,
}

impl TracingProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes currently open.
    pub fn depth(&self) -> usize {
        self.lock().open_scopes.len()
    }

    pub fn report(&self) -> ProfileReport {
        self.lock().report.clone()
    }

    pub fn report_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }

    fn lock(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Profiler for TracingProfiler {
    fn begin_scope(&self, name: &str) {
        self.lock()
            .open_scopes
            .push((name.to_string(), Instant::now()));
    }

    fn end_scope(&self, name: &str) {
        let mut recorder = self.lock();
        let Some(pos) = recorder.open_scopes.iter().rposition(|(n, _)| n == name) else {
            tracing::warn!(scope = name, "closing a scope that is not open");
            return;
        };
        let (name, started) = recorder.open_scopes.remove(pos);
        let elapsed = started.elapsed();
        let depth = recorder.open_scopes.len();
        tracing::trace!(scope = %name, depth, elapsed_us = elapsed.as_micros() as u64, "scope closed");
        recorder.report.scopes.entry(name).or_default().record(elapsed);
    }

    fn begin_block(&self, block: &ProfileBlock) {
        tracing::trace!(block = %block.name, budget_ms = block.budget.as_millis() as u64, "block opened");
    }

    fn end_block(&self, block: &ProfileBlock) {
        let elapsed = block.elapsed();
        let mut recorder = self.lock();
        let stats = recorder
            .report
            .blocks
            .entry(block.name.to_string())
            .or_default();
        stats.record(elapsed);
        if elapsed > block.budget {
            stats.over_budget += 1;
            tracing::warn!(
                block = %block.name,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = block.budget.as_millis() as u64,
                "frame block exceeded its budget"
            );
        }
    }
}
