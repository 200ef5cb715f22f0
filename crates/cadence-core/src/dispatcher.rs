//! The per-frame tick procedure.
//!
//! [`Dispatcher::tick`] is called once per engine frame by the host's frame
//! pump. Each call either parks (ticking disabled) or runs one frame:
//!
//! 1. re-mark the main thread and drain deferred calls into the VM,
//! 2. tick the performance counters,
//! 3. reload the main assembly, or run the debugger update and VM ticks,
//! 4. pump assets, network, HTTP, and textures,
//! 5. render the main stage.
//!
//! The frame is bracketed by a profiling scope and a profile block that are
//! closed however the frame exits. Collaborator failures are not handled
//! here; they propagate to the caller.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cadence_config::EngineConfig;

use crate::profiler::{BlockGuard, Profiler, ScopeGuard};
use crate::state::TickState;
use crate::subsystem::{
    DeferredCalls, FrameCounters, Lifecycle, Pumps, StageHost, DEBUGGER_CLIENT_CLASS,
    DEBUGGER_UPDATE_METHOD,
};

/// Settings the dispatcher reads every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Name shared by the frame's profiling scope and profile block.
    pub profile_name: Arc<str>,
    /// Budget of the frame's profile block.
    pub budget: Duration,
    /// Sleep per call while ticking is disabled.
    pub pause_sleep: Duration,
    /// Greater than zero enables the per-frame debugger update.
    pub wait_for_debugger: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for DispatcherConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            profile_name: config.frame.profile_name.as_str().into(),
            budget: config.frame.budget(),
            pause_sleep: config.frame.pause_sleep(),
            wait_for_debugger: config.debugger.wait_for_debugger,
        }
    }
}

/// What a single [`Dispatcher::tick`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Ticking was disabled; the call slept and returned.
    Paused,
    /// A main assembly reload ran in place of the VM ticks.
    Reloaded,
    /// The VM ticks ran.
    Ticked,
    /// No VM was installed; only pumps and rendering ran.
    Idle,
}

/// The collaborators a dispatcher drives.
pub struct Collaborators {
    pub lifecycle: Box<dyn Lifecycle>,
    pub deferred: Box<dyn DeferredCalls>,
    pub counters: Box<dyn FrameCounters>,
    pub profiler: Arc<dyn Profiler>,
    pub pumps: Pumps,
    pub stages: Box<dyn StageHost>,
}

/// Sequences one frame of work across the engine's subsystems.
pub struct Dispatcher {
    config: DispatcherConfig,
    state: Arc<TickState>,
    lifecycle: Box<dyn Lifecycle>,
    deferred: Box<dyn DeferredCalls>,
    counters: Box<dyn FrameCounters>,
    profiler: Arc<dyn Profiler>,
    pumps: Pumps,
    stages: Box<dyn StageHost>,
    frame_index: u64,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, state: Arc<TickState>, parts: Collaborators) -> Self {
        Self {
            config,
            state,
            lifecycle: parts.lifecycle,
            deferred: parts.deferred,
            counters: parts.counters,
            profiler: parts.profiler,
            pumps: parts.pumps,
            stages: parts.stages,
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Shared pause/resume flags.
    pub fn state(&self) -> &Arc<TickState> {
        &self.state
    }

    pub fn counters(&self) -> &dyn FrameCounters {
        self.counters.as_ref()
    }

    /// Number of frames that got past the pause gate.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Run one frame.
    pub fn tick(&mut self) -> Result<FrameOutcome> {
        if !self.state.is_ticking() {
            if self.state.enter_pause() {
                tracing::info!(frame = self.frame_index, "ticking disabled, dispatcher paused");
            }
            thread::sleep(self.config.pause_sleep);
            return Ok(FrameOutcome::Paused);
        }

        if self.state.leave_pause() {
            tracing::info!(frame = self.frame_index, "ticking enabled, dispatcher resumed");
        }

        self.frame_index += 1;
        let _span = tracing::trace_span!("frame", index = self.frame_index).entered();
        let _scope = ScopeGuard::enter(self.profiler.clone(), self.config.profile_name.clone());

        let reload_queued = self.lifecycle.is_reload_queued();
        let mut vm = if reload_queued {
            None
        } else {
            self.lifecycle.active_vm()
        };

        // Thread identity can change between frames on some platforms.
        self.deferred.mark_main_thread();
        if let Some(vm) = vm.as_deref_mut() {
            self.deferred
                .drain_into(vm)
                .context("failed to drain deferred calls")?;
        }

        self.counters.tick(Instant::now());

        let _block = BlockGuard::start(
            self.profiler.clone(),
            self.config.profile_name.clone(),
            self.config.budget,
        );

        let outcome = if reload_queued {
            tracing::info!(frame = self.frame_index, "reloading main assembly");
            self.lifecycle
                .reload_main_assembly()
                .context("main assembly reload failed")?;
            FrameOutcome::Reloaded
        } else if let Some(vm) = vm {
            if self.config.wait_for_debugger > 0 {
                vm.invoke_static_method(DEBUGGER_CLIENT_CLASS, DEBUGGER_UPDATE_METHOD)
                    .context("debugger update failed")?;
            }
            vm.run_registered_ticks().context("ticks callbacks failed")?;
            FrameOutcome::Ticked
        } else {
            FrameOutcome::Idle
        };

        self.pumps.run()?;

        if let Some(stage) = self.stages.main_stage() {
            stage.render_frame().context("stage render failed")?;
        }

        Ok(outcome)
    }
}
