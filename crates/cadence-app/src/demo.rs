//! In-process stand-ins for the engine subsystems the dispatcher drives.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use cadence_core::{
    callbacks::TickCallbacks,
    subsystem::{
        Lifecycle, Pump, Stage, StageHost, TextureSubsystem, Vm, VmHost, DEBUGGER_CLIENT_CLASS,
        DEBUGGER_UPDATE_METHOD,
    },
};

/// Script class receiving messages posted from worker threads.
pub const MAIN_CLASS: &str = "demo.Main";
pub const ON_MESSAGE_METHOD: &str = "onMessage";

/// Counters shared between the demo world and the host loop.
#[derive(Default)]
pub struct Stats {
    pub ticks: AtomicU64,
    pub messages: AtomicU64,
    pub debugger_updates: AtomicU64,
    pub reloads: AtomicU64,
    pub frames_rendered: AtomicU64,
}

impl Stats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// A toy script VM. Each reload produces a new generation.
pub struct ScriptVm {
    generation: u64,
    ticks: TickCallbacks,
    stats: Arc<Stats>,
}

impl ScriptVm {
    pub fn new(generation: u64, ticks: TickCallbacks, stats: Arc<Stats>) -> Self {
        Self {
            generation,
            ticks,
            stats,
        }
    }
}

impl Vm for ScriptVm {
    fn invoke_static_method(&mut self, class: &str, method: &str) -> Result<()> {
        match (class, method) {
            (DEBUGGER_CLIENT_CLASS, DEBUGGER_UPDATE_METHOD) => {
                self.stats.debugger_updates.fetch_add(1, Ordering::Relaxed);
            }
            (MAIN_CLASS, ON_MESSAGE_METHOD) => {
                let n = self.stats.messages.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(generation = self.generation, messages = n, "script received message");
            }
            _ => bail!("no static method {class}.{method} in generation {}", self.generation),
        }
        Ok(())
    }

    fn run_registered_ticks(&mut self) -> Result<()> {
        self.ticks.invoke()
    }
}

/// Lifecycle controller owning the VM and the reload flag.
pub struct DemoLifecycle {
    vm: Option<Box<dyn Vm>>,
    generation: u64,
    reload_queued: Arc<AtomicBool>,
    ticks: TickCallbacks,
    stats: Arc<Stats>,
}

impl DemoLifecycle {
    pub fn new(ticks: TickCallbacks, stats: Arc<Stats>) -> Self {
        Self {
            vm: Some(Box::new(ScriptVm::new(1, ticks.clone(), stats.clone()))),
            generation: 1,
            reload_queued: Arc::new(AtomicBool::new(false)),
            ticks,
            stats,
        }
    }

    /// Handle other threads use to request a hot-reload.
    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle(self.reload_queued.clone())
    }
}

impl VmHost for DemoLifecycle {
    fn active_vm(&mut self) -> Option<&mut (dyn Vm + 'static)> {
        self.vm.as_deref_mut()
    }
}

impl Lifecycle for DemoLifecycle {
    fn is_reload_queued(&self) -> bool {
        self.reload_queued.load(Ordering::Acquire)
    }

    fn reload_main_assembly(&mut self) -> Result<()> {
        self.generation += 1;
        self.vm = Some(Box::new(ScriptVm::new(
            self.generation,
            self.ticks.clone(),
            self.stats.clone(),
        )));
        self.stats.reloads.fetch_add(1, Ordering::Relaxed);
        self.reload_queued.store(false, Ordering::Release);
        tracing::info!(generation = self.generation, "main assembly reloaded");
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReloadHandle(Arc<AtomicBool>);

impl ReloadHandle {
    pub fn queue(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Backlog of work items shared with producers on other threads.
#[derive(Clone, Default)]
pub struct Backlog(Arc<AtomicUsize>);

impl Backlog {
    pub fn add(&self, items: usize) {
        self.0.fetch_add(items, Ordering::Relaxed);
    }

    pub fn pending(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Take up to `max` items.
    fn take(&self, max: usize) -> usize {
        let mut taken = 0;
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pending| {
                taken = pending.min(max);
                Some(pending - taken)
            });
        taken
    }
}

/// A pump that retires a bounded number of backlog items per frame.
pub struct BacklogPump {
    name: &'static str,
    backlog: Backlog,
    per_frame: usize,
}

impl BacklogPump {
    pub fn new(name: &'static str, backlog: Backlog, per_frame: usize) -> Self {
        Self {
            name,
            backlog,
            per_frame,
        }
    }

    fn advance(&mut self) {
        let done = self.backlog.take(self.per_frame);
        if done > 0 {
            tracing::trace!(pump = self.name, done, remaining = self.backlog.pending(), "work retired");
        }
    }
}

impl Pump for BacklogPump {
    fn name(&self) -> &'static str {
        self.name
    }

    fn pump(&mut self) -> Result<()> {
        self.advance();
        Ok(())
    }
}

impl TextureSubsystem for BacklogPump {
    fn tick(&mut self) -> Result<()> {
        self.advance();
        Ok(())
    }
}

pub struct DemoStage {
    stats: Arc<Stats>,
}

impl Stage for DemoStage {
    fn render_frame(&mut self) -> Result<()> {
        self.stats.frames_rendered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Renderer whose main stage is constructed after a few frames.
pub struct DemoStages {
    stage: Option<Box<dyn Stage>>,
    build_after: u64,
    polls: u64,
    stats: Arc<Stats>,
}

impl DemoStages {
    pub fn new(build_after: u64, stats: Arc<Stats>) -> Self {
        Self {
            stage: None,
            build_after,
            polls: 0,
            stats,
        }
    }
}

impl StageHost for DemoStages {
    fn main_stage(&mut self) -> Option<&mut (dyn Stage + 'static)> {
        self.polls += 1;
        if self.stage.is_none() && self.polls > self.build_after {
            tracing::info!(after_frames = self.build_after, "main stage constructed");
            self.stage = Some(Box::new(DemoStage {
                stats: self.stats.clone(),
            }));
        }
        self.stage.as_deref_mut()
    }
}
