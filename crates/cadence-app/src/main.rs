mod demo;

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;

use cadence_config::EngineConfig;
use cadence_core::{
    callbacks::TickCallbacks,
    deferred::DeferredQueue,
    dispatcher::{Collaborators, Dispatcher, DispatcherConfig, FrameOutcome},
    logging::{self, LogBuffer, LogLevel},
    perf::PerfCounters,
    profiler::TracingProfiler,
    state::TickState,
    subsystem::{Pumps, Vm},
};

use demo::{Backlog, BacklogPump, DemoLifecycle, DemoStages, ReloadHandle, Stats};

const DEFAULT_FRAMES: u64 = 240;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

fn configured_frames() -> u64 {
    env::var("CADENCE_FRAMES")
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_FRAMES)
}

/// Backlogs fed by the controller thread and retired by the pumps.
#[derive(Clone, Default)]
struct Backlogs {
    assets: Backlog,
    network: Backlog,
    http: Backlog,
    textures: Backlog,
}

/// Handles the controller thread uses to poke the engine from outside the
/// main thread.
struct Controls {
    state: Arc<TickState>,
    reload: ReloadHandle,
    deferred: DeferredQueue,
    backlogs: Backlogs,
    stop: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Post,
    Pause,
    Resume,
    Reload,
}

/// Drive the lifecycle from a second thread: feed work, post deferred calls,
/// pause and resume ticking, and queue a hot-reload.
fn spawn_controller(controls: Controls) -> JoinHandle<()> {
    thread::spawn(move || {
        let Controls {
            state,
            reload,
            deferred,
            backlogs,
            stop,
        } = controls;
        let wait = |d: Duration| {
            let until = Instant::now() + d;
            while Instant::now() < until && !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            !stop.load(Ordering::Relaxed)
        };

        let script = [
            (Duration::from_millis(300), Step::Post),
            (Duration::from_millis(500), Step::Pause),
            (Duration::from_millis(250), Step::Resume),
            (Duration::from_millis(400), Step::Reload),
            (Duration::from_millis(300), Step::Post),
        ];

        for (delay, step) in script {
            if !wait(delay) {
                return;
            }
            match step {
                Step::Post => {
                    backlogs.assets.add(12);
                    backlogs.network.add(6);
                    backlogs.http.add(3);
                    backlogs.textures.add(8);
                    for _ in 0..3 {
                        deferred.post(|vm: &mut dyn Vm| {
                            vm.invoke_static_method(demo::MAIN_CLASS, demo::ON_MESSAGE_METHOD)
                        });
                    }
                    tracing::info!("controller posted work and deferred calls");
                }
                Step::Pause => {
                    state.set_ticking(false);
                    let started = Instant::now();
                    while !state.is_paused() && wait(Duration::from_millis(5)) {}
                    tracing::info!(
                        waited_ms = started.elapsed().as_millis() as u64,
                        "controller observed full halt"
                    );
                }
                Step::Resume => state.set_ticking(true),
                Step::Reload => {
                    reload.queue();
                    tracing::info!("controller queued main assembly reload");
                }
            }
        }
    })
}

fn run(config: &EngineConfig, frames: u64) -> Result<()> {
    let stats = Arc::new(Stats::default());
    let deferred = DeferredQueue::new();
    let profiler = Arc::new(TracingProfiler::new());
    let backlogs = Backlogs::default();

    let ticks = TickCallbacks::new();
    {
        let stats = stats.clone();
        ticks.register(move || {
            let n = stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 60 == 0 {
                tracing::debug!(ticks = n, "script ticks");
            }
            Ok(())
        });
    }

    let lifecycle = DemoLifecycle::new(ticks, stats.clone());
    let reload = lifecycle.reload_handle();

    let mut dispatcher = Dispatcher::new(
        DispatcherConfig::from(config),
        Arc::new(TickState::new()),
        Collaborators {
            lifecycle: Box::new(lifecycle),
            deferred: Box::new(deferred.clone()),
            counters: Box::new(PerfCounters::new(
                config.perf.window(),
                config.perf.sample_interval(),
            )),
            profiler: profiler.clone(),
            pumps: Pumps {
                assets: Box::new(BacklogPump::new("assets", backlogs.assets.clone(), 4)),
                network: Box::new(BacklogPump::new("network", backlogs.network.clone(), 2)),
                http: Box::new(BacklogPump::new("http", backlogs.http.clone(), 1)),
                textures: Box::new(BacklogPump::new("textures", backlogs.textures.clone(), 2)),
            },
            stages: Box::new(DemoStages::new(3, stats.clone())),
        },
    );

    tracing::info!(
        profile = %dispatcher.config().profile_name,
        budget_ms = dispatcher.config().budget.as_millis() as u64,
        pause_sleep_ms = dispatcher.config().pause_sleep.as_millis() as u64,
        "dispatcher ready"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let controller = spawn_controller(Controls {
        state: dispatcher.state().clone(),
        reload,
        deferred,
        backlogs,
        stop: stop.clone(),
    });

    let mut paused_calls = 0u64;
    let mut failed_frames = 0u64;
    for _ in 0..frames {
        let started = Instant::now();
        match dispatcher.tick() {
            Ok(FrameOutcome::Paused) => paused_calls += 1,
            Ok(_) => {}
            Err(err) => {
                failed_frames += 1;
                tracing::error!(error = %format!("{err:#}"), "frame failed");
            }
        }
        if let Some(rest) = FRAME_INTERVAL.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    stop.store(true, Ordering::Relaxed);
    if controller.join().is_err() {
        tracing::warn!("controller thread panicked");
    }

    let summary = json!({
        "frames": dispatcher.frame_index(),
        "paused_calls": paused_calls,
        "failed_frames": failed_frames,
        "script": {
            "ticks": Stats::get(&stats.ticks),
            "messages": Stats::get(&stats.messages),
            "debugger_updates": Stats::get(&stats.debugger_updates),
            "reloads": Stats::get(&stats.reloads),
        },
        "frames_rendered": Stats::get(&stats.frames_rendered),
        "perf": dispatcher.counters().snapshot(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to encode run summary")?
    );

    for (name, block) in &profiler.report().blocks {
        tracing::info!(
            block = %name,
            frames = block.count,
            mean_us = block.mean_us(),
            max_us = block.max_us,
            over_budget = block.over_budget,
            "frame block timings"
        );
    }
    println!(
        "{}",
        profiler
            .report_json()
            .context("failed to encode profile report")?
    );
    Ok(())
}

/// Echo buffered warnings and errors to stderr.
fn report_problems(log_buffer: &LogBuffer) {
    for entry in log_buffer.drain() {
        if entry.level >= LogLevel::Warn {
            eprintln!("{entry}");
        }
    }
}

fn main() -> Result<()> {
    let log_buffer = logging::init();
    let config = EngineConfig::load().context("failed to load engine config")?;
    let frames = configured_frames();
    tracing::info!(
        app = %config.app.id,
        version = %config.app.version,
        frames,
        debugger = config.debugger_enabled(),
        "cadence starting up"
    );

    let res = run(&config, frames);
    report_problems(&log_buffer);
    res
}
