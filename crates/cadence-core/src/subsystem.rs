use std::time::Instant;

use anyhow::{Context, Result};

use crate::perf::PerfSnapshot;

/// Class that hosts the script-side debugger client.
pub const DEBUGGER_CLIENT_CLASS: &str = "system.debugger.DebuggerClient";

/// Static method on [`DEBUGGER_CLIENT_CLASS`] called once per frame while a
/// debugger wait is configured.
pub const DEBUGGER_UPDATE_METHOD: &str = "update";

/// A running scripting virtual machine.
///
/// Collaborator traits are `Send` so the dispatcher can move between threads
/// between frames.
///
/// The dispatcher only ever borrows a VM for the duration of one frame; the
/// instance itself is owned by the [`VmHost`].
pub trait Vm: Send {
    /// Invoke a static method by fully qualified class name.
    fn invoke_static_method(&mut self, class: &str, method: &str) -> Result<()>;

    /// Run every callback registered on the VM's ticks list.
    fn run_registered_ticks(&mut self) -> Result<()>;
}

/// Owner of the active VM, if any.
pub trait VmHost: Send {
    /// Return the VM to drive this frame, or `None` when no VM is installed.
    fn active_vm(&mut self) -> Option<&mut (dyn Vm + 'static)>;
}

/// The application lifecycle controller.
///
/// Lifecycle owns the VM, so it is also the dispatcher's [`VmHost`].
pub trait Lifecycle: VmHost {
    /// Return `true` while a hot-reload of the main script assembly is pending.
    fn is_reload_queued(&self) -> bool;

    /// Replace the active VM's program. Synchronous: returns once the reload
    /// has completed (or failed).
    fn reload_main_assembly(&mut self) -> Result<()>;
}

/// Main-thread marking and delivery of deferred cross-boundary calls.
///
/// Implemented by [`crate::deferred::DeferredQueue`]. Both operations must be
/// safe to call every frame with nothing pending.
pub trait DeferredCalls: Send {
    fn mark_main_thread(&self);

    /// Deliver every pending call into `vm`. Returns the number delivered.
    fn drain_into(&self, vm: &mut dyn Vm) -> Result<usize>;
}

/// The coarse performance-counter subsystem, ticked once per frame.
///
/// Implemented by [`crate::perf::PerfCounters`].
pub trait FrameCounters: Send {
    fn tick(&mut self, now: Instant);

    fn snapshot(&self) -> PerfSnapshot;
}

/// A non-blocking, advance-pending-work call on an I/O-bound subsystem.
///
/// Pumps must return quickly regardless of outstanding work and must be
/// safe to call when nothing is pending.
pub trait Pump: Send {
    /// Short name used in logs and error context (e.g. `"assets"`).
    fn name(&self) -> &'static str;

    fn pump(&mut self) -> Result<()>;
}

/// The texture/GPU resource manager.
pub trait TextureSubsystem: Send {
    /// Advance texture lifecycle and upload work by one frame.
    fn tick(&mut self) -> Result<()>;
}

/// Root of the scene graph.
pub trait Stage: Send {
    /// Draw one frame of the scene graph.
    fn render_frame(&mut self) -> Result<()>;
}

/// Owner of the main stage, if it has been constructed yet.
pub trait StageHost: Send {
    fn main_stage(&mut self) -> Option<&mut (dyn Stage + 'static)>;
}

/// The four subsystem pumps, in the order the dispatcher runs them.
pub struct Pumps {
    pub assets: Box<dyn Pump>,
    pub network: Box<dyn Pump>,
    pub http: Box<dyn Pump>,
    pub textures: Box<dyn TextureSubsystem>,
}

impl Pumps {
    /// Run every pump once, in fixed order. Stops at the first failure.
    pub fn run(&mut self) -> Result<()> {
        for pump in [&mut self.assets, &mut self.network, &mut self.http] {
            let name = pump.name();
            tracing::trace!(pump = name, "pumping");
            pump.pump().with_context(|| format!("{name} pump failed"))?;
        }
        self.textures
            .tick()
            .context("texture subsystem tick failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use anyhow::bail;

    struct FakePump {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Pump for FakePump {
        fn name(&self) -> &'static str {
            self.name
        }
        fn pump(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(self.name.to_string());
            if self.fail {
                bail!("{} exploded", self.name);
            }
            Ok(())
        }
    }

    struct FakeTextures(Arc<Mutex<Vec<String>>>);

    impl TextureSubsystem for FakeTextures {
        fn tick(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("textures".into());
            Ok(())
        }
    }

    fn pumps(log: &Arc<Mutex<Vec<String>>>, failing: Option<&'static str>) -> Pumps {
        let pump = |name: &'static str| -> Box<dyn Pump> {
            Box::new(FakePump {
                name,
                fail: failing == Some(name),
                log: log.clone(),
            })
        };
        Pumps {
            assets: pump("assets"),
            network: pump("network"),
            http: pump("http"),
            textures: Box::new(FakeTextures(log.clone())),
        }
    }

    #[test]
    fn run_is_ordered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        pumps(&log, None).run().unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["assets", "network", "http", "textures"]
        );
    }

    #[test]
    fn failure_stops_later_pumps_and_names_the_pump() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = pumps(&log, Some("network")).run().unwrap_err();
        assert!(err.to_string().contains("network pump failed"));
        assert_eq!(log.lock().unwrap().as_slice(), &["assets", "network"]);
    }
}
