use std::sync::{Arc, Mutex};

use anyhow::Result;

/// A callback invoked once per frame on the main thread.
pub type TickFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Handle returned by [`TickCallbacks::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

#[derive(Default)]
struct Entries {
    next_id: u64,
    list: Vec<(TickHandle, TickFn)>,
}

/// Ordered list of "ticks" listeners.
///
/// Callbacks run synchronously in registration order. [`invoke`](Self::invoke)
/// iterates over a snapshot taken before the first callback runs, so a
/// callback may register or unregister listeners (including itself); changes
/// take effect from the next invocation.
///
/// Cloning yields another handle to the same list.
#[derive(Clone, Default)]
pub struct TickCallbacks {
    entries: Arc<Mutex<Entries>>,
}

impl TickCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        callback: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> TickHandle {
        let mut entries = self.lock();
        let handle = TickHandle(entries.next_id);
        entries.next_id += 1;
        entries.list.push((handle, Arc::new(callback)));
        handle
    }

    /// Remove a listener. Returns `false` if the handle was not registered.
    pub fn unregister(&self, handle: TickHandle) -> bool {
        let mut entries = self.lock();
        let before = entries.list.len();
        entries.list.retain(|(h, _)| *h != handle);
        entries.list.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().list.is_empty()
    }

    /// Invoke every listener in registration order.
    ///
    /// Stops at, and returns, the first error.
    pub fn invoke(&self) -> Result<()> {
        let snapshot: Vec<TickFn> = self.lock().list.iter().map(|(_, f)| f.clone()).collect();
        for callback in snapshot {
            callback()?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A panicking listener never holds the lock, so poisoning carries no
        // torn state.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn() -> Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move || {
            log.lock().unwrap().push(tag.to_string());
            Ok(())
        }
    }

    #[test]
    fn invoke_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ticks = TickCallbacks::new();
        ticks.register(recorder(&log, "a"));
        ticks.register(recorder(&log, "b"));
        ticks.register(recorder(&log, "c"));

        ticks.invoke().unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["a", "b", "c"]);
    }

    #[test]
    fn invoke_on_empty_is_noop() {
        let ticks = TickCallbacks::new();
        assert!(ticks.is_empty());
        ticks.invoke().unwrap();
    }

    #[test]
    fn unregister_removes_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ticks = TickCallbacks::new();
        let a = ticks.register(recorder(&log, "a"));
        ticks.register(recorder(&log, "b"));

        assert!(ticks.unregister(a));
        assert!(!ticks.unregister(a));
        assert_eq!(ticks.len(), 1);

        ticks.invoke().unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["b"]);
    }

    #[test]
    fn error_stops_later_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ticks = TickCallbacks::new();
        ticks.register(recorder(&log, "a"));
        ticks.register(|| Err(anyhow!("listener failed")));
        ticks.register(recorder(&log, "c"));

        let err = ticks.invoke().unwrap_err();
        assert!(err.to_string().contains("listener failed"));
        assert_eq!(log.lock().unwrap().as_slice(), &["a"]);
    }

    #[test]
    fn listener_can_unregister_itself_during_invoke() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ticks = TickCallbacks::new();
        let slot: Arc<Mutex<Option<TickHandle>>> = Arc::new(Mutex::new(None));

        let handle = {
            let ticks_inner = ticks.clone();
            let slot = slot.clone();
            let log = log.clone();
            ticks.register(move || {
                log.lock().unwrap().push("once".into());
                if let Some(h) = *slot.lock().unwrap() {
                    ticks_inner.unregister(h);
                }
                Ok(())
            })
        };
        *slot.lock().unwrap() = Some(handle);
        ticks.register(recorder(&log, "always"));

        ticks.invoke().unwrap();
        ticks.invoke().unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &["once", "always", "always"]
        );
    }

    #[test]
    fn listener_registered_during_invoke_runs_next_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ticks = TickCallbacks::new();
        {
            let ticks_inner = ticks.clone();
            let log_inner = log.clone();
            let added = Arc::new(Mutex::new(false));
            ticks.register(move || {
                let mut added = added.lock().unwrap();
                if !*added {
                    *added = true;
                    ticks_inner.register(recorder(&log_inner, "late"));
                }
                Ok(())
            });
        }

        ticks.invoke().unwrap();
        assert!(log.lock().unwrap().is_empty());
        ticks.invoke().unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &["late"]);
    }
}
