use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::Result;

use crate::subsystem::{DeferredCalls, Vm};

/// A call queued from outside the main thread, delivered into the VM at a
/// controlled point in the frame.
pub type DeferredCall = Box<dyn FnOnce(&mut dyn Vm) -> Result<()> + Send>;

/// Deferred queue failures callers may want to match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredError {
    /// `drain_into` was called from a thread other than the marked main thread.
    NotMainThread,
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredError::NotMainThread => {
                write!(f, "deferred calls can only be drained on the main thread")
            }
        }
    }
}

impl std::error::Error for DeferredError {}

#[derive(Default)]
struct Shared {
    main_thread: Mutex<Option<ThreadId>>,
    queue: Mutex<VecDeque<DeferredCall>>,
}

/// Cross-thread FIFO of calls bound for the VM.
///
/// The frame uses the queue in a three-phase cycle:
/// 1. **Mark**: the dispatcher re-marks its thread as main every frame.
/// 2. **Post**: any thread pushes calls into the queue.
/// 3. **Drain**: on the main thread, all pending calls run in order.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct DeferredQueue {
    shared: Arc<Shared>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the calling thread as the main thread.
    pub fn mark_main_thread(&self) {
        *lock(&self.shared.main_thread) = Some(thread::current().id());
    }

    /// Return `true` when called from the most recently marked main thread.
    pub fn is_main_thread(&self) -> bool {
        *lock(&self.shared.main_thread) == Some(thread::current().id())
    }

    /// Enqueue a call at the back of the queue. Safe from any thread.
    pub fn post(&self, call: impl FnOnce(&mut dyn Vm) -> Result<()> + Send + 'static) {
        self.queue().push_back(Box::new(call));
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue().is_empty()
    }

    /// Run every pending call against `vm`, preserving insertion order.
    ///
    /// Calls posted while draining wait for the next drain. If a call fails,
    /// the calls after it are put back at the front of the queue and the
    /// error is returned. Returns the number of calls delivered.
    pub fn drain_into(&self, vm: &mut dyn Vm) -> Result<usize> {
        if !self.is_main_thread() {
            return Err(DeferredError::NotMainThread.into());
        }

        let mut batch = std::mem::take(&mut *self.queue());
        let mut delivered = 0;

        while let Some(call) = batch.pop_front() {
            if let Err(err) = call(&mut *vm) {
                let undelivered = batch.len();
                let mut queue = self.queue();
                for call in batch.into_iter().rev() {
                    queue.push_front(call);
                }
                tracing::debug!(delivered, undelivered, "deferred drain interrupted");
                return Err(err.context(format!("deferred call #{} failed", delivered + 1)));
            }
            delivered += 1;
        }

        if delivered > 0 {
            tracing::trace!(delivered, "drained deferred calls");
        }
        Ok(delivered)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<DeferredCall>> {
        lock(&self.shared.queue)
    }
}

impl DeferredCalls for DeferredQueue {
    fn mark_main_thread(&self) {
        DeferredQueue::mark_main_thread(self);
    }

    fn drain_into(&self, vm: &mut dyn Vm) -> Result<usize> {
        DeferredQueue::drain_into(self, vm)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
