use std::sync::atomic::{AtomicBool, Ordering};

/// Pause/resume flags shared between the lifecycle controller and the
/// frame dispatcher.
///
/// `ticking` is written by the lifecycle controller (any thread) and read
/// once per frame. `paused` is written only by the dispatcher and polled by
/// lifecycle code waiting for a full halt.
#[derive(Debug)]
pub struct TickState {
    ticking: AtomicBool,
    paused: AtomicBool,
}

impl Default for TickState {
    fn default() -> Self {
        Self::new()
    }
}

impl TickState {
    /// Ticking enabled, not paused.
    pub fn new() -> Self {
        Self {
            ticking: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    /// Enable or disable frame advancement. Takes effect on the next frame.
    pub fn set_ticking(&self, enabled: bool) {
        self.ticking.store(enabled, Ordering::Release);
    }

    /// Return `true` once the dispatcher has observed a disabled frame and
    /// stopped doing work.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Record that a disabled frame was observed.
    ///
    /// Returns `true` on the transition from running to paused.
    pub(crate) fn enter_pause(&self) -> bool {
        !self.paused.swap(true, Ordering::AcqRel)
    }

    /// Clear the paused flag.
    ///
    /// Returns `true` on the transition from paused to running.
    pub(crate) fn leave_pause(&self) -> bool {
        self.paused.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_ticking_and_unpaused() {
        let state = TickState::new();
        assert!(state.is_ticking());
        assert!(!state.is_paused());
    }

    #[test]
    fn set_ticking_round_trips() {
        let state = TickState::new();
        state.set_ticking(false);
        assert!(!state.is_ticking());
        state.set_ticking(true);
        assert!(state.is_ticking());
    }

    #[test]
    fn enter_pause_reports_only_first_transition() {
        let state = TickState::new();
        assert!(state.enter_pause());
        assert!(!state.enter_pause());
        assert!(state.is_paused());
    }

    #[test]
    fn leave_pause_is_idempotent() {
        let state = TickState::new();
        assert!(!state.leave_pause());
        state.enter_pause();
        assert!(state.leave_pause());
        assert!(!state.leave_pause());
        assert!(!state.is_paused());
    }
}
