//! Lightweight per-frame performance counters.
//!
//! Tracks frames-per-second over a sliding window, frame intervals, and an
//! interval-gated sample of the process resident set size. Cheap enough to
//! tick every frame; the expensive `sysinfo` refresh only happens when the
//! sample interval has elapsed.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::subsystem::FrameCounters;

/// A point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerfSnapshot {
    /// Frames ticked since the counters were created.
    pub frames: u64,
    /// Frames per second over the measurement window.
    pub fps: f64,
    /// Interval between the two most recent frames, in milliseconds.
    pub last_frame_ms: Option<f64>,
    /// Longest frame interval still inside the window, in milliseconds.
    pub worst_frame_ms: Option<f64>,
    /// Resident set size of this process in bytes, if sampled.
    pub resident_bytes: Option<u64>,
}

/// Interval-gated process memory sampler.
struct MemorySampler {
    sys: System,
    pid: Pid,
    interval: Duration,
    last_refresh: Option<Instant>,
    resident_bytes: Option<u64>,
}

impl MemorySampler {
    fn new(interval: Duration) -> Self {
        Self {
            sys: System::new(),
            pid: Pid::from_u32(std::process::id()),
            interval,
            last_refresh: None,
            resident_bytes: None,
        }
    }

    /// Refresh if the interval has elapsed. Returns `true` if it did.
    fn maybe_refresh(&mut self, now: Instant) -> bool {
        let due = match self.last_refresh {
            None => true,
            Some(last) => now
                .checked_duration_since(last)
                .is_some_and(|elapsed| elapsed >= self.interval),
        };
        if !due {
            return false;
        }

        self.last_refresh = Some(now);
        self.sys
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);
        self.resident_bytes = self.sys.process(self.pid).map(|p| p.memory());
        true
    }
}

pub struct PerfCounters {
    timestamps: VecDeque<Instant>,
    window: Duration,
    frames: u64,
    memory: Option<MemorySampler>,
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Some(Duration::from_secs(1)))
    }
}

impl PerfCounters {
    /// Create counters with the given fps window.
    ///
    /// `sample_interval` of `None` disables process memory sampling.
    pub fn new(window: Duration, sample_interval: Option<Duration>) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
            frames: 0,
            memory: sample_interval.map(MemorySampler::new),
        }
    }

    /// Record a frame at `now`.
    pub fn tick(&mut self, now: Instant) {
        self.frames += 1;
        self.timestamps.push_back(now);
        self.prune(now);
        if let Some(memory) = &mut self.memory {
            if memory.maybe_refresh(now) {
                tracing::trace!(resident_bytes = ?memory.resident_bytes, "sampled process memory");
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames per second over the window. `0.0` with fewer than two frames.
    pub fn fps(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        self.timestamps.len() as f64 / self.window.as_secs_f64()
    }

    pub fn last_frame(&self) -> Option<Duration> {
        let mut recent = self.timestamps.iter().rev();
        let newest = *recent.next()?;
        let previous = *recent.next()?;
        Some(newest.saturating_duration_since(previous))
    }

    pub fn worst_frame(&self) -> Option<Duration> {
        self.timestamps
            .iter()
            .zip(self.timestamps.iter().skip(1))
            .map(|(a, b)| b.saturating_duration_since(*a))
            .max()
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            frames: self.frames,
            fps: self.fps(),
            last_frame_ms: self.last_frame().map(duration_ms),
            worst_frame_ms: self.worst_frame().map(duration_ms),
            resident_bytes: self.memory.as_ref().and_then(|m| m.resident_bytes),
        }
    }

    /// Remove timestamps older than `now - window`.
    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&front) = self.timestamps.front() {
            if front < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl FrameCounters for PerfCounters {
    fn tick(&mut self, now: Instant) {
        PerfCounters::tick(self, now);
    }

    fn snapshot(&self) -> PerfSnapshot {
        PerfCounters::snapshot(self)
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> PerfCounters {
        PerfCounters::new(Duration::from_secs(1), None)
    }

    #[test]
    fn empty_counters_report_zero() {
        let perf = counters();
        assert_eq!(perf.fps(), 0.0);
        assert_eq!(perf.frames(), 0);
        assert!(perf.last_frame().is_none());
        assert!(perf.worst_frame().is_none());
    }

    #[test]
    fn single_frame_has_no_rate() {
        let mut perf = counters();
        perf.tick(Instant::now());
        assert_eq!(perf.fps(), 0.0);
        assert_eq!(perf.frames(), 1);
    }

    #[test]
    fn fps_over_window() {
        let mut perf = counters();
        let base = Instant::now();
        for i in 0..10 {
            perf.tick(base + Duration::from_millis(i * 100));
        }
        let fps = perf.fps();
        assert!(fps > 9.0 && fps < 11.0, "fps was {}", fps);
    }

    #[test]
    fn frame_intervals_tracked() {
        let mut perf = counters();
        let base = Instant::now();
        perf.tick(base);
        perf.tick(base + Duration::from_millis(16));
        perf.tick(base + Duration::from_millis(66));
        perf.tick(base + Duration::from_millis(82));

        assert_eq!(perf.last_frame(), Some(Duration::from_millis(16)));
        assert_eq!(perf.worst_frame(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn old_frames_pruned_but_total_kept() {
        let mut perf = counters();
        let base = Instant::now();
        for i in 0..5 {
            perf.tick(base + Duration::from_millis(i * 200));
        }
        for i in 0..3 {
            perf.tick(base + Duration::from_millis(2000 + i * 300));
        }

        assert_eq!(perf.frames(), 8);
        assert_eq!(perf.timestamps.len(), 3);
    }

    #[test]
    fn snapshot_serializes() {
        let mut perf = counters();
        let base = Instant::now();
        perf.tick(base);
        perf.tick(base + Duration::from_millis(500));

        let snap = perf.snapshot();
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.resident_bytes, None);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["frames"], 2);
        assert_eq!(json["last_frame_ms"], 500.0);
    }

    #[test]
    fn memory_sampling_is_interval_gated() {
        let mut sampler = MemorySampler::new(Duration::from_secs(1));
        let base = Instant::now();
        assert!(sampler.maybe_refresh(base));
        assert!(!sampler.maybe_refresh(base + Duration::from_millis(500)));
        assert!(sampler.maybe_refresh(base + Duration::from_millis(1000)));
    }
}
