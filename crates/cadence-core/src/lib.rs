//! Core infrastructure for the Cadence frame dispatcher.
//!
//! This crate provides the per-frame tick procedure and the pieces it
//! sequences: pause/resume state, the deferred call queue, ticks callbacks,
//! performance counters, profiling guards, collaborator traits, and the
//! logging subsystem.

pub mod callbacks;
pub mod deferred;
pub mod dispatcher;
pub mod logging;
pub mod perf;
pub mod profiler;
pub mod state;
pub mod subsystem;
