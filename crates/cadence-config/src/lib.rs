//! Configuration types and loaders for Cadence.
//!
//! This crate owns the on-disk engine configuration schema so the dispatcher
//! and the host application share a single source of truth.

pub mod engine;

pub use engine::{AppSection, DebuggerSection, EngineConfig, FrameSection, PerfSection};
