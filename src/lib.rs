//! Flockvm – A cooperative virtual machine for agent-based model execution
//!
//! This crate implements the execution core of an agent-based modeling
//! runtime:
//! - Compiled procedures interpreted over per-agent execution cursors
//! - Cooperative, non-preemptive multiplexing of many pseudo-concurrent
//!   agent jobs on one dedicated scheduler thread
//! - `ask` semantics: concurrent child jobs with interleaving, or
//!   exclusive inline runs when no interleaving is observable
//! - Deterministic replay: a fixed seed fixes agent iteration order and
//!   every stochastic primitive
//! - Explicit outcome-based control flow for `stop`, halts, and errors
//!
//! Rendering, widget layout, file I/O, and networking are host concerns
//! reached through the [`engine::host::HostServices`] boundary.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Execution core: world, instructions, jobs, contexts, and scheduling
pub mod engine;

// Re-export key types for convenience
pub use engine::{Engine, EngineConfig, EngineError, JobThread};

/// Current version of the flockvm engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
