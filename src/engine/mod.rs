//! Execution engine and public API
//!
//! This module provides the `Engine` struct that owns all execution
//! state (the world, the compiled program library, and the activation
//! and binding arenas) plus the configuration every subsystem reads.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Submodules
pub mod activation;
pub mod agent;
pub mod bindings;
pub mod context;
pub mod error;
pub mod host;
pub mod instruction;
pub mod job;
pub mod procedure;
pub mod scheduler;
pub mod thread;
pub mod value;

use activation::ActivationArena;
use agent::World;
use bindings::BindingArena;
use job::JobId;
use procedure::ProgramLibrary;

/// Configuration for one engine.
///
/// Every host-configurable knob lives here; there is no process-global
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed both world generators derive from.
    pub seed: u64,
    /// Model-defined agent variables beyond the built-in slots.
    pub custom_variables: usize,
    /// Activation-chain depth at which calls fail with a recursion
    /// error instead of a platform stack fault.
    pub max_recursion_depth: usize,
    /// Switch points between host breathe calls.
    pub breathe_interval: u32,
    /// Throttle for secondary (background) jobs, and the sleep bound for
    /// an idle scheduler thread, in milliseconds.
    pub update_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            custom_variables: 0,
            max_recursion_depth: 1000,
            breathe_interval: 4,
            update_interval_ms: 50,
        }
    }
}

/// Cooperative cancellation flag shared between the scheduler thread and
/// its host. Contexts poll it between instructions; there is no
/// preemption.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    /// Create an unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear the request once the worklists have drained.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    /// Whether cancellation is requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// All execution state for one model: configuration, world, compiled
/// procedures, and the activation/binding arenas jobs allocate from.
#[derive(Debug)]
pub struct Engine {
    /// Configuration this engine was built with.
    pub config: EngineConfig,
    /// Mutable model state.
    pub world: World,
    /// Compiled procedures, validated at construction.
    pub library: ProgramLibrary,
    /// Call-frame arena.
    pub activations: ActivationArena,
    /// Let-binding arena.
    pub bindings: BindingArena,
    next_job_id: u64,
}

impl Engine {
    /// Create an engine over a validated program library.
    ///
    /// Validation failures surface here, before any job is scheduled.
    pub fn new(config: EngineConfig, mut library: ProgramLibrary) -> anyhow::Result<Self> {
        library.validate()?;
        let world = World::new(config.seed, config.custom_variables);
        Ok(Self {
            config,
            world,
            library,
            activations: ActivationArena::new(),
            bindings: BindingArena::new(),
            next_job_id: 0,
        })
    }

    /// Mint the next job id.
    pub fn next_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        id
    }
}

// Re-export commonly used types
pub use context::{Context, StepOutcome};
pub use error::{EngineError, EngineResult};
pub use host::{HostServices, NullHost};
pub use job::{Job, JobOwner, JobState, OwnerKind};
pub use scheduler::Scheduler;
pub use thread::{JobThread, Session};
