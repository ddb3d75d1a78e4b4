//! Error types for the execution engine
//!
//! Domain errors use thiserror; every instruction-level failure escalates
//! to job granularity (one erring agent aborts the whole job), and the
//! scheduler escalates further to owner granularity.

use thiserror::Error;

use super::agent::{AgentBits, AgentKind};

/// Errors raised while executing model code.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// An instruction ran on an agent kind it does not support.
    #[error("{instruction} can only be used by {}, not by a {}", expected.describe(), actual.display())]
    AgentClass {
        /// Name of the offending instruction.
        instruction: String,
        /// Kinds the instruction admits.
        expected: AgentBits,
        /// Kind that actually ran it.
        actual: AgentKind,
    },

    /// A primitive-level failure: bad argument, arithmetic fault,
    /// invalid jump target, and so on.
    #[error("runtime error in {instruction}: {message}")]
    Runtime {
        /// Name of the instruction that failed.
        instruction: String,
        /// Description of the failure.
        message: String,
    },

    /// The activation chain exceeded the configured ceiling.
    #[error("recursion too deep ({depth} nested procedure calls)")]
    RecursionTooDeep {
        /// Depth at which the call was refused.
        depth: usize,
    },

    /// `stop` executed inside a reporter procedure.
    #[error("STOP is not allowed inside TO-REPORT")]
    StopInReporter,

    /// Cooperative cancellation; unwinds to job scope and is never
    /// surfaced to the owner as a user error.
    #[error("execution halted")]
    Halted,

    /// A procedure, jump target, or argument count failed validation.
    #[error("program validation failed: {0}")]
    Validation(String),
}

impl EngineError {
    /// Build a runtime error attributed to an instruction.
    pub fn runtime(instruction: &str, message: impl Into<String>) -> Self {
        EngineError::Runtime {
            instruction: instruction.to_string(),
            message: message.into(),
        }
    }

    /// Whether this is the silent halt signal.
    pub fn is_halt(&self) -> bool {
        matches!(self, EngineError::Halted)
    }
}

/// Convenience result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
