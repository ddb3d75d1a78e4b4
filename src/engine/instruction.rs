//! Compiled instructions and reporter expressions
//!
//! The compiler hands the engine flat instruction arrays whose positions
//! are absolute jump targets. Instructions are a closed tagged union
//! stepped by a match loop; there is no per-primitive dispatch table and
//! no reflection.

use serde::{Deserialize, Serialize};

use super::agent::{AgentBits, AgentIndex, AgentKind, VarSlot};
use super::bindings::LetId;
use super::procedure::ProcedureId;
use super::value::Value;

/// Selects the agents an `ask` iterates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentSelector {
    /// Every live agent of a kind at the moment the ask executes.
    Kind(AgentKind),
    /// A fixed member list decided at compile time.
    Agents(AgentKind, Vec<AgentIndex>),
    /// Live agents of a kind satisfying a predicate, evaluated in a
    /// derived context per candidate (`with` semantics).
    Filtered {
        /// Candidate kind.
        kind: AgentKind,
        /// Predicate run for each candidate agent.
        predicate: Box<ReporterExpr>,
    },
}

/// Side-effecting operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Call a command procedure: allocate an activation, enter at 0.
    Call {
        /// Target procedure.
        procedure: ProcedureId,
        /// Argument expressions, evaluated left to right.
        args: Vec<ReporterExpr>,
    },
    /// Invoke an anonymous command task inline; `stop` inside the task
    /// body exits at this boundary via non-local exit.
    CallTask {
        /// Target task procedure (must have a parent).
        procedure: ProcedureId,
        /// Argument expressions.
        args: Vec<ReporterExpr>,
    },
    /// Return from the current procedure.
    Return,
    /// Report a value out of a reporter procedure.
    Report(ReporterExpr),
    /// The `stop` primitive; see [`crate::engine::context::Context::stop`].
    Stop,
    /// Run a block over an agentset, either inline-exclusively or by
    /// spawning a concurrent child job.
    Ask {
        /// Which agents participate.
        agents: AgentSelector,
        /// First instruction of the block body.
        block: usize,
        /// Where the asking context resumes afterwards.
        resume: usize,
    },
    /// Unconditional jump to an absolute target.
    Jump(usize),
    /// Jump when the condition reports false.
    JumpIfNot(ReporterExpr, usize),
    /// Loop closer compiled at the end of a forever button's body:
    /// latches the button's turn as over, finishes the context when a
    /// stop was requested, otherwise jumps back.
    ForeverLoopEnd {
        /// Target of the loop-back jump.
        back: usize,
    },
    /// Finish this context (end of an ask block or a once-button body).
    Done,
    /// Introduce a let binding visible until the end of the frame.
    Let {
        /// Binding id assigned by the compiler.
        id: LetId,
        /// Initial value.
        value: ReporterExpr,
    },
    /// Assign to an existing let binding; writes through a shared chain
    /// are visible to every context sharing the suffix.
    SetLet {
        /// Binding id to assign.
        id: LetId,
        /// New value.
        value: ReporterExpr,
    },
    /// Set an agent variable on the current agent.
    SetAgentVar {
        /// Variable slot.
        slot: VarSlot,
        /// New value.
        value: ReporterExpr,
    },
    /// Move the current turtle forward along its heading.
    Forward(ReporterExpr),
    /// Kill the current agent.
    Die,
    /// Do nothing; a placeholder switch-point carrier.
    Noop,
}

impl Op {
    /// Display name of this operation, used in error attribution.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Call { .. } => "call",
            Op::CallTask { .. } => "run",
            Op::Return => "end",
            Op::Report(_) => "report",
            Op::Stop => "stop",
            Op::Ask { .. } => "ask",
            Op::Jump(_) => "jump",
            Op::JumpIfNot(..) => "if",
            Op::ForeverLoopEnd { .. } => "forever-loop-end",
            Op::Done => "done",
            Op::Let { .. } => "let",
            Op::SetLet { .. } => "set",
            Op::SetAgentVar { .. } => "set",
            Op::Forward(_) => "fd",
            Op::Die => "die",
            Op::Noop => "noop",
        }
    }
}

/// Pure expressions evaluated while executing an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReporterExpr {
    /// A literal.
    Const(Value),
    /// Read a variable of the current agent.
    AgentVar(VarSlot),
    /// Read a variable of the asking agent (`myself`).
    MyselfVar(VarSlot),
    /// Read a let binding.
    LetRef(LetId),
    /// Read the current agent's formal argument at an index.
    Arg(usize),
    /// Numeric addition.
    Add(Box<ReporterExpr>, Box<ReporterExpr>),
    /// Numeric subtraction.
    Sub(Box<ReporterExpr>, Box<ReporterExpr>),
    /// Numeric multiplication.
    Mul(Box<ReporterExpr>, Box<ReporterExpr>),
    /// Numeric less-than.
    Less(Box<ReporterExpr>, Box<ReporterExpr>),
    /// Structural equality.
    Equals(Box<ReporterExpr>, Box<ReporterExpr>),
    /// Boolean negation.
    Not(Box<ReporterExpr>),
    /// Uniform random double in `[0, n)` drawn from the job's generator.
    RandomFloat(Box<ReporterExpr>),
    /// Call a named reporter procedure.
    CallReporter {
        /// Target procedure.
        procedure: ProcedureId,
        /// Argument expressions.
        args: Vec<ReporterExpr>,
    },
    /// Invoke an anonymous reporter task; `stop` inside exits here.
    CallReporterTask {
        /// Target task procedure (must have a parent).
        procedure: ProcedureId,
        /// Argument expressions.
        args: Vec<ReporterExpr>,
    },
}

/// One executable node in a procedure's code array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The operation to perform.
    pub op: Op,
    /// Agent kinds allowed to execute this instruction.
    pub agent_bits: AgentBits,
    /// Whether the scheduler may interleave other work after this
    /// instruction completes.
    pub switches: bool,
}

impl Instruction {
    /// An instruction usable by every agent kind, not a switch point.
    pub fn new(op: Op) -> Self {
        Self {
            op,
            agent_bits: AgentBits::ALL,
            switches: false,
        }
    }

    /// Restrict this instruction to the given kinds.
    pub fn for_agents(mut self, bits: AgentBits) -> Self {
        self.agent_bits = bits;
        self
    }

    /// Mark this instruction as a switch point.
    pub fn switch_point(mut self) -> Self {
        self.switches = true;
        self
    }
}
