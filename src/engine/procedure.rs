//! Procedures and the program library
//!
//! A procedure is a named, immutable sequence of instructions produced by
//! the compiler. Anonymous tasks are procedures with a parent link. The
//! library registry validates jump targets and arities once, before any
//! execution; after that pass nothing about a procedure changes.

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::instruction::{Instruction, Op, ReporterExpr};

/// Identifier of a procedure in the [`ProgramLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcedureId(pub usize);

/// Whether a procedure is run for effect or for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureKind {
    /// Runs for its side effects.
    Command,
    /// Must report exactly one value.
    Reporter,
}

/// A compiled procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    /// Command or reporter.
    pub kind: ProcedureKind,
    /// Source-level name.
    pub name: String,
    /// Name shown in errors and job listings.
    pub display_name: String,
    /// Flat code array; instruction positions are absolute jump targets.
    pub code: Vec<Instruction>,
    /// Formal argument count plus local slots; fixed after registration.
    pub size: usize,
    /// Formal argument count (a prefix of `size`).
    pub args_count: usize,
    /// Whether a job may enter this procedure directly.
    pub top_level: bool,
    /// Parent procedure; `Some` iff this is an anonymous task.
    pub parent: Option<ProcedureId>,
    /// Nested anonymous tasks, in definition order.
    pub children: Vec<ProcedureId>,
}

impl Procedure {
    /// Whether this procedure is an anonymous task.
    pub fn is_task(&self) -> bool {
        self.parent.is_some()
    }
}

/// Builder for a [`Procedure`], used by the compiler boundary and tests.
#[derive(Debug)]
pub struct ProcedureBuilder {
    kind: ProcedureKind,
    name: String,
    code: Vec<Instruction>,
    args_count: usize,
    locals_count: usize,
    top_level: bool,
    parent: Option<ProcedureId>,
}

impl ProcedureBuilder {
    /// Start a command procedure.
    pub fn command(name: impl Into<String>) -> Self {
        Self::new(ProcedureKind::Command, name)
    }

    /// Start a reporter procedure.
    pub fn reporter(name: impl Into<String>) -> Self {
        Self::new(ProcedureKind::Reporter, name)
    }

    fn new(kind: ProcedureKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            code: Vec::new(),
            args_count: 0,
            locals_count: 0,
            top_level: false,
            parent: None,
        }
    }

    /// Declare the formal argument count.
    pub fn args(mut self, count: usize) -> Self {
        self.args_count = count;
        self
    }

    /// Declare extra local slots.
    pub fn locals(mut self, count: usize) -> Self {
        self.locals_count = count;
        self
    }

    /// Mark this procedure as directly enterable by a job.
    pub fn top_level(mut self) -> Self {
        self.top_level = true;
        self
    }

    /// Mark this procedure as an anonymous task of `parent`.
    pub fn task_of(mut self, parent: ProcedureId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Append an instruction.
    pub fn instr(mut self, instruction: Instruction) -> Self {
        self.code.push(instruction);
        self
    }

    /// Append several instructions.
    pub fn code(mut self, instructions: Vec<Instruction>) -> Self {
        self.code.extend(instructions);
        self
    }

    fn build(self, display_parent: Option<&str>) -> Procedure {
        let display_name = match display_parent {
            Some(parent) => format!("(anonymous procedure from: {})", parent),
            None => format!("procedure {}", self.name.to_uppercase()),
        };
        Procedure {
            kind: self.kind,
            name: self.name,
            display_name,
            code: self.code,
            size: self.args_count + self.locals_count,
            args_count: self.args_count,
            top_level: self.top_level,
            parent: self.parent,
            children: Vec::new(),
        }
    }
}

/// Registry of every compiled procedure in one model.
#[derive(Debug, Default)]
pub struct ProgramLibrary {
    procedures: Vec<Procedure>,
    validated: bool,
}

impl ProgramLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure and return its id. Registration is only
    /// possible before validation.
    pub fn register(&mut self, builder: ProcedureBuilder) -> ProcedureId {
        debug_assert!(!self.validated, "library already validated");
        let display_parent = builder
            .parent
            .map(|ProcedureId(i)| self.procedures[i].display_name.clone());
        let procedure = builder.build(display_parent.as_deref());
        let id = ProcedureId(self.procedures.len());
        if let Some(ProcedureId(parent)) = procedure.parent {
            self.procedures[parent].children.push(id);
        }
        self.procedures.push(procedure);
        id
    }

    /// Borrow a procedure.
    pub fn get(&self, ProcedureId(index): ProcedureId) -> &Procedure {
        &self.procedures[index]
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// One-time validation pass over every procedure: jump targets in
    /// range, call targets registered, arities consistent, task links
    /// well formed. Run before the first job is scheduled.
    pub fn validate(&mut self) -> EngineResult<()> {
        for (index, procedure) in self.procedures.iter().enumerate() {
            let len = procedure.code.len();
            let here = |msg: String| {
                EngineError::Validation(format!("{}: {}", procedure.display_name, msg))
            };
            for instruction in &procedure.code {
                match &instruction.op {
                    Op::Jump(target) | Op::ForeverLoopEnd { back: target } => {
                        if *target >= len {
                            return Err(here(format!("jump target {} out of range", target)));
                        }
                    }
                    Op::JumpIfNot(_, target) => {
                        if *target >= len {
                            return Err(here(format!("jump target {} out of range", target)));
                        }
                    }
                    Op::Ask { block, resume, .. } => {
                        if *block >= len || *resume > len {
                            return Err(here("ask block out of range".to_string()));
                        }
                    }
                    Op::Call { procedure: id, args }
                    | Op::CallTask { procedure: id, args } => {
                        self.check_call(*id, args.len(), ProcedureKind::Command)
                            .map_err(here)?;
                        if matches!(instruction.op, Op::CallTask { .. })
                            && self.procedures[id.0].parent.is_none()
                        {
                            return Err(here(format!(
                                "run target {} is not an anonymous procedure",
                                self.procedures[id.0].name
                            )));
                        }
                    }
                    Op::Report(_) if procedure.kind != ProcedureKind::Reporter => {
                        return Err(here(
                            "REPORT can only be used inside TO-REPORT".to_string(),
                        ));
                    }
                    _ => {}
                }
                self.validate_exprs(&instruction.op, index)?;
            }
        }
        self.validated = true;
        Ok(())
    }

    fn check_call(
        &self,
        ProcedureId(target): ProcedureId,
        supplied: usize,
        kind: ProcedureKind,
    ) -> Result<(), String> {
        let procedure = match self.procedures.get(target) {
            Some(procedure) => procedure,
            None => return Err(format!("unknown procedure id {}", target)),
        };
        if procedure.kind != kind {
            return Err(format!(
                "{} is a {:?} procedure, called as {:?}",
                procedure.name, procedure.kind, kind
            ));
        }
        if procedure.args_count != supplied {
            return Err(format!(
                "{} expects {} inputs, got {}",
                procedure.name, procedure.args_count, supplied
            ));
        }
        Ok(())
    }

    fn validate_exprs(&self, op: &Op, owner: usize) -> EngineResult<()> {
        let mut stack: Vec<&ReporterExpr> = Vec::new();
        match op {
            Op::Report(e) | Op::Forward(e) | Op::JumpIfNot(e, _) => stack.push(e),
            Op::Let { value, .. } | Op::SetLet { value, .. } | Op::SetAgentVar { value, .. } => {
                stack.push(value)
            }
            Op::Call { args, .. } | Op::CallTask { args, .. } => stack.extend(args.iter()),
            Op::Ask { agents, .. } => {
                if let super::instruction::AgentSelector::Filtered { predicate, .. } = agents {
                    stack.push(&**predicate);
                }
            }
            _ => {}
        }
        while let Some(expr) = stack.pop() {
            match expr {
                ReporterExpr::CallReporter { procedure, args }
                | ReporterExpr::CallReporterTask { procedure, args } => {
                    let task = matches!(expr, ReporterExpr::CallReporterTask { .. });
                    self.check_call(*procedure, args.len(), ProcedureKind::Reporter)
                        .map_err(|msg| {
                            EngineError::Validation(format!(
                                "{}: {}",
                                self.procedures[owner].display_name, msg
                            ))
                        })?;
                    if task && self.procedures[procedure.0].parent.is_none() {
                        return Err(EngineError::Validation(format!(
                            "{}: runresult target is not an anonymous procedure",
                            self.procedures[owner].display_name
                        )));
                    }
                    stack.extend(args.iter());
                }
                ReporterExpr::Add(a, b)
                | ReporterExpr::Sub(a, b)
                | ReporterExpr::Mul(a, b)
                | ReporterExpr::Less(a, b)
                | ReporterExpr::Equals(a, b) => {
                    stack.push(&**a);
                    stack.push(&**b);
                }
                ReporterExpr::Not(inner) | ReporterExpr::RandomFloat(inner) => {
                    stack.push(&**inner)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::Value;

    #[test]
    fn register_links_tasks_to_parents() {
        let mut library = ProgramLibrary::new();
        let go = library.register(ProcedureBuilder::command("go").top_level());
        let task = library.register(
            ProcedureBuilder::command("go-task")
                .task_of(go)
                .instr(Instruction::new(Op::Return)),
        );
        assert!(library.get(task).is_task());
        assert_eq!(library.get(go).children, vec![task]);
        assert!(
            library
                .get(task)
                .display_name
                .contains("anonymous procedure")
        );
    }

    #[test]
    fn validate_rejects_out_of_range_jumps() {
        let mut library = ProgramLibrary::new();
        library.register(
            ProcedureBuilder::command("bad")
                .top_level()
                .instr(Instruction::new(Op::Jump(17))),
        );
        let err = library.validate().unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn validate_rejects_arity_mismatch() {
        let mut library = ProgramLibrary::new();
        let helper = library.register(
            ProcedureBuilder::command("helper")
                .args(2)
                .instr(Instruction::new(Op::Return)),
        );
        library.register(
            ProcedureBuilder::command("caller").top_level().instr(
                Instruction::new(Op::Call {
                    procedure: helper,
                    args: vec![ReporterExpr::Const(Value::Number(1.0))],
                }),
            ),
        );
        assert!(library.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_programs() {
        let mut library = ProgramLibrary::new();
        library.register(
            ProcedureBuilder::command("go")
                .top_level()
                .instr(Instruction::new(Op::Noop))
                .instr(Instruction::new(Op::Jump(0)).switch_point()),
        );
        assert!(library.validate().is_ok());
    }
}
