//! Per-agent execution cursors
//!
//! A context is one agent's cursor within a job: current activation,
//! instruction pointer, let-binding head, and the stop/finish flags that
//! drive non-local control flow. Stepping returns a [`StepOutcome`]
//! variant consumed by the job and scheduler through pattern matching;
//! there is no unwinding-as-control-flow.

use super::Engine;
use super::HaltSignal;
use super::activation::ActivationId;
use super::agent::{AgentIndex, AgentSet, VarSlot};
use super::bindings::BindingId;
use super::error::{EngineError, EngineResult};
use super::host::HostServices;
use super::instruction::{AgentSelector, Op, ReporterExpr};
use super::job::Job;
use super::procedure::{ProcedureId, ProcedureKind};
use super::value::Value;
use rand::Rng;

/// What a scheduling quantum of context execution produced.
#[derive(Debug)]
pub enum StepOutcome {
    /// A switch point was reached; the context has more to do.
    Continue,
    /// The context is finished.
    Finished,
    /// The context finished and requested its job stop (top-level `stop`).
    Stopping,
    /// The context suspended after spawning a concurrent child job.
    Spawned(Job),
    /// Execution failed; the job must record this as its terminal result.
    Fatal(EngineError),
}

/// Instruction-level control signal, internal to the step loop.
enum Signal {
    /// Advance to the next instruction.
    Advance,
    /// The instruction pointer was set by the instruction.
    Jumped,
    /// The context finished.
    FinishedContext,
    /// A concurrent child job was spawned; the context is waiting.
    Spawned(Job),
    /// `stop` inside an anonymous task; caught at the task-call boundary.
    NonLocalExit,
}

/// Result of executing exactly one instruction.
enum Exec {
    /// The instruction ran; `switches` is its switch-point flag.
    Ran { switches: bool },
    /// A child job was spawned.
    Spawned(Job),
    /// Non-local exit is propagating to the nearest task boundary.
    NonLocal,
}

/// One agent's execution cursor within a job.
#[derive(Debug)]
pub struct Context {
    /// Agent this cursor runs on behalf of.
    pub agent: AgentIndex,
    /// The agent's kind bit, checked against instruction masks.
    pub agent_bits: super::agent::AgentBits,
    /// Instruction pointer into the current activation's code.
    pub ip: usize,
    /// Current call frame. The context holds one arena reference on it.
    pub activation: ActivationId,
    /// The asking agent, when known.
    pub myself: Option<AgentIndex>,
    /// Head of this cursor's let-binding chain.
    pub bindings: Option<BindingId>,
    /// Whether this cursor is suspended on a child job.
    pub waiting: bool,
    /// The forever-button stop latch; set by `stop`, cleared by a normal
    /// return, and inspected by the loop closer.
    pub stopping: bool,
    /// Terminal; a finished context is never stepped again.
    pub finished: bool,
    /// Index of this context within its job's context table.
    pub slot: usize,
    /// Depth of inline procedure-call loops (reporter calls, task
    /// invocations); children spawned inside them must be exclusive.
    inline_calls: u32,
    /// Switch points seen since the last breathe call.
    switches_seen: u32,
}

impl Context {
    /// Fresh per-agent cursor for a job. The caller has already retained
    /// `activation` on this context's behalf.
    pub fn for_job(
        engine: &Engine,
        agent: AgentIndex,
        slot: usize,
        ip: usize,
        activation: ActivationId,
        bindings: Option<BindingId>,
        myself: Option<AgentIndex>,
    ) -> Self {
        Self {
            agent,
            agent_bits: engine.world.agent(agent).kind.bit(),
            ip,
            activation,
            myself,
            bindings,
            waiting: false,
            stopping: false,
            finished: false,
            slot,
            inline_calls: 0,
            switches_seen: 0,
        }
    }

    /// Short-lived derived cursor over another agent, sharing this
    /// context's activation and binding chain (no independent call
    /// stack). The caller must release the activation reference after
    /// use; [`Context::evaluate_over`] does both.
    fn derived(&self, engine: &mut Engine, agent: AgentIndex) -> Self {
        engine.activations.retain(self.activation);
        Self {
            agent,
            agent_bits: engine.world.agent(agent).kind.bit(),
            ip: self.ip,
            activation: self.activation,
            myself: Some(self.agent),
            bindings: self.bindings,
            waiting: false,
            stopping: false,
            finished: false,
            slot: self.slot,
            inline_calls: 0,
            switches_seen: 0,
        }
    }

    /// Evaluate a reporter expression as `agent`, in a derived context.
    pub fn evaluate_over(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        agent: AgentIndex,
        expr: &ReporterExpr,
    ) -> EngineResult<Value> {
        let mut derived = self.derived(engine, agent);
        let result = derived.eval(job, engine, host, halt, expr);
        engine.activations.release(derived.activation);
        result
    }

    /// Re-point this cursor at another agent of the same job, resetting
    /// its execution state. Used by exclusive jobs, which reuse a single
    /// context across their whole agentset.
    pub fn retarget(
        &mut self,
        engine: &mut Engine,
        agent: AgentIndex,
        ip: usize,
        base_activation: ActivationId,
        base_bindings: Option<BindingId>,
    ) {
        if self.activation != base_activation {
            engine.activations.retain(base_activation);
            engine.activations.release(self.activation);
            self.activation = base_activation;
        }
        self.bindings = engine.bindings.truncate(self.bindings, base_bindings);
        self.agent = agent;
        self.agent_bits = engine.world.agent(agent).kind.bit();
        self.ip = ip;
        self.finished = false;
        self.stopping = false;
        self.waiting = false;
    }

    /// Run until the next switch point, spawn, finish, or failure.
    pub fn step_concurrent(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
    ) -> StepOutcome {
        if engine.world.agent(self.agent).is_dead() {
            self.finished = true;
            return StepOutcome::Finished;
        }
        loop {
            match self.execute_one(job, engine, host, halt) {
                Ok(Exec::Ran { switches }) => {
                    if self.finished {
                        return if job.stopping {
                            StepOutcome::Stopping
                        } else {
                            StepOutcome::Finished
                        };
                    }
                    if switches {
                        return StepOutcome::Continue;
                    }
                }
                Ok(Exec::Spawned(child)) => return StepOutcome::Spawned(child),
                Ok(Exec::NonLocal) => {
                    return StepOutcome::Fatal(EngineError::runtime(
                        "stop",
                        "STOP escaped its procedure body",
                    ));
                }
                Err(err) => return StepOutcome::Fatal(err),
            }
        }
    }

    /// Run until this context is finished, ignoring switch points. Used
    /// by exclusive jobs, which must complete before their parent
    /// resumes.
    pub fn run_exclusive(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
    ) -> EngineResult<()> {
        if engine.world.agent(self.agent).is_dead() {
            self.finished = true;
            return Ok(());
        }
        while !self.finished && job.result.is_none() {
            match self.execute_one(job, engine, host, halt)? {
                Exec::Ran { .. } => {}
                Exec::Spawned(_) => {
                    return Err(EngineError::runtime(
                        "ask",
                        "concurrent child job inside an exclusive run",
                    ));
                }
                Exec::NonLocal => {
                    return Err(EngineError::runtime(
                        "stop",
                        "STOP escaped its procedure body",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Execute exactly one instruction at `ip`.
    fn execute_one(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
    ) -> EngineResult<Exec> {
        let procedure = engine.activations.get(self.activation).procedure;
        let instr = match engine.library.get(procedure).code.get(self.ip) {
            Some(instr) => instr.clone(),
            None => {
                return Err(EngineError::runtime(
                    "end",
                    "instruction pointer ran off the end of the procedure",
                ));
            }
        };
        if !instr.agent_bits.admits(self.agent_bits) {
            return Err(EngineError::AgentClass {
                instruction: instr.op.name().to_string(),
                expected: instr.agent_bits,
                actual: engine.world.agent(self.agent).kind,
            });
        }

        let signal = self.perform(&instr.op, job, engine, host, halt)?;

        // Coming up for air: the halt flag is a cheap atomic read, so it
        // is polled after every instruction; the breathe hook only fires
        // every breathe_interval switch points.
        if halt.is_requested() {
            if let Signal::Spawned(mut child) = signal {
                child.release_resources(engine);
            }
            self.finished = true;
            return Err(EngineError::Halted);
        }
        if instr.switches {
            self.switches_seen += 1;
            if self.switches_seen >= engine.config.breathe_interval {
                self.switches_seen = 0;
                if job.owner.owns_primary_jobs() {
                    host.breathe();
                }
            }
        }

        match signal {
            Signal::Advance => {
                self.ip += 1;
                Ok(Exec::Ran {
                    switches: instr.switches,
                })
            }
            Signal::Jumped | Signal::FinishedContext => Ok(Exec::Ran {
                switches: instr.switches,
            }),
            Signal::Spawned(child) => Ok(Exec::Spawned(child)),
            Signal::NonLocalExit => Ok(Exec::NonLocal),
        }
    }

    fn perform(
        &mut self,
        op: &Op,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
    ) -> EngineResult<Signal> {
        match op {
            Op::Noop => Ok(Signal::Advance),

            Op::Call { procedure, args } => {
                let values = self.eval_args(job, engine, host, halt, args)?;
                let return_address = self.ip + 1;
                self.push_activation(engine, *procedure, values, return_address)?;
                Ok(Signal::Jumped)
            }

            Op::CallTask { procedure, args } => {
                let values = self.eval_args(job, engine, host, halt, args)?;
                self.call_command_procedure(job, engine, host, halt, *procedure, values)?;
                Ok(Signal::Jumped)
            }

            Op::Return => Ok(self.return_from_procedure(job, engine)),

            Op::Report(expr) => {
                let value = self.eval(job, engine, host, halt, expr)?;
                job.result = Some(value);
                self.stopping = false;
                Ok(Signal::Advance)
            }

            Op::Stop => self.stop(job, engine),

            Op::Ask {
                agents,
                block,
                resume,
            } => self.perform_ask(job, engine, host, halt, agents, *block, *resume),

            Op::Jump(target) => {
                self.ip = *target;
                Ok(Signal::Jumped)
            }

            Op::JumpIfNot(condition, target) => {
                let value = self.eval(job, engine, host, halt, condition)?;
                match value.as_boolean() {
                    Some(true) => Ok(Signal::Advance),
                    Some(false) => {
                        self.ip = *target;
                        Ok(Signal::Jumped)
                    }
                    None => Err(EngineError::runtime(
                        "if",
                        format!("expected a true/false value, got a {}", value.type_name()),
                    )),
                }
            }

            Op::ForeverLoopEnd { back } => {
                job.button_turn_is_over = true;
                if self.stopping || job.stopping {
                    self.finished = true;
                    Ok(Signal::FinishedContext)
                } else {
                    let entry = engine.activations.get(self.activation).bindings_entry;
                    self.bindings = engine.bindings.truncate(self.bindings, entry);
                    self.ip = *back;
                    Ok(Signal::Jumped)
                }
            }

            Op::Done => {
                self.finished = true;
                Ok(Signal::FinishedContext)
            }

            Op::Let { id, value } => {
                let value = self.eval(job, engine, host, halt, value)?;
                self.bindings = Some(engine.bindings.push(self.bindings, *id, value));
                Ok(Signal::Advance)
            }

            Op::SetLet { id, value } => {
                let value = self.eval(job, engine, host, halt, value)?;
                if engine.bindings.set(self.bindings, *id, value) {
                    Ok(Signal::Advance)
                } else {
                    Err(EngineError::runtime(
                        "set",
                        format!("nothing named let-{} has been defined here", id.0),
                    ))
                }
            }

            Op::SetAgentVar { slot, value } => {
                let value = self.eval(job, engine, host, halt, value)?;
                if engine.world.agent_mut(self.agent).try_set(*slot, value) {
                    Ok(Signal::Advance)
                } else {
                    Err(EngineError::runtime("set", "no such agent variable"))
                }
            }

            Op::Forward(distance) => {
                let distance = self.eval_number(job, engine, host, halt, distance, "fd")?;
                let agent = engine.world.agent(self.agent);
                let heading = agent.get(VarSlot::Heading).as_number().ok_or_else(|| {
                    EngineError::runtime("fd", "this agent has no heading")
                })?;
                let x = agent.get(VarSlot::X).as_number().unwrap_or(0.0);
                let y = agent.get(VarSlot::Y).as_number().unwrap_or(0.0);
                let radians = heading.to_radians();
                let agent = engine.world.agent_mut(self.agent);
                agent.set(VarSlot::X, Value::Number(x + distance * radians.sin()));
                agent.set(VarSlot::Y, Value::Number(y + distance * radians.cos()));
                Ok(Signal::Advance)
            }

            Op::Die => {
                engine.world.kill(self.agent);
                self.finished = true;
                Ok(Signal::FinishedContext)
            }
        }
    }

    /// The `stop` state machine. Order matters: anonymous tasks exit
    /// non-locally; an ask-block cursor at its base frame only ends this
    /// agent's participation; reporters reject `stop` outright; a
    /// top-level frame stops the whole job.
    fn stop(&mut self, job: &mut Job, engine: &mut Engine) -> EngineResult<Signal> {
        let procedure_id = engine.activations.get(self.activation).procedure;
        let procedure = engine.library.get(procedure_id);
        if procedure.is_task() {
            return Ok(Signal::NonLocalExit);
        }
        if job.parent.is_some() && job.base_activation() == Some(self.activation) {
            self.finished = true;
            self.stopping = true;
            return Ok(Signal::FinishedContext);
        }
        if procedure.kind == ProcedureKind::Reporter {
            return Err(EngineError::StopInReporter);
        }
        if procedure.top_level {
            job.stopping = true;
            self.finished = true;
        }
        let signal = self.return_from_procedure(job, engine);
        self.stopping = true;
        Ok(if self.finished {
            Signal::FinishedContext
        } else {
            signal
        })
    }

    /// Pop to the caller's frame, truncating this frame's bindings and
    /// restoring the return address. A cursor with no caller (or an
    /// ask-block cursor returning from its base frame) finishes instead.
    fn return_from_procedure(&mut self, job: &Job, engine: &mut Engine) -> Signal {
        if job.parent.is_some() && job.base_activation() == Some(self.activation) {
            self.finished = true;
            return Signal::FinishedContext;
        }
        let (return_address, parent, entry) = {
            let record = engine.activations.get(self.activation);
            (record.return_address, record.parent, record.bindings_entry)
        };
        match parent {
            None => {
                self.finished = true;
                Signal::FinishedContext
            }
            Some(parent_id) => {
                self.bindings = engine.bindings.truncate(self.bindings, entry);
                engine.activations.retain(parent_id);
                engine.activations.release(self.activation);
                self.activation = parent_id;
                self.ip = return_address;
                self.stopping = false;
                Signal::Jumped
            }
        }
    }

    /// Allocate a frame for `procedure` and enter it at 0, transferring
    /// this context's arena reference down the chain. Command calls
    /// return past the call instruction; inline reporter calls return to
    /// it, because the enclosing instruction has not completed yet.
    fn push_activation(
        &mut self,
        engine: &mut Engine,
        procedure: ProcedureId,
        mut args: Vec<Value>,
        return_address: usize,
    ) -> EngineResult<()> {
        let depth = engine.activations.get(self.activation).depth;
        if depth >= engine.config.max_recursion_depth {
            return Err(EngineError::RecursionTooDeep { depth });
        }
        args.resize(engine.library.get(procedure).size, Value::Nothing);
        let frame = engine.activations.alloc(
            procedure,
            args,
            return_address,
            Some(self.activation),
            self.bindings,
        );
        engine.activations.release(self.activation);
        self.activation = frame;
        self.ip = 0;
        Ok(())
    }

    /// Run a reporter procedure inline until it reports or finishes,
    /// restoring the caller's frame on every exit path. Returns `None`
    /// when a non-local exit unwound to this boundary (`job.result` is
    /// left untouched) or when the procedure ended without reporting.
    fn call_reporter_procedure(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        procedure: ProcedureId,
        args: Vec<Value>,
    ) -> EngineResult<Option<Value>> {
        let entry = self.activation;
        let return_address = self.ip;
        self.push_activation(engine, procedure, args, return_address)?;
        self.inline_calls += 1;

        let mut outcome: EngineResult<Option<Value>> = Ok(None);
        loop {
            match self.execute_one(job, engine, host, halt) {
                Ok(Exec::Ran { .. }) => {
                    if let Some(value) = job.result.take() {
                        outcome = Ok(Some(value));
                        break;
                    }
                    // Finishing, or returning all the way to the entry
                    // frame, means the procedure never reported.
                    if self.finished || self.activation == entry {
                        break;
                    }
                }
                Ok(Exec::Spawned(_)) => {
                    outcome = Err(EngineError::runtime(
                        "ask",
                        "concurrent child job inside a reporter procedure",
                    ));
                    break;
                }
                Ok(Exec::NonLocal) => break,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        // Restore the caller's frame whatever happened above.
        self.inline_calls -= 1;
        if self.activation != entry {
            self.pop_current_frame(engine);
        }
        outcome
    }

    /// Run an anonymous command task inline until its frame returns.
    /// Non-local exits from `stop` inside the task body are caught here.
    fn call_command_procedure(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        procedure: ProcedureId,
        args: Vec<Value>,
    ) -> EngineResult<()> {
        let entry = self.activation;
        let return_address = self.ip + 1;
        self.push_activation(engine, procedure, args, return_address)?;
        self.inline_calls += 1;

        let mut outcome = Ok(());
        loop {
            match self.execute_one(job, engine, host, halt) {
                Ok(Exec::Ran { .. }) => {
                    if self.finished || self.activation == entry {
                        break;
                    }
                }
                Ok(Exec::Spawned(_)) => {
                    outcome = Err(EngineError::runtime(
                        "ask",
                        "concurrent child job inside an inline task",
                    ));
                    break;
                }
                Ok(Exec::NonLocal) => {
                    self.pop_current_frame(engine);
                    break;
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        self.inline_calls -= 1;
        outcome
    }

    /// Pop one frame without return-address dispatch; the inline call
    /// loops use this to restore their caller on abnormal exits.
    fn pop_current_frame(&mut self, engine: &mut Engine) {
        let (return_address, parent, entry) = {
            let record = engine.activations.get(self.activation);
            (record.return_address, record.parent, record.bindings_entry)
        };
        if let Some(parent_id) = parent {
            self.bindings = engine.bindings.truncate(self.bindings, entry);
            engine.activations.retain(parent_id);
            engine.activations.release(self.activation);
            self.activation = parent_id;
            self.ip = return_address;
        }
    }

    fn perform_ask(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        selector: &AgentSelector,
        block: usize,
        resume: usize,
    ) -> EngineResult<Signal> {
        let agents = self.resolve_selector(job, engine, host, halt, selector)?;
        if self.make_children_exclusive(job) {
            let mut child = Job::spawned_from(job, self, engine, agents, block, true);
            let result = child.run_exclusive(engine, host, halt);
            child.release_resources(engine);
            result?;
            // The child may have killed its own parent.
            if engine.world.agent(self.agent).is_dead() {
                self.finished = true;
                return Ok(Signal::FinishedContext);
            }
            self.ip = resume;
            Ok(Signal::Jumped)
        } else {
            let child = Job::spawned_from(job, self, engine, agents, block, false);
            self.ip = resume;
            self.waiting = true;
            Ok(Signal::Spawned(child))
        }
    }

    fn make_children_exclusive(&self, job: &Job) -> bool {
        self.inline_calls > 0 || job.exclusive
    }

    fn resolve_selector(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        selector: &AgentSelector,
    ) -> EngineResult<AgentSet> {
        match selector {
            AgentSelector::Kind(kind) => Ok(engine.world.agents_of_kind(*kind)),
            AgentSelector::Agents(kind, members) => Ok(AgentSet {
                kind: *kind,
                members: members.clone(),
            }),
            AgentSelector::Filtered { kind, predicate } => {
                let candidates = engine.world.agents_of_kind(*kind);
                let mut members = Vec::new();
                for agent in candidates.members {
                    let verdict =
                        self.evaluate_over(job, engine, host, halt, agent, predicate)?;
                    match verdict.as_boolean() {
                        Some(true) => members.push(agent),
                        Some(false) => {}
                        None => {
                            return Err(EngineError::runtime(
                                "with",
                                format!(
                                    "expected a true/false value, got a {}",
                                    verdict.type_name()
                                ),
                            ));
                        }
                    }
                }
                Ok(AgentSet {
                    kind: *kind,
                    members,
                })
            }
        }
    }

    fn eval_args(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        exprs: &[ReporterExpr],
    ) -> EngineResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(job, engine, host, halt, expr)?);
        }
        Ok(values)
    }

    fn eval_number(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        expr: &ReporterExpr,
        who: &str,
    ) -> EngineResult<f64> {
        let value = self.eval(job, engine, host, halt, expr)?;
        value.as_number().ok_or_else(|| {
            EngineError::runtime(who, format!("expected a number, got a {}", value.type_name()))
        })
    }

    /// Evaluate a reporter expression in this context.
    pub fn eval(
        &mut self,
        job: &mut Job,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        expr: &ReporterExpr,
    ) -> EngineResult<Value> {
        match expr {
            ReporterExpr::Const(value) => Ok(value.clone()),

            ReporterExpr::AgentVar(slot) => Ok(engine.world.agent(self.agent).get(*slot)),

            ReporterExpr::MyselfVar(slot) => {
                let myself = self.resolve_myself(job).ok_or_else(|| {
                    EngineError::runtime("myself", "there is no agent for MYSELF to refer to")
                })?;
                Ok(engine.world.agent(myself).get(*slot))
            }

            ReporterExpr::LetRef(id) => engine
                .bindings
                .get(self.bindings, *id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::runtime(
                        "let",
                        format!("nothing named let-{} has been defined here", id.0),
                    )
                }),

            ReporterExpr::Arg(index) => engine
                .activations
                .get(self.activation)
                .args
                .get(*index)
                .cloned()
                .ok_or_else(|| {
                    EngineError::runtime("arg", format!("no input at position {}", index))
                }),

            ReporterExpr::Add(a, b) => {
                let a = self.eval_number(job, engine, host, halt, a, "+")?;
                let b = self.eval_number(job, engine, host, halt, b, "+")?;
                Ok(Value::Number(a + b))
            }

            ReporterExpr::Sub(a, b) => {
                let a = self.eval_number(job, engine, host, halt, a, "-")?;
                let b = self.eval_number(job, engine, host, halt, b, "-")?;
                Ok(Value::Number(a - b))
            }

            ReporterExpr::Mul(a, b) => {
                let a = self.eval_number(job, engine, host, halt, a, "*")?;
                let b = self.eval_number(job, engine, host, halt, b, "*")?;
                Ok(Value::Number(a * b))
            }

            ReporterExpr::Less(a, b) => {
                let a = self.eval_number(job, engine, host, halt, a, "<")?;
                let b = self.eval_number(job, engine, host, halt, b, "<")?;
                Ok(Value::Boolean(a < b))
            }

            ReporterExpr::Equals(a, b) => {
                let a = self.eval(job, engine, host, halt, a)?;
                let b = self.eval(job, engine, host, halt, b)?;
                Ok(Value::Boolean(a == b))
            }

            ReporterExpr::Not(inner) => {
                let value = self.eval(job, engine, host, halt, inner)?;
                value.as_boolean().map(|flag| Value::Boolean(!flag)).ok_or_else(|| {
                    EngineError::runtime(
                        "not",
                        format!("expected a true/false value, got a {}", value.type_name()),
                    )
                })
            }

            ReporterExpr::RandomFloat(bound) => {
                let bound = self.eval_number(job, engine, host, halt, bound, "random-float")?;
                let draw: f64 = engine.world.rng_mut(job.rng).r#gen();
                Ok(Value::Number(draw * bound))
            }

            ReporterExpr::CallReporter { procedure, args } => {
                let values = self.eval_args(job, engine, host, halt, args)?;
                let reported =
                    self.call_reporter_procedure(job, engine, host, halt, *procedure, values)?;
                reported.ok_or_else(|| {
                    EngineError::runtime(
                        "report",
                        format!(
                            "{} ended without reporting a value",
                            engine.library.get(*procedure).display_name
                        ),
                    )
                })
            }

            ReporterExpr::CallReporterTask { procedure, args } => {
                let values = self.eval_args(job, engine, host, halt, args)?;
                let reported =
                    self.call_reporter_procedure(job, engine, host, halt, *procedure, values)?;
                reported.ok_or_else(|| {
                    EngineError::runtime("runresult", "the task did not report a value")
                })
            }
        }
    }

    fn resolve_myself(&mut self, job: &Job) -> Option<AgentIndex> {
        if self.myself.is_none() {
            // An ask-spawned cursor resolves myself lazily from the
            // parent link.
            self.myself = job.parent.as_ref().map(|link| link.agent);
        }
        self.myself
    }
}
