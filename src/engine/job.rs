//! Jobs: scheduled units of execution
//!
//! A job runs one procedure over one agentset on behalf of an owner.
//! Concurrent jobs hold one context per agent and interleave them a
//! quantum at a time; exclusive jobs reuse a single context and run each
//! agent to completion before the next. A job spawned by `ask` carries a
//! link to the asking context so the scheduler can wake it afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Engine;
use super::HaltSignal;
use super::activation::ActivationId;
use super::agent::{AgentIndex, AgentKind, AgentSet, RngSource};
use super::bindings::BindingId;
use super::context::{Context, StepOutcome};
use super::error::{EngineError, EngineResult};
use super::host::HostServices;
use super::procedure::ProcedureId;
use super::value::Value;

/// Identifier of a job, unique within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

/// Identity token of a job owner; jobs sharing an owner fail together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Mint a fresh owner identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of host-side actor requested a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    /// A forever button; its jobs loop until stopped.
    ForeverButton,
    /// A once button; its jobs run a single pass.
    OnceButton,
    /// The command center.
    CommandCenter,
    /// A plot pen or other secondary widget.
    Plot,
    /// Engine-internal work.
    System,
}

/// The actor a job runs on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOwner {
    /// Identity token; error containment groups jobs by it.
    pub id: OwnerId,
    /// Display name for logs and error surfaces.
    pub name: String,
    /// Owner kind.
    pub kind: OwnerKind,
}

impl JobOwner {
    /// Create an owner with a fresh identity.
    pub fn new(name: impl Into<String>, kind: OwnerKind) -> Self {
        Self {
            id: OwnerId::new(),
            name: name.into(),
            kind,
        }
    }

    /// Whether this owner is a button, for turn-taking fairness.
    pub fn is_button(&self) -> bool {
        matches!(self.kind, OwnerKind::ForeverButton | OwnerKind::OnceButton)
    }

    /// Whether this owner's jobs belong on the primary worklist.
    pub fn owns_primary_jobs(&self) -> bool {
        matches!(
            self.kind,
            OwnerKind::ForeverButton | OwnerKind::OnceButton | OwnerKind::CommandCenter
        )
    }
}

/// Link from an ask-spawned job back to the asking context.
#[derive(Debug, Clone, Copy)]
pub struct ParentLink {
    /// Job that spawned this one.
    pub job: JobId,
    /// Context slot of the asking cursor within that job.
    pub context: usize,
    /// Agent the asking cursor was running as (`myself` for children).
    pub agent: AgentIndex,
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Eligible for stepping.
    Running,
    /// Finished; awaiting removal by the scheduler.
    Stopping,
    /// Removed from its worklist; terminal.
    Removed,
}

/// A scheduled unit of execution.
#[derive(Debug)]
pub struct Job {
    /// Unique id.
    pub id: JobId,
    /// Who asked for this job.
    pub owner: JobOwner,
    /// Agents this job iterates over.
    pub agents: AgentSet,
    /// Instruction address every context starts at.
    pub address: usize,
    /// Top-level procedure; `None` for ask-spawned children, which run
    /// inside their parent's activation.
    pub procedure: Option<ProcedureId>,
    /// Whether this job runs each agent to completion (no interleaving).
    pub exclusive: bool,
    /// Lifecycle state.
    pub state: JobState,
    /// Set when the user (or a top-level `stop`) asked this job to end;
    /// forever-button contexts finish at their next loop closer.
    pub stopping: bool,
    /// Latched by the forever loop closer once per full pass; the
    /// scheduler clears it when rotating the active button.
    pub button_turn_is_over: bool,
    /// Value reported by a reporter run, if any.
    pub result: Option<Value>,
    /// Terminal error, recorded by the scheduler on failure.
    pub error: Option<EngineError>,
    /// Which world generator this job draws from; children capture the
    /// spawning job's source, never a fresh one.
    pub rng: RngSource,
    /// Link to the asking context for ask-spawned jobs.
    pub parent: Option<ParentLink>,
    /// Debug timestamp (not used for determinism).
    pub submitted_at: DateTime<Utc>,

    base_activation: Option<ActivationId>,
    base_bindings: Option<BindingId>,
    held_activation: Option<ActivationId>,
    contexts: Vec<Option<Context>>,
    order: Vec<AgentIndex>,
    initialized: bool,
    released: bool,
}

impl Job {
    /// Create a top-level job entering `procedure` over `agents`.
    pub fn top_level(
        id: JobId,
        owner: JobOwner,
        agents: AgentSet,
        procedure: ProcedureId,
        rng: RngSource,
        exclusive: bool,
    ) -> Self {
        Self {
            id,
            owner,
            agents,
            address: 0,
            procedure: Some(procedure),
            exclusive,
            state: JobState::Running,
            stopping: false,
            button_turn_is_over: false,
            result: None,
            error: None,
            rng,
            parent: None,
            submitted_at: Utc::now(),
            base_activation: None,
            base_bindings: None,
            held_activation: None,
            contexts: Vec::new(),
            order: Vec::new(),
            initialized: false,
            released: false,
        }
    }

    /// Create a child job spawned by an asking context. The child shares
    /// the asking frame and binding chain, and captures the parent's
    /// generator source.
    pub fn spawned_from(
        parent: &Job,
        asking: &Context,
        engine: &mut Engine,
        agents: AgentSet,
        address: usize,
        exclusive: bool,
    ) -> Self {
        engine.activations.retain(asking.activation);
        Self {
            id: engine.next_job_id(),
            owner: parent.owner.clone(),
            agents,
            address,
            procedure: None,
            exclusive,
            state: JobState::Running,
            stopping: false,
            button_turn_is_over: false,
            result: None,
            error: None,
            rng: parent.rng,
            parent: Some(ParentLink {
                job: parent.id,
                context: asking.slot,
                agent: asking.agent,
            }),
            submitted_at: Utc::now(),
            base_activation: Some(asking.activation),
            base_bindings: asking.bindings,
            held_activation: Some(asking.activation),
            contexts: Vec::new(),
            order: Vec::new(),
            initialized: false,
            released: false,
        }
    }

    /// The activation ask-spawned cursors treat as their base frame.
    pub fn base_activation(&self) -> Option<ActivationId> {
        self.base_activation
    }

    /// Whether this job was entered through its own procedure.
    pub fn is_top_level(&self) -> bool {
        self.procedure.is_some()
    }

    /// Whether this is a running forever-button job over the given kind,
    /// for [`crate::engine::scheduler::Scheduler::join_forever_buttons`].
    pub fn is_forever_button_over(&self, kind: AgentKind) -> bool {
        self.owner.kind == OwnerKind::ForeverButton
            && self.is_top_level()
            && !self.exclusive
            && self.state == JobState::Running
            && self.agents.kind == kind
    }

    /// Number of live (non-hole) contexts, for tests and summaries.
    pub fn context_count(&self) -> usize {
        self.contexts.iter().filter(|slot| slot.is_some()).count()
    }

    /// Borrow a context by slot, if it is still present.
    pub fn context(&self, slot: usize) -> Option<&Context> {
        self.contexts.get(slot).and_then(|c| c.as_ref())
    }

    /// Clear a suspended cursor's waiting flag; called by the scheduler
    /// when the child job it spawned is removed.
    pub fn clear_waiting(&mut self, slot: usize) {
        if let Some(Some(context)) = self.contexts.get_mut(slot) {
            context.waiting = false;
        }
    }

    fn ensure_initialized(&mut self, engine: &mut Engine) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let base = match self.procedure {
            Some(procedure) => {
                let size = engine.library.get(procedure).size;
                let frame = engine.activations.alloc(
                    procedure,
                    vec![Value::Nothing; size],
                    0,
                    None,
                    None,
                );
                self.held_activation = Some(frame);
                frame
            }
            None => self
                .base_activation
                .expect("child job carries its parent's activation"),
        };
        let myself = self.parent.as_ref().map(|link| link.agent);
        let order = self
            .agents
            .shuffled_members(engine.world.rng_mut(self.rng));
        if self.exclusive {
            if let Some(&first) = order.first() {
                engine.activations.retain(base);
                self.contexts.push(Some(Context::for_job(
                    engine,
                    first,
                    0,
                    self.address,
                    base,
                    self.base_bindings,
                    myself,
                )));
            }
        } else {
            for (slot, &agent) in order.iter().enumerate() {
                engine.activations.retain(base);
                self.contexts.push(Some(Context::for_job(
                    engine,
                    agent,
                    slot,
                    self.address,
                    base,
                    self.base_bindings,
                    myself,
                )));
            }
        }
        self.order = order;
    }

    /// Add a context for an agent created after this job started; new
    /// turtles join running forever-button jobs this way.
    pub fn new_agent_joining(&mut self, engine: &mut Engine, agent: AgentIndex) {
        self.ensure_initialized(engine);
        let base = self
            .held_activation
            .or(self.base_activation)
            .expect("initialized job holds a base activation");
        engine.activations.retain(base);
        let slot = self.contexts.len();
        let myself = self.parent.as_ref().map(|link| link.agent);
        self.contexts.push(Some(Context::for_job(
            engine,
            agent,
            slot,
            self.address,
            base,
            self.base_bindings,
            myself,
        )));
    }

    /// Advance every live context one scheduling quantum, in agentset
    /// order. Spawned child jobs are appended to `spawned`. An error
    /// finishes the whole job and is returned for the scheduler to
    /// contain.
    pub fn step(
        &mut self,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
        spawned: &mut Vec<Job>,
    ) -> EngineResult<()> {
        if self.exclusive {
            return self.run_exclusive(engine, host, halt);
        }
        self.ensure_initialized(engine);
        let mut all_done = true;
        for index in 0..self.contexts.len() {
            if self.state != JobState::Running {
                break;
            }
            let Some(mut context) = self.contexts[index].take() else {
                continue;
            };
            if context.finished {
                // Punch a hole and free the cursor's share of the frame.
                engine.activations.release(context.activation);
                engine
                    .bindings
                    .truncate(context.bindings, self.base_bindings);
                continue;
            }
            if context.waiting {
                all_done = false;
                self.contexts[index] = Some(context);
                continue;
            }
            all_done = false;
            let outcome = context.step_concurrent(self, engine, host, halt);
            self.contexts[index] = Some(context);
            match outcome {
                StepOutcome::Continue | StepOutcome::Finished | StepOutcome::Stopping => {}
                StepOutcome::Spawned(child) => spawned.push(child),
                StepOutcome::Fatal(err) => {
                    self.finish();
                    return Err(err);
                }
            }
        }
        if self.state == JobState::Running && all_done {
            self.finish();
        }
        Ok(())
    }

    /// Run each agent to completion, one after another, reusing a single
    /// context. Exclusive jobs never yield to the scheduler mid-run.
    pub fn run_exclusive(
        &mut self,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        halt: &HaltSignal,
    ) -> EngineResult<()> {
        self.ensure_initialized(engine);
        let mut result = Ok(());
        if let Some(mut context) = self.contexts.get_mut(0).and_then(|slot| slot.take()) {
            let base = context.activation;
            for index in 0..self.order.len() {
                let agent = self.order[index];
                context.retarget(engine, agent, self.address, base, self.base_bindings);
                if let Err(err) = context.run_exclusive(self, engine, host, halt) {
                    result = Err(err);
                    break;
                }
                if self.result.is_some() {
                    break;
                }
            }
            self.contexts[0] = Some(context);
        }
        self.finish();
        result
    }

    /// Mark this job done: every context finishes, and the state leaves
    /// `Running` so the scheduler's next pass removes it.
    pub fn finish(&mut self) {
        if self.state == JobState::Running {
            self.state = JobState::Stopping;
        }
        for slot in &mut self.contexts {
            if let Some(context) = slot {
                context.finished = true;
            }
        }
    }

    /// Release every arena reference this job still holds. Idempotent;
    /// called by the scheduler at removal and by inline exclusive runs.
    pub fn release_resources(&mut self, engine: &mut Engine) {
        if self.released {
            return;
        }
        self.released = true;
        for slot in &mut self.contexts {
            if let Some(context) = slot.take() {
                engine.activations.release(context.activation);
                engine
                    .bindings
                    .truncate(context.bindings, self.base_bindings);
            }
        }
        if let Some(held) = self.held_activation.take() {
            engine.activations.release(held);
        }
    }
}
