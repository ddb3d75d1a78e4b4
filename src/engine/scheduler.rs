//! Cooperative round-robin job scheduler
//!
//! Steps every primary job once per sweep, interleaving foreground work
//! (buttons, command center) with throttled secondary work (plots,
//! periodic redraws). Removed jobs leave holes in the worklists for O(1)
//! removal during iteration; holes are compacted at sweep start.
//!
//! Among top-level button jobs, only one "active button" advances per
//! sweep; the token goes to the first eligible job in list order and
//! clears when that job's pass over its agentset completes, so
//! simultaneously pressed forever buttons take strict turns in insertion
//! order.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{AgentIndex, AgentKind};
use super::job::{Job, JobId, JobState, OwnerId, ParentLink};
use super::{Engine, EngineConfig, HaltSignal};
use super::host::HostServices;

/// Observability row describing one scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id.
    pub id: JobId,
    /// Owner display name.
    pub owner: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Debug timestamp from admission (not used for determinism).
    pub submitted_at: DateTime<Utc>,
}

/// The cooperative scheduler for one engine.
pub struct Scheduler {
    primary: Vec<Option<Job>>,
    secondary: Vec<Option<Job>>,
    active_button: Option<OwnerId>,
    halt: HaltSignal,
    update_interval: Duration,
    last_secondary_run: Instant,
    last_secondary_duration: Duration,
}

impl Scheduler {
    /// Create a scheduler configured from `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            primary: Vec::new(),
            secondary: Vec::new(),
            active_button: None,
            halt: HaltSignal::new(),
            update_interval: Duration::from_millis(config.update_interval_ms),
            last_secondary_run: Instant::now(),
            last_secondary_duration: Duration::ZERO,
        }
    }

    /// The halt flag contexts poll; clone it to request cancellation
    /// from another thread.
    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// Admit a job to the primary (foreground) worklist.
    pub fn add_job(&mut self, job: Job) {
        tracing::debug!(job = job.id.0, owner = %job.owner.name, "primary job added");
        self.primary.push(Some(job));
    }

    /// Admit a job to the secondary (background) worklist.
    pub fn add_secondary_job(&mut self, job: Job) {
        tracing::debug!(job = job.id.0, owner = %job.owner.name, "secondary job added");
        self.secondary.push(Some(job));
    }

    /// Whether any primary job is scheduled (running or pending removal).
    pub fn has_primary_jobs(&self) -> bool {
        self.primary.iter().any(|slot| slot.is_some())
    }

    /// One full scheduler pass: compact, step primaries, maybe step
    /// secondaries.
    pub fn sweep(&mut self, engine: &mut Engine, host: &mut dyn HostServices) {
        compact(&mut self.primary);
        self.run_primary_jobs(engine, host);
        self.maybe_run_secondary_jobs(engine, host);
        if self.halt.is_requested() && !self.has_primary_jobs() {
            self.halt.clear();
        }
    }

    fn run_primary_jobs(&mut self, engine: &mut Engine, host: &mut dyn HostServices) {
        let mut index = 0;
        // Jobs spawned mid-sweep are appended and reached in this sweep.
        while index < self.primary.len() {
            let Some(mut job) = self.primary[index].take() else {
                index += 1;
                continue;
            };
            if job.state != JobState::Running {
                self.remove_job(engine, host, job, true);
                index += 1;
                continue;
            }
            if job.owner.is_button() && job.is_top_level() {
                match self.active_button {
                    Some(active) if active != job.owner.id => {
                        // Not this button's turn.
                        self.primary[index] = Some(job);
                        index += 1;
                        continue;
                    }
                    None => self.active_button = Some(job.owner.id),
                    _ => {}
                }
            }
            let mut spawned = Vec::new();
            let result = job.step(engine, host, &self.halt, &mut spawned);
            if job.button_turn_is_over {
                self.active_button = None;
                job.button_turn_is_over = false;
            }
            let owner = job.owner.clone();
            if let Err(err) = result {
                job.error = Some(err.clone());
                self.primary[index] = Some(job);
                self.finish_jobs_in(true, owner.id);
                if err.is_halt() {
                    tracing::debug!(owner = %owner.name, "job halted");
                } else {
                    tracing::warn!(owner = %owner.name, error = %err, "job failed; finishing its owner's jobs");
                    host.runtime_error(&owner, &err);
                }
            } else {
                self.primary[index] = Some(job);
            }
            for child in spawned {
                tracing::debug!(owner = %owner.name, "ask spawned a concurrent child job");
                self.primary.push(Some(child));
            }
            index += 1;
        }
    }

    // Secondary jobs skip the button bookkeeping and display updates.
    fn run_secondary_jobs(&mut self, engine: &mut Engine, host: &mut dyn HostServices) {
        let mut index = 0;
        while index < self.secondary.len() {
            let Some(mut job) = self.secondary[index].take() else {
                index += 1;
                continue;
            };
            if job.state != JobState::Running {
                self.remove_job(engine, host, job, false);
                index += 1;
                continue;
            }
            let mut spawned = Vec::new();
            let result = job.step(engine, host, &self.halt, &mut spawned);
            let owner = job.owner.clone();
            if let Err(err) = result {
                job.error = Some(err.clone());
                self.secondary[index] = Some(job);
                self.finish_jobs_in(false, owner.id);
                if !err.is_halt() {
                    host.runtime_error(&owner, &err);
                }
            } else {
                self.secondary[index] = Some(job);
            }
            for child in spawned {
                self.secondary.push(Some(child));
            }
            index += 1;
        }
    }

    fn maybe_run_secondary_jobs(&mut self, engine: &mut Engine, host: &mut dyn HostServices) {
        // Account for how long the last secondary pass took so slow
        // background work cannot starve the foreground loop.
        let now = Instant::now();
        if now.duration_since(self.last_secondary_run)
            > self.update_interval / 2 + self.last_secondary_duration
        {
            compact(&mut self.secondary);
            self.run_secondary_jobs(engine, host);
            self.last_secondary_run = Instant::now();
            self.last_secondary_duration = self.last_secondary_run - now;
            host.periodic_update();
        }
    }

    /// Removal bookkeeping for a job whose state left `Running`.
    fn remove_job(
        &mut self,
        engine: &mut Engine,
        host: &mut dyn HostServices,
        mut job: Job,
        primary: bool,
    ) {
        tracing::debug!(job = job.id.0, owner = %job.owner.name, "job removed");
        if job.is_top_level() && self.active_button == Some(job.owner.id) {
            self.active_button = None;
        }
        job.state = JobState::Removed;
        job.release_resources(engine);
        if let Some(link) = job.parent {
            self.clear_parent_waiting(link);
        }
        if job.is_top_level() {
            if primary {
                host.update_display(false);
            }
            host.owner_finished(&job.owner);
        }
    }

    fn clear_parent_waiting(&mut self, link: ParentLink) {
        for slot in self.primary.iter_mut().chain(self.secondary.iter_mut()) {
            if let Some(job) = slot {
                if job.id == link.job {
                    job.clear_waiting(link.context);
                    return;
                }
            }
        }
    }

    /// Force-finish every job in one list sharing an owner; the next
    /// sweep pass removes them.
    fn finish_jobs_in(&mut self, primary: bool, owner: OwnerId) {
        let list = if primary {
            &mut self.primary
        } else {
            &mut self.secondary
        };
        for slot in list.iter_mut() {
            if let Some(job) = slot {
                if job.owner.id == owner {
                    job.finish();
                }
            }
        }
    }

    /// Force-finish every job belonging to `owner`, on both worklists.
    pub fn finish_owner_jobs(&mut self, owner: OwnerId) {
        self.finish_jobs_in(true, owner);
        self.finish_jobs_in(false, owner);
    }

    /// Ask `owner`'s jobs to stop gracefully: forever-button contexts
    /// finish at their next loop closer.
    pub fn request_stop(&mut self, owner: OwnerId) {
        for slot in self.primary.iter_mut().chain(self.secondary.iter_mut()) {
            if let Some(job) = slot {
                if job.owner.id == owner {
                    job.stopping = true;
                }
            }
        }
    }

    /// Request cooperative cancellation of all scheduled work. Contexts
    /// observe the flag at their next instruction; mid-flight state
    /// mutations stay applied.
    pub fn halt(&mut self) {
        tracing::debug!("halt requested");
        self.halt.request();
    }

    /// Merge a newly created agent into every running forever-button job
    /// over its kind, rather than letting it sit out until the button is
    /// pressed again.
    pub fn join_forever_buttons(
        &mut self,
        engine: &mut Engine,
        agent: AgentIndex,
        kind: AgentKind,
    ) {
        for slot in self.primary.iter_mut() {
            if let Some(job) = slot {
                if job.is_forever_button_over(kind) {
                    job.new_agent_joining(engine, agent);
                }
            }
        }
    }

    /// Summaries of every scheduled job, primaries first.
    pub fn job_summaries(&self) -> Vec<JobSummary> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .flatten()
            .map(|job| JobSummary {
                id: job.id,
                owner: job.owner.name.clone(),
                state: job.state,
                submitted_at: job.submitted_at,
            })
            .collect()
    }

    /// Borrow a scheduled job by id, for inspection in tests.
    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .flatten()
            .find(|job| job.id == id)
    }
}

fn compact(list: &mut Vec<Option<Job>>) {
    list.retain(|slot| slot.is_some());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::agent::RngSource;
    use crate::engine::host::NullHost;
    use crate::engine::instruction::{Instruction, Op};
    use crate::engine::job::{JobOwner, OwnerKind};
    use crate::engine::procedure::{ProcedureBuilder, ProcedureId, ProgramLibrary};

    fn engine_and_procedure() -> (Engine, ProcedureId) {
        let mut library = ProgramLibrary::new();
        let procedure = library.register(
            ProcedureBuilder::command("noop")
                .top_level()
                .instr(Instruction::new(Op::Done)),
        );
        let engine = Engine::new(EngineConfig::default(), library).unwrap();
        (engine, procedure)
    }

    #[test]
    fn admitted_jobs_appear_in_summaries() {
        let (mut engine, procedure) = engine_and_procedure();
        let mut scheduler = Scheduler::new(&engine.config);
        let id = engine.next_job_id();
        scheduler.add_job(Job::top_level(
            id,
            JobOwner::new("noop", OwnerKind::OnceButton),
            engine.world.observer_set(),
            procedure,
            RngSource::Main,
            false,
        ));
        let summaries = scheduler.job_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].owner, "noop");
        assert_eq!(summaries[0].state, JobState::Running);
    }

    #[test]
    fn sweep_runs_and_removes_completed_jobs() {
        let (mut engine, procedure) = engine_and_procedure();
        let mut scheduler = Scheduler::new(&engine.config);
        let id = engine.next_job_id();
        scheduler.add_job(Job::top_level(
            id,
            JobOwner::new("noop", OwnerKind::OnceButton),
            engine.world.observer_set(),
            procedure,
            RngSource::Main,
            false,
        ));
        let mut host = NullHost;
        for _ in 0..3 {
            scheduler.sweep(&mut engine, &mut host);
        }
        assert!(!scheduler.has_primary_jobs());
        assert!(scheduler.job_summaries().is_empty());
    }
}
