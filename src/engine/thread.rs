//! Dedicated scheduler thread
//!
//! One thread owns all model execution; the host (GUI or embedding
//! script) coordinates with it through a single session lock and a
//! condition variable. Holding the lock is the only way to read agent
//! state, so the host can never observe a mid-instruction mutation.
//! Cross-thread synchronization begins and ends here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::agent::{AgentIndex, AgentKind, AgentSet, RngSource};
use super::error::{EngineError, EngineResult};
use super::host::{HostServices, NullHost};
use super::job::{Job, JobId, JobOwner, OwnerId};
use super::procedure::ProcedureId;
use super::scheduler::Scheduler;
use super::value::Value;
use super::{Engine, HaltSignal};

/// Everything behind the session lock: the engine and its scheduler.
pub struct Session {
    /// Execution state.
    pub engine: Engine,
    /// Worklists and fairness state.
    pub scheduler: Scheduler,
}

struct Shared {
    session: Mutex<Session>,
    new_jobs: Condvar,
    dying: AtomicBool,
}

/// Handle to the scheduler thread.
pub struct JobThread {
    shared: Arc<Shared>,
    halt: HaltSignal,
    handle: Option<JoinHandle<()>>,
}

impl JobThread {
    /// Spawn the scheduler thread over an engine, with `host` receiving
    /// all callbacks on that thread.
    pub fn spawn<H: HostServices + 'static>(engine: Engine, host: H) -> Self {
        let scheduler = Scheduler::new(&engine.config);
        let halt = scheduler.halt_signal();
        let shared = Arc::new(Shared {
            session: Mutex::new(Session { engine, scheduler }),
            new_jobs: Condvar::new(),
            dying: AtomicBool::new(false),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("flockvm-jobs".to_string())
            .spawn(move || run_loop(thread_shared, host))
            .expect("failed to spawn scheduler thread");
        Self {
            shared,
            halt,
            handle: Some(handle),
        }
    }

    /// Submit a top-level job to the primary worklist and wake the
    /// scheduler.
    pub fn submit(
        &self,
        owner: JobOwner,
        agents: AgentSet,
        procedure: ProcedureId,
        exclusive: bool,
    ) -> JobId {
        let mut session = self.shared.session.lock();
        let id = session.engine.next_job_id();
        let job = Job::top_level(id, owner, agents, procedure, RngSource::Main, exclusive);
        session.scheduler.add_job(job);
        drop(session);
        self.shared.new_jobs.notify_all();
        id
    }

    /// Submit a top-level job to the secondary worklist. Secondary jobs
    /// draw from the auxiliary generator so they cannot perturb model
    /// reproducibility.
    pub fn submit_secondary(
        &self,
        owner: JobOwner,
        agents: AgentSet,
        procedure: ProcedureId,
    ) -> JobId {
        let mut session = self.shared.session.lock();
        let id = session.engine.next_job_id();
        let job = Job::top_level(id, owner, agents, procedure, RngSource::Auxiliary, false);
        session.scheduler.add_secondary_job(job);
        drop(session);
        self.shared.new_jobs.notify_all();
        id
    }

    /// Run a reporter procedure exclusively over `agents` and return its
    /// value. Executes under the session lock on the calling thread, so
    /// the caller observes the same exclusivity an exclusive job has.
    pub fn run_reporter(
        &self,
        owner: JobOwner,
        agents: AgentSet,
        procedure: ProcedureId,
    ) -> EngineResult<Value> {
        let mut session = self.shared.session.lock();
        let Session { engine, scheduler } = &mut *session;
        let id = engine.next_job_id();
        let mut job = Job::top_level(id, owner, agents, procedure, RngSource::Main, true);
        let halt = scheduler.halt_signal();
        let mut host = NullHost;
        let result = job.run_exclusive(engine, &mut host, &halt);
        job.release_resources(engine);
        result?;
        job.result.take().ok_or_else(|| {
            EngineError::runtime("report", "the reporter ended without reporting a value")
        })
    }

    /// Ask an owner's jobs to stop at their next loop closer.
    pub fn request_stop(&self, owner: OwnerId) {
        self.shared.session.lock().scheduler.request_stop(owner);
    }

    /// Force-finish an owner's jobs.
    pub fn finish_owner_jobs(&self, owner: OwnerId) {
        self.shared.session.lock().scheduler.finish_owner_jobs(owner);
    }

    /// Request cooperative cancellation of all scheduled work.
    pub fn halt(&self) {
        self.halt.request();
        self.shared.new_jobs.notify_all();
    }

    /// Merge a newly created agent into running forever-button jobs over
    /// its kind.
    pub fn join_forever_buttons(&self, agent: AgentIndex, kind: AgentKind) {
        let mut session = self.shared.session.lock();
        let Session { engine, scheduler } = &mut *session;
        scheduler.join_forever_buttons(engine, agent, kind);
    }

    /// Run `f` against the session under the lock. This is the host's
    /// read gate: while `f` runs, no instruction executes.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.shared.session.lock();
        f(&mut session)
    }

    /// Orderly shutdown: raise the dying flag, wake the thread, join.
    /// In-flight jobs are abandoned; agent mutations already applied
    /// stay applied.
    pub fn die(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.dying.store(true, Ordering::SeqCst);
        self.shared.new_jobs.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JobThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<H: HostServices>(shared: Arc<Shared>, mut host: H) {
    tracing::debug!("scheduler thread started");
    while !shared.dying.load(Ordering::SeqCst) {
        let mut session = shared.session.lock();
        let Session { engine, scheduler } = &mut *session;
        scheduler.sweep(engine, &mut host);
        if !session.scheduler.has_primary_jobs() {
            // Sleep only briefly: secondary jobs may still need
            // attention, and new jobs arrive via the condvar.
            let timeout = Duration::from_millis(session.engine.config.update_interval_ms);
            let _ = shared.new_jobs.wait_for(&mut session, timeout);
        }
    }
    tracing::debug!("scheduler thread exiting");
}
