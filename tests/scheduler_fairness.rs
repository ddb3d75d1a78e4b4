//! Scheduler-level behavior: button turn-taking, owner-granularity error
//! containment, halting, secondary throttling, and late-joining agents.

use flockvm::engine::agent::{AgentKind, RngSource, VarSlot};
use flockvm::engine::host::HostServices;
use flockvm::engine::instruction::{Instruction, Op, ReporterExpr};
use flockvm::engine::job::{Job, JobOwner, OwnerKind};
use flockvm::engine::procedure::{ProcedureBuilder, ProcedureId, ProgramLibrary};
use flockvm::engine::scheduler::Scheduler;
use flockvm::engine::value::Value;
use flockvm::engine::{Engine, EngineConfig, EngineError};

/// Host that records every callback for assertions.
#[derive(Default)]
struct RecordingHost {
    runtime_errors: Vec<(String, EngineError)>,
    owners_finished: Vec<String>,
    periodic_updates: usize,
    display_updates: usize,
    breaths: usize,
}

impl HostServices for RecordingHost {
    fn update_display(&mut self, _force: bool) {
        self.display_updates += 1;
    }

    fn breathe(&mut self) {
        self.breaths += 1;
    }

    fn owner_finished(&mut self, owner: &JobOwner) {
        self.owners_finished.push(owner.name.clone());
    }

    fn periodic_update(&mut self) {
        self.periodic_updates += 1;
    }

    fn runtime_error(&mut self, owner: &JobOwner, error: &EngineError) {
        self.runtime_errors.push((owner.name.clone(), error.clone()));
    }
}

fn bump(slot: VarSlot) -> Op {
    Op::SetAgentVar {
        slot,
        value: ReporterExpr::Add(
            Box::new(ReporterExpr::AgentVar(slot)),
            Box::new(ReporterExpr::Const(Value::Number(1.0))),
        ),
    }
}

/// A forever-button body whose pass spans three scheduling quanta: two
/// yields, then a counter bump at the loop closer.
fn slow_button(library: &mut ProgramLibrary, name: &str, slot: VarSlot) -> ProcedureId {
    library.register(
        ProcedureBuilder::command(name)
            .top_level()
            .instr(Instruction::new(Op::Noop).switch_point())
            .instr(Instruction::new(Op::Noop).switch_point())
            .instr(Instruction::new(bump(slot)))
            .instr(Instruction::new(Op::ForeverLoopEnd { back: 0 }).switch_point()),
    )
}

fn zero_counters(engine: &mut Engine) {
    for slot in [VarSlot::Custom(0), VarSlot::Custom(1)] {
        engine
            .world
            .agent_mut(0)
            .set(slot, Value::Number(0.0));
    }
}

fn counter(engine: &Engine, slot: VarSlot) -> f64 {
    engine.world.agent(0).get(slot).as_number().unwrap()
}

#[test]
fn forever_buttons_take_strict_turns() {
    let mut library = ProgramLibrary::new();
    let a = slow_button(&mut library, "button-a", VarSlot::Custom(0));
    let b = slow_button(&mut library, "button-b", VarSlot::Custom(1));
    let config = EngineConfig {
        custom_variables: 2,
        // Keep secondaries quiet for this test.
        update_interval_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    zero_counters(&mut engine);
    let mut host = RecordingHost::default();
    let mut scheduler = Scheduler::new(&engine.config);

    let id = engine.next_job_id();
    scheduler.add_job(Job::top_level(
        id,
        JobOwner::new("button-a", OwnerKind::ForeverButton),
        engine.world.observer_set(),
        a,
        RngSource::Main,
        false,
    ));
    let id = engine.next_job_id();
    let b_job = Job::top_level(
        id,
        JobOwner::new("button-b", OwnerKind::ForeverButton),
        engine.world.observer_set(),
        b,
        RngSource::Main,
        false,
    );
    let b_id = b_job.id;
    scheduler.add_job(b_job);

    // While button A holds the active-button token mid-pass, button B
    // must not advance at all.
    scheduler.sweep(&mut engine, &mut host);
    scheduler.sweep(&mut engine, &mut host);
    assert_eq!(counter(&engine, VarSlot::Custom(1)), 0.0);
    let b_ip = scheduler.job(b_id).unwrap().context(0).map(|c| c.ip);
    assert!(b_ip.is_none() || b_ip == Some(0));

    // Over many sweeps both buttons make comparable progress.
    for _ in 0..40 {
        scheduler.sweep(&mut engine, &mut host);
    }
    let a_count = counter(&engine, VarSlot::Custom(0));
    let b_count = counter(&engine, VarSlot::Custom(1));
    assert!(a_count >= 3.0);
    assert!(b_count >= 3.0);
    assert!((a_count - b_count).abs() <= 1.0);
    // Button jobs came up for air along the way.
    assert!(host.breaths > 0);
}

#[test]
fn one_error_finishes_every_job_with_the_same_owner() {
    let mut library = ProgramLibrary::new();
    let faulty = library.register(
        ProcedureBuilder::command("faulty")
            .top_level()
            // A number where a condition belongs: a runtime error.
            .instr(Instruction::new(Op::JumpIfNot(
                ReporterExpr::Const(Value::Number(3.0)),
                0,
            )))
            .instr(Instruction::new(Op::Done)),
    );
    let looping = library.register(
        ProcedureBuilder::command("looping")
            .top_level()
            .instr(Instruction::new(Op::Noop).switch_point())
            .instr(Instruction::new(Op::ForeverLoopEnd { back: 0 }).switch_point()),
    );
    let config = EngineConfig {
        update_interval_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    let mut host = RecordingHost::default();
    let mut scheduler = Scheduler::new(&engine.config);

    // Both jobs belong to the same owner.
    let owner = JobOwner::new("button-1", OwnerKind::ForeverButton);
    let id = engine.next_job_id();
    scheduler.add_job(Job::top_level(
        id,
        owner.clone(),
        engine.world.observer_set(),
        faulty,
        RngSource::Main,
        false,
    ));
    let id = engine.next_job_id();
    let second = Job::top_level(
        id,
        owner.clone(),
        engine.world.observer_set(),
        looping,
        RngSource::Main,
        false,
    );
    let second_id = second.id;
    scheduler.add_job(second);

    scheduler.sweep(&mut engine, &mut host);
    // The error reached the host exactly once, and the sibling job was
    // force-finished and removed in the same sweep.
    assert_eq!(host.runtime_errors.len(), 1);
    assert_eq!(host.runtime_errors[0].0, "button-1");
    assert!(scheduler.job(second_id).is_none());

    scheduler.sweep(&mut engine, &mut host);
    assert!(!scheduler.has_primary_jobs());
}

#[test]
fn halt_abandons_jobs_without_reporting_errors() {
    let mut library = ProgramLibrary::new();
    let looping = library.register(
        ProcedureBuilder::command("looping")
            .top_level()
            .instr(Instruction::new(Op::Noop).switch_point())
            .instr(Instruction::new(Op::ForeverLoopEnd { back: 0 }).switch_point()),
    );
    let config = EngineConfig {
        update_interval_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    let mut host = RecordingHost::default();
    let mut scheduler = Scheduler::new(&engine.config);

    let id = engine.next_job_id();
    scheduler.add_job(Job::top_level(
        id,
        JobOwner::new("go", OwnerKind::ForeverButton),
        engine.world.observer_set(),
        looping,
        RngSource::Main,
        false,
    ));
    scheduler.sweep(&mut engine, &mut host);
    assert!(scheduler.has_primary_jobs());

    scheduler.halt();
    scheduler.sweep(&mut engine, &mut host);
    scheduler.sweep(&mut engine, &mut host);
    assert!(!scheduler.has_primary_jobs());
    assert!(host.runtime_errors.is_empty());
    // Once the worklist drains, the halt flag clears for future jobs.
    assert!(!scheduler.halt_signal().is_requested());
}

#[test]
fn secondary_jobs_run_throttled_and_fire_periodic_updates() {
    let mut library = ProgramLibrary::new();
    let plot = library.register(
        ProcedureBuilder::command("plot-update")
            .top_level()
            .instr(Instruction::new(bump(VarSlot::Custom(0))))
            .instr(Instruction::new(Op::Done)),
    );
    let config = EngineConfig {
        custom_variables: 2,
        // Zero throttle: secondaries run every sweep.
        update_interval_ms: 0,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    zero_counters(&mut engine);
    let mut host = RecordingHost::default();
    let mut scheduler = Scheduler::new(&engine.config);

    let id = engine.next_job_id();
    scheduler.add_secondary_job(Job::top_level(
        id,
        JobOwner::new("plot", OwnerKind::Plot),
        engine.world.observer_set(),
        plot,
        RngSource::Auxiliary,
        false,
    ));
    for _ in 0..3 {
        scheduler.sweep(&mut engine, &mut host);
    }
    assert_eq!(counter(&engine, VarSlot::Custom(0)), 1.0);
    assert!(host.periodic_updates >= 3);
    assert_eq!(host.owners_finished, vec!["plot".to_string()]);
    // Secondary completion does not force display updates.
    assert_eq!(host.display_updates, 0);
}

#[test]
fn new_turtles_join_running_forever_buttons() {
    let mut library = ProgramLibrary::new();
    let go = library.register(
        ProcedureBuilder::command("go")
            .top_level()
            .instr(Instruction::new(bump(VarSlot::Custom(0))))
            .instr(Instruction::new(Op::ForeverLoopEnd { back: 0 }).switch_point()),
    );
    let config = EngineConfig {
        custom_variables: 1,
        update_interval_ms: 10_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    for _ in 0..2 {
        let t = engine.world.create_turtle(0.0, 0.0, 0.0);
        engine.world.agent_mut(t).set(VarSlot::Custom(0), Value::Number(0.0));
    }
    let mut host = RecordingHost::default();
    let mut scheduler = Scheduler::new(&engine.config);

    let id = engine.next_job_id();
    let job = Job::top_level(
        id,
        JobOwner::new("go", OwnerKind::ForeverButton),
        engine.world.agents_of_kind(AgentKind::Turtle),
        go,
        RngSource::Main,
        false,
    );
    let job_id = job.id;
    scheduler.add_job(job);
    scheduler.sweep(&mut engine, &mut host);
    assert_eq!(scheduler.job(job_id).unwrap().context_count(), 2);

    // A turtle hatched mid-run joins the button's next passes.
    let newborn = engine.world.create_turtle(0.0, 0.0, 0.0);
    engine
        .world
        .agent_mut(newborn)
        .set(VarSlot::Custom(0), Value::Number(0.0));
    scheduler.join_forever_buttons(&mut engine, newborn, AgentKind::Turtle);
    assert_eq!(scheduler.job(job_id).unwrap().context_count(), 3);

    scheduler.sweep(&mut engine, &mut host);
    assert_eq!(
        engine.world.agent(newborn).get(VarSlot::Custom(0)),
        Value::Number(1.0)
    );
}
