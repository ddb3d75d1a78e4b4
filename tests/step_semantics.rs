//! Context- and job-level stepping semantics.

use flockvm::engine::agent::{AgentBits, RngSource, VarSlot};
use flockvm::engine::host::NullHost;
use flockvm::engine::instruction::{Instruction, Op, ReporterExpr};
use flockvm::engine::job::{Job, JobOwner, JobState, OwnerKind};
use flockvm::engine::procedure::{ProcedureBuilder, ProcedureId, ProgramLibrary};
use flockvm::engine::value::Value;
use flockvm::engine::{Engine, EngineConfig, EngineError, HaltSignal};

fn number(n: f64) -> ReporterExpr {
    ReporterExpr::Const(Value::Number(n))
}

fn counter() -> ReporterExpr {
    ReporterExpr::AgentVar(VarSlot::Custom(0))
}

/// The forever-button scenario program:
/// `go` moves, bumps a per-turtle counter, and stops once the counter
/// reaches the turtle's threshold variable.
fn forever_button_library() -> (ProgramLibrary, ProcedureId) {
    let mut library = ProgramLibrary::new();
    let go = library.register(
        ProcedureBuilder::command("go")
            .instr(Instruction::new(Op::Forward(number(1.0))).for_agents(AgentBits::TURTLE))
            .instr(Instruction::new(Op::SetAgentVar {
                slot: VarSlot::Custom(0),
                value: ReporterExpr::Add(Box::new(counter()), Box::new(number(1.0))),
            }))
            .instr(Instruction::new(Op::JumpIfNot(
                ReporterExpr::Equals(
                    Box::new(counter()),
                    Box::new(ReporterExpr::AgentVar(VarSlot::Custom(1))),
                ),
                4,
            )))
            .instr(Instruction::new(Op::Stop))
            .instr(Instruction::new(Op::Return)),
    );
    let button = library.register(
        ProcedureBuilder::command("go-button")
            .top_level()
            .instr(Instruction::new(Op::Call {
                procedure: go,
                args: Vec::new(),
            }))
            .instr(Instruction::new(Op::ForeverLoopEnd { back: 0 }).switch_point()),
    );
    (library, button)
}

fn engine_with_turtles(
    library: ProgramLibrary,
    turtles: usize,
    threshold: impl Fn(usize) -> f64,
) -> Engine {
    let config = EngineConfig {
        custom_variables: 2,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    for i in 0..turtles {
        let t = engine.world.create_turtle(0.0, 0.0, 0.0);
        engine
            .world
            .agent_mut(t)
            .set(VarSlot::Custom(0), Value::Number(0.0));
        engine
            .world
            .agent_mut(t)
            .set(VarSlot::Custom(1), Value::Number(threshold(i)));
    }
    engine
}

fn button_owner() -> JobOwner {
    JobOwner::new("go", OwnerKind::ForeverButton)
}

#[test]
fn concurrent_job_builds_one_context_per_agent() {
    let (library, button) = forever_button_library();
    let mut engine = engine_with_turtles(library, 10, |_| 1e9);
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.agents_of_kind(flockvm::engine::agent::AgentKind::Turtle);
    let id = engine.next_job_id();
    let mut job = Job::top_level(id, button_owner(), agents, button, RngSource::Main, false);

    let mut spawned = Vec::new();
    job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    assert_eq!(job.context_count(), 10);
    assert!(spawned.is_empty());
}

#[test]
fn forever_button_resteps_every_turtle_each_tick() {
    let (library, button) = forever_button_library();
    let mut engine = engine_with_turtles(library, 10, |_| 1e9);
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.agents_of_kind(flockvm::engine::agent::AgentKind::Turtle);
    let id = engine.next_job_id();
    let mut job = Job::top_level(id, button_owner(), agents, button, RngSource::Main, false);

    let mut spawned = Vec::new();
    for _ in 0..100 {
        job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
        assert_eq!(job.state, JobState::Running);
    }
    // Each context completed exactly one pass per step.
    for (_, vars) in engine.world.state_snapshot() {
        if let Some(Value::Number(count)) = vars.get(VarSlot::Custom(0).index()) {
            assert_eq!(*count, 100.0);
        }
    }
}

#[test]
fn stop_condition_finishes_only_the_matching_turtle() {
    let (library, button) = forever_button_library();
    // Turtle index 3 stops at tick 50; the rest never do.
    let mut engine = engine_with_turtles(library, 10, |i| if i == 3 { 50.0 } else { 1e9 });
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.agents_of_kind(flockvm::engine::agent::AgentKind::Turtle);
    let target = agents.members[3];
    let id = engine.next_job_id();
    let mut job = Job::top_level(id, button_owner(), agents, button, RngSource::Main, false);

    let mut spawned = Vec::new();
    for _ in 0..100 {
        job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    }
    assert_eq!(job.state, JobState::Running);
    // The stopped turtle's counter froze at its threshold.
    assert_eq!(
        engine.world.agent(target).get(VarSlot::Custom(0)),
        Value::Number(50.0)
    );
    // Its job-level stopping flag was never raised.
    assert!(!job.stopping);
    // Everyone else kept running to 100.
    for &member in engine
        .world
        .agents_of_kind(flockvm::engine::agent::AgentKind::Turtle)
        .members
        .iter()
        .filter(|&&m| m != target)
    {
        assert_eq!(
            engine.world.agent(member).get(VarSlot::Custom(0)),
            Value::Number(100.0)
        );
    }
}

#[test]
fn dead_agent_context_finishes_without_executing() {
    let (library, button) = forever_button_library();
    let mut engine = engine_with_turtles(library, 2, |_| 1e9);
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.agents_of_kind(flockvm::engine::agent::AgentKind::Turtle);
    let victim = agents.members[0];
    let id = engine.next_job_id();
    let mut job = Job::top_level(id, button_owner(), agents, button, RngSource::Main, false);

    let mut spawned = Vec::new();
    job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    engine.world.kill(victim);
    for _ in 0..5 {
        job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    }
    // The dead turtle executed exactly one pass before it was killed.
    assert_eq!(
        engine.world.agent(victim).get(VarSlot::Custom(0)),
        Value::Number(1.0)
    );
    assert_eq!(job.state, JobState::Running);
}

#[test]
fn once_job_finishes_after_every_context_completes() {
    let mut library = ProgramLibrary::new();
    let body = library.register(
        ProcedureBuilder::command("setup")
            .top_level()
            .instr(Instruction::new(Op::Noop).switch_point())
            .instr(Instruction::new(Op::Forward(number(1.0))).for_agents(AgentBits::TURTLE))
            .instr(Instruction::new(Op::Done)),
    );
    let mut engine = engine_with_turtles(library, 5, |_| 0.0);
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.agents_of_kind(flockvm::engine::agent::AgentKind::Turtle);
    let id = engine.next_job_id();
    let mut job = Job::top_level(
        id,
        JobOwner::new("setup", OwnerKind::OnceButton),
        agents,
        body,
        RngSource::Main,
        false,
    );

    let mut spawned = Vec::new();
    job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    assert_eq!(job.state, JobState::Running);
    job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    job.step(&mut engine, &mut host, &halt, &mut spawned).unwrap();
    assert_eq!(job.state, JobState::Stopping);
}

#[test]
fn unbounded_recursion_reports_depth_error() {
    let mut library = ProgramLibrary::new();
    // Ids are assigned in registration order, so a procedure can name
    // its own id before it registers.
    let recurse = ProcedureId(0);
    let registered = library.register(
        ProcedureBuilder::command("recurse")
            .instr(Instruction::new(Op::Call {
                procedure: recurse,
                args: Vec::new(),
            }))
            .instr(Instruction::new(Op::Return)),
    );
    assert_eq!(registered, recurse);
    let runner = library.register(
        ProcedureBuilder::command("runner")
            .top_level()
            .instr(Instruction::new(Op::Call {
                procedure: recurse,
                args: Vec::new(),
            }))
            .instr(Instruction::new(Op::Done)),
    );

    let config = EngineConfig {
        max_recursion_depth: 200,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config, library).unwrap();
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.observer_set();
    let id = engine.next_job_id();
    let mut job = Job::top_level(
        id,
        JobOwner::new("runner", OwnerKind::OnceButton),
        agents,
        runner,
        RngSource::Main,
        false,
    );

    let mut spawned = Vec::new();
    let err = job
        .step(&mut engine, &mut host, &halt, &mut spawned)
        .unwrap_err();
    assert!(matches!(err, EngineError::RecursionTooDeep { .. }));
    assert_eq!(job.state, JobState::Stopping);
}

#[test]
fn wrong_agent_kind_raises_agent_class_error() {
    let mut library = ProgramLibrary::new();
    let body = library.register(
        ProcedureBuilder::command("bad")
            .top_level()
            .instr(Instruction::new(Op::Forward(number(1.0))).for_agents(AgentBits::TURTLE))
            .instr(Instruction::new(Op::Done)),
    );
    let mut engine = Engine::new(EngineConfig::default(), library).unwrap();
    let mut host = NullHost;
    let halt = HaltSignal::new();
    let agents = engine.world.observer_set();
    let id = engine.next_job_id();
    let mut job = Job::top_level(
        id,
        JobOwner::new("bad", OwnerKind::OnceButton),
        agents,
        body,
        RngSource::Main,
        false,
    );

    let mut spawned = Vec::new();
    let err = job
        .step(&mut engine, &mut host, &halt, &mut spawned)
        .unwrap_err();
    assert!(matches!(err, EngineError::AgentClass { .. }));
}
