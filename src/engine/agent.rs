//! Agents, agent sets, and the world they live in
//!
//! The engine's view of model state: a flat table of agents (the observer,
//! turtles, patches, links), ordered agent sets for jobs to iterate, and
//! the seedable random generators that make iteration order reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Kinds of agent the engine can run code on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// The singleton observer.
    Observer,
    /// A mobile turtle.
    Turtle,
    /// A stationary patch.
    Patch,
    /// A link between two turtles.
    Link,
}

impl AgentKind {
    /// The restriction bit carried by agents of this kind.
    pub fn bit(self) -> AgentBits {
        match self {
            AgentKind::Observer => AgentBits::OBSERVER,
            AgentKind::Turtle => AgentBits::TURTLE,
            AgentKind::Patch => AgentBits::PATCH,
            AgentKind::Link => AgentBits::LINK,
        }
    }

    /// Lowercase display name, used in error messages.
    pub fn display(self) -> &'static str {
        match self {
            AgentKind::Observer => "observer",
            AgentKind::Turtle => "turtle",
            AgentKind::Patch => "patch",
            AgentKind::Link => "link",
        }
    }
}

/// Agent-class restriction bitmask attached to every instruction.
///
/// An instruction whose mask does not include the running agent's bit
/// raises an agent-class error before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBits(pub u8);

impl AgentBits {
    /// Observer bit.
    pub const OBSERVER: AgentBits = AgentBits(1);
    /// Turtle bit.
    pub const TURTLE: AgentBits = AgentBits(2);
    /// Patch bit.
    pub const PATCH: AgentBits = AgentBits(4);
    /// Link bit.
    pub const LINK: AgentBits = AgentBits(8);
    /// Every agent kind.
    pub const ALL: AgentBits = AgentBits(15);

    /// Whether this mask admits the given bit.
    pub fn admits(self, other: AgentBits) -> bool {
        self.0 & other.0 != 0
    }

    /// Human-readable list of the kinds this mask admits.
    pub fn describe(self) -> String {
        let mut kinds = Vec::new();
        if self.admits(AgentBits::OBSERVER) {
            kinds.push("the observer");
        }
        if self.admits(AgentBits::TURTLE) {
            kinds.push("turtles");
        }
        if self.admits(AgentBits::PATCH) {
            kinds.push("patches");
        }
        if self.admits(AgentBits::LINK) {
            kinds.push("links");
        }
        kinds.join(" or ")
    }
}

/// Settable agent-variable slots, resolved at compile time.
///
/// A closed union replaces dynamic variable lookup by name: the compiler
/// emits slot ids, and reads and writes go through each agent's
/// slot-indexed variable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarSlot {
    /// Turtle x coordinate.
    X,
    /// Turtle y coordinate.
    Y,
    /// Turtle heading in degrees.
    Heading,
    /// Display color.
    Color,
    /// A model-defined variable at the given extra-slot index.
    Custom(usize),
}

impl VarSlot {
    const BUILTIN_SLOTS: usize = 4;

    /// Index of this slot within an agent's variable vector.
    pub fn index(self) -> usize {
        match self {
            VarSlot::X => 0,
            VarSlot::Y => 1,
            VarSlot::Heading => 2,
            VarSlot::Color => 3,
            VarSlot::Custom(n) => Self::BUILTIN_SLOTS + n,
        }
    }

    /// Number of variable slots an agent needs for `custom_count` extras.
    pub fn table_len(custom_count: usize) -> usize {
        Self::BUILTIN_SLOTS + custom_count
    }
}

/// Stable identifier of an agent; `AgentId::DEAD` marks a dead agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub i64);

impl AgentId {
    /// The sentinel id a dead agent carries.
    pub const DEAD: AgentId = AgentId(-1);

    /// Whether this id is the dead sentinel.
    pub fn is_dead(self) -> bool {
        self == AgentId::DEAD
    }
}

/// Index of an agent in the world's agent table.
pub type AgentIndex = usize;

/// One agent: id, kind, and variable storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable id; becomes [`AgentId::DEAD`] when the agent dies.
    pub id: AgentId,
    /// What kind of agent this is.
    pub kind: AgentKind,
    /// Variable values indexed by [`VarSlot::index`].
    pub vars: Vec<Value>,
}

impl Agent {
    /// Whether this agent has died.
    pub fn is_dead(&self) -> bool {
        self.id.is_dead()
    }

    /// Read a variable slot.
    pub fn get(&self, slot: VarSlot) -> Value {
        self.vars
            .get(slot.index())
            .cloned()
            .unwrap_or(Value::Nothing)
    }

    /// Write a variable slot; the slot must exist.
    pub fn set(&mut self, slot: VarSlot, value: Value) {
        self.vars[slot.index()] = value;
    }

    /// Write a variable slot, reporting whether it exists.
    pub fn try_set(&mut self, slot: VarSlot, value: Value) -> bool {
        match self.vars.get_mut(slot.index()) {
            Some(var) => {
                *var = value;
                true
            }
            None => false,
        }
    }
}

/// Which of the world's generators a job draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RngSource {
    /// The main generator, shared by model code.
    Main,
    /// The auxiliary generator, used by secondary work (plots, displays)
    /// so it cannot perturb model reproducibility.
    Auxiliary,
}

/// An ordered collection of agents a job iterates over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSet {
    /// Kind of every member.
    pub kind: AgentKind,
    /// Member agent indices, in the set's defined order.
    pub members: Vec<AgentIndex>,
}

impl AgentSet {
    /// An agentset holding exactly one agent.
    pub fn singleton(kind: AgentKind, agent: AgentIndex) -> Self {
        Self {
            kind,
            members: vec![agent],
        }
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Member order shuffled with the supplied generator.
    ///
    /// Concurrent jobs build their contexts in this order; because the
    /// generator is the job's captured one, the order is reproducible
    /// for a fixed seed.
    pub fn shuffled_members(&self, rng: &mut StdRng) -> Vec<AgentIndex> {
        let mut order = self.members.clone();
        // Fisher-Yates
        for i in (1..order.len()).rev() {
            let j = rng.gen_range(0..=i);
            order.swap(i, j);
        }
        order
    }
}

/// The mutable model state the engine executes against.
///
/// Only the scheduler thread touches the world while code is running;
/// the session lock in [`crate::engine::thread`] keeps host-thread reads
/// from observing a mid-instruction state.
#[derive(Debug)]
pub struct World {
    agents: Vec<Agent>,
    next_id: i64,
    custom_var_count: usize,
    main_rng: StdRng,
    aux_rng: StdRng,
    seed: u64,
}

impl World {
    /// Index of the observer in every world.
    pub const OBSERVER: AgentIndex = 0;

    /// Create a world containing only the observer, seeding both
    /// generators from `seed`.
    pub fn new(seed: u64, custom_var_count: usize) -> Self {
        let observer = Agent {
            id: AgentId(0),
            kind: AgentKind::Observer,
            vars: vec![Value::Nothing; VarSlot::table_len(custom_var_count)],
        };
        Self {
            agents: vec![observer],
            next_id: 1,
            custom_var_count,
            main_rng: StdRng::seed_from_u64(seed),
            aux_rng: StdRng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15),
            seed,
        }
    }

    /// The seed both generators were derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Create a turtle at the given position and return its index.
    pub fn create_turtle(&mut self, x: f64, y: f64, heading: f64) -> AgentIndex {
        let mut vars = vec![Value::Nothing; VarSlot::table_len(self.custom_var_count)];
        vars[VarSlot::X.index()] = Value::Number(x);
        vars[VarSlot::Y.index()] = Value::Number(y);
        vars[VarSlot::Heading.index()] = Value::Number(heading);
        let agent = Agent {
            id: AgentId(self.next_id),
            kind: AgentKind::Turtle,
            vars,
        };
        self.next_id += 1;
        self.agents.push(agent);
        self.agents.len() - 1
    }

    /// Create a patch at the given position and return its index.
    pub fn create_patch(&mut self, x: f64, y: f64) -> AgentIndex {
        let mut vars = vec![Value::Nothing; VarSlot::table_len(self.custom_var_count)];
        vars[VarSlot::X.index()] = Value::Number(x);
        vars[VarSlot::Y.index()] = Value::Number(y);
        let agent = Agent {
            id: AgentId(self.next_id),
            kind: AgentKind::Patch,
            vars,
        };
        self.next_id += 1;
        self.agents.push(agent);
        self.agents.len() - 1
    }

    /// Borrow an agent.
    pub fn agent(&self, index: AgentIndex) -> &Agent {
        &self.agents[index]
    }

    /// Mutably borrow an agent.
    pub fn agent_mut(&mut self, index: AgentIndex) -> &mut Agent {
        &mut self.agents[index]
    }

    /// Mark an agent dead. Its table slot stays so indices remain stable;
    /// contexts bound to it finish on their next step.
    pub fn kill(&mut self, index: AgentIndex) {
        self.agents[index].id = AgentId::DEAD;
    }

    /// All live agents of a kind, in creation order.
    pub fn agents_of_kind(&self, kind: AgentKind) -> AgentSet {
        AgentSet {
            kind,
            members: self
                .agents
                .iter()
                .enumerate()
                .filter(|(_, a)| a.kind == kind && !a.is_dead())
                .map(|(i, _)| i)
                .collect(),
        }
    }

    /// The observer as a one-member agentset.
    pub fn observer_set(&self) -> AgentSet {
        AgentSet::singleton(AgentKind::Observer, Self::OBSERVER)
    }

    /// Borrow the generator a job draws from.
    pub fn rng_mut(&mut self, source: RngSource) -> &mut StdRng {
        match source {
            RngSource::Main => &mut self.main_rng,
            RngSource::Auxiliary => &mut self.aux_rng,
        }
    }

    /// Snapshot of every live agent's variables, used by tests and
    /// debugging tools to compare end states across runs.
    pub fn state_snapshot(&self) -> Vec<(AgentId, Vec<Value>)> {
        self.agents
            .iter()
            .filter(|a| !a.is_dead())
            .map(|a| (a.id, a.vars.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_bits_admit_by_kind() {
        assert!(AgentBits::ALL.admits(AgentKind::Turtle.bit()));
        assert!(!AgentBits::TURTLE.admits(AgentKind::Patch.bit()));
        assert_eq!(AgentBits::TURTLE.describe(), "turtles");
    }

    #[test]
    fn killed_agent_carries_dead_sentinel() {
        let mut world = World::new(7, 0);
        let t = world.create_turtle(0.0, 0.0, 0.0);
        assert!(!world.agent(t).is_dead());
        world.kill(t);
        assert!(world.agent(t).is_dead());
        assert_eq!(world.agent(t).id, AgentId::DEAD);
        assert_eq!(world.agents_of_kind(AgentKind::Turtle).count(), 0);
    }

    #[test]
    fn shuffle_is_reproducible_for_fixed_seed() {
        let mut world_a = World::new(42, 0);
        let mut world_b = World::new(42, 0);
        for _ in 0..8 {
            world_a.create_turtle(0.0, 0.0, 0.0);
            world_b.create_turtle(0.0, 0.0, 0.0);
        }
        let set_a = world_a.agents_of_kind(AgentKind::Turtle);
        let set_b = world_b.agents_of_kind(AgentKind::Turtle);
        let order_a = set_a.shuffled_members(world_a.rng_mut(RngSource::Main));
        let order_b = set_b.shuffled_members(world_b.rng_mut(RngSource::Main));
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn patches_are_their_own_kind() {
        let mut world = World::new(3, 0);
        let p = world.create_patch(1.0, 2.0);
        assert_eq!(world.agent(p).kind, AgentKind::Patch);
        assert_eq!(world.agents_of_kind(AgentKind::Patch).count(), 1);
        assert_eq!(world.agents_of_kind(AgentKind::Turtle).count(), 0);
    }

    #[test]
    fn var_slots_index_into_table() {
        let mut world = World::new(1, 2);
        let t = world.create_turtle(1.5, 2.5, 90.0);
        assert_eq!(world.agent(t).get(VarSlot::X), Value::Number(1.5));
        world
            .agent_mut(t)
            .set(VarSlot::Custom(1), Value::Number(9.0));
        assert_eq!(world.agent(t).get(VarSlot::Custom(1)), Value::Number(9.0));
    }
}
