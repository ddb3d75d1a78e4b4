//! Activation records in a reference-counted arena
//!
//! Call frames are arena slots referenced by index, with `parent` an
//! index into the same arena. Contexts spawned by `ask` share their
//! parent's activation, so slots are reference counted: each context
//! holds one reference on its current frame and each frame holds one on
//! its parent. Depth is cached per record so the recursion ceiling is an
//! O(1) check at call time.

use serde::{Deserialize, Serialize};

use super::bindings::BindingId;
use super::procedure::ProcedureId;
use super::value::Value;

/// Index of an activation record in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationId(pub usize);

/// One procedure-call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    /// Procedure this frame executes.
    pub procedure: ProcedureId,
    /// Argument and local values; length is the procedure's `size`.
    pub args: Vec<Value>,
    /// Instruction pointer to restore in the caller on return.
    pub return_address: usize,
    /// Calling frame, if any.
    pub parent: Option<ActivationId>,
    /// Chain depth; root frames have depth 1.
    pub depth: usize,
    /// Binding-chain head at frame entry; returns truncate back to it.
    pub bindings_entry: Option<BindingId>,
}

#[derive(Debug)]
struct Slot {
    record: Activation,
    refs: usize,
}

/// Arena owning every live activation record.
#[derive(Debug, Default)]
pub struct ActivationArena {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl ActivationArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a frame with one reference held by the caller. When
    /// `parent` is given, the new frame takes a reference on it.
    pub fn alloc(
        &mut self,
        procedure: ProcedureId,
        args: Vec<Value>,
        return_address: usize,
        parent: Option<ActivationId>,
        bindings_entry: Option<BindingId>,
    ) -> ActivationId {
        let depth = match parent {
            Some(parent_id) => {
                self.retain(parent_id);
                self.get(parent_id).depth + 1
            }
            None => 1,
        };
        let slot = Slot {
            record: Activation {
                procedure,
                args,
                return_address,
                parent,
                depth,
                bindings_entry,
            },
            refs: 1,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                ActivationId(index)
            }
            None => {
                self.slots.push(Some(slot));
                ActivationId(self.slots.len() - 1)
            }
        }
    }

    /// Borrow a record.
    pub fn get(&self, ActivationId(index): ActivationId) -> &Activation {
        &self.slots[index]
            .as_ref()
            .expect("activation slot already freed")
            .record
    }

    /// Mutably borrow a record.
    pub fn get_mut(&mut self, ActivationId(index): ActivationId) -> &mut Activation {
        &mut self.slots[index]
            .as_mut()
            .expect("activation slot already freed")
            .record
    }

    /// Take an additional reference on a frame.
    pub fn retain(&mut self, ActivationId(index): ActivationId) {
        self.slots[index]
            .as_mut()
            .expect("activation slot already freed")
            .refs += 1;
    }

    /// Drop a reference; frames free when their count reaches zero, and
    /// freeing cascades the frame's own reference up the parent chain.
    pub fn release(&mut self, id: ActivationId) {
        let mut cursor = Some(id);
        while let Some(ActivationId(index)) = cursor {
            let slot = self.slots[index]
                .as_mut()
                .expect("activation slot already freed");
            slot.refs -= 1;
            if slot.refs > 0 {
                break;
            }
            let parent = slot.record.parent;
            self.slots[index] = None;
            self.free.push(index);
            cursor = parent;
        }
    }

    /// Number of live frames, for growth assertions in tests.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
