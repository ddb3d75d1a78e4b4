//! Arena-backed let-binding chains
//!
//! Let bindings form a singly-linked cons list threaded through contexts.
//! Derived contexts and ask-child contexts hold an index into the same
//! arena, never a copy, so an assignment through a shared suffix is
//! visible to the parent. Frames truncate back to their entry head on
//! return, which keeps long-running forever buttons bounded.

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Compile-time identifier of a let binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LetId(pub usize);

/// Index of a binding node in the arena.
pub type BindingId = usize;

#[derive(Debug, Clone)]
struct BindingNode {
    let_id: LetId,
    value: Value,
    next: Option<BindingId>,
}

/// Arena holding every binding node for one engine.
#[derive(Debug, Default)]
pub struct BindingArena {
    nodes: Vec<Option<BindingNode>>,
    free: Vec<BindingId>,
}

impl BindingArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a binding in front of `head`, returning the new head.
    pub fn push(&mut self, head: Option<BindingId>, let_id: LetId, value: Value) -> BindingId {
        let node = BindingNode {
            let_id,
            value,
            next: head,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Look a binding up by walking the chain from `head`.
    pub fn get(&self, head: Option<BindingId>, let_id: LetId) -> Option<&Value> {
        let mut cursor = head;
        while let Some(index) = cursor {
            let node = self.nodes[index].as_ref()?;
            if node.let_id == let_id {
                return Some(&node.value);
            }
            cursor = node.next;
        }
        None
    }

    /// Assign to the nearest binding of `let_id`, in place. Returns false
    /// when the chain holds no such binding.
    pub fn set(&mut self, head: Option<BindingId>, let_id: LetId, value: Value) -> bool {
        let mut cursor = head;
        while let Some(index) = cursor {
            let node = match self.nodes[index].as_mut() {
                Some(node) => node,
                None => return false,
            };
            if node.let_id == let_id {
                node.value = value;
                return true;
            }
            cursor = node.next;
        }
        false
    }

    /// Free every node from `head` down to (but not including) `stop`,
    /// returning `stop` as the new head. Used when a frame returns.
    pub fn truncate(&mut self, head: Option<BindingId>, stop: Option<BindingId>) -> Option<BindingId> {
        let mut cursor = head;
        while cursor != stop {
            let index = match cursor {
                Some(index) => index,
                None => break,
            };
            let next = self.nodes[index].as_ref().and_then(|n| n.next);
            self.nodes[index] = None;
            self.free.push(index);
            cursor = next;
        }
        stop
    }

    /// Number of live nodes, for growth assertions in tests.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }
}
