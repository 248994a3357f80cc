//! Task tree nodes and the arena that owns them
//!
//! Nodes never own each other. The [`Arena`] owns every node of a task; a parent
//! holds the [`NodeId`]s of its children and a child holds the id of its parent.
//! Freeing a slot bumps its generation, so an id kept past destruction never
//! resolves to a later occupant of the same slot.

use crate::request::Ticket;
use crate::state::State;
use std::collections::VecDeque;
use std::fmt;
use xcopy_types::{EntityKind, Error, PolicyPair, Stat};

/// Handle to a node of a task tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "u64", into = "u64"))]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self {
            index: (raw & 0xffff_ffff) as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        (u64::from(id.generation) << 32) | u64::from(id.index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u64::from(*self))
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-checked slot storage
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// One side of a node: backend identifier (drive sides) and entry name
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) uuid: Option<String>,
    pub(crate) name: String,
}

impl Endpoint {
    pub(crate) fn new(uuid: Option<String>, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
        }
    }
}

impl From<&Stat> for Endpoint {
    fn from(stat: &Stat) -> Self {
        Self::new(stat.uuid.clone(), stat.name.clone())
    }
}

/// A sub-directory whose destination the batch call already resolved
#[derive(Debug, Clone)]
pub(crate) struct PendingDir {
    pub(crate) src: Stat,
    pub(crate) dst: Stat,
}

/// A sub-directory the batch call left in a name clash
#[derive(Debug, Clone)]
pub(crate) struct StagedConflict {
    pub(crate) src: Stat,
    pub(crate) error: Error,
    pub(crate) policy: PolicyPair,
}

/// A directory or file sub-task
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: EntityKind,
    pub(crate) src: Endpoint,
    pub(crate) dst: Option<Endpoint>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) state: State,
    /// Local policy; unset sides inherit the task-wide pair
    pub(crate) policy: PolicyPair,
    pub(crate) dstats: VecDeque<PendingDir>,
    pub(crate) fstats: VecDeque<Stat>,
    pub(crate) staged: Vec<StagedConflict>,
    /// Ticket of the one outstanding request this node waits for
    pub(crate) ticket: Option<Ticket>,
    /// The source directory was listed, so its contents were handled one by one
    pub(crate) listed: bool,
}

impl Node {
    pub(crate) fn new(
        kind: EntityKind,
        parent: Option<NodeId>,
        src: Endpoint,
        dst: Option<Endpoint>,
    ) -> Self {
        Self {
            kind,
            src,
            dst,
            parent,
            children: Vec::new(),
            state: State::Finish,
            policy: PolicyPair::NONE,
            dstats: VecDeque::new(),
            fstats: VecDeque::new(),
            staged: Vec::new(),
            ticket: None,
            listed: false,
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name used in logs and events
    pub(crate) fn display_name(&self) -> &str {
        if self.is_root() {
            "[root]"
        } else {
            &self.src.name
        }
    }

    /// No pending work and no live children
    pub(crate) fn is_drained(&self) -> bool {
        self.children.is_empty() && self.dstats.is_empty() && self.fstats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_arena_reuses_slots_with_new_generation() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(a), Some("a"));
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None);

        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&"c"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    proptest! {
        #[test]
        fn node_id_survives_u64(index in any::<u32>(), generation in any::<u32>()) {
            let id = NodeId { index, generation };
            prop_assert_eq!(NodeId::from(u64::from(id)), id);
        }
    }

    #[test]
    fn test_root_display_name() {
        let root = Node::new(
            EntityKind::Directory,
            None,
            Endpoint::new(Some("top".into()), ""),
            None,
        );
        assert_eq!(root.display_name(), "[root]");
        assert!(root.is_drained());
    }
}
