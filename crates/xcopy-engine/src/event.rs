//! Events emitted by a task for its host

use crate::context::TaskId;
use crate::node::NodeId;
use crate::state::StateName;
use xcopy_types::{EntityKind, Error};

/// Something observable happened in a task tree
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum TaskEvent {
    /// A node entered a state
    StateEntered {
        /// Task
        task: TaskId,
        /// Node
        node: NodeId,
        /// Whether the node is the root
        root: bool,
        /// Directory or file
        kind: EntityKind,
        /// Source name of the node
        name: String,
        /// The state entered
        state: StateName,
    },
    /// A node left the tree
    Destroyed {
        /// Task
        task: TaskId,
        /// Node
        node: NodeId,
    },
    /// An entry was dropped before a node was created for it
    EntryDropped {
        /// Task
        task: TaskId,
        /// Directory node that listed it
        parent: NodeId,
        /// Entry name
        name: String,
        /// Entry kind, when known
        kind: Option<EntityKind>,
        /// Why
        error: Error,
    },
    /// Nothing is in flight and every remaining node waits on a policy
    Idle {
        /// Task
        task: TaskId,
        /// Nodes in `Conflict`
        conflicts: usize,
    },
}

impl TaskEvent {
    /// Task the event belongs to
    pub fn task(&self) -> TaskId {
        match self {
            Self::StateEntered { task, .. }
            | Self::Destroyed { task, .. }
            | Self::EntryDropped { task, .. }
            | Self::Idle { task, .. } => *task,
        }
    }

    /// The root reached `Failed` or `Finish`
    pub fn is_root_terminal(&self) -> bool {
        matches!(self, Self::StateEntered { root: true, state, .. } if state.is_terminal())
    }
}
