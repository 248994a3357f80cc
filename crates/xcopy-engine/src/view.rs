//! Read-only snapshots of a task tree

use crate::node::NodeId;
use crate::state::StateName;
use xcopy_types::{EntityKind, Error, PolicyPair};

/// Error as shown to a host
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorView {
    /// errno-style code
    pub code: String,
    /// Conflict refinement
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub xcode: Option<String>,
    /// Human readable message
    pub message: String,
}

impl From<&Error> for ErrorView {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            xcode: error.xcode().map(str::to_string),
            message: error.to_string(),
        }
    }
}

/// Snapshot of one node and its live descendants
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeView {
    /// Node handle, usable for policy updates
    pub id: NodeId,
    /// Directory or file
    pub kind: EntityKind,
    /// Source name; empty for the root
    pub name: String,
    /// Destination name once resolved, when it differs from the source name
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub dst_name: Option<String>,
    /// Current state
    pub state: StateName,
    /// Conflict or failure
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub error: Option<ErrorView>,
    /// Policy attempted when the conflict was reported
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub policy: Option<PolicyPair>,
    /// Sub-directories not yet handed out
    pub pending_dirs: usize,
    /// Files not yet handed out
    pub pending_files: usize,
    /// Live children in creation order
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Vec::is_empty")
    )]
    pub children: Vec<NodeView>,
}

impl NodeView {
    /// Number of nodes in this subtree
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(NodeView::count).sum::<usize>()
    }

    /// Find a node in this subtree
    pub fn find(&self, id: NodeId) -> Option<&NodeView> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// A node waiting for a policy
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConflictInfo {
    /// Node handle
    pub node: NodeId,
    /// Directory or file
    pub kind: EntityKind,
    /// Names from the root down to this node
    pub path: String,
    /// The clash
    pub error: ErrorView,
    /// Policy attempted
    pub policy: PolicyPair,
}
