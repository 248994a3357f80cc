//! Task requests and the per-task context consulted by every node

use std::fmt;
use uuid::Uuid;
use xcopy_types::{EntityKind, Error, Location, Policies, PolicyPair, Result, TaskType, UserId};

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to start a task
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskRequest {
    /// Operation
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub task_type: TaskType,
    /// Identity the backend operations run as
    pub user: UserId,
    /// Directory holding the entries
    pub src: Location,
    /// Directory receiving them
    pub dst: Location,
    /// Top-level names of `src` to process
    pub entries: Vec<String>,
    /// Task-wide conflict policies
    #[cfg_attr(feature = "serde", serde(default))]
    pub policies: Policies,
}

impl TaskRequest {
    /// Create a request without entries or policies
    pub fn new(task_type: TaskType, user: UserId, src: Location, dst: Location) -> Self {
        Self {
            task_type,
            user,
            src,
            dst,
            entries: Vec::new(),
            policies: Policies::default(),
        }
    }

    /// Add top-level entries
    pub fn with_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Set the task-wide file policy
    pub fn with_file_policy(mut self, policy: PolicyPair) -> Self {
        self.policies.file = policy;
        self
    }

    /// Set the task-wide directory policy
    pub fn with_dir_policy(mut self, policy: PolicyPair) -> Self {
        self.policies.dir = policy;
        self
    }

    /// Fill sides this request leaves unset from `defaults`
    pub fn with_default_policies(mut self, defaults: Policies) -> Self {
        self.policies.file = self.policies.file.resolve(defaults.file);
        self.policies.dir = self.policies.dir.resolve(defaults.dir);
        self
    }

    /// Reject requests no node could act on
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self
            .entries
            .iter()
            .find(|name| name.is_empty() || name.contains('/') || *name == "." || *name == "..")
        {
            return Err(Error::invalid_request(format!(
                "entry '{}' is not a plain name",
                bad
            )));
        }
        Ok(())
    }
}

/// Per-task state shared by every node
///
/// Only the policies change during a task's lifetime.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task identifier
    pub id: TaskId,
    /// Operation
    pub task_type: TaskType,
    /// Identity the backend operations run as
    pub user: UserId,
    /// Source directory
    pub src: Location,
    /// Destination directory
    pub dst: Location,
    /// Top-level names, only consulted by the root
    pub entries: Vec<String>,
    /// Task-wide policies
    pub policies: Policies,
}

impl TaskContext {
    /// Build the context of a new task
    pub fn new(id: TaskId, request: TaskRequest) -> Self {
        let mut entries: Vec<String> = Vec::with_capacity(request.entries.len());
        for entry in request.entries {
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Self {
            id,
            task_type: request.task_type,
            user: request.user,
            src: request.src,
            dst: request.dst,
            entries,
            policies: request.policies,
        }
    }

    /// Task-wide policy for an entity kind
    pub fn global_policy(&self, kind: EntityKind) -> PolicyPair {
        self.policies.for_kind(kind)
    }

    /// Fails with `NotImplemented` unless the operation supports both sides
    pub fn check_direction(&self) -> Result<()> {
        if self.task_type.accepts(&self.src, &self.dst) {
            Ok(())
        } else {
            Err(Error::not_implemented(format!(
                "{} from {} to {}",
                self.task_type,
                side(&self.src),
                side(&self.dst)
            )))
        }
    }
}

fn side(location: &Location) -> &'static str {
    match location {
        Location::Drive { .. } => "drive",
        Location::Native { .. } => "native filesystem",
    }
}
