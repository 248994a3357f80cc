//! Backend requests issued by a task and the responses fed back to it

use crate::node::NodeId;
use std::fmt;
use xcopy_types::{
    Backend, BatchResult, EntryOutcome, FileRequest, Location, MkdirsRequest, MvdirsRequest,
    Result, Stat, UserId,
};

/// Correlates a response with the request a node is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub(crate) u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A backend operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// List a source directory
    Readdir(Location),
    /// Create directories
    Mkdirs(MkdirsRequest),
    /// Move directories
    Mvdirs(MvdirsRequest),
    /// Copy one file
    CopyFile(FileRequest),
    /// Move one file
    MoveFile(FileRequest),
    /// Remove an emptied source directory
    RemoveEmptyDir(Location),
}

impl Operation {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Readdir(_) => "readdir",
            Self::Mkdirs(_) => "mkdirs",
            Self::Mvdirs(_) => "mvdirs",
            Self::CopyFile(_) => "copy_file",
            Self::MoveFile(_) => "move_file",
            Self::RemoveEmptyDir(_) => "remove_empty_dir",
        }
    }
}

/// An operation a node is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation ticket
    pub ticket: Ticket,
    /// Issuing node
    pub node: NodeId,
    /// What to do
    pub op: Operation,
}

impl Request {
    /// Run the operation against a backend
    pub async fn perform(self, backend: &dyn Backend, user: UserId) -> Response {
        let outcome = match self.op {
            Operation::Readdir(dir) => Outcome::Listing(backend.readdir(user, &dir).await),
            Operation::Mkdirs(request) => Outcome::Batch(backend.mkdirs(user, request).await),
            Operation::Mvdirs(request) => Outcome::Batch(backend.mvdirs(user, request).await),
            Operation::CopyFile(request) => {
                Outcome::Entry(backend.copy_file(user, request).await)
            }
            Operation::MoveFile(request) => {
                Outcome::Entry(backend.move_file(user, request).await)
            }
            Operation::RemoveEmptyDir(dir) => {
                Outcome::Removed(backend.remove_empty_dir(user, &dir).await)
            }
        };
        Response {
            ticket: self.ticket,
            node: self.node,
            outcome,
        }
    }
}

/// Result of a backend operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Result of [`Operation::Readdir`]
    Listing(Result<Vec<Stat>>),
    /// Result of [`Operation::Mkdirs`] or [`Operation::Mvdirs`]
    Batch(Result<BatchResult>),
    /// Result of a single-file operation
    Entry(Result<EntryOutcome>),
    /// Result of [`Operation::RemoveEmptyDir`]
    Removed(Result<bool>),
}

/// A backend result addressed to the node that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Ticket of the request
    pub ticket: Ticket,
    /// Issuing node
    pub node: NodeId,
    /// Result
    pub outcome: Outcome,
}

impl Response {
    /// Answer `request` with `outcome`
    pub fn to(request: &Request, outcome: Outcome) -> Self {
        Self {
            ticket: request.ticket,
            node: request.node,
            outcome,
        }
    }
}
