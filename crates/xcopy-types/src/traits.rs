//! Backend operation interface
//!
//! The engine never touches storage itself. Every directory listing, batched
//! directory creation or move, and single-file transfer goes through a [`Backend`].
//! A backend reports a name clash it cannot resolve under the given policy as
//! [`Error::Conflict`](crate::Error::Conflict), either per entry in a
//! [`BatchResult`] or as the error of an [`EntryOutcome`].

#[cfg(feature = "async")]
use crate::{BatchResult, EntryOutcome, FileRequest, Location, MkdirsRequest, MvdirsRequest};
#[cfg(feature = "async")]
use crate::{Result, Stat, UserId};

#[cfg(feature = "async")]
use async_trait::async_trait;

/// Storage operations consumed by the task engine
#[cfg(feature = "async")]
#[async_trait]
pub trait Backend: Send + Sync {
    /// List the entries of a directory
    async fn readdir(&self, user: UserId, dir: &Location) -> Result<Vec<Stat>>;

    /// Create directories inside one parent
    async fn mkdirs(&self, user: UserId, request: MkdirsRequest) -> Result<BatchResult>;

    /// Move directories from one parent into another
    async fn mvdirs(&self, user: UserId, request: MvdirsRequest) -> Result<BatchResult>;

    /// Copy one file
    async fn copy_file(&self, user: UserId, request: FileRequest) -> Result<EntryOutcome>;

    /// Move one file
    async fn move_file(&self, user: UserId, request: FileRequest) -> Result<EntryOutcome>;

    /// Remove a directory if it is empty; `Ok(false)` when it is missing or not empty
    async fn remove_empty_dir(&self, user: UserId, dir: &Location) -> Result<bool>;

    /// Short backend name for logs
    fn name(&self) -> &str {
        "backend"
    }
}
