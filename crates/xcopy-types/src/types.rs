//! Core data types used by the task engine and its backends

use crate::{Error, PolicyPair, Resolved, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identity on whose behalf backend operations run
pub type UserId = uuid::Uuid;

/// The single logical operation a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TaskType {
    /// Drive to drive copy
    Copy,
    /// Drive to drive move
    Move,
    /// Native filesystem to drive copy
    Import,
    /// Drive to native filesystem copy
    Export,
}

impl TaskType {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    /// Whether directories and files are moved rather than copied
    pub fn is_move(self) -> bool {
        matches!(self, Self::Move)
    }

    /// Whether `src` and `dst` have the side types this operation requires
    pub fn accepts(self, src: &Location, dst: &Location) -> bool {
        match self {
            Self::Copy | Self::Move => src.is_drive() && dst.is_drive(),
            Self::Import => src.is_native() && dst.is_drive(),
            Self::Export => src.is_drive() && dst.is_native(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "import" => Ok(Self::Import),
            "export" => Ok(Self::Export),
            other => Err(Error::invalid_request(format!("unknown task type '{}'", other))),
        }
    }
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntityKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

impl EntityKind {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory on one side of a task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum Location {
    /// A directory inside a virtual drive, addressed by its identifier
    Drive {
        /// Drive identifier
        drive: String,
        /// Directory identifier within the drive
        dir: String,
    },
    /// A directory on an external filesystem, addressed by path
    Native {
        /// External filesystem identifier
        id: String,
        /// Path relative to the filesystem's root
        path: PathBuf,
    },
}

impl Location {
    /// Create a drive location
    pub fn drive<D: Into<String>, I: Into<String>>(drive: D, dir: I) -> Self {
        Self::Drive {
            drive: drive.into(),
            dir: dir.into(),
        }
    }

    /// Create a native location
    pub fn native<I: Into<String>, P: Into<PathBuf>>(id: I, path: P) -> Self {
        Self::Native {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Whether this is a drive location
    pub fn is_drive(&self) -> bool {
        matches!(self, Self::Drive { .. })
    }

    /// Whether this is a native location
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native { .. })
    }

    /// Drive or native filesystem identifier
    pub fn volume(&self) -> &str {
        match self {
            Self::Drive { drive, .. } => drive,
            Self::Native { id, .. } => id,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drive { drive, dir } => write!(f, "{}:{}", drive, dir),
            Self::Native { id, path } => write!(f, "{}:{}", id, path.display()),
        }
    }
}

/// One listed or created entry
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stat {
    /// Entry name within its directory
    pub name: String,
    /// Entry kind
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: EntityKind,
    /// Backend identifier of the entry, present on drive sides
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub uuid: Option<String>,
}

impl Stat {
    /// Stat of a file without identifier
    pub fn file<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::File,
            uuid: None,
        }
    }

    /// Stat of a directory without identifier
    pub fn dir<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::Directory,
            uuid: None,
        }
    }

    /// Attach a backend identifier
    pub fn with_uuid<S: Into<String>>(mut self, uuid: S) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntityKind::Directory
    }
}

/// Per-entry result of a create/move operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryOutcome {
    /// Failure for this entry; a conflict leaves the entry unresolved
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub error: Option<Error>,
    /// The destination entry: the created one, or the one left in place by `skip`
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub stat: Option<Stat>,
    /// Which policy side fired
    #[cfg_attr(feature = "serde", serde(default))]
    pub resolved: Resolved,
}

impl EntryOutcome {
    /// Entry created without a clash
    pub fn created(stat: Stat) -> Self {
        Self {
            error: None,
            stat: Some(stat),
            resolved: Resolved::NONE,
        }
    }

    /// Entry handled by a policy after a clash
    pub fn resolved(stat: Stat, resolved: Resolved) -> Self {
        Self {
            error: None,
            stat: Some(stat),
            resolved,
        }
    }

    /// Entry failed
    pub fn failed(error: Error) -> Self {
        Self {
            error: Some(error),
            stat: None,
            resolved: Resolved::NONE,
        }
    }

    /// Whether the entry reported an error
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the entry reported a name conflict
    pub fn is_conflict(&self) -> bool {
        self.error.as_ref().is_some_and(Error::is_conflict)
    }
}

/// Per-name results of a batched directory operation
pub type BatchResult = BTreeMap<String, EntryOutcome>;

/// Create directories `names` inside `dir`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MkdirsRequest {
    /// Parent directory of the new entries
    pub dir: Location,
    /// Names to create
    pub names: Vec<String>,
    /// Conflict policy, `keep` already mapped to `skip`
    pub policy: PolicyPair,
}

/// Move directories `names` from `src` into `dst`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MvdirsRequest {
    /// Directory holding the entries now
    pub src: Location,
    /// Directory receiving them
    pub dst: Location,
    /// Names to move
    pub names: Vec<String>,
    /// Conflict policy, `keep` already mapped to `skip`
    pub policy: PolicyPair,
}

/// Copy or move a single file `name` from `src` into `dst`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRequest {
    /// Directory holding the file
    pub src: Location,
    /// Directory receiving it
    pub dst: Location,
    /// File name
    pub name: String,
    /// Conflict policy, `keep` already mapped to `skip`
    pub policy: PolicyPair,
}

/// Counters aggregated from a task's events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskStats {
    /// Directories that reached `Finish`
    pub dirs_finished: u64,
    /// Directories that reached `Failed`, or were dropped from a batch
    pub dirs_failed: u64,
    /// Files that reached `Finish`
    pub files_finished: u64,
    /// Files that reached `Failed`
    pub files_failed: u64,
    /// Times any node entered `Conflict`
    pub conflicts: u64,
    /// Entries dropped before a node was created for them
    pub entries_dropped: u64,
}

impl TaskStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge statistics from another task
    pub fn merge(&mut self, other: &TaskStats) {
        self.dirs_finished += other.dirs_finished;
        self.dirs_failed += other.dirs_failed;
        self.files_finished += other.files_finished;
        self.files_failed += other.files_failed;
        self.conflicts += other.conflicts;
        self.entries_dropped += other.entries_dropped;
    }

    /// Total failures
    pub fn failures(&self) -> u64 {
        self.dirs_failed + self.files_failed
    }

    /// Nothing failed and nothing was dropped
    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.entries_dropped == 0
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} dirs, {} files done; {} failed, {} dropped, {} conflicts",
            self.dirs_finished,
            self.files_finished,
            self.failures(),
            self.entries_dropped,
            self.conflicts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskType::Copy, Location::drive("d", "x"), Location::drive("d", "y"), true)]
    #[case(TaskType::Move, Location::drive("d", "x"), Location::drive("e", "y"), true)]
    #[case(TaskType::Move, Location::native("n", "a"), Location::drive("d", "y"), false)]
    #[case(TaskType::Import, Location::native("n", "a"), Location::drive("d", "y"), true)]
    #[case(TaskType::Import, Location::drive("d", "x"), Location::drive("d", "y"), false)]
    #[case(TaskType::Export, Location::drive("d", "x"), Location::native("n", "b"), true)]
    #[case(TaskType::Export, Location::native("n", "a"), Location::native("n", "b"), false)]
    fn test_task_type_directions(
        #[case] task_type: TaskType,
        #[case] src: Location,
        #[case] dst: Location,
        #[case] expected: bool,
    ) {
        assert_eq!(task_type.accepts(&src, &dst), expected);
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("move".parse::<TaskType>().unwrap(), TaskType::Move);
        assert!("sync".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_entry_outcome_conflict() {
        let outcome = EntryOutcome::failed(Error::conflict(
            "a",
            EntityKind::Directory,
            EntityKind::Directory,
        ));
        assert!(outcome.is_err());
        assert!(outcome.is_conflict());

        let outcome = EntryOutcome::failed(Error::io("disk"));
        assert!(!outcome.is_conflict());

        assert!(!EntryOutcome::created(Stat::dir("a")).is_err());
    }

    #[test]
    fn test_stats_merge_and_summary() {
        let mut total = TaskStats::new();
        let other = TaskStats {
            dirs_finished: 2,
            files_finished: 5,
            files_failed: 1,
            ..TaskStats::default()
        };
        total.merge(&other);
        total.merge(&other);
        assert_eq!(total.files_finished, 10);
        assert_eq!(total.failures(), 2);
        assert!(!total.is_success());
        assert!(total.summary().starts_with("4 dirs, 10 files done"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stat_wire_shape() {
        let stat = Stat::dir("photos").with_uuid("u1");
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["type"], "directory");
        assert_eq!(json["uuid"], "u1");
    }
}
