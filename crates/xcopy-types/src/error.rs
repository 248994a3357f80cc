//! Error types and handling for xcopy
//!
//! Every failure the engine can observe is an [`Error`]. The variants fall into the
//! categories of [`ErrorKind`]: a name conflict suspends a node until a policy is
//! supplied, a backend failure ends the node's subtree, an unsupported operation
//! fails immediately, and usage errors are returned to the host.

use crate::EntityKind;

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Name clash without an applicable policy; the node waits in `Conflict`
    Conflict,
    /// I/O, permission or other backend failure; the node enters `Failed`
    Backend,
    /// The task type / backend combination is not supported
    NotImplemented,
    /// The host asked for something that cannot be done
    Usage,
}

/// Main error type for xcopy operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// The destination name is taken and no policy applies
    #[error("Name conflict: '{name}' already exists")]
    Conflict {
        /// Name that clashed
        name: String,
        /// Refinement of the clash: `EISDIR` or `EISFILE` for a different-kind occupant
        xcode: Option<String>,
    },

    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Entry not found
    #[error("Not found: {path}")]
    NotFound {
        /// Path or identifier that was not found
        path: String,
    },

    /// Permission denied
    #[error("Permission denied: {path}")]
    PermissionDenied {
        /// Path or identifier with permission issues
        path: String,
    },

    /// Unsupported task type / backend combination
    #[error("Not implemented: {message}")]
    NotImplemented {
        /// What is not supported
        message: String,
    },

    /// Invalid request from the host
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Why the request was rejected
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Io { .. }
            | Self::NotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::Cancelled
            | Self::Other { .. } => ErrorKind::Backend,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::InvalidRequest { .. } | Self::Config { .. } => ErrorKind::Usage,
        }
    }

    /// errno-style code shown in task views
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "EEXIST",
            Self::Io { .. } => "EIO",
            Self::NotFound { .. } => "ENOENT",
            Self::PermissionDenied { .. } => "EACCES",
            Self::NotImplemented { .. } => "ENOSYS",
            Self::InvalidRequest { .. } | Self::Config { .. } => "EINVAL",
            Self::Cancelled => "ECANCELED",
            Self::Other { .. } => "EUNKNOWN",
        }
    }

    /// Conflict refinement, if any
    pub fn xcode(&self) -> Option<&str> {
        match self {
            Self::Conflict { xcode, .. } => xcode.as_deref(),
            _ => None,
        }
    }

    /// Whether this error routes a node into `Conflict`
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Create a name conflict for `name`, wanted by an `incoming` entry while
    /// an `existing` entry occupies it
    pub fn conflict<S: Into<String>>(name: S, existing: EntityKind, incoming: EntityKind) -> Self {
        let xcode = match (existing, incoming) {
            (EntityKind::Directory, EntityKind::File) => Some("EISDIR".to_string()),
            (EntityKind::File, EntityKind::Directory) => Some("EISFILE".to_string()),
            _ => None,
        };
        Self::Conflict {
            name: name.into(),
            xcode,
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a new not-implemented error
    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    /// Create a new invalid-request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: error.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: error.to_string(),
            },
            _ => Self::Io {
                message: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_code_matches_kind(message in ".*") {
            let errors = vec![
                Error::Io { message: message.clone() },
                Error::NotFound { path: message.clone() },
                Error::PermissionDenied { path: message.clone() },
                Error::NotImplemented { message: message.clone() },
                Error::InvalidRequest { message: message.clone() },
                Error::Config { message: message.clone() },
                Error::Other { message: message.clone() },
                Error::Cancelled,
                Error::conflict(message.clone(), EntityKind::File, EntityKind::File),
            ];

            for error in errors {
                // only conflicts carry EEXIST, and every conflict does
                prop_assert_eq!(error.code() == "EEXIST", error.kind() == ErrorKind::Conflict);
                prop_assert_eq!(error.is_conflict(), error.kind() == ErrorKind::Conflict);
                prop_assert!(!error.to_string().is_empty() || matches!(error, Error::Other { .. }), "empty display for {:?}", error);
            }
        }
    }

    #[test]
    fn test_conflict_xcode() {
        let same = Error::conflict("a", EntityKind::Directory, EntityKind::Directory);
        assert_eq!(same.xcode(), None);
        assert_eq!(same.code(), "EEXIST");

        let file_in_way = Error::conflict("a", EntityKind::File, EntityKind::Directory);
        assert_eq!(file_in_way.xcode(), Some("EISFILE"));

        let dir_in_way = Error::conflict("a", EntityKind::Directory, EntityKind::File);
        assert_eq!(dir_in_way.xcode(), Some("EISDIR"));
    }

    #[test]
    fn test_from_io_error() {
        let not_found = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(not_found.code(), "ENOENT");
        assert_eq!(not_found.kind(), ErrorKind::Backend);

        let denied = Error::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert_eq!(denied.code(), "EACCES");

        let other = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(matches!(other, Error::Io { .. }));
    }

    #[test]
    fn test_not_implemented_kind() {
        let err = Error::not_implemented("export via mvdirs");
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert_eq!(err.code(), "ENOSYS");
        assert!(err.to_string().contains("export via mvdirs"));
    }
}
