//! Result type alias for xcopy operations

use crate::Error;

/// Result type alias for xcopy operations
pub type Result<T> = std::result::Result<T, Error>;
