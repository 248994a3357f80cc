//! Validated configuration values shared by the engine and the config crate

/// Ceiling on simultaneously outstanding backend operations of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct InFlightLimit(usize);

impl InFlightLimit {
    /// Minimum limit
    pub const MIN: usize = 1;
    /// Maximum limit
    pub const MAX: usize = 4096;
    /// Default limit
    pub const DEFAULT: usize = 16;

    /// Create a new limit with validation
    pub fn new(limit: usize) -> Result<Self, String> {
        if limit < Self::MIN {
            Err(format!("In-flight limit {} is below minimum {}", limit, Self::MIN))
        } else if limit > Self::MAX {
            Err(format!("In-flight limit {} exceeds maximum {}", limit, Self::MAX))
        } else {
            Ok(Self(limit))
        }
    }

    /// Get the limit value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for InFlightLimit {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for InFlightLimit {
    type Error = String;

    fn try_from(limit: usize) -> Result<Self, Self::Error> {
        Self::new(limit)
    }
}

impl From<InFlightLimit> for usize {
    fn from(limit: InFlightLimit) -> Self {
        limit.0
    }
}
