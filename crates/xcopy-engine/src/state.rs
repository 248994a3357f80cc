//! Node states
//!
//! Directory nodes move through `Mkdir`, `Preparing`, `Parent`, `Conflict`,
//! `Failed` and `Finish`; file nodes through `Working`, `Conflict`, `Failed` and
//! `Finish`. `Failed` and `Finish` are terminal.

use std::fmt;
use xcopy_types::{Error, PolicyPair, Stat};

/// Progress of a directory's listing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Preparation {
    /// Waiting for the source listing
    Listing,
    /// Waiting for the batched creation of the listed sub-directories
    Creating {
        dirs: Vec<Stat>,
        files: Vec<Stat>,
        policy: PolicyPair,
    },
}

/// Current state of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum State {
    /// Creating (or moving) this directory under the attempted policy
    Mkdir { policy: PolicyPair },
    /// Listing the source directory and creating its sub-directories
    Preparing(Preparation),
    /// Handing out pending children to the scheduler
    Parent,
    /// Copying or moving this file under the attempted policy
    Working { policy: PolicyPair },
    /// Waiting for a policy update
    Conflict { error: Error, policy: PolicyPair },
    /// Gave up
    Failed { error: Error },
    /// Done
    Finish,
}

impl State {
    pub(crate) fn name(&self) -> StateName {
        match self {
            Self::Mkdir { .. } => StateName::Mkdir,
            Self::Preparing(_) => StateName::Preparing,
            Self::Parent => StateName::Parent,
            Self::Working { .. } => StateName::Working,
            Self::Conflict { .. } => StateName::Conflict,
            Self::Failed { .. } => StateName::Failed,
            Self::Finish => StateName::Finish,
        }
    }
}

/// Name of a node state, as carried by events and views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StateName {
    /// Creating or moving a directory
    Mkdir,
    /// Listing a directory
    Preparing,
    /// Spawning children
    Parent,
    /// Transferring a file
    Working,
    /// Waiting for a policy
    Conflict,
    /// Terminal failure
    Failed,
    /// Terminal success
    Finish,
}

impl StateName {
    /// `Failed` or `Finish`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Finish)
    }

    /// Name as logged
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mkdir => "Mkdir",
            Self::Preparing => "Preparing",
            Self::Parent => "Parent",
            Self::Working => "Working",
            Self::Conflict => "Conflict",
            Self::Failed => "Failed",
            Self::Finish => "Finish",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(State::Mkdir { policy: PolicyPair::NONE }, StateName::Mkdir, false)]
    #[case(State::Preparing(Preparation::Listing), StateName::Preparing, false)]
    #[case(State::Parent, StateName::Parent, false)]
    #[case(State::Working { policy: PolicyPair::NONE }, StateName::Working, false)]
    #[case(State::Failed { error: Error::io("x") }, StateName::Failed, true)]
    #[case(State::Finish, StateName::Finish, true)]
    fn test_state_names(#[case] state: State, #[case] name: StateName, #[case] terminal: bool) {
        assert_eq!(state.name(), name);
        assert_eq!(name.is_terminal(), terminal);
    }
}
