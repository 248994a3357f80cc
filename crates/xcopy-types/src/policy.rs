//! Conflict-resolution policies
//!
//! A [`PolicyPair`] holds one policy for each conflict flavour: `same` applies when
//! the destination name is taken by an entry of the same kind (file vs file,
//! directory vs directory), `diff` when it is taken by an entry of the other kind.
//! An unset side inherits the task-wide value for that entity kind.

use crate::{EntityKind, Error, Result};
use std::fmt;
use std::str::FromStr;

/// How a name clash at the destination is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Policy {
    /// Keep the existing directory and merge the incoming contents into it
    Keep,
    /// Leave the existing entry alone and drop the incoming one
    Skip,
    /// Place the incoming entry under a fresh name
    Rename,
    /// Remove the existing entry and put the incoming one in its place
    Replace,
}

impl Policy {
    /// All policies, in display order
    pub const ALL: [Policy; 4] = [Policy::Keep, Policy::Skip, Policy::Rename, Policy::Replace];

    /// Lowercase name as used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Skip => "skip",
            Self::Rename => "rename",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "skip" => Ok(Self::Skip),
            "rename" => Ok(Self::Rename),
            "replace" => Ok(Self::Replace),
            other => Err(Error::invalid_request(format!("unknown policy '{}'", other))),
        }
    }
}

/// Backend-reported flags telling which side of a policy pair actually fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "[bool; 2]", into = "[bool; 2]"))]
pub struct Resolved {
    /// A same-kind clash was resolved by the `same` policy
    pub same: bool,
    /// A different-kind clash was resolved by the `diff` policy
    pub diff: bool,
}

impl Resolved {
    /// Nothing was in the way
    pub const NONE: Resolved = Resolved {
        same: false,
        diff: false,
    };

    /// The `same` policy fired
    pub const SAME: Resolved = Resolved {
        same: true,
        diff: false,
    };

    /// The `diff` policy fired
    pub const DIFF: Resolved = Resolved {
        same: false,
        diff: true,
    };

    /// Whether either side fired
    pub fn any(self) -> bool {
        self.same || self.diff
    }
}

impl From<[bool; 2]> for Resolved {
    fn from([same, diff]: [bool; 2]) -> Self {
        Self { same, diff }
    }
}

impl From<Resolved> for [bool; 2] {
    fn from(resolved: Resolved) -> Self {
        [resolved.same, resolved.diff]
    }
}

/// `[same, diff]` policy pair; `None` means "inherit"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(from = "[Option<Policy>; 2]", into = "[Option<Policy>; 2]")
)]
pub struct PolicyPair {
    /// Policy for same-kind clashes
    pub same: Option<Policy>,
    /// Policy for different-kind clashes
    pub diff: Option<Policy>,
}

impl PolicyPair {
    /// Both sides unset
    pub const NONE: PolicyPair = PolicyPair {
        same: None,
        diff: None,
    };

    /// Create a pair
    pub fn new(same: Option<Policy>, diff: Option<Policy>) -> Self {
        Self { same, diff }
    }

    /// Pair with both sides set to the same policy
    pub fn both(policy: Policy) -> Self {
        Self::new(Some(policy), Some(policy))
    }

    /// Local value where set, else the global value, else unset
    pub fn resolve(self, global: PolicyPair) -> PolicyPair {
        PolicyPair {
            same: self.same.or(global.same),
            diff: self.diff.or(global.diff),
        }
    }

    /// Overwrite the sides that `update` sets, keep the rest
    pub fn merge(&mut self, update: PolicyPair) {
        if update.same.is_some() {
            self.same = update.same;
        }
        if update.diff.is_some() {
            self.diff = update.diff;
        }
    }

    /// Neither side is set
    pub fn is_unset(self) -> bool {
        self.same.is_none() && self.diff.is_none()
    }

    /// The pair handed to a backend: `keep` is an engine-level notion, the
    /// backend only has to leave the existing entry where it is.
    pub fn for_backend(self) -> PolicyPair {
        let keep_as_skip = |side: Option<Policy>| match side {
            Some(Policy::Keep) => Some(Policy::Skip),
            other => other,
        };
        PolicyPair {
            same: keep_as_skip(self.same),
            diff: keep_as_skip(self.diff),
        }
    }

    /// The incoming entry was dropped by a `skip` that actually fired.
    ///
    /// Nothing merges into an entry of another kind, so a fired `keep` on the
    /// diff side drops the incoming entry as well.
    pub fn skipped(self, resolved: Resolved) -> bool {
        (resolved.same && self.same == Some(Policy::Skip))
            || (resolved.diff && matches!(self.diff, Some(Policy::Skip | Policy::Keep)))
    }

    /// The existing directory was kept and must be merged into
    pub fn kept(self, resolved: Resolved) -> bool {
        resolved.same && self.same == Some(Policy::Keep)
    }
}

impl From<[Option<Policy>; 2]> for PolicyPair {
    fn from([same, diff]: [Option<Policy>; 2]) -> Self {
        Self { same, diff }
    }
}

impl From<PolicyPair> for [Option<Policy>; 2] {
    fn from(pair: PolicyPair) -> Self {
        [pair.same, pair.diff]
    }
}

impl fmt::Display for PolicyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |p: Option<Policy>| p.map_or("null", Policy::as_str);
        write!(f, "[{},{}]", side(self.same), side(self.diff))
    }
}

/// Parses `"same,diff"`; either side may be empty or `null`
impl FromStr for PolicyPair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let side = |part: &str| -> Result<Option<Policy>> {
            match part.trim() {
                "" | "null" | "-" => Ok(None),
                other => other.parse().map(Some),
            }
        };
        let mut parts = s.splitn(2, ',');
        let same = side(parts.next().unwrap_or(""))?;
        let diff = side(parts.next().unwrap_or(""))?;
        Ok(Self { same, diff })
    }
}

/// Task-wide policies, one pair per entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Policies {
    /// Policies applied to files
    pub file: PolicyPair,
    /// Policies applied to directories
    pub dir: PolicyPair,
}

impl Policies {
    /// The pair for an entity kind
    pub fn for_kind(&self, kind: EntityKind) -> PolicyPair {
        match kind {
            EntityKind::File => self.file,
            EntityKind::Directory => self.dir,
        }
    }

    /// Mutable access to the pair for an entity kind
    pub fn for_kind_mut(&mut self, kind: EntityKind) -> &mut PolicyPair {
        match kind {
            EntityKind::File => &mut self.file,
            EntityKind::Directory => &mut self.dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn policy_strategy() -> impl Strategy<Value = Option<Policy>> {
        prop_oneof![
            Just(None),
            Just(Some(Policy::Keep)),
            Just(Some(Policy::Skip)),
            Just(Some(Policy::Rename)),
            Just(Some(Policy::Replace)),
        ]
    }

    proptest! {
        #[test]
        fn resolve_prefers_local(
            ls in policy_strategy(), ld in policy_strategy(),
            gs in policy_strategy(), gd in policy_strategy(),
        ) {
            let local = PolicyPair::new(ls, ld);
            let global = PolicyPair::new(gs, gd);
            let resolved = local.resolve(global);
            prop_assert_eq!(resolved.same, ls.or(gs));
            prop_assert_eq!(resolved.diff, ld.or(gd));
            // resolving twice changes nothing
            prop_assert_eq!(resolved.resolve(global), resolved);
        }

        #[test]
        fn merge_never_clears(
            ls in policy_strategy(), ld in policy_strategy(),
            us in policy_strategy(), ud in policy_strategy(),
        ) {
            let mut local = PolicyPair::new(ls, ld);
            local.merge(PolicyPair::new(us, ud));
            prop_assert_eq!(local.same, us.or(ls));
            prop_assert_eq!(local.diff, ud.or(ld));
        }
    }

    #[test]
    fn test_backend_policy_maps_keep_to_skip() {
        let pair = PolicyPair::new(Some(Policy::Keep), Some(Policy::Keep));
        let sent = pair.for_backend();
        assert_eq!(sent.same, Some(Policy::Skip));
        assert_eq!(sent.diff, Some(Policy::Skip));
        assert_eq!(PolicyPair::NONE.for_backend(), PolicyPair::NONE);
    }

    #[rstest]
    #[case(PolicyPair::new(Some(Policy::Skip), None), Resolved::SAME, true)]
    #[case(PolicyPair::new(Some(Policy::Skip), None), Resolved::DIFF, false)]
    #[case(PolicyPair::new(None, Some(Policy::Skip)), Resolved::DIFF, true)]
    #[case(PolicyPair::new(Some(Policy::Rename), None), Resolved::SAME, false)]
    #[case(PolicyPair::new(Some(Policy::Keep), None), Resolved::SAME, false)]
    #[case(PolicyPair::new(None, Some(Policy::Keep)), Resolved::DIFF, true)]
    #[case(PolicyPair::new(None, Some(Policy::Keep)), Resolved::SAME, false)]
    #[case(PolicyPair::both(Policy::Skip), Resolved::NONE, false)]
    fn test_skipped(#[case] pair: PolicyPair, #[case] resolved: Resolved, #[case] expected: bool) {
        assert_eq!(pair.skipped(resolved), expected);
    }

    #[test]
    fn test_kept_requires_fired_keep() {
        let pair = PolicyPair::new(Some(Policy::Keep), None);
        assert!(pair.kept(Resolved::SAME));
        assert!(!pair.kept(Resolved::NONE));
        assert!(!PolicyPair::NONE.kept(Resolved::SAME));
    }

    #[rstest]
    #[case("skip,rename", PolicyPair::new(Some(Policy::Skip), Some(Policy::Rename)))]
    #[case("keep", PolicyPair::new(Some(Policy::Keep), None))]
    #[case(",replace", PolicyPair::new(None, Some(Policy::Replace)))]
    #[case("null,null", PolicyPair::NONE)]
    fn test_parse_pair(#[case] input: &str, #[case] expected: PolicyPair) {
        assert_eq!(input.parse::<PolicyPair>().unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let err = "overwrite,skip".parse::<PolicyPair>().unwrap_err();
        assert_eq!(err.code(), "EINVAL");
    }

    #[test]
    fn test_display_pair() {
        let pair = PolicyPair::new(Some(Policy::Rename), None);
        assert_eq!(pair.to_string(), "[rename,null]");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_pair_serializes_as_array() {
        let json = serde_json::to_string(&PolicyPair::new(None, Some(Policy::Skip))).unwrap();
        assert_eq!(json, r#"[null,"skip"]"#);
        let back: PolicyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back.diff, Some(Policy::Skip));
    }
}
