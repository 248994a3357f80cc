//! Where an incoming entry lands when its name may be taken
//!
//! Both backends decide clashes the same way: the `same` side of the policy
//! applies when the occupant has the incoming entry's kind, the `diff` side
//! otherwise. An unset side is a conflict. `keep` never reaches a backend from
//! the engine; it is treated as `skip` here.

use xcopy_types::{EntityKind, Error, Policy, PolicyPair, Resolved, Result};

/// Decision for one incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Create under the requested name, removing the occupant first when `replace`
    Create {
        /// Remove the occupant first
        replace: bool,
        /// Which policy side fired
        resolved: Resolved,
    },
    /// Create under the first free `name (n).ext`
    Rename {
        /// Which policy side fired
        resolved: Resolved,
    },
    /// Leave the occupant in place and report it
    Existing {
        /// Kind of the occupant
        kind: EntityKind,
        /// Which policy side fired
        resolved: Resolved,
    },
}

/// Decide what happens to `name` of kind `incoming`, given its occupant
pub fn place(
    name: &str,
    incoming: EntityKind,
    occupant: Option<EntityKind>,
    policy: PolicyPair,
) -> Result<Placement> {
    let Some(existing) = occupant else {
        return Ok(Placement::Create {
            replace: false,
            resolved: Resolved::NONE,
        });
    };

    let (side, resolved) = if existing == incoming {
        (policy.same, Resolved::SAME)
    } else {
        (policy.diff, Resolved::DIFF)
    };
    match side {
        None => Err(Error::conflict(name, existing, incoming)),
        Some(Policy::Skip | Policy::Keep) => Ok(Placement::Existing {
            kind: existing,
            resolved,
        }),
        Some(Policy::Rename) => Ok(Placement::Rename { resolved }),
        Some(Policy::Replace) => Ok(Placement::Create {
            replace: true,
            resolved,
        }),
    }
}

/// First `stem (n).ext`, n from 2, that `taken` rejects
pub fn free_name<F>(name: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut n = 2u64;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Reject names that would address anything but a direct child
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::invalid_request(format!(
            "'{}' is not a plain entry name",
            name
        )));
    }
    Ok(())
}
