//! Core type system and error handling for xcopy
//!
//! This crate provides the vocabulary shared by the task engine, its backends and
//! its host. It includes:
//!
//! - **Policies**: conflict-resolution pairs and their inheritance rules
//! - **Error handling**: the error taxonomy with errno-style codes
//! - **Core types**: task types, locations, stats and batch results
//! - **Traits**: the async [`Backend`] interface (with the `async` feature)
//! - **Configuration**: validated configuration values
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `async`: Enable the async `Backend` trait
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use xcopy_types::{Policy, PolicyPair};
//!
//! let global = PolicyPair::new(Some(Policy::Skip), Some(Policy::Rename));
//! let local = PolicyPair::new(Some(Policy::Replace), None);
//! assert_eq!(local.resolve(global), PolicyPair::new(Some(Policy::Replace), Some(Policy::Rename)));
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod policy;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::InFlightLimit;
pub use error::{Error, ErrorKind};
pub use policy::{Policies, Policy, PolicyPair, Resolved};
pub use result::Result;
pub use traits::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_by_kind() {
        let mut policies = Policies::default();
        policies.for_kind_mut(EntityKind::Directory).same = Some(Policy::Keep);
        assert_eq!(policies.dir.same, Some(Policy::Keep));
        assert!(policies.for_kind(EntityKind::File).is_unset());
    }

    #[test]
    fn test_conflict_error_shape() {
        let err = Error::conflict("x.txt", EntityKind::File, EntityKind::File);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "EEXIST");
        assert!(err.to_string().contains("x.txt"));
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::drive("home", "docs").to_string(), "home:docs");
        assert_eq!(Location::native("usb", "a/b").to_string(), "usb:a/b");
    }
}
