//! xcopy end-to-end test support
//!
//! Fixtures shared by the integration tests in `tests/`: sandboxed drive and
//! native roots on a temporary directory, snapshots of those trees, and a
//! backend wrapper that measures how many operations a task keeps in flight.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Concurrency probing
///
/// A [`Backend`](xcopy_types::Backend) wrapper counting outstanding operations.
pub mod concurrency_utils;

/// Unified test utilities
///
/// Sandboxes, tree snapshots and engine construction shared by every test.
pub mod test_utils;

pub use concurrency_utils::ConcurrencyProbe;
pub use test_utils::{engine, Sandbox, TreeEntry};
