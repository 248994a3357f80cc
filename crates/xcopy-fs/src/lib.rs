//! Storage backends for xcopy
//!
//! This crate provides the [`Backend`](xcopy_types::Backend) implementations the
//! engine runs against:
//!
//! - **[`LocalBackend`]**: drives and native filesystems rooted at local directories
//! - **[`MemoryBackend`]**: in-memory volumes with fault injection, for tests and benches
//!
//! Both resolve name clashes with the same rules (see [`placement`]). File copies
//! on disk are written to a temporary sibling and renamed into place, so a
//! partially copied file never appears under its final name.
//!
//! # Examples
//!
//! ```rust
//! use xcopy_fs::MemoryBackend;
//! use xcopy_types::{Backend, Location};
//!
//! # async fn example() -> xcopy_types::Result<()> {
//! let backend = MemoryBackend::new();
//! backend.add_drive("home");
//! backend.write_file("home", "docs/a.txt", b"hello");
//!
//! let stats = backend
//!     .readdir(uuid::Uuid::nil(), &Location::drive("home", "docs"))
//!     .await?;
//! assert_eq!(stats[0].name, "a.txt");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod copy;
pub mod local;
pub mod memory;
pub mod placement;

pub use copy::{copy_via_temp, CopyOptions, DEFAULT_BUFFER_SIZE};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use placement::{free_name, place, Placement};
