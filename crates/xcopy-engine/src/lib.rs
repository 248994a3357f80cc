//! Recursive copy/move task engine for xcopy
//!
//! A task copies, moves, imports or exports a set of entries from one directory
//! into another. It is modelled as a tree of per-directory and per-file state
//! machines that create and destroy children as work is discovered and finished,
//! throttled by a global ceiling on outstanding backend operations.
//!
//! # Features
//!
//! - **Sans-io core**: [`Task`] only emits [`Request`]s and consumes [`Response`]s
//! - **Name conflict policies**: `keep`, `skip`, `rename` and `replace`, per node or task-wide
//! - **Suspension**: clashes without a policy wait for the host instead of failing
//! - **Failure isolation**: a failed subtree never stops its siblings
//! - **Throttling**: at most `max_in_flight` backend operations per task
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xcopy_engine::{EngineBuilder, TaskRequest};
//! use xcopy_types::{Backend, Location, TaskType};
//!
//! # async fn example(backend: Arc<dyn Backend>) -> xcopy_types::Result<()> {
//! let engine = EngineBuilder::new().with_backend(backend).build()?;
//! let request = TaskRequest::new(
//!     TaskType::Copy,
//!     uuid::Uuid::nil(),
//!     Location::drive("home", "photos"),
//!     Location::drive("home", "backup"),
//! )
//! .with_entries(["2023", "2024"]);
//!
//! let id = engine.create_task(request).await?;
//! let report = engine.wait(id).await?;
//! println!("{}: {}", report.status, report.stats.summary());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod dir;
mod file;
mod node;
mod state;

pub mod context;
pub mod engine;
pub mod event;
pub mod monitor;
pub mod request;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod view;

pub use context::{TaskContext, TaskId, TaskRequest};
pub use engine::{EngineBuilder, TaskSummary, XcopyEngine};
pub use event::TaskEvent;
pub use monitor::{Statistics, StatisticsCollector};
pub use node::NodeId;
pub use request::{Operation, Outcome, Request, Response, Ticket};
pub use runner::{Command, TaskHandle, TaskReport, TaskRunner};
pub use scheduler::{QuotaTarget, SchedulePass, Scheduler, SchedulerConfig};
pub use state::StateName;
pub use task::{Task, TaskStatus};
pub use view::{ConflictInfo, ErrorView, NodeView};
