//! Global throttling of child creation
//!
//! A pass hands out `max_in_flight - in_flight` creation grants to the `Parent`
//! nodes of a tree, depth first, directories before files at each node. Each
//! created child issues exactly one backend request, so the grants bound the
//! number of outstanding operations.

use crate::node::NodeId;
use xcopy_config::Config;
use xcopy_types::InFlightLimit;

/// Configuration for the scheduler and per-task event delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Ceiling on outstanding backend operations per task
    pub max_in_flight: InFlightLimit,
    /// Events buffered per task for slow subscribers
    pub event_capacity: usize,
}

impl SchedulerConfig {
    /// Create scheduler config from main config
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.scheduler.max_in_flight,
            event_capacity: config.scheduler.event_capacity.max(1),
        }
    }

    /// Same settings with another in-flight ceiling
    pub fn with_max_in_flight(mut self, max_in_flight: InFlightLimit) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: InFlightLimit::default(),
            event_capacity: 1024,
        }
    }
}

/// The quota protocol a task tree exposes to the scheduler
pub trait QuotaTarget {
    /// Backend operations issued and not yet answered
    fn in_flight(&self) -> usize;

    /// Nodes currently in `Parent`, depth-first pre-order
    fn parents_depth_first(&self) -> Vec<NodeId>;

    /// Start up to `n` pending sub-directories of `node`; returns how many started
    fn create_sub_dir(&mut self, node: NodeId, n: usize) -> usize;

    /// Start up to `n` pending files of `node`; returns how many started
    fn create_sub_file(&mut self, node: NodeId, n: usize) -> usize;
}

/// What one pass started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulePass {
    /// Directory children created
    pub dirs: usize,
    /// File children created
    pub files: usize,
}

impl SchedulePass {
    /// Total children created
    pub fn total(&self) -> usize {
        self.dirs + self.files
    }
}

/// Stateless quota distributor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    max_in_flight: usize,
}

impl Scheduler {
    /// Create a scheduler with a ceiling
    pub fn new(max_in_flight: InFlightLimit) -> Self {
        Self {
            max_in_flight: max_in_flight.get(),
        }
    }

    /// Grants available while `in_flight` operations are outstanding
    pub fn quota(&self, in_flight: usize) -> usize {
        self.max_in_flight.saturating_sub(in_flight)
    }

    /// Hand out the available grants
    pub fn pass<T: QuotaTarget + ?Sized>(&self, target: &mut T) -> SchedulePass {
        let mut quota = self.quota(target.in_flight());
        let mut pass = SchedulePass::default();
        if quota == 0 {
            return pass;
        }

        for node in target.parents_depth_first() {
            let dirs = target.create_sub_dir(node, quota);
            quota -= dirs.min(quota);
            pass.dirs += dirs;
            if quota == 0 {
                break;
            }

            let files = target.create_sub_file(node, quota);
            quota -= files.min(quota);
            pass.files += files;
            if quota == 0 {
                break;
            }
        }

        pass
    }
}
