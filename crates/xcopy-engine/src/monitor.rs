//! Statistics collection from task events

use crate::context::TaskId;
use crate::event::TaskEvent;
use crate::state::StateName;
use crate::task::TaskStatus;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use xcopy_types::{EntityKind, TaskStats};

/// Engine-wide statistics
#[derive(Debug, Clone)]
pub struct Statistics {
    /// Tasks created
    pub total_tasks: u64,
    /// Tasks whose runner is still active
    pub running_tasks: u64,
    /// Tasks whose root reached `Finish`
    pub finished_tasks: u64,
    /// Tasks whose root reached `Failed`
    pub failed_tasks: u64,
    /// Tasks aborted by the host
    pub aborted_tasks: u64,
    /// Node counters summed over all tasks
    pub totals: TaskStats,
    /// Engine uptime
    pub uptime: Duration,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            total_tasks: 0,
            running_tasks: 0,
            finished_tasks: 0,
            failed_tasks: 0,
            aborted_tasks: 0,
            totals: TaskStats::default(),
            uptime: Duration::from_secs(0),
        }
    }
}

impl Statistics {
    /// Percentage of ended tasks whose root finished
    pub fn success_rate(&self) -> f64 {
        let ended = self.finished_tasks + self.failed_tasks + self.aborted_tasks;
        if ended > 0 {
            (self.finished_tasks as f64 / ended as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Folds task events into per-task counters
#[derive(Debug)]
pub struct StatisticsCollector {
    tasks: RwLock<HashMap<TaskId, TaskStats>>,
    statistics: RwLock<Statistics>,
    start_time: Instant,
}

impl StatisticsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            statistics: RwLock::new(Statistics::default()),
            start_time: Instant::now(),
        }
    }

    /// Record a task creation
    pub async fn record_task_started(&self, task: TaskId) {
        self.tasks.write().await.insert(task, TaskStats::new());
        let mut stats = self.statistics.write().await;
        stats.total_tasks += 1;
        stats.running_tasks += 1;
    }

    /// Record the end of a task's runner
    pub async fn record_task_ended(&self, task: TaskId, status: TaskStatus) {
        let mut stats = self.statistics.write().await;
        stats.running_tasks = stats.running_tasks.saturating_sub(1);
        match status {
            TaskStatus::Finished => stats.finished_tasks += 1,
            TaskStatus::Failed => stats.failed_tasks += 1,
            TaskStatus::Aborted => stats.aborted_tasks += 1,
            TaskStatus::Running | TaskStatus::Idle => {
                debug!("task {} ended while {}", task, status);
            }
        }
    }

    /// Fold one event into the counters of its task
    pub async fn record(&self, event: &TaskEvent) {
        let delta = delta(event);
        if delta == TaskStats::default() {
            return;
        }
        self.tasks
            .write()
            .await
            .entry(event.task())
            .or_default()
            .merge(&delta);
        self.statistics.write().await.totals.merge(&delta);
    }

    /// Counters of one task
    pub async fn task_stats(&self, task: TaskId) -> Option<TaskStats> {
        self.tasks.read().await.get(&task).copied()
    }

    /// Forget a deleted task; engine totals keep its counts
    pub async fn remove_task(&self, task: TaskId) {
        self.tasks.write().await.remove(&task);
    }

    /// Get current statistics
    pub async fn current_stats(&self) -> Statistics {
        let mut stats = self.statistics.read().await.clone();
        stats.uptime = self.start_time.elapsed();
        stats
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn delta(event: &TaskEvent) -> TaskStats {
    let mut stats = TaskStats::default();
    match event {
        TaskEvent::StateEntered {
            root: false,
            kind,
            state,
            ..
        } => match (kind, state) {
            (EntityKind::Directory, StateName::Finish) => stats.dirs_finished = 1,
            (EntityKind::Directory, StateName::Failed) => stats.dirs_failed = 1,
            (EntityKind::File, StateName::Finish) => stats.files_finished = 1,
            (EntityKind::File, StateName::Failed) => stats.files_failed = 1,
            (_, StateName::Conflict) => stats.conflicts = 1,
            _ => {}
        },
        TaskEvent::EntryDropped { kind, .. } => {
            stats.entries_dropped = 1;
            if *kind == Some(EntityKind::Directory) {
                stats.dirs_failed = 1;
            }
        }
        _ => {}
    }
    stats
}
