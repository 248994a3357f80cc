//! JSON report for `--json` runs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use xcopy_engine::{NodeView, TaskReport, TaskStatus};
use xcopy_types::{EntityKind, TaskStats, TaskType};

/// Complete JSON output for one task
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResultJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Final task status
    pub status: TaskStatus,
    /// Counters folded from the task's events
    pub stats: TaskStats,
    /// Remaining tree, for failed or suspended tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<NodeView>,
    /// Entries that were dropped or failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<ProblemJson>,
    /// Overall result
    pub result: OperationResult,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// xcopy version
    pub version: String,
    /// Operation type
    pub operation: TaskType,
    /// Task identifier
    pub task_id: String,
    /// Timestamp when operation started
    pub timestamp: String,
    /// Source location
    pub source: String,
    /// Destination location
    pub destination: String,
    /// Duration in seconds
    pub duration_seconds: f64,
}

/// An entry the task could not handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemJson {
    /// Entry name
    pub name: String,
    /// Entry kind, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    /// errno-style code
    pub code: String,
    /// Human readable message
    pub message: String,
}

/// Overall operation result
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether every entry was handled
    pub success: bool,
    /// Process exit code
    pub exit_code: u8,
    /// Result message
    pub message: String,
}

impl TaskResultJson {
    /// Assemble the output of a finished run
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_type: TaskType,
        source: String,
        destination: String,
        started: chrono::DateTime<chrono::Utc>,
        elapsed: Duration,
        report: &TaskReport,
        problems: Vec<ProblemJson>,
        exit_code: u8,
    ) -> Self {
        let success = exit_code == 0;
        let message = match report.status {
            TaskStatus::Aborted if report.stats.conflicts > 0 => {
                "Aborted with unresolved conflicts".to_string()
            }
            _ if success => format!("{} completed: {}", task_type, report.stats.summary()),
            status => format!("{} {}: {}", task_type, status, report.stats.summary()),
        };

        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: task_type,
                task_id: report.id.to_string(),
                timestamp: started.to_rfc3339(),
                source,
                destination,
                duration_seconds: elapsed.as_secs_f64(),
            },
            status: report.status,
            stats: report.stats,
            tree: report.view.clone(),
            problems,
            result: OperationResult {
                success,
                exit_code,
                message,
            },
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
