//! Drives a [`Task`] against a backend
//!
//! One runner owns one task. It performs the task's requests concurrently,
//! feeds the responses back one at a time, serves host commands between
//! responses, and publishes the task's events. Removals of emptied source
//! directories run one after another in the order they were asked for, so a
//! directory is never removed before the sub-directories finished before it.

use crate::context::TaskId;
use crate::event::TaskEvent;
use crate::monitor::StatisticsCollector;
use crate::node::NodeId;
use crate::request::{Operation, Outcome, Request};
use crate::scheduler::SchedulerConfig;
use crate::task::{Task, TaskStatus};
use crate::view::{ConflictInfo, NodeView};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use xcopy_types::{Backend, Error, PolicyPair, Result, TaskStats};

const COMMAND_CAPACITY: usize = 32;

/// Host command served by a runner
#[derive(Debug)]
pub enum Command {
    /// Supply a policy to a conflicted node
    UpdatePolicy {
        /// Conflicted node
        node: NodeId,
        /// Policy to merge
        policy: PolicyPair,
        /// Also apply to every other conflicted node of the same kind
        apply_to_all: bool,
        /// Result of the update
        reply: oneshot::Sender<Result<()>>,
    },
    /// Snapshot the tree
    View {
        /// Snapshot, `None` once the tree is gone
        reply: oneshot::Sender<Option<NodeView>>,
    },
    /// List conflicted nodes
    Conflicts {
        /// Conflicted nodes
        reply: oneshot::Sender<Vec<ConflictInfo>>,
    },
    /// Destroy the tree
    Abort {
        /// Sent once the tree is destroyed
        reply: oneshot::Sender<()>,
    },
}

/// Final state of a task whose runner stopped
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Task
    pub id: TaskId,
    /// Status when the runner stopped
    pub status: TaskStatus,
    /// Remaining tree; only a failed or suspended root leaves one
    pub view: Option<NodeView>,
    /// Counters folded from the task's events
    pub stats: TaskStats,
}

/// Handle to a running task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TaskEvent>,
    report: watch::Receiver<Option<TaskReport>>,
}

impl TaskHandle {
    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Receive events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Final report, once the runner stopped
    pub fn report(&self) -> Option<TaskReport> {
        self.report.borrow().clone()
    }

    /// Supply a policy to a conflicted node
    pub async fn update_policy(
        &self,
        node: NodeId,
        policy: PolicyPair,
        apply_to_all: bool,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpdatePolicy {
            node,
            policy,
            apply_to_all,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.ended())?
    }

    /// Snapshot the tree
    pub async fn view(&self) -> Option<NodeView> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::View { reply }).await.is_ok() {
            if let Ok(view) = rx.await {
                return view;
            }
        }
        self.report().and_then(|report| report.view)
    }

    /// List conflicted nodes
    pub async fn conflicts(&self) -> Vec<ConflictInfo> {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Conflicts { reply }).await.is_ok() {
            return rx.await.unwrap_or_default();
        }
        Vec::new()
    }

    /// Destroy the tree; a no-op once the runner stopped
    pub async fn abort(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Abort { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Wait for the runner to stop
    pub async fn wait(&self) -> Result<TaskReport> {
        let mut report = self.report.clone();
        let done = report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Cancelled)?;
        (*done).clone().ok_or(Error::Cancelled)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| self.ended())
    }

    fn ended(&self) -> Error {
        Error::invalid_request(format!("task {} is no longer running", self.id))
    }
}

/// Owns a task and performs its requests
pub struct TaskRunner {
    task: Task,
    backend: Arc<dyn Backend>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<TaskEvent>,
    collector: Arc<StatisticsCollector>,
    report: watch::Sender<Option<TaskReport>>,
    /// Source removals waiting for the running one to finish
    removals: VecDeque<Request>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("task", &self.task.id())
            .field("backend", &self.backend.name())
            .field("removals", &self.removals.len())
            .finish()
    }
}

impl TaskRunner {
    /// Create a runner and the handle controlling it
    pub fn new(
        task: Task,
        backend: Arc<dyn Backend>,
        collector: Arc<StatisticsCollector>,
        config: SchedulerConfig,
    ) -> (Self, TaskHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (report_tx, report_rx) = watch::channel(None);

        let handle = TaskHandle {
            id: task.id(),
            commands: commands_tx,
            events: events_tx.clone(),
            report: report_rx,
        };
        let runner = Self {
            task,
            backend,
            commands: commands_rx,
            events: events_tx,
            collector,
            report: report_tx,
            removals: VecDeque::new(),
        };
        (runner, handle)
    }

    /// Run on the tokio runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<TaskReport> {
        tokio::spawn(self.run())
    }

    /// Run until the task is done, or until no progress is possible
    ///
    /// A task left waiting on policies keeps running while any handle is alive.
    pub async fn run(mut self) -> TaskReport {
        let id = self.task.id();
        let user = self.task.context().user;
        let backend = Arc::clone(&self.backend);
        let mut pending = FuturesUnordered::new();
        let mut removing = false;
        let mut idle_reported = false;
        let mut commands_open = true;

        debug!(task = %id, "runner started on {}", backend.name());

        loop {
            for request in self.task.take_requests() {
                debug!(task = %id, "{} {} for node {}", request.op.name(), request.ticket, request.node);
                if matches!(request.op, Operation::RemoveEmptyDir(_)) {
                    self.removals.push_back(request);
                } else {
                    pending.push(request.perform(backend.as_ref(), user));
                }
            }
            if !removing {
                if let Some(request) = self.removals.pop_front() {
                    removing = true;
                    pending.push(request.perform(backend.as_ref(), user));
                }
            }

            self.publish().await;

            if self.task.is_done() && pending.is_empty() {
                break;
            }
            if self.task.in_flight() == 0 && !self.task.is_done() {
                if !idle_reported {
                    idle_reported = true;
                    let conflicts = self.task.conflicts().len();
                    info!(task = %id, "waiting on {} conflicts", conflicts);
                    self.emit(TaskEvent::Idle {
                        task: id,
                        conflicts,
                    })
                    .await;
                }
            } else {
                idle_reported = false;
            }

            tokio::select! {
                Some(response) = pending.next(), if !pending.is_empty() => {
                    if let Outcome::Removed(result) = &response.outcome {
                        removing = false;
                        match result {
                            Ok(true) => debug!(task = %id, "removed source of node {}", response.node),
                            Ok(false) => debug!(task = %id, "source of node {} kept, not empty", response.node),
                            Err(error) => warn!(task = %id, "removing source of node {}: {}", response.node, error),
                        }
                    }
                    self.task.handle_response(response);
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
                else => break,
            }
        }

        self.publish().await;
        let status = self.task.status();
        self.collector.record_task_ended(id, status).await;
        let report = TaskReport {
            id,
            status,
            view: self.task.view(),
            stats: self.collector.task_stats(id).await.unwrap_or_default(),
        };
        info!(task = %id, "{}: {}", status, report.stats.summary());
        self.report.send_replace(Some(report.clone()));
        report
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::UpdatePolicy {
                node,
                policy,
                apply_to_all,
                reply,
            } => {
                let result = self.task.update_policy(node, policy, apply_to_all);
                if let Err(error) = &result {
                    debug!(task = %self.task.id(), "policy update rejected: {}", error);
                }
                let _ = reply.send(result);
            }
            Command::View { reply } => {
                let _ = reply.send(self.task.view());
            }
            Command::Conflicts { reply } => {
                let _ = reply.send(self.task.conflicts());
            }
            Command::Abort { reply } => {
                self.task.abort();
                let _ = reply.send(());
            }
        }
    }

    async fn publish(&mut self) {
        for event in self.task.take_events() {
            self.emit(event).await;
        }
    }

    async fn emit(&self, event: TaskEvent) {
        self.collector.record(&event).await;
        // no subscriber is not an error
        let _ = self.events.send(event);
    }
}
