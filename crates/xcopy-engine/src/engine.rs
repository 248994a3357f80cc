//! Task registry
//!
//! [`XcopyEngine`] creates tasks, routes host commands to them by id and keeps
//! the statistics of every task it ran.

use crate::context::{TaskId, TaskRequest};
use crate::event::TaskEvent;
use crate::monitor::{Statistics, StatisticsCollector};
use crate::node::NodeId;
use crate::runner::{TaskHandle, TaskReport, TaskRunner};
use crate::scheduler::SchedulerConfig;
use crate::task::Task;
use crate::view::{ConflictInfo, NodeView};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use xcopy_config::{Config, ConfigLoader};
use xcopy_types::{Backend, Error, PolicyPair, Result, TaskStats, TaskType, UserId};

/// A registered task
#[derive(Debug, Clone)]
struct TaskEntry {
    user: UserId,
    task_type: TaskType,
    handle: TaskHandle,
}

/// Summary of a registered task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    /// Task
    pub id: TaskId,
    /// Operation
    pub task_type: TaskType,
    /// Owner
    pub user: UserId,
    /// Whether the runner stopped
    pub ended: bool,
}

/// Creates and tracks xcopy tasks
#[derive(Clone)]
pub struct XcopyEngine {
    config: Arc<Config>,
    scheduler: SchedulerConfig,
    backend: Arc<dyn Backend>,
    tasks: Arc<RwLock<HashMap<TaskId, TaskEntry>>>,
    statistics: Arc<StatisticsCollector>,
}

impl std::fmt::Debug for XcopyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XcopyEngine")
            .field("scheduler", &self.scheduler)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl XcopyEngine {
    /// Create an engine with the configuration found in the default locations
    pub fn new(backend: Arc<dyn Backend>) -> Result<Self> {
        let config = ConfigLoader::load_default()?;
        Ok(Self::with_config(config, backend))
    }

    /// Create an engine with custom configuration
    pub fn with_config(config: Config, backend: Arc<dyn Backend>) -> Self {
        let scheduler = SchedulerConfig::from_config(&config);
        Self::with_scheduler_config(config, scheduler, backend)
    }

    fn with_scheduler_config(
        config: Config,
        scheduler: SchedulerConfig,
        backend: Arc<dyn Backend>,
    ) -> Self {
        info!(
            "xcopy engine ready on {} (max {} in flight per task)",
            backend.name(),
            scheduler.max_in_flight.get()
        );
        Self {
            config: Arc::new(config),
            scheduler,
            backend,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            statistics: Arc::new(StatisticsCollector::new()),
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a task
    pub async fn create_task(&self, request: TaskRequest) -> Result<TaskId> {
        let (id, _) = self.start(request, false).await?;
        Ok(id)
    }

    /// Start a task and receive every event it publishes, its first included
    pub async fn create_task_with_events(
        &self,
        request: TaskRequest,
    ) -> Result<(TaskId, broadcast::Receiver<TaskEvent>)> {
        let (id, events) = self.start(request, true).await?;
        let events = events.ok_or_else(|| Error::other("event subscription missing"))?;
        Ok((id, events))
    }

    async fn start(
        &self,
        request: TaskRequest,
        subscribe: bool,
    ) -> Result<(TaskId, Option<broadcast::Receiver<TaskEvent>>)> {
        let request = request.with_default_policies(self.config.policies.to_policies());
        request.validate()?;

        let id = TaskId::new();
        let user = request.user;
        let task_type = request.task_type;
        debug!("creating task {}: {:?}", id, request);

        let task = Task::new(id, request, self.scheduler);
        self.statistics.record_task_started(id).await;
        let (runner, handle) = TaskRunner::new(
            task,
            Arc::clone(&self.backend),
            Arc::clone(&self.statistics),
            self.scheduler,
        );
        let events = subscribe.then(|| handle.subscribe());

        self.tasks.write().await.insert(
            id,
            TaskEntry {
                user,
                task_type,
                handle,
            },
        );
        runner.spawn();
        Ok((id, events))
    }

    /// Tasks owned by `user`
    pub async fn list_tasks(&self, user: UserId) -> Vec<TaskSummary> {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.user == user)
            .map(|(id, entry)| TaskSummary {
                id: *id,
                task_type: entry.task_type,
                user: entry.user,
                ended: entry.handle.report().is_some(),
            })
            .collect()
    }

    /// Snapshot a task's tree
    pub async fn view(&self, id: TaskId) -> Result<Option<NodeView>> {
        Ok(self.handle(id).await?.view().await)
    }

    /// Conflicted nodes of a task
    pub async fn conflicts(&self, id: TaskId) -> Result<Vec<ConflictInfo>> {
        Ok(self.handle(id).await?.conflicts().await)
    }

    /// Supply a policy to a conflicted node
    pub async fn update_policy(
        &self,
        id: TaskId,
        node: NodeId,
        policy: PolicyPair,
        apply_to_all: bool,
    ) -> Result<()> {
        self.handle(id)
            .await?
            .update_policy(node, policy, apply_to_all)
            .await
    }

    /// Receive a task's events from now on
    pub async fn subscribe(&self, id: TaskId) -> Result<broadcast::Receiver<TaskEvent>> {
        Ok(self.handle(id).await?.subscribe())
    }

    /// Wait for a task's runner to stop
    pub async fn wait(&self, id: TaskId) -> Result<TaskReport> {
        self.handle(id).await?.wait().await
    }

    /// Abort a task but keep it registered, so its report can still be awaited
    pub async fn abort(&self, id: TaskId) -> Result<()> {
        self.handle(id).await?.abort().await;
        info!("task {} aborted", id);
        Ok(())
    }

    /// Abort a task and forget it
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let entry = self
            .tasks
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| unknown(id))?;
        entry.handle.abort().await;
        info!("task {} deleted", id);
        Ok(())
    }

    /// Counters of one task
    pub async fn statistics(&self, id: TaskId) -> Option<TaskStats> {
        self.statistics.task_stats(id).await
    }

    /// Engine-wide statistics
    pub async fn total_statistics(&self) -> Statistics {
        self.statistics.current_stats().await
    }

    async fn handle(&self, id: TaskId) -> Result<TaskHandle> {
        self.tasks
            .read()
            .await
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| unknown(id))
    }
}

fn unknown(id: TaskId) -> Error {
    Error::invalid_request(format!("unknown task {}", id))
}

/// Builder for creating an engine with custom configuration
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<Config>,
    scheduler_config: Option<SchedulerConfig>,
    backend: Option<Arc<dyn Backend>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("scheduler_config", &self.scheduler_config)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the scheduler settings of the configuration
    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = Some(config);
        self
    }

    /// Set the backend every task runs against
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<XcopyEngine> {
        let backend = self
            .backend
            .ok_or_else(|| Error::config("an engine needs a backend"))?;
        let config = match self.config {
            Some(config) => config,
            None => ConfigLoader::load_default()?,
        };
        let scheduler = self
            .scheduler_config
            .unwrap_or_else(|| SchedulerConfig::from_config(&config));
        Ok(XcopyEngine::with_scheduler_config(config, scheduler, backend))
    }
}
