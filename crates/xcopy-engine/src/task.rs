//! The task tree
//!
//! [`Task`] is a synchronous state machine over a tree of directory and file nodes.
//! It performs no I/O: operations it wants performed are collected with
//! [`Task::take_requests`], and their results are fed back through
//! [`Task::handle_response`]. Observable progress is collected with
//! [`Task::take_events`]. The async [`TaskRunner`](crate::TaskRunner) drives a
//! task against a real backend.
//!
//! Every node waits for at most one response at a time. The node records the
//! ticket of that request; a state exit clears it, so a response that arrives
//! after its node moved on, or was destroyed, is dropped.

use crate::context::{TaskContext, TaskId, TaskRequest};
use crate::event::TaskEvent;
use crate::node::{Arena, Endpoint, Node, NodeId};
use crate::request::{Operation, Outcome, Request, Response, Ticket};
use crate::scheduler::{QuotaTarget, SchedulePass, Scheduler, SchedulerConfig};
use crate::state::{Preparation, State, StateName};
use crate::view::{ConflictInfo, ErrorView, NodeView};
use std::fmt;
use tracing::{debug, info};
use xcopy_types::{EntityKind, Error, Location, PolicyPair, Result};

/// Overall status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TaskStatus {
    /// Operations are in flight
    Running,
    /// Nothing in flight; the remaining nodes wait on policies
    Idle,
    /// The root reached `Finish`
    Finished,
    /// The root reached `Failed`
    Failed,
    /// The root was destroyed by the host
    Aborted,
}

impl TaskStatus {
    /// Check if the task can make no further progress on its own or otherwise
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Side {
    Src,
    Dst,
}

/// A copy, move, import or export of a set of entries
#[derive(Debug)]
pub struct Task {
    pub(crate) ctx: TaskContext,
    pub(crate) nodes: Arena<Node>,
    root: NodeId,
    scheduler: Scheduler,
    next_ticket: u64,
    in_flight: usize,
    /// Outstanding source removals; the runner performs them one at a time
    removals: usize,
    requests: Vec<Request>,
    pub(crate) events: Vec<TaskEvent>,
    sched_requested: bool,
    aborted: bool,
}

impl Task {
    /// Create a task; its root starts listing the source directory right away
    pub fn new(id: TaskId, request: TaskRequest, config: SchedulerConfig) -> Self {
        let ctx = TaskContext::new(id, request);
        let root_src = Endpoint::new(drive_dir(&ctx.src), "");
        let root_dst = Endpoint::new(drive_dir(&ctx.dst), "");

        let mut nodes = Arena::new();
        let root = nodes.insert(Node::new(
            EntityKind::Directory,
            None,
            root_src,
            Some(root_dst),
        ));

        info!(
            task = %id,
            "{} {} -> {} started ({} entries)",
            ctx.task_type,
            ctx.src,
            ctx.dst,
            ctx.entries.len()
        );

        let mut task = Self {
            ctx,
            nodes,
            root,
            scheduler: Scheduler::new(config.max_in_flight),
            next_ticket: 0,
            in_flight: 0,
            removals: 0,
            requests: Vec::new(),
            events: Vec::new(),
            sched_requested: false,
            aborted: false,
        };
        task.set_state(root, State::Preparing(Preparation::Listing));
        task.schedule();
        task
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.ctx.id
    }

    /// Task context
    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Root node handle
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Backend operations issued and not yet answered
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        if self.aborted {
            return TaskStatus::Aborted;
        }
        match self.nodes.get(self.root).map(|root| root.state.name()) {
            Some(StateName::Finish) => TaskStatus::Finished,
            Some(StateName::Failed) => TaskStatus::Failed,
            None => TaskStatus::Aborted,
            Some(_) if self.in_flight == 0 => TaskStatus::Idle,
            Some(_) => TaskStatus::Running,
        }
    }

    /// The root is terminal or gone
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Operations to perform
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Events since the last call
    pub fn take_events(&mut self) -> Vec<TaskEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feed back the result of an operation
    pub fn handle_response(&mut self, response: Response) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if matches!(response.outcome, Outcome::Removed(_)) {
            self.removals = self.removals.saturating_sub(1);
        }

        let Response {
            ticket,
            node: id,
            outcome,
        } = response;

        let state = match self.nodes.get_mut(id) {
            Some(node) if node.ticket == Some(ticket) => {
                node.ticket = None;
                Some(node.state.name())
            }
            Some(node) => {
                debug!(
                    task = %self.ctx.id,
                    "dropping stale response {} for {} in {}",
                    ticket,
                    node.display_name(),
                    node.state.name()
                );
                None
            }
            None => {
                debug!(task = %self.ctx.id, "dropping response {} for destroyed node {}", ticket, id);
                None
            }
        };

        let Some(state) = state else {
            self.request_schedule();
            self.schedule();
            return;
        };

        match (state, outcome) {
            (StateName::Mkdir, Outcome::Batch(result)) => self.on_mkdir(id, result),
            (StateName::Preparing, Outcome::Listing(result)) => self.on_listing(id, result),
            (StateName::Preparing, Outcome::Batch(result)) => self.on_batch(id, result),
            (StateName::Working, Outcome::Entry(result)) => self.on_transfer(id, result),
            (state, _) => debug!(task = %self.ctx.id, "unexpected response for node {} in {}", id, state),
        }

        // the freed slot may be grantable even if nothing changed state
        self.request_schedule();
        self.schedule();
    }

    /// Merge `policy` into a conflicted node's local policy and retry it
    ///
    /// With `apply_to_all`, the policy is also merged into the task-wide policy
    /// for the node's kind and every other conflicted node of that kind is retried.
    pub fn update_policy(&mut self, id: NodeId, policy: PolicyPair, apply_to_all: bool) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::invalid_request(format!("unknown node {}", id)))?;
        if !matches!(node.state, State::Conflict { .. }) {
            return Err(Error::invalid_request(format!(
                "node {} is in {}, not in Conflict",
                id,
                node.state.name()
            )));
        }
        node.policy.merge(policy);
        let kind = node.kind;
        debug!(task = %self.ctx.id, "policy of {} updated to {}", node.display_name(), node.policy);

        self.retry(id);

        if apply_to_all {
            self.ctx.policies.for_kind_mut(kind).merge(policy);
            info!(
                task = %self.ctx.id,
                "{} policy is now {}",
                kind,
                self.ctx.policies.for_kind(kind)
            );
            let waiting: Vec<NodeId> = self
                .depth_first()
                .into_iter()
                .filter(|other| self.is_conflicted(*other, kind))
                .collect();
            for other in waiting {
                // an earlier retry may have destroyed or moved it
                if self.is_conflicted(other, kind) {
                    self.retry(other);
                }
            }
        }

        self.schedule();
        Ok(())
    }

    /// Destroy the whole tree; outstanding operations are not undone
    pub fn abort(&mut self) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        info!(task = %self.ctx.id, "aborted with {} operations in flight", self.in_flight);
        self.destroy(self.root);
    }

    /// Snapshot of the live tree
    pub fn view(&self) -> Option<NodeView> {
        self.view_node(self.root)
    }

    /// Nodes waiting on a policy, depth first
    pub fn conflicts(&self) -> Vec<ConflictInfo> {
        self.depth_first()
            .into_iter()
            .filter_map(|id| {
                let node = self.nodes.get(id)?;
                match &node.state {
                    State::Conflict { error, policy } => Some(ConflictInfo {
                        node: id,
                        kind: node.kind,
                        path: self.path_of(id),
                        error: ErrorView::from(error),
                        policy: *policy,
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    /// Run one scheduler pass
    pub fn schedule_pass(&mut self) -> SchedulePass {
        let scheduler = self.scheduler;
        scheduler.pass(self)
    }

    fn schedule(&mut self) {
        while std::mem::take(&mut self.sched_requested) {
            let pass = self.schedule_pass();
            if pass.total() > 0 {
                debug!(
                    task = %self.ctx.id,
                    "scheduled {} dirs and {} files, {} in flight",
                    pass.dirs,
                    pass.files,
                    self.in_flight
                );
            }
        }
    }

    fn request_schedule(&mut self) {
        self.sched_requested = true;
    }

    /// Exit the current state and enter `state`
    pub(crate) fn set_state(&mut self, id: NodeId, state: State) {
        let Some(node) = self.nodes.get_mut(id) else {
            debug!(task = %self.ctx.id, "ignoring transition of destroyed node {}", id);
            return;
        };
        node.ticket = None;
        node.state = state;
        let name = node.state.name();

        let entered = match name {
            StateName::Mkdir => self.enter_mkdir(id),
            StateName::Preparing => self.enter_preparing(id),
            StateName::Working => self.enter_working(id),
            StateName::Parent => {
                self.enter_parent(id);
                Ok(())
            }
            StateName::Failed => {
                self.enter_failed(id);
                Ok(())
            }
            StateName::Finish => {
                self.enter_finish(id);
                Ok(())
            }
            StateName::Conflict => Ok(()),
        };

        let Some(node) = self.nodes.get(id) else {
            return;
        };
        debug!(task = %self.ctx.id, "{} entered {}", node.display_name(), name);
        self.events.push(TaskEvent::StateEntered {
            task: self.ctx.id,
            node: id,
            root: node.is_root(),
            kind: node.kind,
            name: node.src.name.clone(),
            state: name,
        });
        self.request_schedule();

        if let Err(error) = entered {
            self.set_state(id, State::Failed { error });
        } else if name.is_terminal() {
            self.on_terminal(id);
        }
    }

    /// A terminal child leaves the tree; its parent may be done
    fn on_terminal(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let Some(parent) = node.parent else {
            info!(task = %self.ctx.id, "root reached {}", node.state.name());
            return;
        };

        self.destroy(id);

        let parent_done = self
            .nodes
            .get(parent)
            .is_some_and(|p| matches!(p.state, State::Parent) && p.is_drained());
        if parent_done {
            self.set_state(parent, State::Finish);
        }
    }

    /// Destroy a subtree, children first
    pub(crate) fn destroy(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        for child in node.children.clone() {
            self.destroy(child);
        }

        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| *child != id);
        }
        self.events.push(TaskEvent::Destroyed {
            task: self.ctx.id,
            node: id,
        });
    }

    /// Create a node under `parent`; its first `set_state` replaces the placeholder state
    pub(crate) fn spawn(
        &mut self,
        parent: NodeId,
        kind: EntityKind,
        src: Endpoint,
        dst: Option<Endpoint>,
    ) -> NodeId {
        let id = self.nodes.insert(Node::new(kind, Some(parent), src, dst));
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(id);
        }
        id
    }

    /// Record an operation for `id` to wait on
    pub(crate) fn issue(&mut self, id: NodeId, op: Operation) {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        if let Some(node) = self.nodes.get_mut(id) {
            node.ticket = Some(ticket);
        }
        self.in_flight += 1;
        if matches!(op, Operation::RemoveEmptyDir(_)) {
            self.removals += 1;
        }
        self.requests.push(Request {
            ticket,
            node: id,
            op,
        });
    }

    /// Re-enter the working state of a conflicted node
    fn retry(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let policy = node.policy.resolve(self.ctx.global_policy(node.kind));
        let next = match node.kind {
            EntityKind::Directory => State::Mkdir { policy },
            EntityKind::File => State::Working { policy },
        };
        self.set_state(id, next);
    }

    /// Route an operation error to `Conflict` or `Failed`
    pub(crate) fn conflict_or_fail(&mut self, id: NodeId, error: Error, policy: PolicyPair) {
        if error.is_conflict() {
            self.set_state(id, State::Conflict { error, policy });
        } else {
            self.set_state(id, State::Failed { error });
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::invalid_request(format!("unknown node {}", id)))
    }

    fn is_conflicted(&self, id: NodeId, kind: EntityKind) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|node| node.kind == kind && matches!(node.state, State::Conflict { .. }))
    }

    /// Live nodes in depth-first pre-order, children in creation order
    pub(crate) fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.iter().rev());
        }
        order
    }

    /// Directory a node stands for on one side of the task
    ///
    /// Drive sides address directories by identifier, native sides by the path of
    /// names from the root. Destination paths use destination names.
    pub(crate) fn dir_location(&self, id: NodeId, side: Side) -> Result<Location> {
        let base = match side {
            Side::Src => &self.ctx.src,
            Side::Dst => &self.ctx.dst,
        };
        match base {
            Location::Drive { drive, .. } => {
                let node = self.node(id)?;
                let endpoint = match side {
                    Side::Src => Some(&node.src),
                    Side::Dst => node.dst.as_ref(),
                };
                let dir = endpoint.and_then(|e| e.uuid.clone()).ok_or_else(|| {
                    Error::not_found(format!("identifier of '{}'", node.display_name()))
                })?;
                Ok(Location::drive(drive.clone(), dir))
            }
            Location::Native { id: fs, path } => {
                let mut names = Vec::new();
                let mut current = id;
                loop {
                    let node = self.node(current)?;
                    let Some(parent) = node.parent else {
                        break;
                    };
                    let name = match side {
                        Side::Src => node.src.name.clone(),
                        Side::Dst => node
                            .dst
                            .as_ref()
                            .map(|dst| dst.name.clone())
                            .ok_or_else(|| {
                                Error::not_found(format!("destination of '{}'", node.src.name))
                            })?,
                    };
                    names.push(name);
                    current = parent;
                }
                let mut path = path.clone();
                path.extend(names.iter().rev());
                Ok(Location::native(fs.clone(), path))
            }
        }
    }

    /// Source names from the root down to a node
    fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(c)) {
            if node.is_root() {
                break;
            }
            names.push(node.src.name.as_str());
            current = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    fn view_node(&self, id: NodeId) -> Option<NodeView> {
        let node = self.nodes.get(id)?;
        let (error, policy) = match &node.state {
            State::Conflict { error, policy } => (Some(ErrorView::from(error)), Some(*policy)),
            State::Failed { error } => (Some(ErrorView::from(error)), None),
            _ => (None, None),
        };
        Some(NodeView {
            id,
            kind: node.kind,
            name: node.src.name.clone(),
            dst_name: node
                .dst
                .as_ref()
                .filter(|dst| !node.is_root() && dst.name != node.src.name)
                .map(|dst| dst.name.clone()),
            state: node.state.name(),
            error,
            policy,
            pending_dirs: node.dstats.len(),
            pending_files: node.fstats.len(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.view_node(*child))
                .collect(),
        })
    }
}

impl QuotaTarget for Task {
    // queued removals wait behind the running one and hold no slot
    fn in_flight(&self) -> usize {
        self.in_flight.saturating_sub(self.removals.saturating_sub(1))
    }

    fn parents_depth_first(&self) -> Vec<NodeId> {
        self.depth_first()
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(*id)
                    .is_some_and(|node| matches!(node.state, State::Parent))
            })
            .collect()
    }

    fn create_sub_dir(&mut self, node: NodeId, n: usize) -> usize {
        Task::create_sub_dir(self, node, n)
    }

    fn create_sub_file(&mut self, node: NodeId, n: usize) -> usize {
        Task::create_sub_file(self, node, n)
    }
}

fn drive_dir(location: &Location) -> Option<String> {
    match location {
        Location::Drive { dir, .. } => Some(dir.clone()),
        Location::Native { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Operation, Outcome};
    use uuid::Uuid;
    use xcopy_types::{
        EntryOutcome, FileRequest, InFlightLimit, MkdirsRequest, MvdirsRequest, Policy, Resolved,
        Stat, TaskType,
    };

    fn request(task_type: TaskType) -> TaskRequest {
        TaskRequest::new(
            task_type,
            Uuid::nil(),
            Location::drive("d", "a"),
            Location::drive("d", "dst"),
        )
    }

    fn start(request: TaskRequest) -> Task {
        Task::new(TaskId::new(), request, SchedulerConfig::default())
    }

    fn one(task: &mut Task) -> Request {
        let mut requests = task.take_requests();
        assert_eq!(requests.len(), 1, "{:?}", requests);
        requests.remove(0)
    }

    fn listing(stats: Vec<Stat>) -> Outcome {
        Outcome::Listing(Ok(stats))
    }

    fn batch<const N: usize>(entries: [(&str, EntryOutcome); N]) -> Outcome {
        Outcome::Batch(Ok(entries
            .into_iter()
            .map(|(name, outcome)| (name.to_string(), outcome))
            .collect()))
    }

    fn copied(name: &str) -> Outcome {
        Outcome::Entry(Ok(EntryOutcome::created(
            Stat::file(name).with_uuid(format!("dst/{}", name)),
        )))
    }

    fn entered(events: &[TaskEvent], node_name: &str) -> Vec<StateName> {
        events
            .iter()
            .filter_map(|event| match event {
                TaskEvent::StateEntered { name, state, .. } if name == node_name => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn find(requests: &[Request], wanted: fn(&Operation) -> bool) -> Request {
        requests
            .iter()
            .find(|request| wanted(&request.op))
            .cloned()
            .unwrap()
    }

    fn clash(name: &str, kind: EntityKind) -> Error {
        Error::conflict(name, kind, kind)
    }

    #[test]
    fn test_copy_without_conflicts() {
        let mut task = start(request(TaskType::Copy).with_entries(["x.txt", "sub"]));

        let readdir = one(&mut task);
        assert_eq!(readdir.op, Operation::Readdir(Location::drive("d", "a")));
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::file("x.txt").with_uuid("a/x.txt"),
                Stat::dir("sub").with_uuid("a/sub"),
                Stat::file("unlisted").with_uuid("a/unlisted"),
            ]),
        ));

        let mkdirs = one(&mut task);
        assert_eq!(
            mkdirs.op,
            Operation::Mkdirs(MkdirsRequest {
                dir: Location::drive("d", "dst"),
                names: vec!["sub".to_string()],
                policy: PolicyPair::NONE,
            })
        );
        task.handle_response(Response::to(
            &mkdirs,
            batch([(
                "sub",
                EntryOutcome::created(Stat::dir("sub").with_uuid("dst/sub")),
            )]),
        ));

        let requests = task.take_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].op, Operation::Readdir(Location::drive("d", "a/sub")));
        assert_eq!(
            requests[1].op,
            Operation::CopyFile(FileRequest {
                src: Location::drive("d", "a"),
                dst: Location::drive("d", "dst"),
                name: "x.txt".to_string(),
                policy: PolicyPair::NONE,
            })
        );

        task.handle_response(Response::to(&requests[0], listing(Vec::new())));
        assert_eq!(task.status(), TaskStatus::Running);
        task.handle_response(Response::to(&requests[1], copied("x.txt")));

        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.in_flight(), 0);
        assert_eq!(task.node_count(), 1);

        let events = task.take_events();
        use StateName::*;
        assert_eq!(entered(&events, ""), [Preparing, Parent, Finish]);
        assert_eq!(entered(&events, "sub"), [Preparing, Finish]);
        assert_eq!(entered(&events, "x.txt"), [Working, Finish]);
        assert!(entered(&events, "unlisted").is_empty());
        assert!(events.last().is_some_and(TaskEvent::is_root_terminal));
    }

    #[test]
    fn test_renamed_directory_is_descended_into() {
        let rename = PolicyPair::new(Some(Policy::Rename), None);
        let mut task = start(
            request(TaskType::Copy)
                .with_entries(["sub"])
                .with_dir_policy(rename),
        );

        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![Stat::dir("sub").with_uuid("a/sub")]),
        ));
        let mkdirs = one(&mut task);
        assert!(matches!(&mkdirs.op, Operation::Mkdirs(r) if r.policy == rename));
        task.handle_response(Response::to(
            &mkdirs,
            batch([(
                "sub",
                EntryOutcome::resolved(
                    Stat::dir("sub (2)").with_uuid("dst/sub (2)"),
                    Resolved::SAME,
                ),
            )]),
        ));

        let list = one(&mut task);
        assert_eq!(list.op, Operation::Readdir(Location::drive("d", "a/sub")));
        let view = task.view().unwrap();
        assert_eq!(view.children.len(), 1);
        assert_eq!(view.children[0].dst_name.as_deref(), Some("sub (2)"));
        assert_eq!(view.children[0].state, StateName::Preparing);

        task.handle_response(Response::to(
            &list,
            listing(vec![Stat::file("y").with_uuid("a/sub/y")]),
        ));
        let copy = one(&mut task);
        assert_eq!(
            copy.op,
            Operation::CopyFile(FileRequest {
                src: Location::drive("d", "a/sub"),
                dst: Location::drive("d", "dst/sub (2)"),
                name: "y".to_string(),
                policy: PolicyPair::NONE,
            })
        );
    }

    #[test]
    fn test_move_descends_only_into_kept_directories() {
        let mut task = start(
            request(TaskType::Move)
                .with_entries(["keep", "gone"])
                .with_dir_policy(PolicyPair::new(Some(Policy::Keep), None)),
        );

        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::dir("gone").with_uuid("a/gone"),
                Stat::dir("keep").with_uuid("a/keep"),
            ]),
        ));

        let mvdirs = one(&mut task);
        assert_eq!(
            mvdirs.op,
            Operation::Mvdirs(MvdirsRequest {
                src: Location::drive("d", "a"),
                dst: Location::drive("d", "dst"),
                names: vec!["keep".to_string(), "gone".to_string()],
                policy: PolicyPair::new(Some(Policy::Skip), None),
            })
        );
        task.handle_response(Response::to(
            &mvdirs,
            batch([
                (
                    "keep",
                    EntryOutcome::resolved(Stat::dir("keep").with_uuid("dst/keep"), Resolved::SAME),
                ),
                (
                    "gone",
                    EntryOutcome::created(Stat::dir("gone").with_uuid("dst/gone")),
                ),
            ]),
        ));

        let list = one(&mut task);
        assert_eq!(list.op, Operation::Readdir(Location::drive("d", "a/keep")));
        let view = task.view().unwrap();
        assert_eq!(view.children.len(), 1);
        assert_eq!(view.children[0].name, "keep");

        task.handle_response(Response::to(&list, listing(Vec::new())));
        let remove = one(&mut task);
        assert_eq!(
            remove.op,
            Operation::RemoveEmptyDir(Location::drive("d", "a/keep"))
        );
        assert_eq!(task.status(), TaskStatus::Finished);

        // informational only; the node is already gone
        task.handle_response(Response::to(&remove, Outcome::Removed(Ok(true))));
        assert_eq!(task.in_flight(), 0);
        assert!(task.take_requests().is_empty());
    }

    #[test]
    fn test_queued_removals_hold_one_slot() {
        let config = SchedulerConfig::default().with_max_in_flight(InFlightLimit::new(3).unwrap());
        let mut task = Task::new(
            TaskId::new(),
            request(TaskType::Move)
                .with_entries(["k1", "k2", "f.txt"])
                .with_dir_policy(PolicyPair::new(Some(Policy::Keep), None)),
            config,
        );

        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::dir("k1").with_uuid("a/k1"),
                Stat::dir("k2").with_uuid("a/k2"),
                Stat::file("f.txt").with_uuid("a/f.txt"),
            ]),
        ));
        let mvdirs = one(&mut task);
        task.handle_response(Response::to(
            &mvdirs,
            batch([
                ("k1", EntryOutcome::resolved(Stat::dir("k1").with_uuid("dst/k1"), Resolved::SAME)),
                ("k2", EntryOutcome::resolved(Stat::dir("k2").with_uuid("dst/k2"), Resolved::SAME)),
            ]),
        ));

        let requests = task.take_requests();
        assert_eq!(requests.len(), 3);
        let move_file = find(&requests, |op| matches!(op, Operation::MoveFile(_)));
        for list in requests.iter().filter(|r| matches!(r.op, Operation::Readdir(_))) {
            task.handle_response(Response::to(list, listing(Vec::new())));
        }
        let removals = task.take_requests();
        assert_eq!(removals.len(), 2);
        assert!(removals
            .iter()
            .all(|r| matches!(r.op, Operation::RemoveEmptyDir(_))));

        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.in_flight(), 3);
        assert_eq!(QuotaTarget::in_flight(&task), 2);

        task.handle_response(Response::to(&removals[0], Outcome::Removed(Ok(true))));
        assert_eq!(QuotaTarget::in_flight(&task), 2);
        task.handle_response(Response::to(&removals[1], Outcome::Removed(Ok(true))));
        assert_eq!(QuotaTarget::in_flight(&task), 1);
        task.handle_response(Response::to(&move_file, copied("f.txt")));
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.in_flight(), 0);
    }

    #[test]
    fn test_unresolved_clash_waits_for_policy() {
        let mut task = start(request(TaskType::Copy).with_entries(["sub"]));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![Stat::dir("sub").with_uuid("a/sub")]),
        ));
        let mkdirs = one(&mut task);
        task.handle_response(Response::to(
            &mkdirs,
            batch([(
                "sub",
                EntryOutcome::failed(clash("sub", EntityKind::Directory)),
            )]),
        ));

        assert_eq!(task.status(), TaskStatus::Idle);
        assert!(task.take_requests().is_empty());

        let conflicts = task.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "sub");
        assert_eq!(conflicts[0].error.code, "EEXIST");
        assert_eq!(conflicts[0].policy, PolicyPair::NONE);

        let view = task.view().unwrap();
        assert_eq!(view.state, StateName::Parent);
        let child = view.find(conflicts[0].node).unwrap();
        assert_eq!(child.state, StateName::Conflict);
        assert_eq!(child.policy, Some(PolicyPair::NONE));

        let err = task
            .update_policy(task.root(), PolicyPair::both(Policy::Skip), false)
            .unwrap_err();
        assert_eq!(err.code(), "EINVAL");

        let rename = PolicyPair::new(Some(Policy::Rename), None);
        task.update_policy(conflicts[0].node, rename, false).unwrap();
        let retry = one(&mut task);
        assert_eq!(
            retry.op,
            Operation::Mkdirs(MkdirsRequest {
                dir: Location::drive("d", "dst"),
                names: vec!["sub".to_string()],
                policy: rename,
            })
        );
        assert_eq!(task.context().policies.dir, PolicyPair::NONE);

        task.handle_response(Response::to(
            &retry,
            batch([(
                "sub",
                EntryOutcome::resolved(
                    Stat::dir("sub (2)").with_uuid("dst/sub (2)"),
                    Resolved::SAME,
                ),
            )]),
        ));
        let list = one(&mut task);
        assert_eq!(list.op, Operation::Readdir(Location::drive("d", "a/sub")));
        assert!(task.conflicts().is_empty());
    }

    #[test]
    fn test_apply_to_all_retries_every_conflicted_file() {
        let mut task = start(request(TaskType::Copy).with_entries(["f1", "f2", "f3"]));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![Stat::file("f1"), Stat::file("f2"), Stat::file("f3")]),
        ));

        let copies = task.take_requests();
        assert_eq!(copies.len(), 3);
        task.handle_response(Response::to(
            &copies[0],
            Outcome::Entry(Err(clash("f1", EntityKind::File))),
        ));
        task.handle_response(Response::to(
            &copies[1],
            Outcome::Entry(Ok(EntryOutcome::failed(clash("f2", EntityKind::File)))),
        ));
        task.handle_response(Response::to(&copies[2], copied("f3")));
        assert_eq!(task.conflicts().len(), 2);

        let replace = PolicyPair::both(Policy::Replace);
        task.update_policy(copies[0].node, replace, true).unwrap();
        assert_eq!(task.context().policies.file, replace);

        let retries = task.take_requests();
        assert_eq!(retries.len(), 2);
        for retry in &retries {
            assert!(matches!(&retry.op, Operation::CopyFile(r) if r.policy == replace));
        }
        for retry in &retries {
            let Operation::CopyFile(r) = &retry.op else {
                unreachable!()
            };
            let name = r.name.clone();
            task.handle_response(Response::to(retry, copied(&name)));
        }
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_in_flight_ceiling() {
        let names: Vec<String> = (0..5).map(|i| format!("f{}", i)).collect();
        let config = SchedulerConfig::default().with_max_in_flight(InFlightLimit::new(2).unwrap());
        let mut task = Task::new(
            TaskId::new(),
            request(TaskType::Copy).with_entries(names.clone()),
            config,
        );
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(names.iter().map(Stat::file).collect()),
        ));

        let first = task.take_requests();
        assert_eq!(first.len(), 2);
        assert_eq!(task.in_flight(), 2);
        assert_eq!(task.view().unwrap().pending_files, 3);

        task.handle_response(Response::to(&first[0], copied("f0")));
        let next = one(&mut task);
        assert!(matches!(&next.op, Operation::CopyFile(r) if r.name == "f2"));
        assert_eq!(task.in_flight(), 2);
    }

    #[test]
    fn test_failed_subtree_does_not_stop_siblings() {
        let mut task = start(request(TaskType::Copy).with_entries(["bad", "good"]));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::dir("bad").with_uuid("a/bad"),
                Stat::dir("good").with_uuid("a/good"),
            ]),
        ));
        let mkdirs = one(&mut task);
        task.handle_response(Response::to(
            &mkdirs,
            batch([
                ("bad", EntryOutcome::created(Stat::dir("bad").with_uuid("dst/bad"))),
                ("good", EntryOutcome::created(Stat::dir("good").with_uuid("dst/good"))),
            ]),
        ));

        let lists = task.take_requests();
        assert_eq!(lists.len(), 2);
        task.handle_response(Response::to(
            &lists[0],
            Outcome::Listing(Err(Error::io("disk went away"))),
        ));
        assert_eq!(task.status(), TaskStatus::Running);
        task.handle_response(Response::to(&lists[1], listing(Vec::new())));

        assert_eq!(task.status(), TaskStatus::Finished);
        let events = task.take_events();
        assert_eq!(entered(&events, "bad"), [StateName::Preparing, StateName::Failed]);
        assert_eq!(entered(&events, "good"), [StateName::Preparing, StateName::Finish]);
    }

    #[test]
    fn test_dropped_entries_are_reported() {
        let mut task = start(request(TaskType::Copy).with_entries(["missing", "broken", "ok"]));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::dir("broken").with_uuid("a/broken"),
                Stat::dir("ok").with_uuid("a/ok"),
            ]),
        ));
        let mkdirs = one(&mut task);
        task.handle_response(Response::to(
            &mkdirs,
            batch([
                ("broken", EntryOutcome::failed(Error::io("read-only"))),
                ("ok", EntryOutcome::created(Stat::dir("ok").with_uuid("dst/ok"))),
            ]),
        ));

        let list = one(&mut task);
        assert_eq!(list.op, Operation::Readdir(Location::drive("d", "a/ok")));

        let dropped: Vec<(String, Option<EntityKind>, &'static str)> = task
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::EntryDropped {
                    name, kind, error, ..
                } => Some((name, kind, error.code())),
                _ => None,
            })
            .collect();
        assert_eq!(
            dropped,
            vec![
                ("missing".to_string(), None, "ENOENT"),
                ("broken".to_string(), Some(EntityKind::Directory), "EIO"),
            ]
        );
    }

    #[test]
    fn test_unsupported_direction_fails_root() {
        let mut task = start(request(TaskType::Import).with_entries(["x"]));
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.take_requests().is_empty());
        assert_eq!(
            entered(&task.take_events(), ""),
            [StateName::Preparing, StateName::Failed]
        );
        let view = task.view().unwrap();
        assert_eq!(view.error.unwrap().code, "ENOSYS");
    }

    #[test]
    fn test_empty_entries_finish_after_listing() {
        let mut task = start(request(TaskType::Copy));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![Stat::file("x")]),
        ));
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_abort_drops_late_responses() {
        let mut task = start(request(TaskType::Copy).with_entries(["sub"]));
        let readdir = one(&mut task);
        task.take_events();

        task.abort();
        assert_eq!(task.status(), TaskStatus::Aborted);
        assert_eq!(task.node_count(), 0);
        assert!(task.view().is_none());

        task.handle_response(Response::to(
            &readdir,
            listing(vec![Stat::dir("sub").with_uuid("a/sub")]),
        ));
        assert_eq!(task.in_flight(), 0);
        assert!(task.take_requests().is_empty());
        let events = task.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TaskEvent::Destroyed { .. }));
    }

    #[test]
    fn test_abort_destroys_descendants_first() {
        let mut task = start(request(TaskType::Copy).with_entries(["sub", "y.txt"]));
        let readdir = one(&mut task);
        task.handle_response(Response::to(
            &readdir,
            listing(vec![
                Stat::dir("sub").with_uuid("a/sub"),
                Stat::file("y.txt").with_uuid("a/y.txt"),
            ]),
        ));
        let mkdirs = one(&mut task);
        task.handle_response(Response::to(
            &mkdirs,
            batch([("sub", EntryOutcome::created(Stat::dir("sub").with_uuid("dst/sub")))]),
        ));

        let requests = task.take_requests();
        assert_eq!(requests.len(), 2);
        let list_sub = find(&requests, |op| matches!(op, Operation::Readdir(_)));
        let copy_y = find(&requests, |op| matches!(op, Operation::CopyFile(_)));
        task.handle_response(Response::to(
            &list_sub,
            listing(vec![
                Stat::dir("inner").with_uuid("a/sub/inner"),
                Stat::file("x.txt").with_uuid("a/sub/x.txt"),
            ]),
        ));
        let mkdir_inner = one(&mut task);
        task.handle_response(Response::to(
            &mkdir_inner,
            batch([(
                "inner",
                EntryOutcome::created(Stat::dir("inner").with_uuid("dst/sub/inner")),
            )]),
        ));

        let requests = task.take_requests();
        assert_eq!(requests.len(), 2);
        let list_inner = find(&requests, |op| matches!(op, Operation::Readdir(_)));
        let copy_x = find(&requests, |op| matches!(op, Operation::CopyFile(_)));
        assert_eq!(task.in_flight(), 3);
        assert_eq!(task.node_count(), 5);

        let (root, sub, y, inner, x) = (
            task.root(),
            list_sub.node,
            copy_y.node,
            list_inner.node,
            copy_x.node,
        );
        task.take_events();
        task.abort();
        let destroyed: Vec<NodeId> = task
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Destroyed { node, .. } => Some(node),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed.len(), 5);
        assert_eq!(destroyed.last(), Some(&root));
        let at = |node: NodeId| destroyed.iter().position(|id| *id == node).unwrap();
        assert!(at(inner) < at(sub));
        assert!(at(x) < at(sub));
        assert!(at(sub) < at(root));
        assert!(at(y) < at(root));

        task.handle_response(Response::to(&copy_x, copied("x.txt")));
        task.handle_response(Response::to(&list_inner, listing(Vec::new())));
        task.handle_response(Response::to(&copy_y, copied("y.txt")));
        assert_eq!(task.in_flight(), 0);
        assert_eq!(task.status(), TaskStatus::Aborted);
        assert!(task.take_requests().is_empty());
        let late = task.take_events();
        assert!(
            !late
                .iter()
                .any(|event| matches!(event, TaskEvent::StateEntered { .. })),
            "{:?}",
            late
        );
    }

    #[test]
    fn test_import_addresses_native_source_by_path() {
        let mut task = start(
            TaskRequest::new(
                TaskType::Import,
                Uuid::nil(),
                Location::native("usb", "/mnt/usb/photos"),
                Location::drive("d", "dst"),
            )
            .with_entries(["album"]),
        );

        let readdir = one(&mut task);
        assert_eq!(
            readdir.op,
            Operation::Readdir(Location::native("usb", "/mnt/usb/photos"))
        );
        task.handle_response(Response::to(&readdir, listing(vec![Stat::dir("album")])));
        let mkdirs = one(&mut task);
        task.handle_response(Response::to(
            &mkdirs,
            batch([(
                "album",
                EntryOutcome::created(Stat::dir("album").with_uuid("dst/album")),
            )]),
        ));

        let list = one(&mut task);
        assert_eq!(
            list.op,
            Operation::Readdir(Location::native("usb", "/mnt/usb/photos/album"))
        );
    }
}
