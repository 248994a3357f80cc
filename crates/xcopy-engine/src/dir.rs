//! Directory node behaviour
//!
//! A directory lists its source, creates (or moves) all listed sub-directories in
//! one batched call, then hands out its pending children through the scheduler.
//! Under a move, a sub-directory the backend moved as a whole needs no node; only
//! sub-directories merged into an existing destination are descended into.

use crate::event::TaskEvent;
use crate::node::{Endpoint, NodeId, PendingDir, StagedConflict};
use crate::request::Operation;
use crate::state::{Preparation, State};
use crate::task::{Side, Task};
use std::collections::VecDeque;
use tracing::{debug, warn};
use xcopy_types::{
    BatchResult, EntityKind, EntryOutcome, Error, MkdirsRequest, MvdirsRequest, PolicyPair,
    Result, Stat,
};

impl Task {
    /// Create or move this one directory under its attempted policy
    pub(crate) fn enter_mkdir(&mut self, id: NodeId) -> Result<()> {
        self.ctx.check_direction()?;
        let node = self.node(id)?;
        let State::Mkdir { policy } = node.state else {
            return Ok(());
        };
        let parent = node
            .parent
            .ok_or_else(|| Error::invalid_request("the task root is never created"))?;
        let name = node.src.name.clone();

        let op = self.batch_operation(parent, vec![name], policy)?;
        self.issue(id, op);
        Ok(())
    }

    pub(crate) fn on_mkdir(&mut self, id: NodeId, result: Result<BatchResult>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let State::Mkdir { policy } = node.state else {
            return;
        };
        let name = node.src.name.clone();

        let outcome = match result.and_then(|mut batch| take_outcome(&mut batch, &name)) {
            Ok(outcome) => outcome,
            Err(error) => return self.conflict_or_fail(id, error, policy),
        };
        if let Some(error) = outcome.error {
            return self.conflict_or_fail(id, error, policy);
        }
        if policy.skipped(outcome.resolved) {
            debug!(task = %self.ctx.id, "{} skipped by {}", name, policy);
            return self.set_state(id, State::Finish);
        }
        if self.ctx.task_type.is_move() && !policy.kept(outcome.resolved) {
            // moved as a whole
            return self.set_state(id, State::Finish);
        }
        let Some(stat) = outcome.stat else {
            let error = Error::other(format!("no destination entry for '{}'", name));
            return self.set_state(id, State::Failed { error });
        };

        if let Some(node) = self.nodes.get_mut(id) {
            node.dst = Some(Endpoint::from(&stat));
        }
        self.set_state(id, State::Preparing(Preparation::Listing));
    }

    /// List the source directory
    pub(crate) fn enter_preparing(&mut self, id: NodeId) -> Result<()> {
        self.ctx.check_direction()?;
        let dir = self.dir_location(id, Side::Src)?;
        if let Some(node) = self.nodes.get_mut(id) {
            node.listed = true;
        }
        self.issue(id, Operation::Readdir(dir));
        Ok(())
    }

    pub(crate) fn on_listing(&mut self, id: NodeId, result: Result<Vec<Stat>>) {
        let stats = match result {
            Ok(stats) => stats,
            Err(error) => return self.set_state(id, State::Failed { error }),
        };
        let is_root = self.nodes.get(id).is_some_and(|node| node.is_root());
        let stats = if is_root {
            self.select_entries(id, stats)
        } else {
            stats
        };

        let (dirs, files): (Vec<Stat>, Vec<Stat>) = stats.into_iter().partition(Stat::is_dir);
        if dirs.is_empty() && files.is_empty() {
            return self.set_state(id, State::Finish);
        }
        if dirs.is_empty() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.fstats = files.into();
            }
            return self.set_state(id, State::Parent);
        }

        let policy = self.ctx.global_policy(EntityKind::Directory);
        let names = dirs.iter().map(|dir| dir.name.clone()).collect();
        let op = match self.batch_operation(id, names, policy) {
            Ok(op) => op,
            Err(error) => return self.set_state(id, State::Failed { error }),
        };
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = State::Preparing(Preparation::Creating {
                dirs,
                files,
                policy,
            });
        }
        self.issue(id, op);
    }

    pub(crate) fn on_batch(&mut self, id: NodeId, result: Result<BatchResult>) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let creating = std::mem::replace(&mut node.state, State::Preparing(Preparation::Listing));
        let (dirs, files, policy) = match creating {
            State::Preparing(Preparation::Creating {
                dirs,
                files,
                policy,
            }) => (dirs, files, policy),
            other => {
                node.state = other;
                return;
            }
        };

        let mut batch = match result {
            Ok(batch) => batch,
            Err(error) => return self.set_state(id, State::Failed { error }),
        };

        let is_move = self.ctx.task_type.is_move();
        let mut pending = VecDeque::new();
        let mut staged = Vec::new();
        for src in dirs {
            let outcome = take_outcome(&mut batch, &src.name).unwrap_or_else(EntryOutcome::failed);
            if policy.skipped(outcome.resolved) {
                continue;
            }
            match outcome.error {
                Some(error) if error.is_conflict() => staged.push(StagedConflict { src, error, policy }),
                Some(error) => self.drop_entry(id, src.name, Some(EntityKind::Directory), error),
                None if is_move && !policy.kept(outcome.resolved) => {}
                None => match outcome.stat {
                    Some(dst) => pending.push_back(PendingDir { src, dst }),
                    None => {
                        let error = Error::other(format!("no destination entry for '{}'", src.name));
                        self.drop_entry(id, src.name, Some(EntityKind::Directory), error);
                    }
                },
            }
        }

        if pending.is_empty() && staged.is_empty() && files.is_empty() {
            return self.set_state(id, State::Finish);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.dstats = pending;
            node.fstats = files.into();
            node.staged = staged;
        }
        self.set_state(id, State::Parent);
    }

    /// Turn staged clashes into conflicted children
    pub(crate) fn enter_parent(&mut self, id: NodeId) {
        let staged = match self.nodes.get_mut(id) {
            Some(node) => std::mem::take(&mut node.staged),
            None => return,
        };
        for conflict in staged {
            let child = self.spawn(
                id,
                EntityKind::Directory,
                Endpoint::from(&conflict.src),
                None,
            );
            self.set_state(
                child,
                State::Conflict {
                    error: conflict.error,
                    policy: conflict.policy,
                },
            );
        }
    }

    /// Start up to `n` pending sub-directories
    pub(crate) fn create_sub_dir(&mut self, id: NodeId, n: usize) -> usize {
        let batch: Vec<PendingDir> = match self.nodes.get_mut(id) {
            Some(node) if n > 0 && matches!(node.state, State::Parent) => {
                let take = n.min(node.dstats.len());
                node.dstats.drain(..take).collect()
            }
            _ => return 0,
        };

        // attach every child before entering any, so an early failure cannot
        // leave this node looking drained
        let children: Vec<NodeId> = batch
            .iter()
            .map(|pending| {
                self.spawn(
                    id,
                    EntityKind::Directory,
                    Endpoint::from(&pending.src),
                    Some(Endpoint::from(&pending.dst)),
                )
            })
            .collect();
        for child in &children {
            if self.nodes.contains(*child) {
                self.set_state(*child, State::Preparing(Preparation::Listing));
            }
        }
        children.len()
    }

    /// Abandon the subtree
    pub(crate) fn enter_failed(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if let State::Failed { error } = &node.state {
            debug!(task = %self.ctx.id, "{} failed: {}", node.display_name(), error);
        }
        for child in node.children.clone() {
            self.destroy(child);
        }
    }

    /// Under a move, remove the emptied source directory
    ///
    /// Only directories whose contents were handled one by one are removed; the
    /// result is informational and is never waited for.
    pub(crate) fn enter_finish(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !self.ctx.task_type.is_move() || node.is_root() || !node.listed {
            return;
        }
        match self.dir_location(id, Side::Src) {
            Ok(dir) => self.issue(id, Operation::RemoveEmptyDir(dir)),
            Err(error) => debug!(task = %self.ctx.id, "not removing source of {}: {}", id, error),
        }
    }

    /// Mkdirs into, or mvdirs between, the directories `id` stands for
    fn batch_operation(&self, id: NodeId, names: Vec<String>, policy: PolicyPair) -> Result<Operation> {
        let policy = policy.for_backend();
        let dst = self.dir_location(id, Side::Dst)?;
        if self.ctx.task_type.is_move() {
            Ok(Operation::Mvdirs(MvdirsRequest {
                src: self.dir_location(id, Side::Src)?,
                dst,
                names,
                policy,
            }))
        } else {
            Ok(Operation::Mkdirs(MkdirsRequest {
                dir: dst,
                names,
                policy,
            }))
        }
    }

    /// Keep the listed entries the task names, in the order it names them
    fn select_entries(&mut self, id: NodeId, stats: Vec<Stat>) -> Vec<Stat> {
        let mut selected = Vec::with_capacity(self.ctx.entries.len());
        for entry in self.ctx.entries.clone() {
            match stats.iter().find(|stat| stat.name == entry) {
                Some(stat) => selected.push(stat.clone()),
                None => {
                    let error = Error::not_found(entry.clone());
                    self.drop_entry(id, entry, None, error);
                }
            }
        }
        selected
    }

    fn drop_entry(&mut self, parent: NodeId, name: String, kind: Option<EntityKind>, error: Error) {
        warn!(task = %self.ctx.id, "dropping '{}': {}", name, error);
        self.events.push(TaskEvent::EntryDropped {
            task: self.ctx.id,
            parent,
            name,
            kind,
            error,
        });
    }
}

fn take_outcome(batch: &mut BatchResult, name: &str) -> Result<EntryOutcome> {
    batch
        .remove(name)
        .ok_or_else(|| Error::other(format!("no result for '{}'", name)))
}
