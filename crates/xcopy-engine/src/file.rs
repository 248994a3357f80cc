//! File node behaviour

use crate::node::{Endpoint, NodeId};
use crate::request::Operation;
use crate::state::State;
use crate::task::{Side, Task};
use xcopy_types::{EntityKind, EntryOutcome, Error, FileRequest, Result, Stat};

impl Task {
    /// Copy or move the file under its attempted policy
    pub(crate) fn enter_working(&mut self, id: NodeId) -> Result<()> {
        self.ctx.check_direction()?;
        let node = self.node(id)?;
        let State::Working { policy } = node.state else {
            return Ok(());
        };
        let parent = node
            .parent
            .ok_or_else(|| Error::invalid_request("a file cannot be the task root"))?;
        let request = FileRequest {
            src: self.dir_location(parent, Side::Src)?,
            dst: self.dir_location(parent, Side::Dst)?,
            name: node.src.name.clone(),
            policy: policy.for_backend(),
        };

        let op = if self.ctx.task_type.is_move() {
            Operation::MoveFile(request)
        } else {
            Operation::CopyFile(request)
        };
        self.issue(id, op);
        Ok(())
    }

    pub(crate) fn on_transfer(&mut self, id: NodeId, result: Result<EntryOutcome>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let State::Working { policy } = node.state else {
            return;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => return self.conflict_or_fail(id, error, policy),
        };
        if let Some(error) = outcome.error {
            return self.conflict_or_fail(id, error, policy);
        }
        if let (Some(stat), Some(node)) = (outcome.stat, self.nodes.get_mut(id)) {
            node.dst = Some(Endpoint::from(&stat));
        }
        self.set_state(id, State::Finish);
    }

    /// Start up to `n` pending files
    pub(crate) fn create_sub_file(&mut self, id: NodeId, n: usize) -> usize {
        let batch: Vec<Stat> = match self.nodes.get_mut(id) {
            Some(node) if n > 0 && matches!(node.state, State::Parent) => {
                let take = n.min(node.fstats.len());
                node.fstats.drain(..take).collect()
            }
            _ => return 0,
        };

        let children: Vec<NodeId> = batch
            .iter()
            .map(|stat| self.spawn(id, EntityKind::File, Endpoint::from(stat), None))
            .collect();
        let policy = self.ctx.global_policy(EntityKind::File);
        for child in &children {
            if self.nodes.contains(*child) {
                self.set_state(*child, State::Working { policy });
            }
        }
        children.len()
    }
}
