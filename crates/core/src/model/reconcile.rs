use tracing::debug;

use crate::params::{AssignmentFlags, MergePlan, SyncDiff};

use super::{Model, ModelError, NodeId};

impl Model {
    /// Per-node diffs of the subtree under `root`, in pre-order.
    ///
    /// Every process must produce this list in the same order for the same
    /// tree, since diffs from different processes are aligned by position.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn sync_data(&self, root: NodeId) -> Result<Vec<Option<SyncDiff>>, ModelError> {
        self.subtree(root)?
            .into_iter()
            .map(|id| Ok(self.node(id)?.params.sync_data()))
            .collect()
    }

    /// Plans the reconciliation of the diffs gathered from every rank.
    ///
    /// `gathered[rank]` is that rank's [`sync_data`](Self::sync_data). The
    /// plans are returned in pre-order, conflicts included; nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if a rank's list does not
    /// match the subtree size, and fails if a diff names an undefined
    /// parameter or carries a value of the wrong kind.
    pub fn plan_sync(
        &self,
        root: NodeId,
        gathered: &[Vec<Option<SyncDiff>>],
    ) -> Result<Vec<(NodeId, MergePlan)>, ModelError> {
        let ids = self.subtree(root)?;
        if let Some((rank, diffs)) = gathered
            .iter()
            .enumerate()
            .find(|(_, diffs)| diffs.len() != ids.len())
        {
            return Err(ModelError::InvalidOperation {
                node: self.describe(root),
                reason: format!("rank {rank} sent {} diffs for {} nodes", diffs.len(), ids.len()),
            });
        }

        let mut plans = Vec::with_capacity(ids.len());
        for (position, &id) in ids.iter().enumerate() {
            let diffs: Vec<Option<SyncDiff>> =
                gathered.iter().map(|diffs| diffs[position].clone()).collect();
            let plan = self.node(id)?.params.plan_merge(&diffs).map_err(self.param_error(id))?;
            plans.push((id, plan));
        }
        Ok(plans)
    }

    /// Writes the updates of every plan, returning how many fields changed.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] without writing anything if
    /// any plan has a conflict.
    pub fn apply_sync(&mut self, plans: &[(NodeId, MergePlan)]) -> Result<usize, ModelError> {
        if let Some((id, plan)) = plans.iter().find(|(_, plan)| !plan.is_clean()) {
            return Err(ModelError::InvalidOperation {
                node: self.describe(*id),
                reason: format!("{} conflicting fields", plan.conflicts.len()),
            });
        }
        let mut count = 0;
        for (id, plan) in plans {
            let result = self.node_mut(*id)?.params.apply_merge(plan);
            count += result.map_err(self.param_error(*id))?;
            self.invalidate(*id);
        }
        Ok(count)
    }

    /// Clears `epoch` from every node of the subtree and from the schema's
    /// definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn reset_assigned(
        &mut self,
        root: NodeId,
        epoch: AssignmentFlags,
    ) -> Result<(), ModelError> {
        let ids = self.subtree(root)?;
        for &id in &ids {
            self.node_mut(id)?.params.clear_assigned(epoch);
        }
        self.schema.reset_assignments(epoch);
        debug!(%root, nodes = ids.len(), epoch = epoch.bits(), "reset assignment masks");
        Ok(())
    }

    /// Marks the subtree as matching every other process.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn mark_synchronized(&mut self, root: NodeId) -> Result<(), ModelError> {
        self.reset_assigned(root, AssignmentFlags::SINCE_LAST_DISTRIBUTE_STATE)
    }
}
