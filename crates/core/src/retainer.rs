//! Scoped checkpoint and rollback over a subtree.
//!
//! [`StateRetainer::enter`] backs up every node under a root. The guard
//! dereferences to the [`Model`], so speculative work happens through it;
//! [`StateRetainer::exit`] then rolls every visited node back, keeping only
//! the named parameters. Retainers nest: an inner guard borrows the outer
//! one and restores only to its own entry point.

use std::{
    collections::BTreeSet,
    ops::{Deref, DerefMut},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    model::{Model, ModelError, NodeId},
    params::ParamError,
    schema::ParamAssignments,
};

/// Errors raised when leaving a retainer.
#[derive(Debug, Error)]
pub enum RetainError {
    #[error("cannot restore {node}")]
    Param {
        node: String,
        #[source]
        source: ParamError,
    },

    /// The visited nodes that still exist were restored, but the subtree no
    /// longer has the shape it had on entry.
    #[error("subtree changed while retained: {} added, {} removed", added.len(), removed.len())]
    SubtreeChanged {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Guard holding a backup of every node under a root.
#[derive(Debug)]
pub struct StateRetainer<'m> {
    model: &'m mut Model,
    root: NodeId,
    keep: Vec<String>,
    visited: Vec<NodeId>,
    assignments: ParamAssignments,
    finished: bool,
}

impl<'m> StateRetainer<'m> {
    /// Backs up parameters, caches and grids of `root` and its descendants.
    ///
    /// Parameters named in `keep` hold their latest value on exit; all
    /// others revert.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn enter<S: AsRef<str>>(
        model: &'m mut Model,
        root: NodeId,
        keep: &[S],
    ) -> Result<Self, ModelError> {
        let visited = model.subtree(root)?;
        for &id in &visited {
            let node = model.node_mut(id)?;
            node.params_mut().back_up();
            node.cache.back_up();
            if let Some(grid) = node.grid_mut() {
                grid.back_up();
            }
        }
        let assignments = model.schema().assignments();
        debug!(%root, nodes = visited.len(), "entered state retainer");
        Ok(Self {
            model,
            root,
            keep: keep.iter().map(|name| name.as_ref().to_owned()).collect(),
            visited,
            assignments,
            finished: false,
        })
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Restores every visited node and checks the subtree shape.
    ///
    /// # Errors
    ///
    /// Returns [`RetainError::SubtreeChanged`] after restoring if nodes were
    /// added to or removed from the subtree while retained.
    pub fn exit(mut self) -> Result<(), RetainError> {
        self.finished = true;
        self.restore()
    }

    fn restore(&mut self) -> Result<(), RetainError> {
        let mut first_error = None;
        for &id in &self.visited {
            let Ok(node) = self.model.node_mut(id) else {
                continue;
            };
            let keep: Vec<&str> = self
                .keep
                .iter()
                .map(String::as_str)
                .filter(|name| node.params().defs().get(name).is_some())
                .collect();
            if let Err(source) = node.params_mut().restore_backup(&keep) {
                first_error.get_or_insert(RetainError::Param {
                    node: node.name().to_owned(),
                    source,
                });
            }
            node.cache.discard_backup();
            if let Some(grid) = node.grid_mut() {
                grid.restore_backup();
            }
        }
        self.model.schema().restore_assignments(&self.assignments);
        self.model.invalidate(self.root);
        debug!(root = %self.root, "restored state retainer");

        if let Some(err) = first_error {
            return Err(err);
        }
        let before: BTreeSet<NodeId> = self.visited.iter().copied().collect();
        let after: BTreeSet<NodeId> = match self.model.subtree(self.root) {
            Ok(ids) => ids.into_iter().collect(),
            Err(_) => BTreeSet::new(),
        };
        if before == after {
            return Ok(());
        }
        Err(RetainError::SubtreeChanged {
            added: after.difference(&before).copied().collect(),
            removed: before.difference(&after).copied().collect(),
        })
    }
}

impl Deref for StateRetainer<'_> {
    type Target = Model;

    fn deref(&self) -> &Model {
        self.model
    }
}

impl DerefMut for StateRetainer<'_> {
    fn deref_mut(&mut self) -> &mut Model {
        self.model
    }
}

impl Drop for StateRetainer<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.restore() {
            warn!(
                root = %self.root,
                error = %err,
                "state retainer dropped with an incomplete restore"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        model::Resources,
        params::AssignmentFlags,
        schema::{Level, Schema},
        spatial::{Grid, Symmetry},
    };

    fn tree() -> (Model, NodeId, NodeId, NodeId) {
        let mut model = Model::new(Schema::base(), Resources::default());
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model
            .set_grid(core, Some(Grid::hex(16.0, Symmetry::Third { periodic: true })))
            .unwrap();
        let assembly = model.create_composite("A", Level::Assembly, "fuel").unwrap();
        let leaf = model.create_leaf("fuel", "fuel", None).unwrap();
        model.set_param(leaf, "volume", 4.0).unwrap();
        let block = model.create_composite("B", Level::Block, "fuel").unwrap();
        model.add(block, leaf).unwrap();
        model.add(assembly, block).unwrap();
        model.add(core, assembly).unwrap();
        (model, core, assembly, leaf)
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn exit_without_changes_is_a_no_op() {
        let (mut model, core, assembly, _) = tree();
        model.set_param(assembly, "power", 12.5).unwrap();
        let before = model.params(assembly).unwrap().get("power").unwrap().clone();

        let retainer = StateRetainer::enter(&mut model, core, &[] as &[&str]).unwrap();
        retainer.exit().unwrap();

        assert_eq!(model.params(assembly).unwrap().get("power").unwrap(), &before);
        assert_eq!(model.param_f64(assembly, "power").unwrap(), 12.5);
        assert_eq!(model.params(assembly).unwrap().backup_depth(), 0);
    }

    #[test]
    fn exit_reverts_all_but_kept_parameters() {
        let (mut model, core, assembly, leaf) = tree();
        {
            let mut retainer = StateRetainer::enter(&mut model, core, &["keff"]).unwrap();
            retainer.set_param(assembly, "power", 7.0).unwrap();
            retainer.set_param(core, "keff", 1.1).unwrap();
            retainer.set_param(leaf, "volume", 8.0).unwrap();
            retainer.set_grid_symmetry(core, Symmetry::Full).unwrap();
            assert_relative_eq!(retainer.volume(core).unwrap(), 8.0);
            retainer.exit().unwrap();
        }
        assert_relative_eq!(model.param_f64(assembly, "power").unwrap(), 0.0);
        assert_relative_eq!(model.param_f64(core, "keff").unwrap(), 1.1);
        assert_relative_eq!(model.volume(core).unwrap(), 4.0);
        assert_eq!(
            model.node(core).unwrap().grid().unwrap().symmetry(),
            Symmetry::Third { periodic: true }
        );
    }

    #[test]
    fn kept_volume_is_not_shadowed_by_a_stale_aggregate() {
        let (mut model, core, assembly, leaf) = tree();
        let block = model.children(assembly).unwrap()[0];
        assert_relative_eq!(model.volume(block).unwrap(), 4.0);
        {
            let mut retainer = StateRetainer::enter(&mut model, core, &["volume"]).unwrap();
            retainer.set_param(leaf, "volume", 8.0).unwrap();
            retainer.exit().unwrap();
        }
        assert_relative_eq!(model.param_f64(leaf, "volume").unwrap(), 8.0);
        assert_relative_eq!(model.volume(block).unwrap(), 8.0);
        assert_relative_eq!(model.volume(core).unwrap(), 8.0);
    }

    #[test]
    fn nested_retainers_unwind_in_order() {
        let (mut model, core, assembly, _) = tree();
        let mut outer = StateRetainer::enter(&mut model, core, &[] as &[&str]).unwrap();
        outer.set_param(assembly, "power", 1.0).unwrap();
        {
            let mut inner = StateRetainer::enter(&mut outer, assembly, &[] as &[&str]).unwrap();
            inner.set_param(assembly, "power", 2.0).unwrap();
            inner.exit().unwrap();
        }
        assert_relative_eq!(outer.param_f64(assembly, "power").unwrap(), 1.0);
        outer.exit().unwrap();
        assert_relative_eq!(model.param_f64(assembly, "power").unwrap(), 0.0);
    }

    #[test]
    fn assignment_masks_are_restored() {
        let (mut model, core, assembly, _) = tree();
        model.schema().reset_assignments(AssignmentFlags::SINCE_LAST_DISTRIBUTE_STATE);
        {
            let mut retainer = StateRetainer::enter(&mut model, core, &[] as &[&str]).unwrap();
            retainer.set_param(assembly, "power", 3.0).unwrap();
            let def = retainer.params(assembly).unwrap().defs().get("power").unwrap().assigned();
            assert!(def.intersects(AssignmentFlags::SINCE_LAST_DISTRIBUTE_STATE));
            retainer.exit().unwrap();
        }
        let def = model.params(assembly).unwrap().defs().get("power").unwrap().assigned();
        assert!(!def.intersects(AssignmentFlags::SINCE_LAST_DISTRIBUTE_STATE));
    }

    #[test]
    fn structural_changes_are_reported_after_restoring() {
        let (mut model, core, assembly, _) = tree();
        let mut retainer = StateRetainer::enter(&mut model, core, &[] as &[&str]).unwrap();
        retainer.set_param(assembly, "power", 9.0).unwrap();
        let extra = retainer.create_composite("A2", Level::Assembly, "fuel").unwrap();
        retainer.add(core, extra).unwrap();

        match retainer.exit().unwrap_err() {
            RetainError::SubtreeChanged { added, removed } => {
                assert_eq!(added, vec![extra]);
                assert!(removed.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_relative_eq!(model.param_f64(assembly, "power").unwrap(), 0.0);
    }

    #[test]
    fn dropping_restores() {
        let (mut model, core, assembly, _) = tree();
        {
            let mut retainer = StateRetainer::enter(&mut model, core, &[] as &[&str]).unwrap();
            retainer.set_param(assembly, "power", 4.0).unwrap();
        }
        assert_relative_eq!(model.param_f64(assembly, "power").unwrap(), 0.0);
    }
}
