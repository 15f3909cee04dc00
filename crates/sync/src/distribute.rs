//! Broadcasting a model from the coordinator and reconciling it afterwards.

use std::{collections::BTreeSet, time::Instant};

use arbor_core::{Model, NodeId, ParamAssignments, Settings, SubtreePayload, SyncDiff};
use tracing::{debug, error, info};

use crate::{ConflictEntry, ConflictReport, DistributedContext, SyncError};

/// Gives every rank the coordinator's settings, tree and assignment masks.
///
/// Settings travel first, then the subtree under `root`, then the schema's
/// assignment masks. Workers replace their subtree under `root` (if any)
/// with the received one, keeping the old root's attachment, and return the
/// new root; the coordinator keeps its tree. Afterwards every rank's tree is
/// marked synchronized.
///
/// Attachments on the coordinator's tree cannot be transmitted and must be
/// removed first with [`Model::detach_attachments`].
///
/// # Errors
///
/// If the coordinator cannot transmit its tree it returns
/// [`SyncError::Serialization`] listing the nodes that fail on their own,
/// and every worker fails with [`SyncError::Aborted`].
pub fn distribute_state(
    ctx: &DistributedContext,
    model: &mut Model,
    root: Option<NodeId>,
    settings: &mut Settings,
) -> Result<NodeId, SyncError> {
    let start = Instant::now();
    info!(rank = ctx.rank(), size = ctx.size(), "distributing state");

    let received = ctx.broadcast(Some(&*settings))?;
    if !ctx.is_coordinator() {
        *settings = received;
    }

    let root = if ctx.is_coordinator() {
        send_tree(ctx, model, root)?
    } else {
        let payload: SubtreePayload = ctx.broadcast(None)?;
        let root = model.replace_with_payload(root, &payload)?;
        debug!(rank = ctx.rank(), nodes = payload.nodes.len(), "received tree");
        root
    };

    let assignments: ParamAssignments = ctx.broadcast(Some(&model.schema().assignments()))?;
    if !ctx.is_coordinator() {
        model.schema().merge_assignments(&assignments);
    }

    model.mark_synchronized(root)?;
    info!(
        rank = ctx.rank(),
        seconds = start.elapsed().as_secs_f64(),
        "distributed state"
    );
    Ok(root)
}

fn send_tree(
    ctx: &DistributedContext,
    model: &Model,
    root: Option<NodeId>,
) -> Result<NodeId, SyncError> {
    let Some(root) = root else {
        ctx.abort_broadcast("the coordinator has no root to distribute");
        return Err(SyncError::NoRoot);
    };
    let payload = match model.payload(root) {
        Ok(payload) => payload,
        Err(err) => {
            ctx.abort_broadcast(&err.to_string());
            return Err(err.into());
        }
    };
    match ctx.broadcast(Some(&payload)) {
        Ok(_) => Ok(root),
        Err(SyncError::Encode { reason }) => {
            error!(%reason, "failed to transmit the model");
            let failures = model.diagnose_serialization(root)?;
            Err(SyncError::Serialization { reason, failures })
        }
        Err(err) => Err(err),
    }
}

/// Reconciles the parameter changes every rank made since the last
/// distribution or synchronization.
///
/// Each rank gathers every rank's diffs of the subtree under `root` and
/// merges them identically, so all ranks reach the same state. Returns the
/// number of fields written on this rank; a single rank returns zero.
///
/// # Errors
///
/// Returns [`SyncError::Conflicts`] without writing anything if two ranks
/// wrote different values to the same field of the same node, and
/// [`SyncError::ShapeMismatch`] if the ranks hold trees of different sizes.
pub fn sync_state(
    ctx: &DistributedContext,
    model: &mut Model,
    root: NodeId,
) -> Result<usize, SyncError> {
    if !ctx.is_distributable() {
        return Ok(0);
    }
    let start = Instant::now();
    let diffs = model.sync_data(root)?;
    debug!(rank = ctx.rank(), nodes = diffs.len(), "gathering diffs");

    ctx.barrier()?;
    let gathered: Vec<Vec<Option<SyncDiff>>> = ctx.all_gather(&diffs).inspect_err(|err| {
        let changed: Vec<usize> = diffs
            .iter()
            .enumerate()
            .filter_map(|(index, diff)| diff.as_ref().map(|_| index))
            .collect();
        error!(rank = ctx.rank(), error = %err, ?changed, "failed to gather diffs");
    })?;

    let sizes: BTreeSet<usize> = gathered.iter().map(Vec::len).collect();
    if sizes.len() != 1 {
        return Err(SyncError::ShapeMismatch {
            sizes: gathered.iter().map(Vec::len).collect(),
        });
    }

    let plans = model.plan_sync(root, &gathered)?;
    let mut report = ConflictReport::default();
    for (id, plan) in &plans {
        let node = model.node(*id)?;
        for conflict in &plan.conflicts {
            report.entries.push(ConflictEntry {
                composite: model.describe(*id),
                composite_type: format!("{:?}", node.level()),
                parent: node
                    .parent()
                    .map_or_else(|| "None".to_owned(), |parent| model.describe(parent)),
                parameter: conflict.field.clone(),
                ranks: conflict.ranks.clone(),
            });
        }
    }
    if !report.is_empty() {
        report.entries.sort();
        error!(rank = ctx.rank(), conflicts = report.len(), "synchronization failed\n{report}");
        return Err(SyncError::Conflicts(report));
    }

    let count = model.apply_sync(&plans)?;
    model.mark_synchronized(root)?;
    info!(
        rank = ctx.rank(),
        count,
        seconds = start.elapsed().as_secs_f64(),
        "synchronized model"
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use arbor_core::{Attachment, Grid, Level, Locator, Resources, Schema, SettingValue, Symmetry};

    use super::*;
    use crate::comm::LocalCluster;

    /// A hex core with three assemblies, each holding one block.
    fn build(model: &mut Model) -> NodeId {
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model
            .set_grid(core, Some(Grid::hex(16.0, Symmetry::Full)))
            .unwrap();
        for (index, (i, j)) in [(0, 0), (1, 0), (0, 1)].into_iter().enumerate() {
            let assembly = model
                .create_composite(format!("A{index}"), Level::Assembly, "fuel")
                .unwrap();
            model.set_locator(assembly, Locator::index(i, j, 0)).unwrap();
            let block = model
                .create_composite(format!("A{index}B0"), Level::Block, "fuel")
                .unwrap();
            model.add(assembly, block).unwrap();
            model.add(core, assembly).unwrap();
        }
        core
    }

    fn assembly(model: &Model, root: NodeId, index: usize) -> NodeId {
        model.children(root).unwrap()[index]
    }

    /// Runs `f` on every rank after distributing the coordinator's tree.
    fn distributed<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&DistributedContext, &mut Model, NodeId) -> T + Sync,
    {
        LocalCluster::spawn(size, |comm| {
            let ctx = DistributedContext::new(comm);
            let mut model = Model::new(Schema::base(), Resources::default());
            let root = ctx.is_coordinator().then(|| build(&mut model));
            let mut settings = Settings::new();
            let root = distribute_state(&ctx, &mut model, root, &mut settings).unwrap();
            f(&ctx, &mut model, root)
        })
    }

    #[test]
    fn workers_receive_settings_and_tree() {
        let results = LocalCluster::spawn(3, |comm| {
            let ctx = DistributedContext::new(comm);
            let mut model = Model::new(Schema::base(), Resources::default());
            let mut settings = Settings::new();
            let root = if ctx.is_coordinator() {
                settings.set("cycleLength", SettingValue::Float(365.0));
                let core = build(&mut model);
                let first = model.children(core).unwrap()[0];
                model.set_param(first, "power", 12.0).unwrap();
                Some(core)
            } else {
                None
            };
            let root = distribute_state(&ctx, &mut model, root, &mut settings).unwrap();
            let first = assembly(&model, root, 0);
            (
                settings.get_f64("cycleLength").unwrap(),
                model.subtree(root).unwrap().len(),
                model.param_f64(first, "power").unwrap(),
                model.location_label(first).unwrap(),
                model.sync_data(root).unwrap().iter().all(Option::is_none),
            )
        });
        for (cycle, nodes, power, label, clean) in results {
            assert_relative_eq!(cycle, 365.0);
            assert_eq!(nodes, 7);
            assert_relative_eq!(power, 12.0);
            assert_eq!(label.as_deref(), Some("001-001"));
            assert!(clean);
        }
    }

    #[test]
    fn workers_keep_their_own_attachment() {
        let results = LocalCluster::spawn(2, |comm| {
            let ctx = DistributedContext::new(comm);
            let mut model = Model::new(Schema::base(), Resources::default());
            let mut settings = Settings::new();
            let root = build(&mut model);
            if !ctx.is_coordinator() {
                model.attach(root, Attachment::new("operator", 42_u32)).unwrap();
            }
            let root = distribute_state(&ctx, &mut model, Some(root), &mut settings).unwrap();
            model
                .node(root)
                .unwrap()
                .attachment()
                .and_then(|attachment| attachment.downcast_ref::<u32>().copied())
        });
        assert_eq!(results, vec![None, Some(42)]);
    }

    #[test]
    fn untransmittable_tree_fails_on_every_rank() {
        let results = LocalCluster::spawn(3, |comm| {
            let ctx = DistributedContext::new(comm);
            let mut model = Model::new(Schema::base(), Resources::default());
            let mut settings = Settings::new();
            let root = ctx.is_coordinator().then(|| {
                let core = build(&mut model);
                model.attach(core, Attachment::new("database", ())).unwrap();
                core
            });
            distribute_state(&ctx, &mut model, root, &mut settings).map(|_| ())
        });
        match &results[0] {
            Err(SyncError::Serialization { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("core"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        for result in &results[1..] {
            assert!(matches!(result, Err(SyncError::Aborted { rank: 0, .. })));
        }
    }

    #[test]
    fn disjoint_writes_are_merged_everywhere() {
        let results = distributed(3, |ctx, model, root| {
            let mine = assembly(model, root, ctx.rank());
            #[allow(clippy::cast_precision_loss)]
            model.set_param(mine, "power", 10.0 * (ctx.rank() + 1) as f64).unwrap();
            let count = sync_state(ctx, model, root).unwrap();
            let powers: Vec<f64> = (0..3)
                .map(|index| model.param_f64(assembly(model, root, index), "power").unwrap())
                .collect();
            (count, powers, model.sync_data(root).unwrap().iter().all(Option::is_none))
        });
        for (count, powers, clean) in results {
            assert_eq!(count, 3);
            assert_eq!(powers, vec![10.0, 20.0, 30.0]);
            assert!(clean);
        }
    }

    #[test]
    fn conflicting_writes_are_reported_and_not_applied() {
        let results = distributed(3, |ctx, model, root| {
            let first = assembly(model, root, 0);
            let second = assembly(model, root, 1);
            if ctx.rank() < 2 {
                #[allow(clippy::cast_precision_loss)]
                model.set_param(first, "power", 1.0 + ctx.rank() as f64).unwrap();
            } else {
                model.set_param(second, "power", 5.0).unwrap();
            }
            let result = sync_state(ctx, model, root);
            (
                result,
                model.param_f64(first, "power").unwrap(),
                model.param_f64(second, "power").unwrap(),
            )
        });
        for (rank, (result, first, second)) in results.into_iter().enumerate() {
            let Err(SyncError::Conflicts(report)) = result else {
                panic!("rank {rank} did not report the conflict");
            };
            assert_eq!(report.len(), 1);
            assert_eq!(report.entries[0].parameter, "power");
            assert_eq!(report.entries[0].ranks, vec![0, 1]);
            assert!(report.entries[0].composite.contains("A0"));
            #[allow(clippy::cast_precision_loss)]
            let own = if rank < 2 { 1.0 + rank as f64 } else { 0.0 };
            assert_relative_eq!(first, own);
            assert_relative_eq!(second, if rank == 2 { 5.0 } else { 0.0 });
        }
    }

    #[test]
    fn single_rank_sync_is_a_no_op() {
        let ctx = DistributedContext::serial();
        let mut model = Model::new(Schema::base(), Resources::default());
        let root = build(&mut model);
        let mut settings = Settings::new();
        let root = distribute_state(&ctx, &mut model, Some(root), &mut settings).unwrap();
        model.set_param(assembly(&model, root, 0), "power", 1.0).unwrap();
        assert_eq!(sync_state(&ctx, &mut model, root).unwrap(), 0);
    }
}
