use approx::assert_relative_eq;
use arbor_converters::ThirdCoreToFullCore;
use arbor_core::{Model, NodeId, SettingValue, Settings, Symmetry};
use arbor_sync::{
    Action, DistributedContext, LocalCluster, SyncError, distribute_state, partition_for_rank,
    run_actions, sync_state,
};
use integration_tests::{hex_core, init_logging, model, rings};
use serde::{Deserialize, Serialize};

/// Distributes a full two-ring core from the coordinator, then runs `f` on
/// every rank.
fn on_every_rank<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&DistributedContext, &mut Model, NodeId) -> T + Sync,
{
    init_logging();
    LocalCluster::spawn(size, |comm| {
        let ctx = DistributedContext::new(comm);
        let mut model = model();
        let root = ctx
            .is_coordinator()
            .then(|| hex_core(&mut model, Symmetry::Full, &rings(2)));
        let mut settings = Settings::new();
        let root = distribute_state(&ctx, &mut model, root, &mut settings).unwrap();
        f(&ctx, &mut model, root)
    })
}

fn powers(model: &Model, root: NodeId) -> Vec<f64> {
    model
        .children(root)
        .unwrap()
        .into_iter()
        .map(|assembly| model.param_f64(assembly, "power").unwrap())
        .collect()
}

#[test]
fn one_field_written_twice_is_one_conflict() {
    let results = on_every_rank(2, |ctx, model, root| {
        let target = model.children(root).unwrap()[3];
        #[allow(clippy::cast_precision_loss)]
        let mine = 100.0 + ctx.rank() as f64;
        model.set_param(target, "power", mine).unwrap();
        let result = sync_state(ctx, model, root);
        (result, mine, model.param_f64(target, "power").unwrap())
    });
    for (result, mine, power) in results {
        let Err(SyncError::Conflicts(report)) = result else {
            panic!("conflict was not reported");
        };
        assert_eq!(report.len(), 1);
        let entry = &report.entries[0];
        assert_eq!(entry.parameter, "power");
        assert_eq!(entry.ranks, vec![0, 1]);
        assert!(entry.composite.contains("002-003"));
        assert_eq!(power, mine);
    }
}

#[test]
fn equal_writes_from_two_ranks_merge() {
    let results = on_every_rank(3, |ctx, model, root| {
        let target = model.children(root).unwrap()[0];
        if ctx.rank() > 0 {
            model.set_param(target, "power", 42.0).unwrap();
        }
        let count = sync_state(ctx, model, root).unwrap();
        (count, model.param_f64(target, "power").unwrap())
    });
    for (count, power) in results {
        assert_eq!(count, 1);
        assert_relative_eq!(power, 42.0);
    }
}

#[test]
fn partitioned_work_is_shared_by_every_rank() {
    let results = on_every_rank(3, |ctx, model, root| {
        let assemblies = model.children(root).unwrap();
        for &assembly in partition_for_rank(&assemblies, ctx.rank(), ctx.size()) {
            let ring = model.location_label(assembly).unwrap().unwrap();
            let power = if ring.starts_with("001") { 50.0 } else { 30.0 };
            model.set_param(assembly, "power", power).unwrap();
        }
        sync_state(ctx, model, root).unwrap();
        powers(model, root)
    });
    let expected = vec![50.0, 30.0, 30.0, 30.0, 30.0, 30.0, 30.0];
    for powers in results {
        assert_eq!(powers, expected);
    }
}

#[test]
fn expanded_core_and_settings_reach_workers() {
    init_logging();
    let results = LocalCluster::spawn(3, |comm| {
        let ctx = DistributedContext::new(comm);
        let mut model = model();
        let mut settings = Settings::new();
        let root = if ctx.is_coordinator() {
            let core = hex_core(&mut model, Symmetry::Third { periodic: true }, &[(0, 0), (1, 0)]);
            ThirdCoreToFullCore::new().convert(&mut model, core, None).unwrap();
            settings.set("nCycles", SettingValue::Int(3));
            Some(core)
        } else {
            None
        };
        let root = distribute_state(&ctx, &mut model, root, &mut settings).unwrap();
        let labels: Vec<String> = model
            .children(root)
            .unwrap()
            .into_iter()
            .filter_map(|assembly| model.location_label(assembly).unwrap())
            .collect();
        (
            settings.get_usize("nCycles").unwrap(),
            model.node(root).unwrap().grid().unwrap().symmetry(),
            labels,
            powers(&model, root).iter().sum::<f64>(),
        )
    });
    for (cycles, symmetry, labels, power) in results {
        assert_eq!(cycles, 3);
        assert_eq!(symmetry, Symmetry::Full);
        assert_eq!(labels, vec!["001-001", "002-001", "002-003", "002-005"]);
        assert_relative_eq!(power, 120.0);
    }
}

/// Sets the power of the assembly at a location label.
#[derive(Debug, Serialize, Deserialize)]
struct SetPower {
    label: String,
    power: f64,
}

impl Action for SetPower {
    type Output = usize;

    fn invoke(&self, ctx: &DistributedContext, model: &mut Model) -> Result<usize, SyncError> {
        let root = model.roots().next().ok_or(SyncError::NoRoot)?;
        if let Some(assembly) = model.find_by_label(root, &self.label)? {
            model.set_param(assembly, "power", self.power)?;
        }
        Ok(ctx.size())
    }
}

#[test]
fn actions_then_sync_give_every_rank_the_results() {
    let results = on_every_rank(3, |ctx, model, root| {
        let actions: Vec<SetPower> = if ctx.is_coordinator() {
            rings(2)
                .into_iter()
                .enumerate()
                .map(|(index, (i, j))| {
                    let (ring, position) = arbor_core::hex::ring_position(i, j);
                    #[allow(clippy::cast_precision_loss)]
                    let power = index as f64;
                    SetPower {
                        label: arbor_core::hex::label(ring, position),
                        power,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        let ran = run_actions(ctx, model, actions).unwrap();
        sync_state(ctx, model, root).unwrap();
        (ran.len(), powers(model, root))
    });
    for (batches, powers) in results {
        assert_eq!(batches, 3);
        assert_eq!(powers, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
