//! Spreading independent units of work over the ranks.

use arbor_core::Model;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::{DistributedContext, SyncError};

/// Priority given to actions that do not set one; lower runs first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// A unit of work that can be sent to a rank and run there.
///
/// While an action runs, `ctx` spans only the ranks that received an action
/// in the same batch, so actions can use collectives among themselves.
pub trait Action {
    type Output;

    /// Exclusive actions are queued first and keep their ranks to
    /// themselves for the rest of the run.
    fn exclusive(&self) -> bool {
        false
    }

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// # Errors
    ///
    /// Implementations decide what failure means for them.
    fn invoke(
        &self,
        ctx: &DistributedContext,
        model: &mut Model,
    ) -> Result<Self::Output, SyncError>;
}

/// Sorts actions into per-batch assignments, one slot per rank.
///
/// Exclusive actions come first, then the rest, each group by priority.
/// If there are not enough usable ranks to give every exclusive action its
/// own rank and still leave one rank for the rest, no action is treated as
/// exclusive. A rank that runs an exclusive action gets nothing afterwards.
#[must_use]
pub fn plan_batches<A: Action>(actions: Vec<A>, usable: &[bool]) -> Vec<Vec<Option<A>>> {
    let mut queue: Vec<(bool, A)> = actions
        .into_iter()
        .map(|action| (action.exclusive(), action))
        .collect();
    queue.sort_by_key(|(exclusive, action)| (!exclusive, action.priority()));

    let available = usable.iter().filter(|&&usable| usable).count();
    let exclusive = queue.iter().filter(|(exclusive, _)| *exclusive).count();
    if exclusive + 1 > available {
        for entry in &mut queue {
            entry.0 = false;
        }
    }

    let mut usable = usable.to_vec();
    let mut queue = queue.into_iter().peekable();
    let mut batches = Vec::new();
    while queue.peek().is_some() {
        if !usable.contains(&true) {
            break;
        }
        let mut batch = Vec::with_capacity(usable.len());
        for slot in &mut usable {
            let next = if *slot { queue.next() } else { None };
            batch.push(next.map(|(exclusive, action)| {
                if exclusive {
                    *slot = false;
                }
                action
            }));
        }
        batches.push(batch);
    }
    batches
}

/// Runs the coordinator's `actions` across every rank.
///
/// Only the coordinator's `actions` are read. Each batch is scattered one
/// action per rank; ranks with an action run it inside a sub-context of the
/// ranks that have one. Returns this rank's result for every batch, `None`
/// where it had no action.
///
/// # Errors
///
/// Fails if a batch cannot be transmitted, or with the first error of an
/// action run on this rank.
pub fn run_actions<A>(
    ctx: &DistributedContext,
    model: &mut Model,
    actions: Vec<A>,
) -> Result<Vec<Option<A::Output>>, SyncError>
where
    A: Action + Serialize + DeserializeOwned,
{
    if !ctx.is_distributable() {
        return Ok(run_actions_serial(model, actions)?.into_iter().map(Some).collect());
    }

    let batches = if ctx.is_coordinator() {
        let batches = plan_batches(actions, &vec![true; ctx.size()]);
        info!(batches = batches.len(), ranks = ctx.size(), "running actions in parallel");
        Some(batches)
    } else {
        None
    };
    let count: usize = ctx.broadcast(batches.as_ref().map(Vec::len).as_ref())?;

    let mut batches = batches.map(Vec::into_iter);
    let mut results = Vec::with_capacity(count);
    for number in 1..=count {
        let batch = batches.as_mut().and_then(Iterator::next);
        let action: Option<A> = ctx.scatter(batch)?;
        let Some(sub) = ctx.sub_context(Some(usize::from(action.is_some())))? else {
            results.push(None);
            continue;
        };
        match action {
            Some(action) => {
                debug!(rank = ctx.rank(), batch = number, of = count, "running action");
                results.push(Some(action.invoke(&sub, model)?));
            }
            None => results.push(None),
        }
    }
    Ok(results)
}

/// Runs `actions` one after another on this process alone.
///
/// # Errors
///
/// Fails with the first action error.
pub fn run_actions_serial<A: Action>(
    model: &mut Model,
    actions: Vec<A>,
) -> Result<Vec<A::Output>, SyncError> {
    let ctx = DistributedContext::serial();
    let total = actions.len();
    info!(actions = total, "running actions in serial");
    actions
        .into_iter()
        .enumerate()
        .map(|(index, action)| {
            debug!(action = index + 1, of = total, "running action");
            action.invoke(&ctx, model)
        })
        .collect()
}

/// The contiguous share of `items` that `rank` of `size` is responsible for.
///
/// Shares differ in length by at most one, with the longer shares going to
/// the lowest ranks. Concatenating every rank's share in rank order gives
/// back `items`.
#[must_use]
pub fn partition_for_rank<T>(items: &[T], rank: usize, size: usize) -> &[T] {
    if size == 0 || rank >= size {
        return &[];
    }
    let base = items.len() / size;
    let extra = items.len() % size;
    let (start, len) = if rank < extra {
        (rank * (base + 1), base + 1)
    } else {
        (rank * base + extra, base)
    };
    &items[start..start + len]
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use arbor_core::{Level, Resources, Schema};

    use super::*;
    use crate::comm::LocalCluster;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sum {
        name: String,
        values: Vec<f64>,
        exclusive: bool,
        priority: i32,
    }

    impl Sum {
        fn new(name: &str, values: &[f64]) -> Self {
            Self {
                name: name.to_owned(),
                values: values.to_vec(),
                exclusive: false,
                priority: DEFAULT_PRIORITY,
            }
        }

        fn solo(mut self) -> Self {
            self.exclusive = true;
            self
        }

        fn ranked(mut self, priority: i32) -> Self {
            self.priority = priority;
            self
        }
    }

    impl Action for Sum {
        type Output = (String, f64, usize);

        fn exclusive(&self) -> bool {
            self.exclusive
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn invoke(
            &self,
            ctx: &DistributedContext,
            _model: &mut Model,
        ) -> Result<Self::Output, SyncError> {
            Ok((self.name.clone(), self.values.iter().sum(), ctx.size()))
        }
    }

    fn names(batches: &[Vec<Option<Sum>>]) -> Vec<Vec<Option<&str>>> {
        batches
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .map(|slot| slot.as_ref().map(|sum| sum.name.as_str()))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn partitions_balance_like_divmod() {
        let items: Vec<usize> = (0..12).collect();
        let shares: Vec<&[usize]> =
            (0..5).map(|rank| partition_for_rank(&items, rank, 5)).collect();
        assert_eq!(shares.iter().map(|share| share.len()).collect::<Vec<_>>(), vec![3, 3, 2, 2, 2]);
        assert_eq!(shares.concat(), items);
        assert!(partition_for_rank(&items, 5, 5).is_empty());
        assert!(partition_for_rank(&[0_u8; 0], 0, 3).is_empty());
    }

    #[test]
    fn exclusive_actions_go_first_and_keep_their_rank() {
        let actions = vec![
            Sum::new("late", &[]).ranked(9),
            Sum::new("early", &[]).ranked(1),
            Sum::new("solo", &[]).solo(),
            Sum::new("middle", &[]),
        ];
        let batches = plan_batches(actions, &[true, true, true]);
        assert_eq!(
            names(&batches),
            vec![
                vec![Some("solo"), Some("early"), Some("middle")],
                vec![None, Some("late"), None],
            ]
        );
    }

    #[test]
    fn too_many_exclusive_actions_are_demoted() {
        let actions = vec![
            Sum::new("a", &[]).solo(),
            Sum::new("b", &[]).solo(),
            Sum::new("c", &[]),
        ];
        let batches = plan_batches(actions, &[true, true]);
        assert_eq!(
            names(&batches),
            vec![vec![Some("a"), Some("b")], vec![Some("c"), None]]
        );
    }

    #[test]
    fn serial_runs_every_action_in_order() {
        let mut model = Model::new(Schema::base(), Resources::default());
        model.create_composite("core", Level::Core, "core").unwrap();
        let actions = vec![Sum::new("x", &[1.0, 2.0]), Sum::new("y", &[4.0])];
        let results = run_actions_serial(&mut model, actions).unwrap();
        assert_eq!(results, vec![("x".to_owned(), 3.0, 1), ("y".to_owned(), 4.0, 1)]);
    }

    #[test]
    fn parallel_batches_use_sub_contexts() {
        let results = LocalCluster::spawn(3, |comm| {
            let ctx = DistributedContext::new(comm);
            let mut model = Model::new(Schema::base(), Resources::default());
            let actions = if ctx.is_coordinator() {
                vec![
                    Sum::new("a", &[1.0]),
                    Sum::new("b", &[2.0]),
                    Sum::new("c", &[3.0]),
                    Sum::new("d", &[4.0]),
                ]
            } else {
                Vec::new()
            };
            run_actions(&ctx, &mut model, actions).unwrap()
        });
        assert_eq!(
            results[0],
            vec![Some(("a".to_owned(), 1.0, 3)), Some(("d".to_owned(), 4.0, 1))]
        );
        assert_eq!(results[1], vec![Some(("b".to_owned(), 2.0, 3)), None]);
        assert_eq!(results[2], vec![Some(("c".to_owned(), 3.0, 3)), None]);
    }
}
