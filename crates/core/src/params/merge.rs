use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Value;

/// Fields a node changed since the last distribution, keyed by name.
pub type SyncDiff = BTreeMap<String, Value>;

/// One field written to different values by different processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Every rank that wrote the field, in rank order.
    pub ranks: Vec<usize>,
}

/// The outcome of reconciling one node's diffs from every process.
///
/// Planning never touches a collection, so a caller can inspect the
/// conflicts of every node before applying any plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub updates: BTreeMap<String, Value>,
    pub conflicts: Vec<FieldConflict>,
}

struct Pending {
    value: Value,
    ranks: Vec<usize>,
    conflicting: bool,
}

impl MergePlan {
    /// Reconciles per-rank diffs, visited in rank order.
    ///
    /// A field written by several ranks to equal values is merged; written to
    /// differing values it becomes a single [`FieldConflict`] and is left out
    /// of `updates`.
    #[must_use]
    pub fn plan(diffs: &[Option<SyncDiff>]) -> Self {
        let mut pending: BTreeMap<&str, Pending> = BTreeMap::new();
        for (rank, diff) in diffs.iter().enumerate() {
            let Some(diff) = diff else { continue };
            for (field, value) in diff {
                match pending.get_mut(field.as_str()) {
                    None => {
                        pending.insert(
                            field.as_str(),
                            Pending {
                                value: value.clone(),
                                ranks: vec![rank],
                                conflicting: false,
                            },
                        );
                    }
                    Some(entry) => {
                        entry.ranks.push(rank);
                        if !entry.value.bitwise_eq(value) {
                            entry.conflicting = true;
                        }
                    }
                }
            }
        }

        let mut plan = Self::default();
        for (field, entry) in pending {
            if entry.conflicting {
                plan.conflicts.push(FieldConflict {
                    field: field.to_owned(),
                    ranks: entry.ranks,
                });
            } else {
                plan.updates.insert(field.to_owned(), entry.value);
            }
        }
        plan
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(entries: &[(&str, f64)]) -> Option<SyncDiff> {
        Some(
            entries
                .iter()
                .map(|&(name, x)| (name.to_owned(), Value::Float(x)))
                .collect(),
        )
    }

    #[test]
    fn disjoint_changes_merge() {
        let plan = MergePlan::plan(&[diff(&[("power", 1.0)]), None, diff(&[("flux", 2.0)])]);
        assert!(plan.is_clean());
        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.updates["flux"], Value::Float(2.0));
    }

    #[test]
    fn equal_writes_are_not_conflicts() {
        let plan = MergePlan::plan(&[diff(&[("power", 1.0)]), diff(&[("power", 1.0)])]);
        assert!(plan.is_clean());
        assert_eq!(plan.updates["power"], Value::Float(1.0));
    }

    #[test]
    fn equal_nan_writes_are_not_conflicts() {
        let plan = MergePlan::plan(&[diff(&[("power", f64::NAN)]), diff(&[("power", f64::NAN)])]);
        assert!(plan.is_clean());
        assert!(plan.updates["power"].as_f64().unwrap().is_nan());

        let lists = |x: f64| {
            let mut diff = SyncDiff::new();
            diff.insert("flux".to_owned(), Value::Floats(vec![1.0, x]));
            Some(diff)
        };
        assert!(MergePlan::plan(&[lists(f64::NAN), lists(f64::NAN)]).is_clean());
        assert!(!MergePlan::plan(&[lists(0.0), lists(-0.0)]).is_clean());
    }

    #[test]
    fn differing_writes_produce_one_conflict() {
        let plan = MergePlan::plan(&[
            diff(&[("power", 1.0)]),
            diff(&[("power", 2.0)]),
            diff(&[("power", 3.0), ("flux", 4.0)]),
        ]);
        assert_eq!(
            plan.conflicts,
            vec![FieldConflict {
                field: "power".into(),
                ranks: vec![0, 1, 2],
            }]
        );
        assert!(!plan.updates.contains_key("power"));
        assert!(plan.updates.contains_key("flux"));
    }
}
