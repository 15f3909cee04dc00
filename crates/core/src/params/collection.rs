use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use super::{AssignmentFlags, MergePlan, ParamDef, ParamDefCollection, ParamError, SyncDiff, Value};

/// Parameter values of one node.
///
/// Every write goes through [`set`](Self::set), which marks the field's
/// assignment mask on this instance and on its shared [`ParamDef`].
#[derive(Debug, Clone)]
pub struct ParameterCollection {
    defs: Arc<ParamDefCollection>,
    values: Vec<Value>,
    assigned: Vec<AssignmentFlags>,
    backups: Vec<Snapshot>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    values: Vec<Value>,
    assigned: Vec<AssignmentFlags>,
}

/// Transmissible form of a collection, keyed by parameter name.
///
/// Parameters with a custom serializer are carried separately by the
/// container that owns them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub values: BTreeMap<String, Value>,
    pub assigned: BTreeMap<String, AssignmentFlags>,
}

impl ParameterCollection {
    /// Creates a collection holding every definition's default value.
    #[must_use]
    pub fn new(defs: Arc<ParamDefCollection>) -> Self {
        let values = defs.iter().map(|def| def.default().clone()).collect();
        let assigned = vec![AssignmentFlags::NEVER; defs.len()];
        Self {
            defs,
            values,
            assigned,
            backups: Vec::new(),
        }
    }

    #[must_use]
    pub fn defs(&self) -> &Arc<ParamDefCollection> {
        &self.defs
    }

    fn slot(&self, name: &str) -> Result<usize, ParamError> {
        self.defs
            .slot(name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_owned()))
    }

    /// Returns the value of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::UnknownParameter`] if `name` is not defined.
    pub fn get(&self, name: &str) -> Result<&Value, ParamError> {
        Ok(&self.values[self.slot(name)?])
    }

    /// Returns a numeric parameter as `f64`.
    ///
    /// # Errors
    ///
    /// Fails if `name` is not defined, is unset, or is not numeric.
    pub fn get_f64(&self, name: &str) -> Result<f64, ParamError> {
        let slot = self.slot(name)?;
        let value = &self.values[slot];
        match (value, value.as_f64()) {
            (Value::None, _) => Err(ParamError::Unset(name.to_owned())),
            (_, Some(x)) => Ok(x),
            (other, None) => Err(ParamError::TypeMismatch {
                name: name.to_owned(),
                expected: self.defs.by_slot(slot).kind(),
                found: other.kind().unwrap_or(self.defs.by_slot(slot).kind()),
            }),
        }
    }

    /// Writes `name` and marks it assigned in every epoch.
    ///
    /// # Errors
    ///
    /// Fails if `name` is not defined or `value` has the wrong kind.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ParamError> {
        let slot = self.slot(name)?;
        let value = value.into();
        let def = self.defs.by_slot(slot);
        def.check(&value)?;
        def.mark_assigned(AssignmentFlags::SINCE_ANYTHING);
        self.values[slot] = value;
        self.assigned[slot] = AssignmentFlags::SINCE_ANYTHING;
        Ok(())
    }

    /// Returns the assignment mask of `name` on this instance.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::UnknownParameter`] if `name` is not defined.
    pub fn assigned(&self, name: &str) -> Result<AssignmentFlags, ParamError> {
        Ok(self.assigned[self.slot(name)?])
    }

    /// Clears `epoch` from every field's mask on this instance.
    pub fn clear_assigned(&mut self, epoch: AssignmentFlags) {
        for flags in &mut self.assigned {
            *flags = flags.without(epoch);
        }
    }

    /// Iterates over fields written since `epoch` was last cleared.
    pub fn changed_since(&self, epoch: AssignmentFlags) -> impl Iterator<Item = (&str, &Value)> {
        self.iter()
            .zip(self.assigned.iter())
            .filter(move |(_, flags)| flags.intersects(epoch))
            .map(|((def, value), _)| (def.name(), value))
    }

    /// Iterates over definitions and their current values.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamDef, &Value)> {
        self.defs.iter().zip(self.values.iter())
    }

    /// Pushes a snapshot of every value and mask.
    pub fn back_up(&mut self) {
        self.backups.push(Snapshot {
            values: self.values.clone(),
            assigned: self.assigned.clone(),
        });
        self.clear_assigned(AssignmentFlags::SINCE_BACKUP);
    }

    /// Pops the latest snapshot, keeping the current value of each field in `keep`.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if a kept name is not defined or if
    /// there is no snapshot.
    pub fn restore_backup<S: AsRef<str>>(&mut self, keep: &[S]) -> Result<(), ParamError> {
        let kept: Vec<(usize, Value, AssignmentFlags)> = keep
            .iter()
            .map(|name| {
                let slot = self.slot(name.as_ref())?;
                Ok((slot, self.values[slot].clone(), self.assigned[slot]))
            })
            .collect::<Result<_, ParamError>>()?;

        let snapshot = self.backups.pop().ok_or(ParamError::NoBackup)?;
        self.values = snapshot.values;
        self.assigned = snapshot.assigned;
        for (slot, value, flags) in kept {
            self.values[slot] = value;
            self.assigned[slot] = flags;
        }
        Ok(())
    }

    #[must_use]
    pub fn backup_depth(&self) -> usize {
        self.backups.len()
    }

    /// Returns the fields changed since the last distribution, or `None`.
    #[must_use]
    pub fn sync_data(&self) -> Option<SyncDiff> {
        let diff: SyncDiff = self
            .changed_since(AssignmentFlags::SINCE_LAST_DISTRIBUTE_STATE)
            .map(|(name, value)| (name.to_owned(), value.clone()))
            .collect();
        (!diff.is_empty()).then_some(diff)
    }

    /// Plans the reconciliation of per-rank diffs for this node.
    ///
    /// # Errors
    ///
    /// Fails if any diff names an undefined parameter or carries a value of
    /// the wrong kind.
    pub fn plan_merge(&self, diffs: &[Option<SyncDiff>]) -> Result<MergePlan, ParamError> {
        for (name, value) in diffs.iter().flatten().flatten() {
            self.defs.by_slot(self.slot(name)?).check(value)?;
        }
        Ok(MergePlan::plan(diffs))
    }

    /// Writes every update of a clean plan, returning how many were applied.
    ///
    /// # Errors
    ///
    /// Fails if an update names an undefined parameter.
    pub fn apply_merge(&mut self, plan: &MergePlan) -> Result<usize, ParamError> {
        for (name, value) in &plan.updates {
            self.set(name, value.clone())?;
        }
        Ok(plan.updates.len())
    }

    /// Yields `(name, value, units)` for every persisted field.
    pub fn persisted(&self) -> impl Iterator<Item = (&str, &Value, &str)> {
        self.iter()
            .filter(|(def, _)| def.save_to_db())
            .map(|(def, value)| (def.name(), value, def.unit_label()))
    }

    /// Captures values and masks for transmission.
    #[must_use]
    pub fn to_record(&self) -> ParamRecord {
        let mut record = ParamRecord::default();
        for ((def, value), flags) in self.iter().zip(self.assigned.iter()) {
            if def.custom_serializer().is_some() {
                continue;
            }
            record.values.insert(def.name().to_owned(), value.clone());
            record.assigned.insert(def.name().to_owned(), *flags);
        }
        record
    }

    /// Rebuilds a collection from a record, without marking any field.
    ///
    /// Fields missing from the record keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the record names an undefined parameter or a value has the
    /// wrong kind.
    pub fn from_record(
        defs: Arc<ParamDefCollection>,
        record: &ParamRecord,
    ) -> Result<Self, ParamError> {
        let mut collection = Self::new(defs);
        for (name, value) in &record.values {
            let slot = collection.slot(name)?;
            collection.defs.by_slot(slot).check(value)?;
            collection.values[slot] = value.clone();
        }
        for (name, flags) in &record.assigned {
            let slot = collection.slot(name)?;
            collection.assigned[slot] = *flags;
        }
        Ok(collection)
    }

    /// Writes a value without touching any assignment mask.
    pub(crate) fn load(&mut self, name: &str, value: Value) -> Result<(), ParamError> {
        let slot = self.slot(name)?;
        self.defs.by_slot(slot).check(&value)?;
        self.values[slot] = value;
        Ok(())
    }
}
