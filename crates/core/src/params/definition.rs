use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops::{BitOr, BitOrAssign},
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use super::{ParamError, Value, ValueKind};

/// How a parameter's value relates to the region it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamLocation {
    /// A per-volume average (intensive).
    Average,
    /// Scales with the volume of the region (extensive).
    VolumeIntegrated,
    Max,
    Top,
    Bottom,
    Centroid,
    NotApplicable,
}

/// Custom serializers a parameter may use instead of the default encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializerKind {
    /// Packed through [`FlagSerializer`](crate::FlagSerializer).
    Flags,
}

/// A bitmask recording which epochs a parameter was written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentFlags(u8);

impl AssignmentFlags {
    pub const NONE: Self = Self(0);
    pub const SINCE_INITIALIZATION: Self = Self(1);
    pub const SINCE_LAST_DISTRIBUTE_STATE: Self = Self(4);
    pub const SINCE_LAST_GEOMETRY_TRANSFORMATION: Self = Self(8);
    pub const SINCE_BACKUP: Self = Self(16);
    pub const NEVER: Self = Self(32);
    pub const SINCE_ANYTHING: Self = Self(
        Self::SINCE_INITIALIZATION.0
            | Self::SINCE_LAST_DISTRIBUTE_STATE.0
            | Self::SINCE_LAST_GEOMETRY_TRANSFORMATION.0
            | Self::SINCE_BACKUP.0,
    );

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns `true` if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for AssignmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AssignmentFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Declaration of one parameter.
///
/// Besides its static description, every definition carries a shared
/// assignment mask: the union of the masks of every write to this parameter
/// on any node in the process.
#[derive(Debug)]
pub struct ParamDef {
    name: String,
    kind: ValueKind,
    units: String,
    description: String,
    location: ParamLocation,
    categories: BTreeSet<String>,
    save_to_db: bool,
    default: Value,
    serializer: Option<SerializerKind>,
    assigned: AtomicU8,
}

impl Clone for ParamDef {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            units: self.units.clone(),
            description: self.description.clone(),
            location: self.location,
            categories: self.categories.clone(),
            save_to_db: self.save_to_db,
            default: self.default.clone(),
            serializer: self.serializer,
            assigned: AtomicU8::new(self.assigned.load(Ordering::Relaxed)),
        }
    }
}

impl ParamDef {
    /// Starts a definition with no units, an average location, persistence
    /// enabled, and [`Value::None`] as default.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            units: String::new(),
            description: String::new(),
            location: ParamLocation::Average,
            categories: BTreeSet::new(),
            save_to_db: true,
            default: Value::None,
            serializer: None,
            assigned: AtomicU8::new(AssignmentFlags::NEVER.bits()),
        }
    }

    #[must_use]
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn location(mut self, location: ParamLocation) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Excludes this parameter from persisted snapshots.
    #[must_use]
    pub fn not_persisted(mut self) -> Self {
        self.save_to_db = false;
        self
    }

    #[must_use]
    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.serializer = Some(serializer);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub fn unit_label(&self) -> &str {
        &self.units
    }

    #[must_use]
    pub fn about(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn param_location(&self) -> ParamLocation {
        self.location
    }

    #[must_use]
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    #[must_use]
    pub fn save_to_db(&self) -> bool {
        self.save_to_db
    }

    #[must_use]
    pub fn default(&self) -> &Value {
        &self.default
    }

    #[must_use]
    pub fn custom_serializer(&self) -> Option<SerializerKind> {
        self.serializer
    }

    /// Returns the process-wide assignment mask for this parameter.
    #[must_use]
    pub fn assigned(&self) -> AssignmentFlags {
        AssignmentFlags::from_bits(self.assigned.load(Ordering::Relaxed))
    }

    pub(crate) fn mark_assigned(&self, flags: AssignmentFlags) {
        self.assigned
            .fetch_and(!AssignmentFlags::NEVER.bits(), Ordering::Relaxed);
        self.assigned.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_assigned(&self, flags: AssignmentFlags) {
        self.assigned.store(flags.bits(), Ordering::Relaxed);
    }

    /// Checks that `value` fits this parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::TypeMismatch`] for a value of the wrong kind.
    pub fn check(&self, value: &Value) -> Result<(), ParamError> {
        match value.kind() {
            None => Ok(()),
            Some(found) if found == self.kind => Ok(()),
            Some(found) => Err(ParamError::TypeMismatch {
                name: self.name.clone(),
                expected: self.kind,
                found,
            }),
        }
    }
}

/// All parameter definitions for one level, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ParamDefCollection {
    defs: Vec<ParamDef>,
    slots: HashMap<String, usize>,
}

impl ParamDefCollection {
    /// Collects definitions, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Duplicate`] if two definitions share a name.
    pub fn new(defs: impl IntoIterator<Item = ParamDef>) -> Result<Self, ParamError> {
        let mut collection = Self::default();
        for def in defs {
            collection.push(def)?;
        }
        Ok(collection)
    }

    pub(crate) fn push(&mut self, def: ParamDef) -> Result<(), ParamError> {
        if self.slots.contains_key(def.name()) {
            return Err(ParamError::Duplicate(def.name().to_owned()));
        }
        self.slots.insert(def.name().to_owned(), self.defs.len());
        self.defs.push(def);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.slot(name).map(|slot| &self.defs[slot])
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub(crate) fn by_slot(&self, slot: usize) -> &ParamDef {
        &self.defs[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDef> {
        self.defs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(ParamDef::name)
    }

    pub fn at_location(&self, location: ParamLocation) -> impl Iterator<Item = &ParamDef> {
        self.defs
            .iter()
            .filter(move |def| def.param_location() == location)
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a ParamDef> {
        self.defs
            .iter()
            .filter(move |def| def.categories().contains(category))
    }

    /// Definitions written on any node since `epoch` was last reset.
    pub fn since(&self, epoch: AssignmentFlags) -> impl Iterator<Item = &ParamDef> {
        self.defs
            .iter()
            .filter(move |def| def.assigned().intersects(epoch))
    }

    /// Captures every definition's assignment mask by name.
    #[must_use]
    pub fn assignments(&self) -> BTreeMap<String, AssignmentFlags> {
        self.defs
            .iter()
            .map(|def| (def.name().to_owned(), def.assigned()))
            .collect()
    }

    /// Folds masks received from another process into this one.
    pub fn merge_assignments(&self, other: &BTreeMap<String, AssignmentFlags>) {
        for (name, flags) in other {
            if let Some(def) = self.get(name) {
                if *flags != AssignmentFlags::NEVER {
                    def.mark_assigned(*flags);
                }
            }
        }
    }

    /// Overwrites masks with a previous [`assignments`](Self::assignments) capture.
    pub fn restore_assignments(&self, saved: &BTreeMap<String, AssignmentFlags>) {
        for (name, flags) in saved {
            if let Some(def) = self.get(name) {
                def.set_assigned(*flags);
            }
        }
    }

    /// Clears `epoch` from every definition's mask.
    pub fn reset_assignments(&self, epoch: AssignmentFlags) {
        for def in &self.defs {
            def.set_assigned(def.assigned().without(epoch));
        }
    }
}
