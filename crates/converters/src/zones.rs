//! Named groups of core locations.

use std::collections::{BTreeMap, BTreeSet};

use arbor_core::{Level, Model, NodeId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ConvertError;

/// What the locations of a zone refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Assembly,
    Block,
}

impl ZoneKind {
    fn level(self) -> Level {
        match self {
            Self::Assembly => Level::Assembly,
            Self::Block => Level::Block,
        }
    }
}

/// A set of location labels, such as `003-007` for an assembly or
/// `003-007-002` for a block.
///
/// Labels are not checked against any model when added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    name: String,
    kind: ZoneKind,
    locations: BTreeSet<String>,
}

impl Zone {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ZoneKind) -> Self {
        Self {
            name: name.into(),
            kind,
            locations: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_locations(locations);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ZoneKind {
        self.kind
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.locations.contains(label)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Labels in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.locations.iter().map(String::as_str)
    }

    /// Returns `false` if the label was already present.
    pub fn add_location(&mut self, label: impl Into<String>) -> bool {
        self.locations.insert(label.into())
    }

    pub fn add_locations<I, S>(&mut self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations.extend(labels.into_iter().map(Into::into));
    }

    /// Returns `false` if the label was not present.
    pub fn remove_location(&mut self, label: &str) -> bool {
        self.locations.remove(label)
    }

    /// Adds the current location of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Mesh`] if `id` is not at the level this zone
    /// holds, and [`ConvertError::NoPosition`] if it has no location label.
    pub fn add_node(&mut self, model: &Model, id: NodeId) -> Result<(), ConvertError> {
        let level = model.node(id)?.level();
        if level != self.kind.level() {
            return Err(ConvertError::Mesh {
                name: format!("zone `{}`", self.name),
                reason: format!("{} is not a {:?}", model.describe(id), self.kind),
            });
        }
        let label = model.location_label(id)?.ok_or_else(|| ConvertError::NoPosition {
            node: model.describe(id),
        })?;
        self.locations.insert(label);
        Ok(())
    }
}

/// A collection of zones, ordered by name.
///
/// A location may belong to at most one zone; [`extend`](Self::extend) and
/// [`check_overlaps`](Self::check_overlaps) enforce this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zones {
    zones: BTreeMap<String, Zone>,
}

impl Zones {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.zones.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Zone> {
        self.zones.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// # Errors
    ///
    /// Returns [`ConvertError::DuplicateZone`] if the name is taken.
    pub fn add(&mut self, zone: Zone) -> Result<(), ConvertError> {
        if self.zones.contains_key(zone.name()) {
            return Err(ConvertError::DuplicateZone(zone.name));
        }
        self.zones.insert(zone.name.clone(), zone);
        Ok(())
    }

    /// Adds several zones, then checks that no location is shared.
    ///
    /// # Errors
    ///
    /// Fails like [`add`](Self::add) and
    /// [`check_overlaps`](Self::check_overlaps).
    pub fn extend(&mut self, zones: impl IntoIterator<Item = Zone>) -> Result<(), ConvertError> {
        for zone in zones {
            self.add(zone)?;
        }
        self.check_overlaps()
    }

    /// # Errors
    ///
    /// Returns [`ConvertError::UnknownZone`] if there is no such zone.
    pub fn remove(&mut self, name: &str) -> Result<Zone, ConvertError> {
        self.zones
            .remove(name)
            .ok_or_else(|| ConvertError::UnknownZone(name.to_owned()))
    }

    /// # Errors
    ///
    /// Returns [`ConvertError::OverlappingZones`] listing every location
    /// found in more than one zone.
    pub fn check_overlaps(&self) -> Result<(), ConvertError> {
        let mut seen = BTreeSet::new();
        let mut shared = BTreeSet::new();
        for label in self.zones.values().flat_map(Zone::iter) {
            if !seen.insert(label) {
                shared.insert(label.to_owned());
            }
        }
        if shared.is_empty() {
            Ok(())
        } else {
            Err(ConvertError::OverlappingZones(shared.into_iter().collect()))
        }
    }

    /// Every location in the named zones.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::UnknownZone`] for a name that is not defined.
    pub fn locations<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<String>, ConvertError> {
        let mut locations = BTreeSet::new();
        for name in names {
            let zone = self
                .get(name.as_ref())
                .ok_or_else(|| ConvertError::UnknownZone(name.as_ref().to_owned()))?;
            locations.extend(zone.iter().map(str::to_owned));
        }
        Ok(locations)
    }

    #[must_use]
    pub fn all_locations(&self) -> BTreeSet<String> {
        self.zones.values().flat_map(Zone::iter).map(str::to_owned).collect()
    }

    /// The zone holding `label`, if any.
    #[must_use]
    pub fn zone_of(&self, label: &str) -> Option<&Zone> {
        self.zones.values().find(|zone| zone.contains(label))
    }

    /// The zone holding the current location of `id`.
    ///
    /// Logs a warning when the node is placed but in no zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Model`] if `id` is not live.
    pub fn find_zone_of(&self, model: &Model, id: NodeId) -> Result<Option<&Zone>, ConvertError> {
        let Some(label) = model.location_label(id)? else {
            return Ok(None);
        };
        let zone = self.zone_of(&label);
        if zone.is_none() {
            warn!(node = %model.describe(id), label = %label, "node is in no zone");
        }
        Ok(zone)
    }
}

#[cfg(test)]
mod tests {
    use arbor_core::{Grid, Locator, Resources, Schema, Symmetry};

    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut zones = Zones::new();
        zones.add(Zone::new("inner", ZoneKind::Assembly)).unwrap();
        let err = zones.add(Zone::new("inner", ZoneKind::Assembly)).unwrap_err();
        assert!(matches!(err, ConvertError::DuplicateZone(name) if name == "inner"));
    }

    #[test]
    fn overlapping_locations_are_reported() {
        let mut zones = Zones::new();
        let err = zones
            .extend([
                Zone::new("inner", ZoneKind::Assembly).with_locations(["001-001", "002-001"]),
                Zone::new("outer", ZoneKind::Assembly).with_locations(["002-001", "003-001"]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::OverlappingZones(labels) if labels == vec!["002-001".to_owned()]
        ));
    }

    #[test]
    fn lookups_by_label_and_name() {
        let mut zones = Zones::new();
        zones
            .extend([
                Zone::new("outer", ZoneKind::Assembly).with_locations(["003-001"]),
                Zone::new("inner", ZoneKind::Assembly).with_locations(["001-001", "002-001"]),
            ])
            .unwrap();
        assert_eq!(zones.names().collect::<Vec<_>>(), vec!["inner", "outer"]);
        assert_eq!(zones.zone_of("002-001").map(Zone::name), Some("inner"));
        assert!(zones.zone_of("009-009").is_none());
        assert_eq!(zones.locations(&["inner"]).unwrap().len(), 2);
        assert_eq!(zones.all_locations().len(), 3);
        assert!(matches!(zones.locations(&["middle"]), Err(ConvertError::UnknownZone(_))));
        assert_eq!(zones.remove("outer").unwrap().len(), 1);
        assert!(!zones.contains("outer"));
    }

    #[test]
    fn nodes_are_added_by_their_label() {
        let mut model = Model::new(Schema::base(), Resources::default());
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model.set_grid(core, Some(Grid::hex(16.0, Symmetry::Full))).unwrap();
        let assembly = model.create_composite("a", Level::Assembly, "fuel").unwrap();
        model.set_locator(assembly, Locator::index(1, 0, 0)).unwrap();
        model.add(core, assembly).unwrap();

        let mut zone = Zone::new("ring 2", ZoneKind::Assembly);
        zone.add_node(&model, assembly).unwrap();
        assert!(zone.contains("002-001"));
        assert!(matches!(zone.add_node(&model, core), Err(ConvertError::Mesh { .. })));

        let mut zones = Zones::new();
        zones.add(zone).unwrap();
        assert_eq!(zones.find_zone_of(&model, assembly).unwrap().map(Zone::name), Some("ring 2"));
    }
}
