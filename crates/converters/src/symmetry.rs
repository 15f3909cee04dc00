//! Expanding a third-core model to full symmetry, and back.

use std::collections::BTreeMap;

use arbor_core::{
    AssignmentFlags, Grid, Locator, Model, NodeId, ParamLocation, Symmetry, Value, hex,
};
use tracing::{debug, info, warn};

use crate::{ConvertError, Zones};

/// Relative tolerance on conserved totals.
const CONSERVATION_TOLERANCE: f64 = 1e-9;

const CLONE_SUFFIXES: [(u32, &str); 2] = [(1, "-120"), (2, "-240")];

/// Turns a periodic third-core hex model into an explicit full core.
///
/// Every assembly off the center is copied into its two rotated positions,
/// and the volume-integrated parameters of the center assembly, which a
/// third-core model holds for one third of it, are tripled. The converter
/// remembers what it did so that
/// [`restore_previous_geometry`](Self::restore_previous_geometry) can undo
/// it exactly.
#[derive(Debug, Default)]
pub struct ThirdCoreToFullCore {
    applied: Option<Expansion>,
}

#[derive(Debug)]
struct Expansion {
    core: NodeId,
    previous: Symmetry,
    added: Vec<NodeId>,
    originals: Vec<(NodeId, String, Value)>,
    zone_additions: Vec<(String, String)>,
}

impl ThirdCoreToFullCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.applied.is_some()
    }

    /// Assemblies added by the last expansion.
    #[must_use]
    pub fn added(&self) -> &[NodeId] {
        self.applied.as_ref().map_or(&[], |expansion| &expansion.added)
    }

    /// Expands `core` to full symmetry.
    ///
    /// Returns `false`, changing nothing, when the core is already full.
    /// When `zones` is given, every copy joins the zone of the assembly it
    /// was copied from.
    ///
    /// Afterwards the total of every volume-integrated parameter below the
    /// core is three times what it was. If not, the model is put back as it
    /// was and the conversion fails.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::AlreadyApplied`] if this converter has not
    /// been restored since its last expansion, [`ConvertError::NotHex`] or
    /// [`ConvertError::WrongSymmetry`] if `core` is not a periodic
    /// third-core hex lattice, and [`ConvertError::Conservation`] if a total
    /// is off.
    pub fn convert(
        &mut self,
        model: &mut Model,
        core: NodeId,
        mut zones: Option<&mut Zones>,
    ) -> Result<bool, ConvertError> {
        if self.applied.is_some() {
            return Err(ConvertError::AlreadyApplied);
        }
        let symmetry = match model.node(core)?.grid() {
            Some(grid) if grid.is_hex() => grid.symmetry(),
            _ => {
                return Err(ConvertError::NotHex {
                    node: model.describe(core),
                });
            }
        };
        match symmetry {
            Symmetry::Full => {
                info!(core = %model.describe(core), "core is already in full symmetry");
                return Ok(false);
            }
            Symmetry::Third { periodic: true } => {}
            found @ Symmetry::Third { .. } => {
                return Err(ConvertError::WrongSymmetry {
                    node: model.describe(core),
                    found,
                });
            }
        }

        let before = volume_integrated_totals(model, core)?;
        let mut expansion = Expansion {
            core,
            previous: symmetry,
            added: Vec::new(),
            originals: Vec::new(),
            zone_additions: Vec::new(),
        };
        let result = expand(model, &mut expansion, zones.as_deref_mut())
            .and_then(|()| check_tripled(model, core, &before));
        if let Err(err) = result {
            warn!(error = %err, "full-core expansion failed; restoring the third core");
            undo(model, &expansion, zones)?;
            return Err(err);
        }

        model.reset_assigned(core, AssignmentFlags::SINCE_LAST_GEOMETRY_TRANSFORMATION)?;
        info!(
            core = %model.describe(core),
            added = expansion.added.len(),
            assemblies = model.children(core)?.len(),
            "expanded third core to full core"
        );
        self.applied = Some(expansion);
        Ok(true)
    }

    /// Undoes the last expansion.
    ///
    /// The copied assemblies are dropped, the center assembly gets back its
    /// exact original values and the grid its previous symmetry. Pass the
    /// same zones that were given to [`convert`](Self::convert).
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::NothingToRestore`] if there is no expansion
    /// to undo.
    pub fn restore_previous_geometry(
        &mut self,
        model: &mut Model,
        zones: Option<&mut Zones>,
    ) -> Result<(), ConvertError> {
        let expansion = self.applied.take().ok_or(ConvertError::NothingToRestore)?;
        undo(model, &expansion, zones)?;
        model.reset_assigned(expansion.core, AssignmentFlags::SINCE_LAST_GEOMETRY_TRANSFORMATION)?;
        info!(
            core = %model.describe(expansion.core),
            removed = expansion.added.len(),
            "restored third core"
        );
        Ok(())
    }
}

fn expand(
    model: &mut Model,
    expansion: &mut Expansion,
    mut zones: Option<&mut Zones>,
) -> Result<(), ConvertError> {
    let core = expansion.core;
    model.set_grid_symmetry(core, Symmetry::Full)?;

    for assembly in model.children(core)? {
        let Some([i, j, _]) = model.node(assembly)?.locator().and_then(Locator::indices) else {
            return Err(ConvertError::NoPosition {
                node: model.describe(assembly),
            });
        };
        if (i, j) == (0, 0) {
            triple_center(model, assembly, &mut expansion.originals)?;
            continue;
        }

        let zone = match (zones.as_deref(), model.location_label(assembly)?) {
            (Some(zones), Some(label)) => zones.zone_of(&label).map(|zone| zone.name().to_owned()),
            _ => None,
        };
        for (steps, suffix) in CLONE_SUFFIXES {
            let copy = model.duplicate(assembly, suffix)?;
            expansion.added.push(copy);
            rotate_descendants(model, copy, steps)?;
            let (ei, ej) = hex::rotate(i, j, steps);
            model.set_locator(copy, Locator::index(ei, ej, 0))?;
            model.add(core, copy)?;

            if let (Some(name), Some(zones)) = (&zone, zones.as_deref_mut()) {
                if let (Some(zone), Some(label)) =
                    (zones.get_mut(name), model.location_label(copy)?)
                {
                    zone.add_location(label.clone());
                    expansion.zone_additions.push((name.clone(), label));
                }
            }
        }
        debug!(assembly = %model.describe(assembly), "copied into symmetric positions");
    }
    Ok(())
}

/// Rotates the coordinate locators below `root`; index locators refer to
/// axial or pin grids that rotate with their owner.
pub(crate) fn rotate_descendants(
    model: &mut Model,
    root: NodeId,
    steps: u32,
) -> Result<(), ConvertError> {
    for id in model.subtree(root)?.into_iter().skip(1) {
        let rotated = match model.node(id)?.locator() {
            Some(locator) if locator.position().is_some() => locator.rotated_third(steps),
            _ => continue,
        };
        model.set_locator(id, rotated)?;
    }
    Ok(())
}

fn triple_center(
    model: &mut Model,
    center: NodeId,
    originals: &mut Vec<(NodeId, String, Value)>,
) -> Result<(), ConvertError> {
    let multiplicity = Symmetry::Third { periodic: true }.multiplicity();
    #[allow(clippy::cast_precision_loss)]
    let factor = multiplicity as f64;
    for id in model.subtree(center)? {
        let names: Vec<String> = model
            .params(id)?
            .defs()
            .at_location(ParamLocation::VolumeIntegrated)
            .map(|def| def.name().to_owned())
            .collect();
        for name in names {
            let value = model.param(id, &name)?.clone();
            let Some(scaled) = value.scaled(factor).filter(|scaled| !scaled.is_none()) else {
                continue;
            };
            model.set_param(id, &name, scaled)?;
            originals.push((id, name, value));
        }
    }
    debug!(center = %model.describe(center), factor, "scaled center assembly");
    Ok(())
}

fn undo(
    model: &mut Model,
    expansion: &Expansion,
    zones: Option<&mut Zones>,
) -> Result<(), ConvertError> {
    for &copy in expansion.added.iter().rev() {
        if model.contains(copy) {
            model.discard(copy)?;
        }
    }
    for (id, name, value) in &expansion.originals {
        model.set_param(*id, name, value.clone())?;
    }
    model.set_grid_symmetry(expansion.core, expansion.previous)?;
    if let Some(zones) = zones {
        for (name, label) in &expansion.zone_additions {
            if let Some(zone) = zones.get_mut(name) {
                zone.remove_location(label);
            }
        }
    }
    Ok(())
}

/// Sum of every volume-integrated parameter over the assemblies of `core`
/// and everything below them.
fn volume_integrated_totals(
    model: &Model,
    core: NodeId,
) -> Result<BTreeMap<String, f64>, ConvertError> {
    let mut totals = BTreeMap::new();
    for assembly in model.children(core)? {
        for id in model.subtree(assembly)? {
            let params = model.params(id)?;
            for def in params.defs().at_location(ParamLocation::VolumeIntegrated) {
                let total: &mut f64 = totals.entry(def.name().to_owned()).or_default();
                match model.param(id, def.name())? {
                    Value::Float(x) => *total += x,
                    Value::Floats(values) => *total += values.iter().sum::<f64>(),
                    _ => {}
                }
            }
        }
    }
    Ok(totals)
}

fn check_tripled(
    model: &Model,
    core: NodeId,
    before: &BTreeMap<String, f64>,
) -> Result<(), ConvertError> {
    let after = volume_integrated_totals(model, core)?;
    #[allow(clippy::cast_precision_loss)]
    let factor = Symmetry::Third { periodic: true }.multiplicity() as f64;
    for (name, old) in before {
        let expected = factor * old;
        let found = after.get(name).copied().unwrap_or(0.0);
        if (found - expected).abs() > CONSERVATION_TOLERANCE * expected.abs().max(found.abs()) {
            return Err(ConvertError::Conservation {
                quantity: name.clone(),
                expected,
                found,
            });
        }
    }
    Ok(())
}

/// `true` if `grid` is a third-core hex lattice this converter can expand.
#[must_use]
pub fn is_expandable(grid: &Grid) -> bool {
    grid.is_hex() && grid.symmetry() == (Symmetry::Third { periodic: true })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use arbor_core::{Level, Resources, Schema};

    use super::*;
    use crate::{Zone, ZoneKind};

    struct ThirdCore {
        model: Model,
        core: NodeId,
        center: NodeId,
        outer: NodeId,
        pin: NodeId,
    }

    /// A center assembly and one at `(1, 0)` with power 30, each holding a
    /// block with one pin placed by coordinates.
    fn third_core() -> ThirdCore {
        let mut model = Model::new(Schema::base(), Resources::default());
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model
            .set_grid(core, Some(Grid::hex(16.0, Symmetry::Third { periodic: true })))
            .unwrap();

        let mut assemblies = Vec::new();
        let mut pins = Vec::new();
        for (name, i, power) in [("center", 0, 9.0), ("outer", 1, 30.0)] {
            let assembly = model.create_composite(name, Level::Assembly, "fuel").unwrap();
            model.set_grid(assembly, Some(Grid::axial(vec![0.0, 10.0]))).unwrap();
            model.set_locator(assembly, Locator::index(i, 0, 0)).unwrap();
            model.set_param(assembly, "power", power).unwrap();
            model.add(core, assembly).unwrap();

            let block = model.create_composite(format!("{name}-b"), Level::Block, "fuel").unwrap();
            model.set_locator(block, Locator::index(0, 0, 0)).unwrap();
            model.set_param(block, "power", power).unwrap();
            model.add(assembly, block).unwrap();

            let pin = model.create_leaf(format!("{name}-pin"), "fuel", None).unwrap();
            model.set_param(pin, "volume", 100.0).unwrap();
            model.set_locator(pin, Locator::coordinate(1.0, 0.0, 5.0)).unwrap();
            model.add(block, pin).unwrap();

            assemblies.push(assembly);
            pins.push(pin);
        }
        ThirdCore {
            model,
            core,
            center: assemblies[0],
            outer: assemblies[1],
            pin: pins[1],
        }
    }

    fn total_power(model: &Model, core: NodeId) -> f64 {
        model
            .children(core)
            .unwrap()
            .into_iter()
            .map(|assembly| model.param_f64(assembly, "power").unwrap())
            .sum()
    }

    #[test]
    fn expansion_triples_totals_and_restores_exactly() {
        let ThirdCore {
            mut model, core, center, outer, ..
        } = third_core();
        let mut converter = ThirdCoreToFullCore::new();

        assert!(converter.convert(&mut model, core, None).unwrap());
        assert_eq!(model.children(core).unwrap().len(), 4);
        assert_eq!(converter.added().len(), 2);
        assert_eq!(model.node(core).unwrap().grid().unwrap().symmetry(), Symmetry::Full);
        assert_relative_eq!(total_power(&model, core), 3.0 * 39.0);
        assert_relative_eq!(model.param_f64(center, "power").unwrap(), 27.0);
        assert_relative_eq!(model.param_f64(outer, "power").unwrap(), 30.0);

        let labels: Vec<_> = model
            .children(core)
            .unwrap()
            .into_iter()
            .map(|id| model.location_label(id).unwrap().unwrap())
            .collect();
        assert_eq!(labels, vec!["001-001", "002-001", "002-003", "002-005"]);

        converter.restore_previous_geometry(&mut model, None).unwrap();
        assert_eq!(model.children(core).unwrap(), vec![center, outer]);
        assert_eq!(model.param_f64(center, "power").unwrap(), 9.0);
        assert_eq!(model.param_f64(outer, "power").unwrap(), 30.0);
        assert_eq!(
            model.node(core).unwrap().grid().unwrap().symmetry(),
            Symmetry::Third { periodic: true }
        );
        assert!(!converter.is_applied());
        assert!(matches!(
            converter.restore_previous_geometry(&mut model, None),
            Err(ConvertError::NothingToRestore)
        ));
    }

    #[test]
    fn copies_rotate_coordinate_locators() {
        let ThirdCore { mut model, core, pin, .. } = third_core();
        let mut converter = ThirdCoreToFullCore::new();
        converter.convert(&mut model, core, None).unwrap();

        let copy = converter.added()[0];
        let copied_pin = *model.subtree(copy).unwrap().last().unwrap();
        let [x, y, z] = model.node(copied_pin).unwrap().locator().unwrap().position().unwrap();
        assert_relative_eq!(x, -0.5, epsilon = 1e-12);
        assert_relative_eq!(y, 3.0_f64.sqrt() / 2.0, epsilon = 1e-12);
        assert_relative_eq!(z, 5.0);

        let original = model.node(pin).unwrap().locator().unwrap().position().unwrap();
        assert_eq!(original, [1.0, 0.0, 5.0]);
    }

    #[test]
    fn copies_join_the_zone_of_their_original() {
        let ThirdCore { mut model, core, .. } = third_core();
        let mut zones = Zones::new();
        zones
            .add(Zone::new("ring 2", ZoneKind::Assembly).with_locations(["002-001"]))
            .unwrap();

        let mut converter = ThirdCoreToFullCore::new();
        converter.convert(&mut model, core, Some(&mut zones)).unwrap();
        let zone = zones.get("ring 2").unwrap();
        assert_eq!(zone.iter().collect::<Vec<_>>(), vec!["002-001", "002-003", "002-005"]);

        converter.restore_previous_geometry(&mut model, Some(&mut zones)).unwrap();
        assert_eq!(zones.get("ring 2").unwrap().len(), 1);
    }

    #[test]
    fn only_periodic_third_cores_are_expanded() {
        let ThirdCore { mut model, core, .. } = third_core();
        let mut converter = ThirdCoreToFullCore::new();

        model.set_grid_symmetry(core, Symmetry::Third { periodic: false }).unwrap();
        assert!(matches!(
            converter.convert(&mut model, core, None),
            Err(ConvertError::WrongSymmetry { .. })
        ));

        model.set_grid_symmetry(core, Symmetry::Full).unwrap();
        assert!(!converter.convert(&mut model, core, None).unwrap());
        assert!(!converter.is_applied());

        let lone = model.create_composite("lone", Level::Core, "core").unwrap();
        assert!(matches!(
            converter.convert(&mut model, lone, None),
            Err(ConvertError::NotHex { .. })
        ));
    }

    #[test]
    fn a_second_expansion_needs_a_restore_first() {
        let ThirdCore { mut model, core, .. } = third_core();
        let mut converter = ThirdCoreToFullCore::new();
        converter.convert(&mut model, core, None).unwrap();
        model.set_grid_symmetry(core, Symmetry::Third { periodic: true }).unwrap();
        assert!(matches!(
            converter.convert(&mut model, core, None),
            Err(ConvertError::AlreadyApplied)
        ));
    }

    #[test]
    fn expandable_grids() {
        assert!(is_expandable(&Grid::hex(1.0, Symmetry::Third { periodic: true })));
        assert!(!is_expandable(&Grid::hex(1.0, Symmetry::Full)));
        assert!(!is_expandable(&Grid::axial(vec![0.0, 1.0])));
    }
}
