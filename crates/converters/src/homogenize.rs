//! Homogenizing a hex core into an R-Z-theta model.
//!
//! Each `(ring bin, theta bin)` zone of the mesh becomes one assembly of the
//! new model, and each axial bin of that zone one block holding a single
//! homogenized `mixture` component. Atoms and volume are carried over
//! exactly; temperatures are volume averaged.
//!
//! The conversion builds a separate [`Model`] and leaves the source alone.
//! There is no way back from the homogenized model.

use std::{
    collections::{BTreeMap, BTreeSet},
    f64::consts::{PI, TAU},
    sync::Arc,
};

use arbor_core::{
    AssignmentFlags, Grid, GridKind, Level, Locator, Model, NodeId, ParamLocation, Settings,
    Symmetry, TypeSpec, Value, Weighting, hex,
};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{ConvertError, Mesh, MeshConverter};

pub const STRICT_HOMOGENIZATION: &str = "strictHomogenization";

const VOLUME_FRACTION_TOLERANCE: f64 = 1e-5;
const CONSERVATION_TOLERANCE: f64 = 1e-9;
const ANGLE_TOLERANCE: f64 = 1e-9;
const OVERLAP_TOLERANCE: f64 = 1e-9;

const TEMPERATURE: &str = "temperature";
const VOLUME: &str = "volume";
const AREA: &str = "area";
const NUMBER_DENSITIES: &str = "numberDensities";
const HEIGHT: &str = "height";
const XS_TYPE: &str = "xsType";
const POWER: &str = "power";

/// Block types that decide the mixture on their own, in priority order.
const MIXTURE_EXCLUSIONS: [&str; 3] = ["control", "fuel", "radial shield"];

/// Mixture types by the block types they stand for, in name order.
const MIXTURE_TYPES: [(&str, &[&str]); 7] = [
    ("mixture axial shield", &["shield"]),
    ("mixture control", &["control"]),
    ("mixture duct", &["duct"]),
    ("mixture fuel", &["fuel"]),
    ("mixture plenum", &["plenum"]),
    ("mixture radial shield", &["radial shield"]),
    (
        "mixture structure",
        &["grid plate", "reflector", "inlet nozzle", "handling socket"],
    ),
];

const DEFAULT_MIXTURE: &str = "mixture structure";

/// Type of a homogenized block, given how many source blocks of each type
/// went into it.
///
/// A block type containing one of the excluded words (`control`, `fuel`,
/// `radial shield`) decides the mixture outright. Otherwise the most common
/// type, the first seen on a tie, is matched against the known mixtures.
#[must_use]
pub fn mixture_type(counts: &IndexMap<String, usize>) -> &'static str {
    for excluded in MIXTURE_EXCLUSIONS {
        if counts.keys().any(|block_type| block_type.contains(excluded)) {
            return match excluded {
                "control" => "mixture control",
                "fuel" => "mixture fuel",
                _ => "mixture radial shield",
            };
        }
    }

    let mut most_common: Option<(&str, usize)> = None;
    for (block_type, &count) in counts {
        if most_common.is_none_or(|(_, best)| count > best) {
            most_common = Some((block_type, count));
        }
    }
    let Some((block_type, _)) = most_common else {
        return DEFAULT_MIXTURE;
    };
    for (mixture, members) in MIXTURE_TYPES {
        if members.iter().any(|member| block_type.contains(member)) {
            return mixture;
        }
    }
    debug!(block_type, mixture = DEFAULT_MIXTURE, "no mixture type matches; using the default");
    DEFAULT_MIXTURE
}

/// Suffix naming the axial position of a block: `A` to `Z`, then `AA`.
fn axial_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + (index % 26) as u8));
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// The result of a homogenizing conversion.
#[derive(Debug)]
pub struct Conversion {
    /// The new model, holding only the converted core.
    pub model: Model,
    pub core: NodeId,
    pub mesh: Mesh,
    /// For every new block, the source blocks it was built from and the
    /// fraction of its volume each one supplied.
    pub block_map: IndexMap<NodeId, Vec<(NodeId, f64)>>,
}

/// Converts a full hex core into a homogenized R-Z-theta core.
#[derive(Debug, Clone)]
pub struct HexToRZConverter {
    mesh: MeshConverter,
    strict: bool,
}

/// One homogenized block, before it is placed in the new model.
#[derive(Debug, Default)]
struct Mixture {
    bottom: f64,
    top: f64,
    volume: f64,
    weighted_temperature: f64,
    atoms: BTreeMap<String, f64>,
    integrated: BTreeMap<String, f64>,
    types: IndexMap<String, usize>,
    xs_types: IndexMap<String, usize>,
    sources: Vec<(NodeId, f64)>,
}

#[derive(Debug)]
struct ZonePlan {
    theta_index: usize,
    radial_index: usize,
    mixtures: Vec<Mixture>,
}

impl HexToRZConverter {
    /// With `strict` set, mixing blocks of different cross section types is
    /// an error rather than a log message.
    #[must_use]
    pub fn new(mesh: MeshConverter, strict: bool) -> Self {
        Self { mesh, strict }
    }

    /// Reads the mesh options and [`STRICT_HOMOGENIZATION`], which
    /// defaults to `false`.
    ///
    /// # Errors
    ///
    /// Fails like [`MeshConverter::from_settings`], or if the strictness
    /// setting is not a boolean.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConvertError> {
        let strict = if settings.contains(STRICT_HOMOGENIZATION) {
            settings.get_bool(STRICT_HOMOGENIZATION)?
        } else {
            false
        };
        Ok(Self::new(MeshConverter::from_settings(settings)?, strict))
    }

    #[must_use]
    pub fn mesh_converter(&self) -> &MeshConverter {
        &self.mesh
    }

    /// Builds the homogenized model of `core`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::NotHex`] or [`ConvertError::NotFullCore`] if
    /// `core` is not a full hex core; expand third cores first.
    /// Mesh generation errors are passed on. A zone without assemblies is
    /// [`ConvertError::EmptyZone`], a zone with no volume in an axial bin
    /// [`ConvertError::ZeroVolume`], and a mismatch in total volume, mass,
    /// or a volume-integrated block parameter
    /// [`ConvertError::Conservation`].
    pub fn convert(&self, source: &Model, core: NodeId) -> Result<Conversion, ConvertError> {
        let grid = match source.node(core)?.grid() {
            Some(grid) if grid.is_hex() => grid,
            _ => {
                return Err(ConvertError::NotHex {
                    node: source.describe(core),
                });
            }
        };
        if grid.symmetry() != Symmetry::Full {
            return Err(ConvertError::NotFullCore {
                node: source.describe(core),
                found: grid.symmetry(),
            });
        }
        info!(core = %source.describe(core), "converting hex core to R-Z-theta");

        let mesh = self.mesh.generate(source, core)?;
        let zones = assign_zones(source, core, grid, &mesh)?;

        let mut plans = Vec::with_capacity(zones.len());
        for ((radial_index, theta_index), assemblies) in zones {
            let mixtures = mesh
                .axial_bins()
                .into_iter()
                .map(|(bottom, top)| self.homogenize(source, &assemblies, bottom, top))
                .collect::<Result<Vec<_>, _>>()?;
            plans.push(ZonePlan {
                theta_index,
                radial_index,
                mixtures,
            });
        }

        let radii = radii(&mesh, &plans);
        let mut conversion = build(source, core, mesh, radii, &plans)?;
        check_conservation(source, core, &conversion, &plans)?;
        conversion
            .model
            .reset_assigned(conversion.core, AssignmentFlags::SINCE_LAST_GEOMETRY_TRANSFORMATION)?;
        info!(
            assemblies = plans.len(),
            blocks = conversion.block_map.len(),
            "homogenized core"
        );
        Ok(conversion)
    }

    /// Mixes the parts of the blocks of `assemblies` lying between
    /// `bottom` and `top`.
    fn homogenize(
        &self,
        source: &Model,
        assemblies: &[NodeId],
        bottom: f64,
        top: f64,
    ) -> Result<Mixture, ConvertError> {
        let mut mixture = Mixture {
            bottom,
            top,
            ..Mixture::default()
        };
        for &assembly in assemblies {
            let assembly_grid = source.node(assembly)?.grid();
            for block in source.children(assembly)? {
                let span = source
                    .node(block)?
                    .locator()
                    .and_then(Locator::indices)
                    .and_then(|[_, _, k]| assembly_grid?.axial_span(k))
                    .ok_or_else(|| ConvertError::NoPosition {
                        node: source.describe(block),
                    })?;
                let overlap = top.min(span.1) - bottom.max(span.0);
                if overlap <= OVERLAP_TOLERANCE {
                    continue;
                }
                let fraction = overlap / (span.1 - span.0);
                let volume = source.volume(block)? * fraction;
                if volume == 0.0 {
                    return Err(ConvertError::ZeroVolume {
                        node: source.describe(block),
                        bottom,
                        top,
                    });
                }
                mixture.add(source, block, fraction, volume)?;
            }
        }

        if mixture.volume == 0.0 {
            return Err(ConvertError::ZeroVolume {
                node: format!("zone of {} assemblies", assemblies.len()),
                bottom,
                top,
            });
        }
        for (_, share) in &mut mixture.sources {
            *share /= mixture.volume;
        }
        let total: f64 = mixture.sources.iter().map(|(_, share)| share).sum();
        if (total - 1.0).abs() > VOLUME_FRACTION_TOLERANCE {
            return Err(ConvertError::Conservation {
                quantity: "volume fraction".to_owned(),
                expected: 1.0,
                found: total,
            });
        }
        if mixture.xs_types.len() > 1 {
            let types: Vec<String> = mixture.xs_types.keys().cloned().collect();
            if self.strict {
                return Err(ConvertError::DissimilarCrossSections { types, bottom, top });
            }
            debug!(?types, bottom, top, "mixing blocks with dissimilar cross section types");
        }
        Ok(mixture)
    }
}

impl Mixture {
    fn add(
        &mut self,
        source: &Model,
        block: NodeId,
        fraction: f64,
        volume: f64,
    ) -> Result<(), ConvertError> {
        let node = source.node(block)?;
        *self.types.entry(node.type_name().to_lowercase()).or_default() += 1;
        let xs_type = source.param(block, XS_TYPE)?.as_str().unwrap_or_default().to_owned();
        *self.xs_types.entry(xs_type).or_default() += 1;

        let temperature =
            source.calc_avg_param(block, TEMPERATURE, &TypeSpec::Any, &Weighting::Volume)?;
        self.weighted_temperature += temperature * volume;
        for (nuclide, density) in source.number_densities(block)? {
            *self.atoms.entry(nuclide).or_default() += density * volume;
        }
        for def in source.params(block)?.defs().at_location(ParamLocation::VolumeIntegrated) {
            if let Value::Float(x) = source.param(block, def.name())? {
                *self.integrated.entry(def.name().to_owned()).or_default() += x * fraction;
            }
        }
        self.volume += volume;
        self.sources.push((block, volume));
        Ok(())
    }

    fn xs_type(&self) -> String {
        let mut best: Option<(&str, usize)> = None;
        for (xs_type, &count) in &self.xs_types {
            if best.is_none_or(|(_, most)| count > most) {
                best = Some((xs_type, count));
            }
        }
        best.map_or_else(String::new, |(xs_type, _)| xs_type.to_owned())
    }
}

/// Groups the assemblies of `core` by `(radial bin, theta bin)`, in that
/// order. Each assembly lands in exactly one zone; theta bins include
/// their lower angle and exclude their upper one. Radial bins binned by
/// composition only take assemblies of their type.
fn assign_zones(
    source: &Model,
    core: NodeId,
    grid: &Grid,
    mesh: &Mesh,
) -> Result<BTreeMap<(usize, usize), Vec<NodeId>>, ConvertError> {
    let ring_bins = mesh.ring_bins();
    let theta_bins = mesh.theta_bins();
    let mut zones: BTreeMap<(usize, usize), Vec<NodeId>> = BTreeMap::new();
    for assembly in source.children(core)? {
        let indices = source
            .node(assembly)?
            .locator()
            .and_then(Locator::indices)
            .ok_or_else(|| ConvertError::NoPosition {
                node: source.describe(assembly),
            })?;
        let ring = hex::ring(indices[0], indices[1]);
        let assembly_type = source.node(assembly)?.type_name().to_lowercase();
        let radial = ring_bins
            .iter()
            .enumerate()
            .position(|(index, &(lower, upper))| {
                (lower..upper).contains(&ring)
                    && mesh
                        .composition(index)
                        .is_none_or(|composition| composition == assembly_type)
            })
            .unwrap_or(ring_bins.len() - 1);

        let [x, y, _] = grid.centroid(indices).unwrap_or_default();
        let mut theta = y.atan2(x);
        if theta < 0.0 {
            theta += TAU;
        }
        if theta >= TAU - ANGLE_TOLERANCE {
            theta = 0.0;
        }
        let sector = theta_bins
            .iter()
            .position(|&(_, upper)| theta < upper - ANGLE_TOLERANCE)
            .unwrap_or(theta_bins.len() - 1);
        zones.entry((radial, sector)).or_default().push(assembly);
    }

    for (radial, &(lower, upper)) in ring_bins.iter().enumerate() {
        for (sector, &(lower_theta, upper_theta)) in theta_bins.iter().enumerate() {
            if !zones.contains_key(&(radial, sector)) {
                return Err(ConvertError::EmptyZone {
                    lower,
                    upper,
                    lower_theta,
                    upper_theta,
                });
            }
        }
    }
    Ok(zones)
}

/// Outer radius of each radial bin, preserving the cross-sectional area of
/// the assemblies in it.
fn radii(mesh: &Mesh, plans: &[ZonePlan]) -> Vec<f64> {
    let height = mesh.axial_bounds().last().copied().unwrap_or(mesh.bottom) - mesh.bottom;
    let mut volumes = vec![0.0; mesh.rings.len()];
    for plan in plans {
        volumes[plan.radial_index] +=
            plan.mixtures.iter().map(|mixture| mixture.volume).sum::<f64>();
    }
    let mut radii = Vec::with_capacity(volumes.len() + 1);
    let mut inner: f64 = 0.0;
    radii.push(inner);
    for volume in volumes {
        let area = volume / height;
        inner = (inner.powi(2) + area / PI).sqrt();
        radii.push(inner);
    }
    radii
}

fn build(
    source: &Model,
    source_core: NodeId,
    mesh: Mesh,
    radii: Vec<f64>,
    plans: &[ZonePlan],
) -> Result<Conversion, ConvertError> {
    let mut model = Model::new(Arc::clone(source.schema()), source.resources().clone());
    let name = format!("{} - ThetaRZ", source.node(source_core)?.name());
    let core = model.create_composite(name, Level::Core, "core")?;
    model.set_param(core, POWER, source.param(source_core, POWER)?.clone())?;
    model.set_grid(core, Some(mesh.grid(radii)))?;

    let axial_bounds = mesh.axial_bounds();
    let mut block_map = IndexMap::new();
    for (number, plan) in (1..).zip(plans) {
        let assembly = model.create_composite(format!("A{number:04}"), Level::Assembly, "mixture")?;
        model.set_param(assembly, "assemNum", i64::from(number))?;
        model.set_grid(assembly, Some(Grid::axial(axial_bounds.clone())))?;
        model.set_locator(
            assembly,
            Locator::index(index(plan.theta_index)?, index(plan.radial_index)?, 0),
        )?;
        model.add(core, assembly)?;

        for (k, mixture) in plan.mixtures.iter().enumerate() {
            let block = place_mixture(&mut model, assembly, number, k, mixture)?;
            block_map.insert(block, mixture.sources.clone());
        }
        debug!(
            assembly = number,
            theta = plan.theta_index,
            radial = plan.radial_index,
            "built homogenized assembly"
        );
    }

    Ok(Conversion {
        model,
        core,
        mesh,
        block_map,
    })
}

fn index(value: usize) -> Result<i32, ConvertError> {
    i32::try_from(value).map_err(|err| ConvertError::Mesh {
        name: "index".to_owned(),
        reason: err.to_string(),
    })
}

fn place_mixture(
    model: &mut Model,
    assembly: NodeId,
    number: u32,
    k: usize,
    mixture: &Mixture,
) -> Result<NodeId, ConvertError> {
    let height = mixture.top - mixture.bottom;
    let block = model.create_composite(
        format!("B{number:04}{}", axial_letters(k)),
        Level::Block,
        mixture_type(&mixture.types),
    )?;
    model.set_param(block, HEIGHT, height)?;
    model.set_param(block, XS_TYPE, mixture.xs_type())?;
    for (name, total) in &mixture.integrated {
        model.set_param(block, name, *total)?;
    }
    model.set_locator(block, Locator::index(0, 0, index(k)?))?;
    model.add(assembly, block)?;

    let leaf = model.create_leaf("mixture", "mixture", None)?;
    let densities: BTreeMap<String, f64> = mixture
        .atoms
        .iter()
        .map(|(nuclide, atoms)| (nuclide.clone(), atoms / mixture.volume))
        .collect();
    model.set_param(leaf, VOLUME, mixture.volume)?;
    model.set_param(leaf, AREA, mixture.volume / height)?;
    model.set_param(leaf, TEMPERATURE, mixture.weighted_temperature / mixture.volume)?;
    model.set_param(leaf, NUMBER_DENSITIES, densities)?;
    model.add(block, leaf)?;
    Ok(block)
}

fn check_conserved(quantity: &str, expected: f64, found: f64) -> Result<(), ConvertError> {
    if (found - expected).abs() > CONSERVATION_TOLERANCE * expected.abs().max(found.abs()) {
        return Err(ConvertError::Conservation {
            quantity: quantity.to_owned(),
            expected,
            found,
        });
    }
    Ok(())
}

fn check_conservation(
    source: &Model,
    source_core: NodeId,
    conversion: &Conversion,
    plans: &[ZonePlan],
) -> Result<(), ConvertError> {
    let (mut volume, mut mass) = (0.0, 0.0);
    let mut integrated: BTreeMap<String, f64> = BTreeMap::new();
    let mut blocks = BTreeSet::new();
    for assembly in source.children(source_core)? {
        volume += source.volume(assembly)?;
        mass += source.mass(assembly)?;
        blocks.extend(source.children(assembly)?);
    }
    for block in blocks {
        for def in source.params(block)?.defs().at_location(ParamLocation::VolumeIntegrated) {
            if let Value::Float(x) = source.param(block, def.name())? {
                *integrated.entry(def.name().to_owned()).or_default() += x;
            }
        }
    }

    let model = &conversion.model;
    check_conserved(VOLUME, volume, model.volume(conversion.core)?)?;
    check_conserved("mass", mass, model.mass(conversion.core)?)?;
    for (name, expected) in integrated {
        let found: f64 = plans
            .iter()
            .flat_map(|plan| &plan.mixtures)
            .filter_map(|mixture| mixture.integrated.get(&name))
            .sum();
        check_conserved(&name, expected, found)?;
    }
    debug!(volume, mass, "conservation checks passed");
    Ok(())
}

/// `true` if `grid` describes a homogenized R-Z-theta core.
#[must_use]
pub fn is_theta_rz(grid: &Grid) -> bool {
    matches!(grid.kind(), GridKind::ThetaRZ { .. })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use arbor_core::{Resources, Schema, SettingValue};

    use super::*;
    use crate::{AxialBinning, MeshSettings, RadialBinning};

    fn counts(entries: &[(&str, usize)]) -> IndexMap<String, usize> {
        entries.iter().map(|&(name, count)| (name.to_owned(), count)).collect()
    }

    #[test]
    fn mixture_types() {
        assert_eq!(mixture_type(&counts(&[("plenum", 5), ("inner fuel", 1)])), "mixture fuel");
        assert_eq!(
            mixture_type(&counts(&[("fuel", 3), ("control", 1)])),
            "mixture control"
        );
        assert_eq!(mixture_type(&counts(&[("plenum", 2), ("duct", 1)])), "mixture plenum");
        assert_eq!(mixture_type(&counts(&[("duct", 2), ("plenum", 2)])), "mixture duct");
        assert_eq!(
            mixture_type(&counts(&[("lower reflector", 2)])),
            "mixture structure"
        );
        assert_eq!(mixture_type(&counts(&[("axial shield", 1)])), "mixture axial shield");
        assert_eq!(mixture_type(&counts(&[("widget", 4)])), DEFAULT_MIXTURE);
        assert_eq!(mixture_type(&IndexMap::new()), DEFAULT_MIXTURE);
    }

    #[test]
    fn axial_suffixes() {
        assert_eq!(axial_letters(0), "A");
        assert_eq!(axial_letters(25), "Z");
        assert_eq!(axial_letters(26), "AA");
        assert_eq!(axial_letters(27), "AB");
    }

    /// A full two-ring core. Every assembly spans 0-50-100 cm with a fuel
    /// block under a plenum block, each holding one 100 cm^3 component.
    fn full_core() -> (Model, NodeId, Vec<NodeId>) {
        let mut model = Model::new(Schema::base(), Resources::default());
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model.set_grid(core, Some(Grid::hex(16.0, Symmetry::Full))).unwrap();
        model.set_param(core, POWER, 1.0e6).unwrap();
        let mut fuel_blocks = Vec::new();
        for ring in 1..=2 {
            for position in 1..=hex::positions_in_ring(ring) {
                let (i, j) = hex::indices(ring, position).unwrap();
                let name = hex::label(ring, position);
                let assembly = model
                    .create_composite(name.clone(), Level::Assembly, "fuel")
                    .unwrap();
                model.set_grid(assembly, Some(Grid::axial(vec![0.0, 50.0, 100.0]))).unwrap();
                model.set_locator(assembly, Locator::index(i, j, 0)).unwrap();
                model.add(core, assembly).unwrap();

                for (k, (block_type, nuclide, temperature)) in
                    [("fuel", "U235", 400.0), ("plenum", "FE56", 300.0)].into_iter().enumerate()
                {
                    let block = model
                        .create_composite(format!("{name}-{k}"), Level::Block, block_type)
                        .unwrap();
                    model
                        .set_locator(block, Locator::index(0, 0, i32::try_from(k).unwrap()))
                        .unwrap();
                    model.set_param(block, HEIGHT, 50.0).unwrap();
                    model.set_param(block, POWER, if k == 0 { 10.0 } else { 0.0 }).unwrap();
                    model.add(assembly, block).unwrap();

                    let leaf = model
                        .create_leaf(format!("{name}-{k}-c"), block_type, None)
                        .unwrap();
                    let temperature = if (i, j, k) == (0, 0, 0) { 700.0 } else { temperature };
                    model.set_param(leaf, VOLUME, 100.0).unwrap();
                    model.set_param(leaf, TEMPERATURE, temperature).unwrap();
                    model
                        .set_param(
                            leaf,
                            NUMBER_DENSITIES,
                            BTreeMap::from([(nuclide.to_owned(), 0.01)]),
                        )
                        .unwrap();
                    model.add(block, leaf).unwrap();
                    if k == 0 {
                        fuel_blocks.push(block);
                    }
                }
            }
        }
        (model, core, fuel_blocks)
    }

    fn converter(
        rings_per_bin: usize,
        axial: AxialBinning,
        theta_bins: usize,
        strict: bool,
    ) -> HexToRZConverter {
        HexToRZConverter::new(
            MeshConverter::new(MeshSettings {
                radial: RadialBinning::RingsPerBin(rings_per_bin),
                axial,
                uniform_theta: true,
                theta_bins,
            }),
            strict,
        )
    }

    #[test]
    fn one_zone_conserves_atoms_and_volume() {
        let (source, core, _) = full_core();
        let conversion = converter(2, AxialBinning::SegmentsPerBin(1), 1, false)
            .convert(&source, core)
            .unwrap();
        let model = &conversion.model;

        let assemblies = model.children(conversion.core).unwrap();
        assert_eq!(assemblies.len(), 1);
        let blocks = model.children(assemblies[0]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(model.node(blocks[0]).unwrap().name(), "B0001A");
        assert_eq!(model.node(blocks[0]).unwrap().type_name(), "mixture fuel");
        assert_eq!(model.node(blocks[1]).unwrap().type_name(), "mixture plenum");

        assert_relative_eq!(model.volume(blocks[0]).unwrap(), 700.0);
        assert_relative_eq!(model.number_density(blocks[0], "U235").unwrap(), 0.01);
        assert_relative_eq!(model.number_density(blocks[1], "FE56").unwrap(), 0.01);
        assert_relative_eq!(model.param_f64(blocks[0], POWER).unwrap(), 70.0);
        assert_relative_eq!(
            model.mass(conversion.core).unwrap(),
            source.mass(core).unwrap(),
            max_relative = 1e-12
        );

        let leaf = model.children(blocks[0]).unwrap()[0];
        assert_relative_eq!(
            model.param_f64(leaf, TEMPERATURE).unwrap(),
            (700.0 + 6.0 * 400.0) / 7.0
        );

        let sources = &conversion.block_map[&blocks[0]];
        assert_eq!(sources.len(), 7);
        assert_relative_eq!(sources.iter().map(|(_, share)| share).sum::<f64>(), 1.0);

        let grid = model.node(conversion.core).unwrap().grid().unwrap();
        assert!(is_theta_rz(grid));
        let GridKind::ThetaRZ { r_bounds, .. } = grid.kind() else {
            unreachable!()
        };
        assert_relative_eq!(r_bounds[1], (14.0 / PI).sqrt());
        assert_relative_eq!(model.param_f64(conversion.core, POWER).unwrap(), 1.0e6);
    }

    #[test]
    fn sectors_split_the_rings() {
        let (source, core, _) = full_core();
        let conversion = converter(2, AxialBinning::SegmentsPerBin(2), 3, false)
            .convert(&source, core)
            .unwrap();
        let model = &conversion.model;
        let assemblies = model.children(conversion.core).unwrap();
        assert_eq!(assemblies.len(), 3);

        let volumes: Vec<f64> = assemblies.iter().map(|&a| model.volume(a).unwrap()).collect();
        assert_eq!(volumes, vec![600.0, 400.0, 400.0]);
        let thetas: Vec<_> = assemblies
            .iter()
            .map(|&a| model.node(a).unwrap().locator().unwrap().indices().unwrap())
            .collect();
        assert_eq!(thetas, vec![[0, 0, 0], [1, 0, 0], [2, 0, 0]]);
        assert_relative_eq!(model.volume(conversion.core).unwrap(), source.volume(core).unwrap());
    }

    #[test]
    fn blocks_straddling_a_bin_are_split() {
        let (source, core, fuel_blocks) = full_core();
        let conversion = converter(2, AxialBinning::Coordinates(vec![25.0, 100.0]), 1, false)
            .convert(&source, core)
            .unwrap();
        let model = &conversion.model;
        let blocks = model.children(model.children(conversion.core).unwrap()[0]).unwrap();
        assert_relative_eq!(model.volume(blocks[0]).unwrap(), 350.0);
        assert_relative_eq!(model.volume(blocks[1]).unwrap(), 1050.0);
        assert_eq!(model.node(blocks[1]).unwrap().type_name(), "mixture fuel");

        let upper = &conversion.block_map[&blocks[1]];
        let (_, share) = upper.iter().find(|(block, _)| *block == fuel_blocks[0]).unwrap();
        assert_relative_eq!(*share, 50.0 / 1050.0);
        assert_relative_eq!(
            model.number_density(blocks[1], "U235").unwrap(),
            0.01 * 350.0 / 1050.0
        );
    }

    #[test]
    fn ring_compositions_get_their_own_zones() {
        let (mut source, core, _) = full_core();
        let assemblies = source.children(core).unwrap();
        for &control in &assemblies[1..3] {
            source.set_type(control, "control", None).unwrap();
        }
        let conversion = HexToRZConverter::new(
            MeshConverter::new(MeshSettings {
                radial: RadialBinning::Composition,
                axial: AxialBinning::SegmentsPerBin(2),
                uniform_theta: true,
                theta_bins: 1,
            }),
            false,
        )
        .convert(&source, core)
        .unwrap();
        assert_eq!(conversion.mesh.compositions, vec!["fuel", "fuel", "control"]);

        let model = &conversion.model;
        let volumes: Vec<f64> = model
            .children(conversion.core)
            .unwrap()
            .into_iter()
            .map(|assembly| model.volume(assembly).unwrap())
            .collect();
        assert_eq!(volumes, vec![200.0, 800.0, 400.0]);
        let grid = model.node(conversion.core).unwrap().grid().unwrap();
        let GridKind::ThetaRZ { r_bounds, .. } = grid.kind() else {
            unreachable!()
        };
        assert_relative_eq!(r_bounds[2], (10.0 / PI).sqrt());
        assert_relative_eq!(r_bounds[3], (14.0 / PI).sqrt());
    }

    #[test]
    fn empty_zones_are_rejected() {
        let (source, core, _) = full_core();
        let result = converter(1, AxialBinning::SegmentsPerBin(2), 3, false).convert(&source, core);
        assert!(matches!(result, Err(ConvertError::EmptyZone { lower: 1, upper: 2, .. })));
    }

    #[test]
    fn third_cores_must_be_expanded_first() {
        let (mut source, core, _) = full_core();
        source.set_grid_symmetry(core, Symmetry::Third { periodic: true }).unwrap();
        let result = converter(2, AxialBinning::SegmentsPerBin(1), 1, false).convert(&source, core);
        assert!(matches!(result, Err(ConvertError::NotFullCore { .. })));
    }

    #[test]
    fn dissimilar_cross_sections() {
        let (mut source, core, fuel_blocks) = full_core();
        source.set_param(fuel_blocks[3], XS_TYPE, "B").unwrap();

        let strict = converter(2, AxialBinning::SegmentsPerBin(1), 1, true).convert(&source, core);
        assert!(matches!(
            strict,
            Err(ConvertError::DissimilarCrossSections { bottom, .. }) if bottom == 0.0
        ));

        let lenient = converter(2, AxialBinning::SegmentsPerBin(1), 1, false)
            .convert(&source, core)
            .unwrap();
        let first = *lenient.block_map.keys().next().unwrap();
        assert_eq!(lenient.model.param(first, XS_TYPE).unwrap().as_str(), Some("A"));
    }

    #[test]
    fn settings_choose_strictness() {
        let settings = Settings::new()
            .with(crate::mesh::RINGS_PER_BIN, SettingValue::Int(1))
            .with(crate::mesh::AXIAL_SEGS_PER_BIN, SettingValue::Int(1))
            .with(crate::mesh::UNIFORM_THETA_MESH, SettingValue::Bool(true))
            .with(crate::mesh::THETA_BINS, SettingValue::Int(1));
        assert!(!HexToRZConverter::from_settings(&settings).unwrap().strict);
        let strict = settings.with(STRICT_HOMOGENIZATION, SettingValue::Bool(true));
        assert!(HexToRZConverter::from_settings(&strict).unwrap().strict);
    }
}
