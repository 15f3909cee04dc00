//! Radial, axial and theta bins for an R-Z-theta mesh laid over a hex core.
//!
//! Radial bins group whole hex rings, or split each ring by assembly type.
//! Axial bins group segments of the core's axial mesh, follow explicit
//! coordinates, or follow the extent of like blocks. Theta bins split the
//! full circle into equal sectors.

use std::{collections::BTreeMap, f64::consts::TAU};

use arbor_core::{Flags, Grid, GridKind, Locator, Model, NodeId, Settings, Symmetry, hex};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ConvertError;

/// Tolerance used when comparing mesh coordinates, in the mesh's units.
pub const MESH_TOLERANCE: f64 = 0.001;

pub const RINGS_PER_BIN: &str = "ringsPerBin";
pub const AXIAL_SEGS_PER_BIN: &str = "axialSegsPerBin";
pub const AXIAL_MESH: &str = "axialMesh";
pub const UNIFORM_THETA_MESH: &str = "uniformThetaMesh";
pub const THETA_BINS: &str = "thetaBins";
pub const RADIAL_CONVERSION_TYPE: &str = "radialConversionType";
pub const HOMOGENIZE_AXIALLY_BY_FLAGS: &str = "homogenizeAxiallyByFlags";

/// The [`RADIAL_CONVERSION_TYPE`] that bins rings by assembly type.
pub const RING_COMPOSITIONS: &str = "Ring Compositions";

const XS_TYPE: &str = "xsType";

/// Upper bounds of bins that each hold `per_bin` of `total` points.
///
/// The last bin is shortened to end at `total`; only bounds above `min` are
/// kept. A `per_bin` of zero is treated as one.
///
/// With `total = 5` and `per_bin = 2` the bounds are `[2, 4, 5]`.
#[must_use]
pub fn generate_bins(total: usize, per_bin: usize, min: usize) -> Vec<usize> {
    if per_bin >= total {
        return vec![total];
    }
    let per_bin = per_bin.max(1);
    let mut bins = Vec::with_capacity(total.div_ceil(per_bin));
    let mut current = 0;
    while current < total {
        current = (current + per_bin).min(total);
        if current > min {
            bins.push(current);
        }
    }
    bins
}

fn is_close(value: f64, expected: f64) -> bool {
    (value - expected).abs() <= 1e-8 + MESH_TOLERANCE * expected.abs()
}

/// Checks that the last of `values` equals `expected`, within a relative
/// [`MESH_TOLERANCE`].
///
/// With `adjust` set, a mismatched last value is replaced by `expected`.
///
/// # Errors
///
/// Returns [`ConvertError::Mesh`] if `values` is empty, or if the last value
/// differs and `adjust` is not set.
pub fn check_last_value<T>(
    values: &mut [T],
    name: &str,
    expected: T,
    adjust: bool,
) -> Result<(), ConvertError>
where
    T: Copy + Into<f64>,
{
    let Some(last) = values.last_mut() else {
        return Err(ConvertError::Mesh {
            name: name.to_owned(),
            reason: "no values".to_owned(),
        });
    };
    let (found, wanted) = ((*last).into(), expected.into());
    if is_close(found, wanted) {
        return Ok(());
    }
    if !adjust {
        return Err(ConvertError::Mesh {
            name: name.to_owned(),
            reason: format!("the last value is {found} and should be {wanted}"),
        });
    }
    debug!(name, found, wanted, "adjusting last mesh value");
    *last = expected;
    Ok(())
}

/// Checks that every value lies within `min..=max`, give or take
/// [`MESH_TOLERANCE`].
///
/// # Errors
///
/// Returns [`ConvertError::Mesh`] naming the first value out of bounds.
pub fn check_list_bounds<T>(
    values: &[T],
    name: &str,
    min: f64,
    max: f64,
) -> Result<(), ConvertError>
where
    T: Copy + Into<f64>,
{
    for &value in values {
        let value: f64 = value.into();
        if value - min < -MESH_TOLERANCE || value - max > MESH_TOLERANCE {
            return Err(ConvertError::Mesh {
                name: name.to_owned(),
                reason: format!(
                    "{value} is outside {} to {}",
                    min - MESH_TOLERANCE,
                    max + MESH_TOLERANCE
                ),
            });
        }
    }
    Ok(())
}

/// How the radial bins are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadialBinning {
    /// Merge this many hex rings into each bin.
    RingsPerBin(usize),
    /// One bin per assembly type found in each ring, most common first.
    Composition,
}

/// How the axial bins are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxialBinning {
    /// Merge this many segments of the core's axial mesh into each bin.
    SegmentsPerBin(usize),
    /// Upper bounds of the bins, in cm.
    Coordinates(Vec<f64>),
    /// Bound the region spanned by each run of blocks sharing flags and a
    /// cross section type, in every assembly.
    Flags,
}

/// Options controlling mesh generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    pub radial: RadialBinning,
    pub axial: AxialBinning,
    pub uniform_theta: bool,
    pub theta_bins: usize,
}

impl MeshSettings {
    /// Reads the mesh options from run settings.
    ///
    /// A [`RADIAL_CONVERSION_TYPE`] of [`RING_COMPOSITIONS`] bins rings by
    /// assembly type; without one, [`RINGS_PER_BIN`] is read. A true
    /// [`HOMOGENIZE_AXIALLY_BY_FLAGS`] wins over axial coordinates under
    /// [`AXIAL_MESH`], which win over [`AXIAL_SEGS_PER_BIN`].
    ///
    /// # Errors
    ///
    /// Fails if a setting is missing or has the wrong type, if the radial
    /// conversion type is unknown, or if a bin count is zero.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConvertError> {
        let radial = if settings.contains(RADIAL_CONVERSION_TYPE) {
            match settings.get_str(RADIAL_CONVERSION_TYPE)? {
                RING_COMPOSITIONS => RadialBinning::Composition,
                other => {
                    return Err(ConvertError::Mesh {
                        name: RADIAL_CONVERSION_TYPE.to_owned(),
                        reason: format!("no radial conversion named `{other}`"),
                    });
                }
            }
        } else {
            RadialBinning::RingsPerBin(settings.get_usize(RINGS_PER_BIN)?)
        };
        let by_flags = settings.contains(HOMOGENIZE_AXIALLY_BY_FLAGS)
            && settings.get_bool(HOMOGENIZE_AXIALLY_BY_FLAGS)?;
        let axial = if by_flags {
            AxialBinning::Flags
        } else if settings.contains(AXIAL_MESH) {
            AxialBinning::Coordinates(settings.get_f64_list(AXIAL_MESH)?.to_vec())
        } else {
            AxialBinning::SegmentsPerBin(settings.get_usize(AXIAL_SEGS_PER_BIN)?)
        };
        let mesh = Self {
            radial,
            axial,
            uniform_theta: settings.get_bool(UNIFORM_THETA_MESH)?,
            theta_bins: settings.get_usize(THETA_BINS)?,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    fn validate(&self) -> Result<(), ConvertError> {
        let zero = |name: &str| ConvertError::Mesh {
            name: name.to_owned(),
            reason: "must be at least one".to_owned(),
        };
        if self.radial == RadialBinning::RingsPerBin(0) {
            return Err(zero(RINGS_PER_BIN));
        }
        if self.theta_bins == 0 {
            return Err(zero(THETA_BINS));
        }
        if self.axial == AxialBinning::SegmentsPerBin(0) {
            return Err(zero(AXIAL_SEGS_PER_BIN));
        }
        Ok(())
    }
}

/// Bin bounds of an R-Z-theta mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Upper ring of each radial bin, exclusive. The first bin starts at
    /// ring 1 and each later bin where the previous one ends. A repeated
    /// bound marks another bin over the same single ring.
    pub rings: Vec<u32>,
    /// Assembly type of each radial bin when rings are binned by
    /// composition; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compositions: Vec<String>,
    /// Bottom of the core, in cm.
    pub bottom: f64,
    /// Upper bound of each axial bin, in cm.
    pub axial: Vec<f64>,
    /// Upper angle of each theta bin, in radians. The first bin starts at
    /// zero.
    pub theta: Vec<f64>,
}

impl Mesh {
    /// Number of cells the mesh defines.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rings.len() * self.axial.len() * self.theta.len()
    }

    /// `(lower, upper)` ring bounds of each radial bin.
    #[must_use]
    pub fn ring_bins(&self) -> Vec<(u32, u32)> {
        let mut lower = 1;
        self.rings
            .iter()
            .map(|&upper| {
                let bin = if lower == upper { (upper - 1, upper) } else { (lower, upper) };
                lower = upper;
                bin
            })
            .collect()
    }

    /// Assembly type held by radial bin `index`, if bins follow ring
    /// compositions.
    #[must_use]
    pub fn composition(&self, index: usize) -> Option<&str> {
        self.compositions.get(index).map(String::as_str)
    }

    /// `(bottom, top)` of each axial bin, in cm.
    #[must_use]
    pub fn axial_bins(&self) -> Vec<(f64, f64)> {
        bins(self.bottom, &self.axial)
    }

    /// `(lower, upper)` angles of each theta bin.
    #[must_use]
    pub fn theta_bins(&self) -> Vec<(f64, f64)> {
        bins(0.0, &self.theta)
    }

    #[must_use]
    pub fn theta_bounds(&self) -> Vec<f64> {
        std::iter::once(0.0).chain(self.theta.iter().copied()).collect()
    }

    #[must_use]
    pub fn axial_bounds(&self) -> Vec<f64> {
        std::iter::once(self.bottom).chain(self.axial.iter().copied()).collect()
    }

    /// A full-symmetry theta-R grid over this mesh with the given radii.
    #[must_use]
    pub fn grid(&self, r_bounds: Vec<f64>) -> Grid {
        Grid::new(
            GridKind::ThetaRZ {
                theta_bounds: self.theta_bounds(),
                r_bounds,
            },
            Symmetry::Full,
        )
    }
}

fn bins<T: Copy>(start: T, uppers: &[T]) -> Vec<(T, T)> {
    let mut lower = start;
    uppers
        .iter()
        .map(|&upper| {
            let bin = (lower, upper);
            lower = upper;
            bin
        })
        .collect()
}

/// Builds the R-Z-theta mesh for a hex core.
#[derive(Debug, Clone)]
pub struct MeshConverter {
    settings: MeshSettings,
}

impl MeshConverter {
    #[must_use]
    pub fn new(settings: MeshSettings) -> Self {
        Self { settings }
    }

    /// # Errors
    ///
    /// Fails like [`MeshSettings::from_settings`].
    pub fn from_settings(settings: &Settings) -> Result<Self, ConvertError> {
        MeshSettings::from_settings(settings).map(Self::new)
    }

    #[must_use]
    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    /// Generates the mesh for the assemblies placed on `core`'s hex grid.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::NotHex`] if `core` has no hex grid and
    /// [`ConvertError::Mesh`] if the core has no assemblies or axial mesh,
    /// or a generated bin list fails validation.
    pub fn generate(&self, model: &Model, core: NodeId) -> Result<Mesh, ConvertError> {
        if !model.node(core)?.grid().is_some_and(Grid::is_hex) {
            return Err(ConvertError::NotHex {
                node: model.describe(core),
            });
        }
        let placed = placed_assemblies(model, core)?;
        let core_axial = core_axial_mesh(model, core)?;

        let axial = self.axial_mesh(model, core, &core_axial)?;
        let theta = self.theta_mesh()?;
        let (rings, compositions) = match self.settings.radial {
            RadialBinning::RingsPerBin(per_bin) => {
                let rings: Vec<u32> = placed.iter().map(|&(_, ring)| ring).collect();
                (ring_mesh(&rings, per_bin, theta.len())?, Vec::new())
            }
            RadialBinning::Composition => composition_mesh(model, &placed)?,
        };
        let mesh = Mesh {
            rings,
            compositions,
            bottom: core_axial[0],
            axial,
            theta,
        };
        info!(
            radial = mesh.rings.len(),
            axial = mesh.axial.len(),
            theta = mesh.theta.len(),
            cells = mesh.cell_count(),
            "generated R-Z-theta mesh"
        );
        debug!(
            rings = ?mesh.rings,
            compositions = ?mesh.compositions,
            axial = ?mesh.axial,
            theta = ?mesh.theta,
            "mesh bounds"
        );
        Ok(mesh)
    }

    fn axial_mesh(
        &self,
        model: &Model,
        core: NodeId,
        core_axial: &[f64],
    ) -> Result<Vec<f64>, ConvertError> {
        let (bottom, top) = (core_axial[0], core_axial[core_axial.len() - 1]);
        let cleaned = |mut coordinates: Vec<f64>| {
            coordinates.sort_by(f64::total_cmp);
            coordinates.dedup_by(|a, b| (*a - *b).abs() <= MESH_TOLERANCE);
            coordinates.retain(|&z| z - bottom > MESH_TOLERANCE);
            coordinates
        };
        let mut axial = match &self.settings.axial {
            AxialBinning::SegmentsPerBin(per_bin) => {
                generate_bins(core_axial.len() - 1, *per_bin, 0)
                    .into_iter()
                    .map(|index| core_axial[index])
                    .collect()
            }
            AxialBinning::Coordinates(coordinates) => cleaned(coordinates.clone()),
            AxialBinning::Flags => cleaned(flag_axial_mesh(model, core)?),
        };
        check_list_bounds(&axial, AXIAL_MESH, bottom, top)?;
        check_last_value(&mut axial, AXIAL_MESH, top, true)?;
        Ok(axial)
    }

    fn theta_mesh(&self) -> Result<Vec<f64>, ConvertError> {
        if !self.settings.uniform_theta {
            return Err(ConvertError::Mesh {
                name: "thetaMesh".to_owned(),
                reason: "only uniform theta meshes are supported".to_owned(),
            });
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.settings.theta_bins as f64;
        #[allow(clippy::cast_precision_loss)]
        let mut theta: Vec<f64> =
            (1..=self.settings.theta_bins).map(|k| TAU * k as f64 / n).collect();
        check_list_bounds(&theta, "thetaMesh", 0.0, TAU)?;
        check_last_value(&mut theta, "thetaMesh", TAU, false)?;
        Ok(theta)
    }
}

/// Ring bins, merging a lone, partly filled outer ring into the bin before
/// it when the mesh has more than one sector.
fn ring_mesh(placed: &[u32], per_bin: usize, sectors: usize) -> Result<Vec<u32>, ConvertError> {
    let outer = placed.iter().copied().max().unwrap_or(1);
    let total = usize::try_from(outer).unwrap_or(usize::MAX);
    let mut rings = generate_bins(total, per_bin, 0)
        .into_iter()
        .map(|ring| u32::try_from(ring).map(|ring| ring + 1))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ConvertError::Mesh {
            name: "rings".to_owned(),
            reason: err.to_string(),
        })?;
    check_last_value(&mut rings, "rings", outer + 1, true)?;

    let filled = placed.iter().filter(|&&ring| ring == outer).count();
    let capacity = usize::try_from(hex::positions_in_ring(outer)).unwrap_or(usize::MAX);
    if filled < capacity && sectors > 1 && rings.len() > 1 {
        let n = rings.len();
        if rings[n - 1] - rings[n - 2] == 1 {
            debug!(ring = outer, "outer ring is partly filled; merging it into the previous bin");
            rings.remove(n - 2);
        }
    }
    check_list_bounds(&rings, "rings", 1.0, f64::from(outer + 1))?;
    Ok(rings)
}

/// One radial bin per assembly type in each ring. Within a ring the most
/// common type comes first; ties go to the type whose name sorts last.
fn composition_mesh(
    model: &Model,
    placed: &[(NodeId, u32)],
) -> Result<(Vec<u32>, Vec<String>), ConvertError> {
    let outer = placed.iter().map(|&(_, ring)| ring).max().unwrap_or(1);
    let mut rings = Vec::new();
    let mut compositions = Vec::new();
    for ring in 1..=outer {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for &(assembly, _) in placed.iter().filter(|&&(_, placed_ring)| placed_ring == ring) {
            *counts.entry(model.node(assembly)?.type_name().to_lowercase()).or_default() += 1;
        }
        let mut types: Vec<(String, usize)> = counts.into_iter().collect();
        types.sort_by(|(a, m), (b, n)| n.cmp(m).then_with(|| b.cmp(a)));
        for (assembly_type, _) in types {
            rings.push(ring + 1);
            compositions.push(assembly_type);
        }
    }
    check_last_value(&mut rings, "rings", outer + 1, true)?;
    check_list_bounds(&rings, "rings", 1.0, f64::from(outer + 1))?;
    Ok((rings, compositions))
}

/// Every child placed on `core`'s grid, with its hex ring.
fn placed_assemblies(model: &Model, core: NodeId) -> Result<Vec<(NodeId, u32)>, ConvertError> {
    let mut placed = Vec::new();
    for child in model.children(core)? {
        if let Some([i, j, _]) = model.node(child)?.locator().and_then(Locator::indices) {
            placed.push((child, hex::ring(i, j)));
        }
    }
    if placed.is_empty() {
        return Err(ConvertError::Mesh {
            name: "rings".to_owned(),
            reason: format!("{} has no assemblies on its grid", model.describe(core)),
        });
    }
    Ok(placed)
}

/// Lowest and highest nonzero block bound of each group of blocks sharing
/// flags and a cross section type, taken per assembly over the whole core.
fn flag_axial_mesh(model: &Model, core: NodeId) -> Result<Vec<f64>, ConvertError> {
    let mut points = Vec::new();
    for assembly in model.children(core)? {
        let grid = model.node(assembly)?.grid();
        let mut groups: BTreeMap<(Flags, String), Vec<f64>> = BTreeMap::new();
        for block in model.children(assembly)? {
            let node = model.node(block)?;
            let Some((bottom, top)) = node
                .locator()
                .and_then(Locator::indices)
                .and_then(|[_, _, k]| grid?.axial_span(k))
            else {
                return Err(ConvertError::NoPosition {
                    node: model.describe(block),
                });
            };
            let xs_type = model.param(block, XS_TYPE)?.as_str().unwrap_or_default().to_owned();
            let bounds = groups.entry((node.flags(), xs_type)).or_default();
            bounds.extend([bottom, top].into_iter().filter(|&z| z != 0.0));
        }
        for bounds in groups.values().filter(|bounds| !bounds.is_empty()) {
            points.push(bounds.iter().copied().fold(f64::INFINITY, f64::min));
            points.push(bounds.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        }
    }
    Ok(points)
}

/// Sorted, distinct axial mesh points over every assembly of `core`.
fn core_axial_mesh(model: &Model, core: NodeId) -> Result<Vec<f64>, ConvertError> {
    let mut points = Vec::new();
    for child in model.children(core)? {
        if let Some(GridKind::Axial { bounds }) = model.node(child)?.grid().map(Grid::kind) {
            points.extend(bounds.iter().copied());
        }
    }
    points.sort_by(f64::total_cmp);
    points.dedup_by(|a, b| (*a - *b).abs() <= MESH_TOLERANCE);
    if points.len() < 2 {
        return Err(ConvertError::Mesh {
            name: AXIAL_MESH.to_owned(),
            reason: format!("{} has no axial mesh", model.describe(core)),
        });
    }
    Ok(points)
}
