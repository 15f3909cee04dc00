//! Edge assemblies on the boundary lines of a third-core model.
//!
//! A third-core hex model holds the assemblies on its starting boundary line
//! but not their images on the closing line, 120° away. Some solvers need
//! both; [`EdgeAssemblyChanger`] adds the images and takes them away again.

use arbor_core::{AssignmentFlags, Grid, Locator, Model, NodeId, Symmetry, hex};
use tracing::{debug, info, warn};

use crate::{ConvertError, symmetry::rotate_descendants};

const EDGE_SUFFIX: &str = "-edge";

/// Adds or removes the assemblies on the closing boundary line of a
/// third-core hex model.
#[derive(Debug, Default)]
pub struct EdgeAssemblyChanger {
    added: Vec<NodeId>,
}

impl EdgeAssemblyChanger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Edge assemblies added by the last call to
    /// [`add_edge_assemblies`](Self::add_edge_assemblies).
    #[must_use]
    pub fn added(&self) -> &[NodeId] {
        &self.added
    }

    /// Copies every assembly on the starting boundary line of `core` into
    /// its image on the closing line.
    ///
    /// Returns the number of assemblies added. Nothing is added to a full
    /// core, by a changer whose previous additions are still in place, or
    /// where the image position is already occupied.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::NotHex`] if `core` has no hex grid and
    /// [`ConvertError::NoPosition`] if one of its assemblies has no index
    /// locator.
    pub fn add_edge_assemblies(
        &mut self,
        model: &mut Model,
        core: NodeId,
    ) -> Result<usize, ConvertError> {
        if third_core_symmetry(model, core)? == Symmetry::Full {
            return Ok(0);
        }
        if !self.added.is_empty() {
            info!(core = %model.describe(core), "edge assemblies are already in place");
            return Ok(0);
        }

        let placed = positions(model, core)?;
        let lower: Vec<(NodeId, i32, i32)> = placed
            .iter()
            .copied()
            .filter(|&(_, i, j)| hex::on_lower_third_edge(i, j))
            .collect();
        if lower.is_empty() {
            debug!(core = %model.describe(core), "no edge assemblies to add");
        }
        for (assembly, i, j) in lower {
            model.clear_cache(assembly);
            let (ei, ej) = hex::rotate(i, j, 1);
            if placed.iter().any(|&(_, pi, pj)| (pi, pj) == (ei, ej)) {
                warn!(i = ei, j = ej, "an edge assembly already exists; not adding another");
                continue;
            }
            let copy = model.duplicate(assembly, EDGE_SUFFIX)?;
            rotate_descendants(model, copy, 1)?;
            model.set_locator(copy, Locator::index(ei, ej, 0))?;
            model.add(core, copy)?;
            debug!(
                source = %model.describe(assembly),
                edge = %model.describe(copy),
                "added edge assembly"
            );
            self.added.push(copy);
        }

        model.reset_assigned(core, AssignmentFlags::SINCE_LAST_GEOMETRY_TRANSFORMATION)?;
        info!(core = %model.describe(core), added = self.added.len(), "added edge assemblies");
        Ok(self.added.len())
    }

    /// Discards every assembly on the closing boundary line of `core`,
    /// whether or not this changer added it.
    ///
    /// Returns the number of assemblies removed.
    ///
    /// # Errors
    ///
    /// Fails like [`add_edge_assemblies`](Self::add_edge_assemblies).
    pub fn remove_edge_assemblies(
        &mut self,
        model: &mut Model,
        core: NodeId,
    ) -> Result<usize, ConvertError> {
        if third_core_symmetry(model, core)? == Symmetry::Full {
            return Ok(0);
        }
        let placed = positions(model, core)?;
        let mut removed = 0;
        for &(assembly, i, j) in &placed {
            if hex::on_upper_third_edge(i, j) {
                debug!(edge = %model.describe(assembly), "removing edge assembly");
                model.discard(assembly)?;
                removed += 1;
            }
        }
        if removed == 0 {
            debug!(core = %model.describe(core), "no edge assemblies to remove");
        }
        for &(assembly, i, j) in &placed {
            if hex::on_lower_third_edge(i, j) {
                model.clear_cache(assembly);
            }
        }
        self.added.clear();
        info!(core = %model.describe(core), removed, "removed edge assemblies");
        Ok(removed)
    }
}

fn third_core_symmetry(model: &Model, core: NodeId) -> Result<Symmetry, ConvertError> {
    match model.node(core)?.grid() {
        Some(grid) if grid.is_hex() => Ok(grid.symmetry()),
        _ => Err(ConvertError::NotHex {
            node: model.describe(core),
        }),
    }
}

/// Every assembly of `core` with its lattice indices.
fn positions(model: &Model, core: NodeId) -> Result<Vec<(NodeId, i32, i32)>, ConvertError> {
    model
        .children(core)?
        .into_iter()
        .map(|assembly| -> Result<_, ConvertError> {
            let [i, j, _] = model
                .node(assembly)?
                .locator()
                .and_then(Locator::indices)
                .ok_or_else(|| ConvertError::NoPosition {
                    node: model.describe(assembly),
                })?;
            Ok((assembly, i, j))
        })
        .collect()
}

/// `true` if `grid` is a third-core hex lattice that can carry edge
/// assemblies.
#[must_use]
pub fn takes_edge_assemblies(grid: &Grid) -> bool {
    grid.is_hex() && matches!(grid.symmetry(), Symmetry::Third { .. })
}
