//! Grids that position children and locators that place a node on one.
//!
//! A grid belongs to exactly one node and records that owner as a handle.
//! A locator's [`GridLink`] names the node whose grid it is placed on, or is
//! [`GridLink::Detached`] once the node leaves its parent.

pub mod hex;

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// The lattice a grid describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridKind {
    /// Hexagonal lattice with the given flat-to-flat pitch in cm.
    Hex { pitch: f64 },
    Cartesian { pitch_x: f64, pitch_y: f64 },
    /// Axial stack; cell `k` spans `bounds[k]..bounds[k + 1]` in cm.
    Axial { bounds: Vec<f64> },
    /// Cell `(i, j)` spans `theta_bounds[i]..theta_bounds[i + 1]` radians and
    /// `r_bounds[j]..r_bounds[j + 1]` cm.
    ThetaRZ {
        theta_bounds: Vec<f64>,
        r_bounds: Vec<f64>,
    },
}

/// The fraction of the full object a grid models explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symmetry {
    Full,
    Third { periodic: bool },
}

impl Symmetry {
    /// How many copies of the modeled domain make up the full object.
    #[must_use]
    pub fn multiplicity(self) -> usize {
        match self {
            Self::Full => 1,
            Self::Third { .. } => 3,
        }
    }
}

/// A spatial grid owned by one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    kind: GridKind,
    symmetry: Symmetry,
    #[serde(skip)]
    owner: Option<NodeId>,
    #[serde(skip)]
    backups: Vec<(GridKind, Symmetry)>,
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.symmetry == other.symmetry
    }
}

impl Grid {
    #[must_use]
    pub fn new(kind: GridKind, symmetry: Symmetry) -> Self {
        Self {
            kind,
            symmetry,
            owner: None,
            backups: Vec::new(),
        }
    }

    #[must_use]
    pub fn hex(pitch: f64, symmetry: Symmetry) -> Self {
        Self::new(GridKind::Hex { pitch }, symmetry)
    }

    #[must_use]
    pub fn axial(bounds: Vec<f64>) -> Self {
        Self::new(GridKind::Axial { bounds }, Symmetry::Full)
    }

    #[must_use]
    pub fn kind(&self) -> &GridKind {
        &self.kind
    }

    #[must_use]
    pub fn symmetry(&self) -> Symmetry {
        self.symmetry
    }

    pub fn set_symmetry(&mut self, symmetry: Symmetry) {
        self.symmetry = symmetry;
    }

    /// The node this grid belongs to, once attached.
    #[must_use]
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Option<NodeId>) {
        self.owner = owner;
    }

    #[must_use]
    pub fn is_hex(&self) -> bool {
        matches!(self.kind, GridKind::Hex { .. })
    }

    pub(crate) fn back_up(&mut self) {
        self.backups.push((self.kind.clone(), self.symmetry));
    }

    pub(crate) fn restore_backup(&mut self) -> bool {
        match self.backups.pop() {
            Some((kind, symmetry)) => {
                self.kind = kind;
                self.symmetry = symmetry;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_backups(&mut self) {
        self.backups.clear();
    }

    /// Axial extent of cell `k`, for axial grids.
    #[must_use]
    pub fn axial_span(&self, k: i32) -> Option<(f64, f64)> {
        let GridKind::Axial { bounds } = &self.kind else {
            return None;
        };
        let k = usize::try_from(k).ok()?;
        Some((*bounds.get(k)?, *bounds.get(k + 1)?))
    }

    /// Centroid of the cell at `indices`, in cm.
    #[must_use]
    pub fn centroid(&self, indices: [i32; 3]) -> Option<[f64; 3]> {
        let [i, j, k] = indices;
        match &self.kind {
            GridKind::Hex { pitch } => {
                let (x, y) = hex::centroid(*pitch, i, j);
                Some([x, y, 0.0])
            }
            GridKind::Cartesian { pitch_x, pitch_y } => {
                Some([pitch_x * f64::from(i), pitch_y * f64::from(j), 0.0])
            }
            GridKind::Axial { .. } => {
                let (bottom, top) = self.axial_span(k)?;
                Some([0.0, 0.0, 0.5 * (bottom + top)])
            }
            GridKind::ThetaRZ {
                theta_bounds,
                r_bounds,
            } => {
                let i = usize::try_from(i).ok()?;
                let j = usize::try_from(j).ok()?;
                let theta = 0.5 * (theta_bounds.get(i)? + theta_bounds.get(i + 1)?);
                let r = 0.5 * (r_bounds.get(j)? + r_bounds.get(j + 1)?);
                Some([r * theta.cos(), r * theta.sin(), 0.0])
            }
        }
    }
}

/// Which grid, if any, a locator is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridLink {
    /// On the grid owned by this node.
    Live(NodeId),
    Detached,
}

/// Where a node sits relative to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Locator {
    Index { indices: [i32; 3], link: GridLink },
    Coordinate { position: [f64; 3], link: GridLink },
}

impl Locator {
    /// An index locator, detached until its node is placed in a parent.
    #[must_use]
    pub fn index(i: i32, j: i32, k: i32) -> Self {
        Self::Index {
            indices: [i, j, k],
            link: GridLink::Detached,
        }
    }

    /// A coordinate locator in cm, detached until placed.
    #[must_use]
    pub fn coordinate(x: f64, y: f64, z: f64) -> Self {
        Self::Coordinate {
            position: [x, y, z],
            link: GridLink::Detached,
        }
    }

    #[must_use]
    pub fn link(&self) -> GridLink {
        match self {
            Self::Index { link, .. } | Self::Coordinate { link, .. } => *link,
        }
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.link() == GridLink::Detached
    }

    #[must_use]
    pub fn indices(&self) -> Option<[i32; 3]> {
        match self {
            Self::Index { indices, .. } => Some(*indices),
            Self::Coordinate { .. } => None,
        }
    }

    #[must_use]
    pub fn position(&self) -> Option<[f64; 3]> {
        match self {
            Self::Coordinate { position, .. } => Some(*position),
            Self::Index { .. } => None,
        }
    }

    /// A copy with the same position data but no grid.
    #[must_use]
    pub fn detached_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.associate(GridLink::Detached);
        copy
    }

    pub(crate) fn associate(&mut self, new_link: GridLink) {
        match self {
            Self::Index { link, .. } | Self::Coordinate { link, .. } => *link = new_link,
        }
    }

    /// Rotates counter-clockwise about the z axis by `steps` multiples of
    /// 120°, treating index locators as hexagonal lattice indices.
    #[must_use]
    pub fn rotated_third(&self, steps: u32) -> Self {
        match self {
            Self::Index { indices, link } => {
                let (i, j) = hex::rotate(indices[0], indices[1], steps);
                Self::Index {
                    indices: [i, j, indices[2]],
                    link: *link,
                }
            }
            Self::Coordinate { position, link } => {
                let angle = f64::from(steps % 3) * TAU / 3.0;
                let (sin, cos) = angle.sin_cos();
                let [x, y, z] = *position;
                Self::Coordinate {
                    position: [x * cos - y * sin, x * sin + y * cos, z],
                    link: *link,
                }
            }
        }
    }
}
