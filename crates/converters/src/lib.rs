//! Reorganizing the geometry of an Arbor model.
//!
//! Three kinds of conversion are provided:
//!
//! - [`ThirdCoreToFullCore`] changes a model in place, expanding a periodic
//!   third-core hex lattice into the full core. It can be undone exactly.
//! - [`EdgeAssemblyChanger`] adds the images of the assemblies on a
//!   third core's starting boundary line and removes them again.
//! - [`HexToRZConverter`] builds a new, homogenized R-Z-theta model from a
//!   full hex core, on a mesh from [`MeshConverter`]. It cannot be undone.
//!
//! The expansion and the homogenization check that what should be conserved
//! is conserved, and fail rather than hand back a model that is not.
//!
//! [`Zones`] group core locations by label and follow assemblies through a
//! full-core expansion.

mod edge;
mod error;
mod homogenize;
mod mesh;
mod symmetry;
mod zones;

pub use edge::{EdgeAssemblyChanger, takes_edge_assemblies};
pub use error::ConvertError;
pub use homogenize::{
    Conversion, HexToRZConverter, STRICT_HOMOGENIZATION, is_theta_rz, mixture_type,
};
pub use mesh::{
    AXIAL_MESH, AXIAL_SEGS_PER_BIN, AxialBinning, HOMOGENIZE_AXIALLY_BY_FLAGS, MESH_TOLERANCE, Mesh,
    MeshConverter, MeshSettings, RADIAL_CONVERSION_TYPE, RING_COMPOSITIONS, RINGS_PER_BIN,
    RadialBinning, THETA_BINS, UNIFORM_THETA_MESH, check_last_value, check_list_bounds,
    generate_bins,
};
pub use symmetry::{ThirdCoreToFullCore, is_expandable};
pub use zones::{Zone, ZoneKind, Zones};
