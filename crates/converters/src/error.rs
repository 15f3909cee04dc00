use arbor_core::{ModelError, SettingsError, Symmetry};
use thiserror::Error;

/// Errors raised while reorganizing a model.
///
/// A conversion that fails leaves the source model as it found it.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{node} has no hex grid")]
    NotHex { node: String },

    #[error("{node} must have periodic third-core symmetry, found {found:?}")]
    WrongSymmetry { node: String, found: Symmetry },

    #[error("{node} must be modeled in full symmetry, found {found:?}")]
    NotFullCore { node: String, found: Symmetry },

    #[error("the converter has already been applied; restore it first")]
    AlreadyApplied,

    #[error("the converter has not been applied")]
    NothingToRestore,

    #[error("{node} has no position on its parent's grid")]
    NoPosition { node: String },

    /// A conserved quantity changed during a conversion.
    #[error("`{quantity}` is not conserved: expected {expected}, found {found}")]
    Conservation {
        quantity: String,
        expected: f64,
        found: f64,
    },

    #[error("invalid {name}: {reason}")]
    Mesh { name: String, reason: String },

    #[error(
        "no assemblies between rings {lower} and {upper} \
         and angles {lower_theta:.4} and {upper_theta:.4}"
    )]
    EmptyZone {
        lower: u32,
        upper: u32,
        lower_theta: f64,
        upper_theta: f64,
    },

    #[error("{node} has zero volume between {bottom} and {top} cm")]
    ZeroVolume { node: String, bottom: f64, top: f64 },

    #[error(
        "blocks with cross section types {types:?} would be mixed between {bottom} and {top} cm"
    )]
    DissimilarCrossSections { types: Vec<String>, bottom: f64, top: f64 },

    #[error("a zone named `{0}` already exists")]
    DuplicateZone(String),

    #[error("there is no zone named `{0}`")]
    UnknownZone(String),

    #[error("locations appear in more than one zone: {0:?}")]
    OverlappingZones(Vec<String>),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
