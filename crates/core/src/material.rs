//! The material property capability consumed by leaf nodes.
//!
//! Correlations live behind the [`Material`] trait. Leaves only name their
//! material; lookups go through a [`MaterialLibrary`], which reports
//! out-of-range temperatures once per distinct condition.

mod library;
mod tabulated;

use std::{collections::BTreeMap, fmt};

use ninterp::error::{InterpolateError, ValidateError};
use thiserror::Error;
use uom::si::f64::{MassDensity, ThermodynamicTemperature};

pub use library::MaterialLibrary;
pub use tabulated::TabulatedMaterial;

/// Name under which [`Material::valid_range`] reports the density range.
pub const DENSITY: &str = "density";

/// Errors raised by material lookups and construction.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("unknown material `{0}`")]
    UnknownMaterial(String),

    #[error("material `{material}` has no property `{property}`")]
    UnknownProperty { material: String, property: String },

    #[error("mass fractions of `{material}` sum to {sum}, not 1")]
    MassFractions { material: String, sum: f64 },

    #[error("invalid table for `{material}`")]
    Table {
        material: String,
        #[source]
        source: ValidateError,
    },

    #[error(transparent)]
    Interpolation(#[from] InterpolateError),
}

/// A material's property correlations.
///
/// Implementations evaluate outside their valid range by holding the value
/// at the nearest bound; they never fail for temperature alone.
pub trait Material: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Mass fraction of each nuclide, summing to one.
    fn mass_fractions(&self) -> &BTreeMap<String, f64>;

    /// Returns the valid temperature range of `property`, if bounded.
    fn valid_range(
        &self,
        property: &str,
    ) -> Option<(ThermodynamicTemperature, ThermodynamicTemperature)>;

    /// Mass density at `temperature`.
    ///
    /// # Errors
    ///
    /// Fails only if the correlation cannot be evaluated.
    fn density(&self, temperature: ThermodynamicTemperature) -> Result<MassDensity, MaterialError>;

    /// Evaluates a named property at `temperature`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::UnknownProperty`] if the property is not defined.
    fn property(
        &self,
        name: &str,
        temperature: ThermodynamicTemperature,
    ) -> Result<f64, MaterialError>;
}
