use std::{collections::BTreeMap, fmt};

use ndarray::Array1;
use ninterp::{
    interpolator::Extrapolate,
    prelude::{Interp1DOwned, Interpolator},
    strategy::Linear,
};
use uom::si::{
    f64::{MassDensity, ThermodynamicTemperature},
    mass_density::gram_per_cubic_centimeter,
    thermodynamic_temperature::degree_celsius,
};

use super::{DENSITY, Material, MaterialError};

const FRACTION_TOLERANCE: f64 = 1e-6;

/// A material whose properties are linear interpolations of tables in °C.
///
/// Outside a table's span the end value is held.
pub struct TabulatedMaterial {
    name: String,
    mass_fractions: BTreeMap<String, f64>,
    density: Table,
    properties: BTreeMap<String, Table>,
}

struct Table {
    interp: Interp1DOwned<f64, Linear>,
    min: f64,
    max: f64,
}

impl Table {
    fn new(
        material: &str,
        temperatures: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, MaterialError> {
        let min = temperatures.first().copied().unwrap_or(f64::NAN);
        let max = temperatures.last().copied().unwrap_or(f64::NAN);
        let interp = Interp1DOwned::new(
            Array1::from(temperatures),
            Array1::from(values),
            Linear,
            Extrapolate::Clamp,
        )
        .map_err(|source| MaterialError::Table {
            material: material.to_owned(),
            source,
        })?;
        Ok(Self { interp, min, max })
    }

    fn eval(&self, celsius: f64) -> Result<f64, MaterialError> {
        Ok(self.interp.interpolate(&[celsius])?)
    }

    fn range(&self) -> (ThermodynamicTemperature, ThermodynamicTemperature) {
        (
            ThermodynamicTemperature::new::<degree_celsius>(self.min),
            ThermodynamicTemperature::new::<degree_celsius>(self.max),
        )
    }
}

impl TabulatedMaterial {
    /// Creates a material from its composition and a density table in g/cm³.
    ///
    /// # Errors
    ///
    /// Fails if the mass fractions do not sum to one or the table is invalid
    /// (mismatched lengths, fewer than two points, or unsorted temperatures).
    pub fn new(
        name: impl Into<String>,
        mass_fractions: BTreeMap<String, f64>,
        temperatures: Vec<f64>,
        densities: Vec<f64>,
    ) -> Result<Self, MaterialError> {
        let name = name.into();
        let sum: f64 = mass_fractions.values().sum();
        if (sum - 1.0).abs() > FRACTION_TOLERANCE || mass_fractions.values().any(|&f| f < 0.0) {
            return Err(MaterialError::MassFractions {
                material: name,
                sum,
            });
        }
        let density = Table::new(&name, temperatures, densities)?;
        Ok(Self {
            name,
            mass_fractions,
            density,
            properties: BTreeMap::new(),
        })
    }

    /// Adds a named property table.
    ///
    /// # Errors
    ///
    /// Fails if the table is invalid.
    pub fn with_property(
        mut self,
        property: impl Into<String>,
        temperatures: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<Self, MaterialError> {
        let table = Table::new(&self.name, temperatures, values)?;
        self.properties.insert(property.into(), table);
        Ok(self)
    }
}

impl fmt::Debug for TabulatedMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabulatedMaterial")
            .field("name", &self.name)
            .field("mass_fractions", &self.mass_fractions)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Material for TabulatedMaterial {
    fn name(&self) -> &str {
        &self.name
    }

    fn mass_fractions(&self) -> &BTreeMap<String, f64> {
        &self.mass_fractions
    }

    fn valid_range(
        &self,
        property: &str,
    ) -> Option<(ThermodynamicTemperature, ThermodynamicTemperature)> {
        if property == DENSITY {
            return Some(self.density.range());
        }
        self.properties.get(property).map(Table::range)
    }

    fn density(&self, temperature: ThermodynamicTemperature) -> Result<MassDensity, MaterialError> {
        let rho = self.density.eval(temperature.get::<degree_celsius>())?;
        Ok(MassDensity::new::<gram_per_cubic_centimeter>(rho))
    }

    fn property(
        &self,
        name: &str,
        temperature: ThermodynamicTemperature,
    ) -> Result<f64, MaterialError> {
        let table = self
            .properties
            .get(name)
            .ok_or_else(|| MaterialError::UnknownProperty {
                material: self.name.clone(),
                property: name.to_owned(),
            })?;
        table.eval(temperature.get::<degree_celsius>())
    }
}
