use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::warn;
use uom::si::{
    f64::{MassDensity, ThermodynamicTemperature},
    thermodynamic_temperature::degree_celsius,
};

use super::{DENSITY, Material, MaterialError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bound {
    Below,
    Above,
}

/// Materials available to a model, by name.
///
/// Clones share both the materials and the record of range warnings already
/// reported.
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    materials: BTreeMap<String, Arc<dyn Material>>,
    warned: Arc<Mutex<HashSet<(String, String, Bound)>>>,
}

impl MaterialLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a material under its own name.
    pub fn insert(&mut self, material: impl Material + 'static) {
        self.materials
            .insert(material.name().to_owned(), Arc::new(material));
    }

    /// Returns the material called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialError::UnknownMaterial`] if no such material exists.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Material>, MaterialError> {
        self.materials
            .get(name)
            .ok_or_else(|| MaterialError::UnknownMaterial(name.to_owned()))
    }

    /// Density of `material` at `temperature`, warning once if out of range.
    ///
    /// # Errors
    ///
    /// Fails if the material is unknown or cannot be evaluated.
    pub fn density(
        &self,
        material: &str,
        temperature: ThermodynamicTemperature,
    ) -> Result<MassDensity, MaterialError> {
        let found = self.get(material)?;
        self.check_range(found.as_ref(), DENSITY, temperature);
        found.density(temperature)
    }

    /// Named property of `material` at `temperature`, warning once if out of range.
    ///
    /// # Errors
    ///
    /// Fails if the material or property is unknown.
    pub fn property(
        &self,
        material: &str,
        property: &str,
        temperature: ThermodynamicTemperature,
    ) -> Result<f64, MaterialError> {
        let found = self.get(material)?;
        self.check_range(found.as_ref(), property, temperature);
        found.property(property, temperature)
    }

    /// Number of distinct out-of-range conditions reported so far.
    #[must_use]
    pub fn range_warnings(&self) -> usize {
        self.warned.lock().len()
    }

    fn check_range(
        &self,
        material: &dyn Material,
        property: &str,
        temperature: ThermodynamicTemperature,
    ) {
        let Some((low, high)) = material.valid_range(property) else {
            return;
        };
        let bound = if temperature < low {
            Bound::Below
        } else if temperature > high {
            Bound::Above
        } else {
            return;
        };
        let key = (material.name().to_owned(), property.to_owned(), bound);
        if self.warned.lock().insert(key) {
            warn!(
                material = material.name(),
                property,
                temperature_c = temperature.get::<degree_celsius>(),
                low_c = low.get::<degree_celsius>(),
                high_c = high.get::<degree_celsius>(),
                "temperature outside valid range, holding the boundary value"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use uom::si::mass_density::gram_per_cubic_centimeter;

    use super::*;
    use crate::TabulatedMaterial;

    fn library() -> MaterialLibrary {
        let mut library = MaterialLibrary::new();
        library.insert(
            TabulatedMaterial::new(
                "HT9",
                [("FE56".to_owned(), 0.88), ("CR52".to_owned(), 0.12)].into(),
                vec![20.0, 700.0],
                vec![7.8, 7.5],
            )
            .unwrap(),
        );
        library
    }

    fn celsius(t: f64) -> ThermodynamicTemperature {
        ThermodynamicTemperature::new::<degree_celsius>(t)
    }

    #[test]
    fn range_warnings_are_deduplicated() {
        let library = library();
        library.density("HT9", celsius(300.0)).unwrap();
        assert_eq!(library.range_warnings(), 0);

        for t in [900.0, 1000.0, 1100.0] {
            let rho = library.density("HT9", celsius(t)).unwrap();
            assert_relative_eq!(rho.get::<gram_per_cubic_centimeter>(), 7.5, epsilon = 1e-12);
        }
        assert_eq!(library.range_warnings(), 1);

        library.density("HT9", celsius(-50.0)).unwrap();
        assert_eq!(library.range_warnings(), 2);
        assert_eq!(library.clone().range_warnings(), 2);
    }

    #[test]
    fn unknown_material_is_an_error() {
        assert!(matches!(
            library().density("Unobtainium", celsius(20.0)),
            Err(MaterialError::UnknownMaterial(_))
        ));
    }
}
