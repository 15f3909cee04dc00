use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Atomic weights, in g/mol, keyed by nuclide name.
///
/// Composition queries on a [`Model`](crate::Model) resolve nuclide names
/// through this table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuclideTable {
    weights: BTreeMap<String, f64>,
}

const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    ("H1", 1.007_825),
    ("HE4", 4.002_603),
    ("B10", 10.012_937),
    ("B11", 11.009_305),
    ("C", 12.0107),
    ("O16", 15.994_915),
    ("NA23", 22.989_770),
    ("CR52", 51.940_506),
    ("MN55", 54.938_044),
    ("FE54", 53.939_609),
    ("FE56", 55.934_936),
    ("NI58", 57.935_342),
    ("ZR", 91.224),
    ("ZR90", 89.904_698),
    ("ZR91", 90.905_640),
    ("ZR92", 91.905_035),
    ("ZR94", 93.906_311),
    ("ZR96", 95.908_271),
    ("MO98", 97.905_404),
    ("XE135", 134.907_227),
    ("U234", 234.040_952),
    ("U235", 235.043_930),
    ("U236", 236.045_568),
    ("U238", 238.050_788),
    ("PU239", 239.052_164),
    ("PU240", 240.053_814),
    ("PU241", 241.056_852),
];

impl Default for NuclideTable {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|&(name, weight)| (name.to_owned(), weight))
                .collect(),
        }
    }
}

impl NuclideTable {
    /// Creates a table with no nuclides.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            weights: BTreeMap::new(),
        }
    }

    /// Defines or redefines the atomic weight of a nuclide.
    pub fn define(&mut self, name: impl Into<String>, weight: f64) {
        self.weights.insert(name.into(), weight);
    }

    /// Returns the atomic weight of `name` in g/mol.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNuclide`] if the nuclide is not defined.
    pub fn atomic_weight(&self, name: &str) -> Result<f64, ModelError> {
        self.weights
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownNuclide(name.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.weights.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}
