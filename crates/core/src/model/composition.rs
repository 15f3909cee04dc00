use std::collections::{BTreeMap, BTreeSet};

use uom::si::{
    f64::{MassDensity, ThermodynamicTemperature},
    mass_density::gram_per_cubic_centimeter,
    thermodynamic_temperature::degree_celsius,
};

use crate::{
    params::Value,
    units::{CM2_PER_BARN, MOLES_PER_CC_TO_ATOMS_PER_BARN_CM, TRACE_NUMBER_DENSITY},
};

use super::{Model, ModelError, NodeId};

const NUMBER_DENSITIES: &str = "numberDensities";
const VOLUME: &str = "volume";
const AREA: &str = "area";
const TEMPERATURE: &str = "temperature";

type Densities = BTreeMap<String, f64>;

impl Model {
    /// Volume in cm^3, summed over children for composites.
    ///
    /// # Errors
    ///
    /// Fails if a leaf in the subtree has no numeric volume.
    pub fn volume(&self, id: NodeId) -> Result<f64, ModelError> {
        if let Some(volume) = self.cached(id, VOLUME) {
            return Ok(volume);
        }
        let node = self.node(id)?;
        let volume = if node.is_leaf() {
            self.param_f64(id, VOLUME)?
        } else {
            node.children().map(|child| self.volume(child)).sum::<Result<f64, _>>()?
        };
        self.memoize(id, VOLUME, volume);
        Ok(volume)
    }

    /// Cross-sectional area in cm^2, summed over children for composites.
    ///
    /// # Errors
    ///
    /// Fails if a leaf in the subtree has no numeric area.
    pub fn area(&self, id: NodeId) -> Result<f64, ModelError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            self.param_f64(id, AREA)
        } else {
            node.children().map(|child| self.area(child)).sum()
        }
    }

    /// Child weights by volume, or by area when the total volume is zero.
    ///
    /// `None` when the children have neither volume nor area.
    fn child_weights(&self, id: NodeId) -> Result<Option<Vec<(NodeId, f64)>>, ModelError> {
        let children = self.children(id)?;
        let volumes = children
            .iter()
            .map(|&child| self.volume(child))
            .collect::<Result<Vec<_>, _>>()?;
        let total: f64 = volumes.iter().sum();
        if total > 0.0 {
            return Ok(Some(
                children.into_iter().zip(volumes).map(|(c, v)| (c, v / total)).collect(),
            ));
        }
        let areas = children
            .iter()
            .map(|&child| self.area(child))
            .collect::<Result<Vec<_>, _>>()?;
        let total: f64 = areas.iter().sum();
        if total > 0.0 {
            return Ok(Some(children.into_iter().zip(areas).map(|(c, a)| (c, a / total)).collect()));
        }
        Ok(None)
    }

    /// Volume fraction of each direct child.
    ///
    /// Falls back to area fractions when the children have no volume.
    /// Returns an empty list for nodes without children.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if the children have
    /// neither volume nor area.
    pub fn volume_fractions(&self, id: NodeId) -> Result<Vec<(NodeId, f64)>, ModelError> {
        if self.node(id)?.child_count() == 0 {
            return Ok(Vec::new());
        }
        self.child_weights(id)?.ok_or_else(|| ModelError::InvalidOperation {
            node: self.describe(id),
            reason: "children have neither volume nor area".to_owned(),
        })
    }

    /// Fraction of its parent's volume that `id` occupies.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoParent`] for a root, and fails like
    /// [`volume_fractions`](Self::volume_fractions) otherwise.
    pub fn volume_fraction(&self, id: NodeId) -> Result<f64, ModelError> {
        let parent = self.node(id)?.parent.ok_or_else(|| ModelError::NoParent {
            node: self.describe(id),
        })?;
        Ok(self
            .volume_fractions(parent)?
            .into_iter()
            .find_map(|(child, fraction)| (child == id).then_some(fraction))
            .unwrap_or(0.0))
    }

    fn leaf_densities(&self, id: NodeId) -> Result<Densities, ModelError> {
        Ok(self
            .param(id, NUMBER_DENSITIES)?
            .as_densities()
            .cloned()
            .unwrap_or_default())
    }

    fn write_leaf_densities(&mut self, id: NodeId, densities: Densities) -> Result<(), ModelError> {
        self.set_param(id, NUMBER_DENSITIES, Value::Densities(densities))
    }

    /// Number densities in atoms/bn-cm.
    ///
    /// Composites weight each child's densities by its volume fraction.
    /// A composite whose children have no volume or area yields zeros.
    ///
    /// # Errors
    ///
    /// Fails if a node in the subtree lacks the parameters involved.
    pub fn number_densities(&self, id: NodeId) -> Result<Densities, ModelError> {
        if self.node(id)?.is_leaf() {
            return self.leaf_densities(id);
        }
        let mut densities = Densities::new();
        match self.child_weights(id)? {
            Some(weights) => {
                for (child, fraction) in weights {
                    for (nuclide, density) in self.number_densities(child)? {
                        *densities.entry(nuclide).or_default() += fraction * density;
                    }
                }
            }
            None => {
                for nuclide in self.nuclides(id)? {
                    densities.insert(nuclide, 0.0);
                }
            }
        }
        Ok(densities)
    }

    /// Number density of one nuclide, zero if absent.
    ///
    /// # Errors
    ///
    /// Fails like [`number_densities`](Self::number_densities).
    pub fn number_density(&self, id: NodeId, nuclide: &str) -> Result<f64, ModelError> {
        Ok(self.number_densities(id)?.get(nuclide).copied().unwrap_or(0.0))
    }

    /// Number densities of the named nuclides, in order.
    ///
    /// # Errors
    ///
    /// Fails like [`number_densities`](Self::number_densities).
    pub fn nuclide_number_densities<S: AsRef<str>>(
        &self,
        id: NodeId,
        nuclides: &[S],
    ) -> Result<Vec<f64>, ModelError> {
        let densities = self.number_densities(id)?;
        Ok(nuclides
            .iter()
            .map(|name| densities.get(name.as_ref()).copied().unwrap_or(0.0))
            .collect())
    }

    /// Every nuclide present anywhere in the subtree.
    ///
    /// # Errors
    ///
    /// Fails if a leaf lacks number densities.
    pub fn nuclides(&self, id: NodeId) -> Result<BTreeSet<String>, ModelError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            return Ok(self.leaf_densities(id)?.into_keys().collect());
        }
        let mut nuclides = BTreeSet::new();
        for child in node.children() {
            nuclides.extend(self.nuclides(child)?);
        }
        Ok(nuclides)
    }

    fn contains_nuclide(&self, id: NodeId, nuclide: &str) -> Result<bool, ModelError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            return Ok(self.leaf_densities(id)?.contains_key(nuclide));
        }
        for child in node.children() {
            if self.contains_nuclide(child, nuclide)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn atomic_weight(&self, nuclide: &str) -> Result<f64, ModelError> {
        self.resources.nuclides.atomic_weight(nuclide)
    }

    /// Mass density in g/cc, from number densities and atomic weights.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNuclide`] for a nuclide without a weight.
    pub fn density(&self, id: NodeId) -> Result<f64, ModelError> {
        let mut density = 0.0;
        for (nuclide, n) in self.number_densities(id)? {
            density += n * self.atomic_weight(&nuclide)? / MOLES_PER_CC_TO_ATOMS_PER_BARN_CM;
        }
        Ok(density)
    }

    /// Mass in grams.
    ///
    /// # Errors
    ///
    /// Fails like [`density`](Self::density) or [`volume`](Self::volume).
    pub fn mass(&self, id: NodeId) -> Result<f64, ModelError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            Ok(self.density(id)? * self.volume(id)?)
        } else {
            node.children().map(|child| self.mass(child)).sum()
        }
    }

    /// Mass in grams of a single nuclide.
    ///
    /// # Errors
    ///
    /// Fails like [`mass`](Self::mass).
    pub fn nuclide_mass(&self, id: NodeId, nuclide: &str) -> Result<f64, ModelError> {
        let node = self.node(id)?;
        if node.is_leaf() {
            let n = self.number_density(id, nuclide)?;
            if n == 0.0 {
                return Ok(0.0);
            }
            Ok(n * self.atomic_weight(nuclide)? / MOLES_PER_CC_TO_ATOMS_PER_BARN_CM
                * self.volume(id)?)
        } else {
            node.children().map(|child| self.nuclide_mass(child, nuclide)).sum()
        }
    }

    /// Mass fraction of each nuclide; all zero when the node has no mass.
    ///
    /// # Errors
    ///
    /// Fails like [`density`](Self::density).
    pub fn mass_fracs(&self, id: NodeId) -> Result<Densities, ModelError> {
        let mut partial = Densities::new();
        for (nuclide, n) in self.number_densities(id)? {
            let weight = self.atomic_weight(&nuclide)?;
            partial.insert(nuclide, n * weight);
        }
        let total: f64 = partial.values().sum();
        for value in partial.values_mut() {
            *value = if total > 0.0 { *value / total } else { 0.0 };
        }
        Ok(partial)
    }

    /// # Errors
    ///
    /// Fails like [`mass_fracs`](Self::mass_fracs).
    pub fn mass_frac(&self, id: NodeId, nuclide: &str) -> Result<f64, ModelError> {
        Ok(self.mass_fracs(id)?.get(nuclide).copied().unwrap_or(0.0))
    }

    /// Number of atoms of `nuclide` in the node's volume.
    ///
    /// # Errors
    ///
    /// Fails like [`number_density`](Self::number_density).
    pub fn number_of_atoms(&self, id: NodeId, nuclide: &str) -> Result<f64, ModelError> {
        Ok(self.number_density(id, nuclide)? * self.volume(id)? / CM2_PER_BARN)
    }

    /// Sets the number density of one nuclide.
    ///
    /// On a composite the value is shared, by volume fraction, among the
    /// children that already contain the nuclide. Setting zero on a
    /// composite without the nuclide does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if `value` is non-zero and
    /// no child of a composite contains the nuclide.
    pub fn set_number_density(
        &mut self,
        id: NodeId,
        nuclide: &str,
        value: f64,
    ) -> Result<(), ModelError> {
        if self.node(id)?.is_leaf() {
            let mut densities = self.leaf_densities(id)?;
            densities.insert(nuclide.to_owned(), value);
            return self.write_leaf_densities(id, densities);
        }

        let mut active = Vec::new();
        for (child, fraction) in self.volume_fractions(id)? {
            if self.contains_nuclide(child, nuclide)? {
                active.push((child, fraction));
            }
        }
        if active.is_empty() {
            if value == 0.0 {
                return Ok(());
            }
            return Err(ModelError::InvalidOperation {
                node: self.describe(id),
                reason: format!("no child contains {nuclide}"),
            });
        }
        let total: f64 = active.iter().map(|(_, fraction)| fraction).sum();
        if total <= 0.0 {
            return Err(ModelError::InvalidOperation {
                node: self.describe(id),
                reason: format!("children containing {nuclide} have no volume"),
            });
        }
        for (child, _) in active {
            self.set_number_density(child, nuclide, value / total)?;
        }
        Ok(())
    }

    /// Merges `densities` into the existing composition.
    ///
    /// On a composite each nuclide is shared among the children containing
    /// it. A non-zero nuclide no child contains is spread over all children.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if the receiving children
    /// have no volume.
    pub fn update_number_densities(
        &mut self,
        id: NodeId,
        densities: &Densities,
    ) -> Result<(), ModelError> {
        if self.node(id)?.is_leaf() {
            let mut current = self.leaf_densities(id)?;
            current.extend(densities.iter().map(|(nuclide, &n)| (nuclide.clone(), n)));
            return self.write_leaf_densities(id, current);
        }

        let fractions = self.volume_fractions(id)?;
        let mut shares = vec![Densities::new(); fractions.len()];
        for (nuclide, &density) in densities {
            let mut targets = Vec::new();
            for (index, &(child, _)) in fractions.iter().enumerate() {
                if self.contains_nuclide(child, nuclide)? {
                    targets.push(index);
                }
            }
            if targets.is_empty() {
                if density == 0.0 {
                    continue;
                }
                targets = (0..fractions.len()).collect();
            }
            let total: f64 = targets.iter().map(|&index| fractions[index].1).sum();
            if total <= 0.0 {
                return Err(ModelError::InvalidOperation {
                    node: self.describe(id),
                    reason: format!("children receiving {nuclide} have no volume"),
                });
            }
            for index in targets {
                shares[index].insert(nuclide.clone(), density / total);
            }
        }
        for ((child, _), share) in fractions.into_iter().zip(shares) {
            if !share.is_empty() {
                self.update_number_densities(child, &share)?;
            }
        }
        Ok(())
    }

    /// Replaces the composition of the whole subtree with `densities`.
    ///
    /// # Errors
    ///
    /// Fails like [`update_number_densities`](Self::update_number_densities).
    pub fn set_number_densities(
        &mut self,
        id: NodeId,
        densities: &Densities,
    ) -> Result<(), ModelError> {
        for leaf in self.leaves(id)? {
            self.write_leaf_densities(leaf, Densities::new())?;
        }
        self.update_number_densities(id, densities)
    }

    /// Multiplies every number density in the subtree by `factor`.
    ///
    /// # Errors
    ///
    /// Fails if a leaf lacks number densities.
    pub fn change_ndens_by_factor(&mut self, id: NodeId, factor: f64) -> Result<(), ModelError> {
        for leaf in self.leaves(id)? {
            let mut densities = self.leaf_densities(leaf)?;
            for n in densities.values_mut() {
                *n *= factor;
            }
            self.write_leaf_densities(leaf, densities)?;
        }
        Ok(())
    }

    /// Sets every nuclide in the subtree to a trace density, keeping the
    /// nuclide list.
    ///
    /// # Errors
    ///
    /// Fails if a leaf lacks number densities.
    pub fn clear_number_densities(&mut self, id: NodeId) -> Result<(), ModelError> {
        for leaf in self.leaves(id)? {
            let mut densities = self.leaf_densities(leaf)?;
            for n in densities.values_mut() {
                *n = TRACE_NUMBER_DENSITY;
            }
            self.write_leaf_densities(leaf, densities)?;
        }
        Ok(())
    }

    /// Sets the mass fractions of the named nuclides at constant mass
    /// density, rescaling the others to fill the remainder.
    ///
    /// Nothing changes if any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::ZeroDensity`] if the node has no mass,
    /// [`ModelError::InvalidOperation`] if the fractions are negative or sum
    /// past one, and [`ModelError::UnknownNuclide`] for a nuclide without a
    /// weight.
    pub fn set_mass_fracs(&mut self, id: NodeId, fractions: &Densities) -> Result<(), ModelError> {
        let density = self.density(id)?;
        if density == 0.0 {
            return Err(ModelError::ZeroDensity {
                node: self.describe(id),
            });
        }
        let total_set: f64 = fractions.values().sum();
        if fractions.values().any(|&f| f < 0.0) || total_set > 1.0 + 1e-12 {
            return Err(ModelError::InvalidOperation {
                node: self.describe(id),
                reason: format!(
                    "mass fractions must be non-negative and sum to at most one, got {total_set}"
                ),
            });
        }

        let current = self.mass_fracs(id)?;
        let others: Vec<(&String, f64)> = current
            .iter()
            .filter(|(nuclide, _)| !fractions.contains_key(*nuclide))
            .map(|(nuclide, &f)| (nuclide, f))
            .collect();
        let total_other: f64 = others.iter().map(|(_, f)| f).sum();

        let scale = density * MOLES_PER_CC_TO_ATOMS_PER_BARN_CM;
        let mut target = Densities::new();
        for (nuclide, &f) in fractions {
            target.insert(nuclide.clone(), f * scale / self.atomic_weight(nuclide)?);
        }
        if total_other > 0.0 {
            for (nuclide, f) in others {
                let share = (1.0 - total_set) * f / total_other;
                target.insert(nuclide.clone(), share * scale / self.atomic_weight(nuclide)?);
            }
        }
        self.update_number_densities(id, &target)
    }

    /// # Errors
    ///
    /// Fails like [`set_mass_fracs`](Self::set_mass_fracs).
    pub fn set_mass_frac(
        &mut self,
        id: NodeId,
        nuclide: &str,
        fraction: f64,
    ) -> Result<(), ModelError> {
        self.set_mass_fracs(id, &Densities::from([(nuclide.to_owned(), fraction)]))
    }

    /// Creates a leaf of `material` at `temperature_c` and adds it to `parent`.
    ///
    /// Number densities are seeded from the material's density at that
    /// temperature and its mass fractions.
    ///
    /// # Errors
    ///
    /// Fails if the material or one of its nuclides is unknown, or if the
    /// leaf cannot be added to `parent`.
    pub fn add_component(
        &mut self,
        parent: NodeId,
        name: &str,
        material: &str,
        temperature_c: f64,
        volume: f64,
    ) -> Result<NodeId, ModelError> {
        let material_error = |source| ModelError::Material {
            node: name.to_owned(),
            source,
        };
        let temperature = ThermodynamicTemperature::new::<degree_celsius>(temperature_c);
        let rho = self
            .resources
            .materials
            .density(material, temperature)
            .map_err(material_error)?
            .get::<gram_per_cubic_centimeter>();
        let fractions = self
            .resources
            .materials
            .get(material)
            .map_err(material_error)?
            .mass_fractions()
            .clone();

        let mut densities = Densities::new();
        for (nuclide, fraction) in fractions {
            let n =
                fraction * rho * MOLES_PER_CC_TO_ATOMS_PER_BARN_CM / self.atomic_weight(&nuclide)?;
            densities.insert(nuclide, n);
        }

        let id = self.create_leaf(name, name, Some(material))?;
        self.set_param(id, TEMPERATURE, temperature_c)?;
        self.set_param(id, VOLUME, volume)?;
        self.write_leaf_densities(id, densities)?;
        if let Err(err) = self.add(parent, id) {
            self.discard(id)?;
            return Err(err);
        }
        Ok(id)
    }

    fn leaf_material(&self, id: NodeId) -> Result<(String, ThermodynamicTemperature), ModelError> {
        let material = self.node(id)?.material().ok_or_else(|| ModelError::InvalidOperation {
            node: self.describe(id),
            reason: "has no material".to_owned(),
        })?;
        let temperature =
            ThermodynamicTemperature::new::<degree_celsius>(self.param_f64(id, TEMPERATURE)?);
        Ok((material.to_owned(), temperature))
    }

    /// Density of the leaf's material at the leaf's temperature.
    ///
    /// # Errors
    ///
    /// Fails if `id` has no material or the material cannot be evaluated.
    pub fn material_density(&self, id: NodeId) -> Result<MassDensity, ModelError> {
        let (material, temperature) = self.leaf_material(id)?;
        self.resources
            .materials
            .density(&material, temperature)
            .map_err(|source| ModelError::Material {
                node: self.describe(id),
                source,
            })
    }

    /// A named material property at the leaf's temperature.
    ///
    /// # Errors
    ///
    /// Fails if `id` has no material or the property cannot be evaluated.
    pub fn material_property(&self, id: NodeId, property: &str) -> Result<f64, ModelError> {
        let (material, temperature) = self.leaf_material(id)?;
        self.resources
            .materials
            .property(&material, property, temperature)
            .map_err(|source| ModelError::Material {
                node: self.describe(id),
                source,
            })
    }

    /// Leaves of the subtree under `id`, in pre-order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn leaves(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        Ok(self
            .subtree(id)?
            .into_iter()
            .filter(|&node| self.node(node).is_ok_and(|node| node.is_leaf()))
            .collect())
    }
}
