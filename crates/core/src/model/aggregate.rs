use crate::{
    flags::TypeSpec,
    params::{ParamLocation, Value},
};

use super::{Model, ModelError, NodeId};

/// How children are weighted when averaging a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Weighting {
    #[default]
    Uniform,
    Volume,
    /// By the value of another numeric parameter.
    Param(String),
}

impl Model {
    /// Direct children matching `spec` that have a numeric value for `name`.
    fn numeric_children(
        &self,
        id: NodeId,
        name: &str,
        spec: &TypeSpec,
    ) -> Result<Vec<(NodeId, f64)>, ModelError> {
        let mut values = Vec::new();
        for child in self.children_with_flags(id, spec, false)? {
            match self.param(child, name)? {
                Value::None => {}
                value => {
                    let x = value.as_f64().ok_or_else(|| ModelError::InvalidOperation {
                        node: self.describe(child),
                        reason: format!("`{name}` is not numeric"),
                    })?;
                    values.push((child, x));
                }
            }
        }
        Ok(values)
    }

    /// Sum of `name` over the direct children matching `spec`.
    ///
    /// Unset values are skipped.
    ///
    /// # Errors
    ///
    /// Fails if a matching child does not define `name` or it is not numeric.
    pub fn calc_total_param(
        &self,
        id: NodeId,
        name: &str,
        spec: &TypeSpec,
    ) -> Result<f64, ModelError> {
        Ok(self.numeric_children(id, name, spec)?.iter().map(|(_, x)| x).sum())
    }

    /// Weighted mean of `name` over the direct children matching `spec`.
    ///
    /// Returns zero when there is nothing to average or the weights sum to
    /// zero.
    ///
    /// # Errors
    ///
    /// Fails if a matching child does not define `name` or a weighting
    /// parameter, or either is not numeric.
    pub fn calc_avg_param(
        &self,
        id: NodeId,
        name: &str,
        spec: &TypeSpec,
        weighting: &Weighting,
    ) -> Result<f64, ModelError> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (child, x) in self.numeric_children(id, name, spec)? {
            let weight = match weighting {
                Weighting::Uniform => 1.0,
                Weighting::Volume => self.volume(child)?,
                Weighting::Param(param) => self.param_f64(child, param)?,
            };
            weighted += weight * x;
            total += weight;
        }
        Ok(if total == 0.0 { 0.0 } else { weighted / total })
    }

    /// Largest value of `name` among matching children, with its holder.
    ///
    /// # Errors
    ///
    /// Fails like [`calc_total_param`](Self::calc_total_param).
    pub fn max_param(
        &self,
        id: NodeId,
        name: &str,
        spec: &TypeSpec,
    ) -> Result<Option<(f64, NodeId)>, ModelError> {
        Ok(self
            .numeric_children(id, name, spec)?
            .into_iter()
            .map(|(child, x)| (x, child))
            .max_by(|a, b| a.0.total_cmp(&b.0)))
    }

    /// Smallest value of `name` among matching children, with its holder.
    ///
    /// # Errors
    ///
    /// Fails like [`calc_total_param`](Self::calc_total_param).
    pub fn min_param(
        &self,
        id: NodeId,
        name: &str,
        spec: &TypeSpec,
    ) -> Result<Option<(f64, NodeId)>, ModelError> {
        Ok(self
            .numeric_children(id, name, spec)?
            .into_iter()
            .map(|(child, x)| (x, child))
            .min_by(|a, b| a.0.total_cmp(&b.0)))
    }

    /// Values of `name` on every direct child, in order.
    ///
    /// # Errors
    ///
    /// Fails if a child does not define `name`.
    pub fn child_param_values(&self, id: NodeId, name: &str) -> Result<Vec<Value>, ModelError> {
        self.children(id)?
            .into_iter()
            .map(|child| self.param(child, name).cloned())
            .collect()
    }

    /// Copies the named parameters of `id` onto each direct child.
    ///
    /// # Errors
    ///
    /// Fails if `id` or a child does not define one of `names`.
    pub fn copy_params_to_children<S: AsRef<str>>(
        &mut self,
        id: NodeId,
        names: &[S],
    ) -> Result<(), ModelError> {
        let values = names
            .iter()
            .map(|name| Ok((name.as_ref(), self.param(id, name.as_ref())?.clone())))
            .collect::<Result<Vec<_>, ModelError>>()?;
        for child in self.children(id)? {
            for (name, value) in &values {
                self.set_param(child, name, value.clone())?;
            }
        }
        Ok(())
    }

    /// Sum of a volume-integrated parameter over every node of the subtree
    /// that defines it, `id` included.
    ///
    /// # Errors
    ///
    /// Fails if a defining node holds a non-numeric value.
    pub fn subtree_total(&self, id: NodeId, name: &str) -> Result<f64, ModelError> {
        let mut total = 0.0;
        for node in self.subtree(id)? {
            let params = self.params(node)?;
            let Some(def) = params.defs().get(name) else {
                continue;
            };
            if def.param_location() != ParamLocation::VolumeIntegrated {
                continue;
            }
            match self.param(node, name)? {
                Value::None => {}
                value => {
                    total += value.as_f64().ok_or_else(|| ModelError::InvalidOperation {
                        node: self.describe(node),
                        reason: format!("`{name}` is not a scalar"),
                    })?;
                }
            }
        }
        Ok(total)
    }

    /// Volume-integrated multigroup flux, summed over leaves.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if leaves disagree on the
    /// number of groups.
    pub fn integrated_mg_flux(&self, id: NodeId) -> Result<Vec<f64>, ModelError> {
        let mut total: Vec<f64> = Vec::new();
        for leaf in self.leaves(id)? {
            let Some(flux) = self.param(leaf, "mgFlux")?.as_floats() else {
                continue;
            };
            if total.is_empty() {
                total = vec![0.0; flux.len()];
            }
            if flux.len() != total.len() {
                return Err(ModelError::InvalidOperation {
                    node: self.describe(leaf),
                    reason: format!("has {} flux groups, expected {}", flux.len(), total.len()),
                });
            }
            for (sum, x) in total.iter_mut().zip(flux) {
                *sum += x;
            }
        }
        Ok(total)
    }

    /// Multigroup flux, divided by the volume when `average` is set.
    ///
    /// # Errors
    ///
    /// Fails like [`integrated_mg_flux`](Self::integrated_mg_flux).
    pub fn mg_flux(&self, id: NodeId, average: bool) -> Result<Vec<f64>, ModelError> {
        let mut flux = self.integrated_mg_flux(id)?;
        if average {
            let volume = self.volume(id)?;
            if volume > 0.0 {
                for x in &mut flux {
                    *x /= volume;
                }
            }
        }
        Ok(flux)
    }
}
