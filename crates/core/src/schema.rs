//! The flag vocabulary and parameter definitions a model is built against.
//!
//! A [`Schema`] is assembled once, at startup, by a [`SchemaBuilder`] that
//! collects the base definitions plus whatever [`Plugin`]s contribute. The
//! parameter definitions are fixed from then on; the flag registry can still
//! grow when stored data names flags this process does not know.

mod base;

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    flags::{FlagError, FlagRegistry},
    params::{AssignmentFlags, ParamDef, ParamDefCollection, ParamError},
};

/// The hierarchy level of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Reactor,
    Core,
    Assembly,
    Block,
    Component,
}

impl Level {
    pub const ALL: [Self; 5] = [
        Self::Reactor,
        Self::Core,
        Self::Assembly,
        Self::Block,
        Self::Component,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Assignment masks of every definition, grouped by level.
pub type ParamAssignments = BTreeMap<Level, BTreeMap<String, AssignmentFlags>>;

/// An extension that contributes flags and parameters at startup.
pub trait Plugin {
    fn name(&self) -> &str;

    fn define_flags(&self) -> Vec<String> {
        Vec::new()
    }

    fn define_parameters(&self, _level: Level) -> Vec<ParamDef> {
        Vec::new()
    }
}

/// Errors raised while assembling a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("plugin `{plugin}` defines invalid flags")]
    Flag {
        plugin: String,
        #[source]
        source: FlagError,
    },

    #[error("invalid {level:?} parameter definitions")]
    Param {
        level: Level,
        #[source]
        source: ParamError,
    },
}

/// Flag registry plus per-level parameter definitions.
#[derive(Debug)]
pub struct Schema {
    flags: FlagRegistry,
    params: [Arc<ParamDefCollection>; 5],
    plugins: Vec<String>,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Builds the base schema with no plugins.
    #[must_use]
    pub fn base() -> Arc<Self> {
        // Base definitions are distinct per level, unwrap is safe
        SchemaBuilder::default().build().unwrap()
    }

    #[must_use]
    pub fn flags(&self) -> &FlagRegistry {
        &self.flags
    }

    #[must_use]
    pub fn params(&self, level: Level) -> &Arc<ParamDefCollection> {
        &self.params[level.index()]
    }

    /// Names of the plugins that contributed to this schema.
    #[must_use]
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    #[must_use]
    pub fn assignments(&self) -> ParamAssignments {
        Level::ALL
            .iter()
            .map(|&level| (level, self.params(level).assignments()))
            .collect()
    }

    pub fn merge_assignments(&self, other: &ParamAssignments) {
        for (level, masks) in other {
            self.params(*level).merge_assignments(masks);
        }
    }

    pub fn restore_assignments(&self, saved: &ParamAssignments) {
        for (level, masks) in saved {
            self.params(*level).restore_assignments(masks);
        }
    }

    pub fn reset_assignments(&self, epoch: AssignmentFlags) {
        for level in Level::ALL {
            self.params(level).reset_assignments(epoch);
        }
    }
}

/// Collects base and plugin definitions into a [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    flags: FlagRegistry,
    params: BTreeMap<Level, Vec<ParamDef>>,
    plugins: Vec<String>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::with_flags(FlagRegistry::default())
    }
}

impl SchemaBuilder {
    /// Starts from the base parameters and the given flag vocabulary.
    #[must_use]
    pub fn with_flags(flags: FlagRegistry) -> Self {
        Self {
            flags,
            params: Level::ALL
                .iter()
                .map(|&level| (level, base::definitions(level)))
                .collect(),
            plugins: Vec::new(),
        }
    }

    /// Adds one parameter definition.
    #[must_use]
    pub fn param(mut self, level: Level, def: ParamDef) -> Self {
        self.params.entry(level).or_default().push(def);
        self
    }

    /// Registers everything `plugin` contributes.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Flag`] if the plugin's flag names are invalid.
    pub fn plugin(mut self, plugin: &dyn Plugin) -> Result<Self, SchemaError> {
        let flags = plugin.define_flags();
        debug!(plugin = plugin.name(), flags = flags.len(), "registering plugin");
        self.flags.extend(&flags).map_err(|source| SchemaError::Flag {
            plugin: plugin.name().to_owned(),
            source,
        })?;
        for level in Level::ALL {
            self.params
                .entry(level)
                .or_default()
                .extend(plugin.define_parameters(level));
        }
        self.plugins.push(plugin.name().to_owned());
        Ok(self)
    }

    /// Freezes the parameter definitions.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Param`] if a level defines a name twice.
    pub fn build(mut self) -> Result<Arc<Schema>, SchemaError> {
        let mut collect = |level: Level| {
            ParamDefCollection::new(self.params.remove(&level).unwrap_or_default())
                .map(Arc::new)
                .map_err(|source| SchemaError::Param { level, source })
        };
        let params = [
            collect(Level::Reactor)?,
            collect(Level::Core)?,
            collect(Level::Assembly)?,
            collect(Level::Block)?,
            collect(Level::Component)?,
        ];
        Ok(Arc::new(Schema {
            flags: self.flags,
            params,
            plugins: self.plugins,
        }))
    }
}
