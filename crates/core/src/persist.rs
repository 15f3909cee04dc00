//! Durable snapshots of a subtree.
//!
//! A [`Layout`] stores names rather than slots so that it can be restored
//! under a schema that has since gained or lost parameters and flags. Only
//! fields whose definition is persisted are written; flags travel in a
//! packed column and are cross-checked against the type names on restore.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    flags::{FlagColumn, FlagError, FlagSerializer},
    model::{Model, ModelError, NodeId, NodeRecord, RecordKind, Resources, SubtreePayload},
    params::{ParamRecord, Value},
    schema::{Level, Schema},
    spatial::{Grid, Locator},
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("malformed layout: {0}")]
    Malformed(String),

    #[error(transparent)]
    Flag(#[from] FlagError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One stored node. `parent` is the position of the parent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub name: String,
    pub type_name: String,
    pub level: Level,
    pub leaf: bool,
    pub material: Option<String>,
    pub parent: Option<usize>,
    pub locator: Option<Locator>,
    pub grid: Option<Grid>,
    pub fields: BTreeMap<String, Value>,
}

/// A subtree in storage form, records in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub flags: FlagColumn,
    pub records: Vec<LayoutRecord>,
}

impl Layout {
    /// Captures the subtree under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn capture(model: &Model, root: NodeId) -> Result<Self, ModelError> {
        let ids = model.subtree(root)?;
        let positions: HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(index, &id)| (id, index)).collect();

        let mut flags = Vec::with_capacity(ids.len());
        let mut records = Vec::with_capacity(ids.len());
        for &id in &ids {
            let node = model.node(id)?;
            flags.push(node.flags());
            let parent = if id == root {
                None
            } else {
                node.parent().and_then(|parent| positions.get(&parent).copied())
            };
            records.push(LayoutRecord {
                name: node.name().to_owned(),
                type_name: node.type_name().to_owned(),
                level: node.level(),
                leaf: node.is_leaf(),
                material: node.material().map(str::to_owned),
                parent,
                locator: node.locator().map(Locator::detached_copy),
                grid: node.grid().cloned(),
                fields: node
                    .params()
                    .persisted()
                    .map(|(name, value, _)| (name.to_owned(), value.clone()))
                    .collect(),
            });
        }
        debug!(%root, nodes = records.len(), "captured layout");
        Ok(Self {
            flags: FlagSerializer::pack(model.schema().flags(), &flags),
            records,
        })
    }

    /// Rebuilds the stored subtree in a new model.
    ///
    /// Stored fields the schema no longer defines are dropped with a
    /// warning; fields it has gained take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Malformed`] if the records are not a
    /// pre-order tree, and fails if the flag column cannot be decoded or a
    /// stored value has the wrong kind.
    pub fn restore(
        &self,
        schema: Arc<Schema>,
        resources: Resources,
    ) -> Result<(Model, NodeId), PersistError> {
        let children = self.children()?;
        let flags = FlagSerializer::unpack(schema.flags(), &self.flags)?;
        if flags.len() != self.records.len() {
            return Err(PersistError::Malformed(format!(
                "{} flag rows for {} records",
                flags.len(),
                self.records.len()
            )));
        }

        let mut nodes = Vec::with_capacity(self.records.len());
        for (record, (children, stored)) in
            self.records.iter().zip(children.into_iter().zip(&flags))
        {
            let derived = schema.flags().from_type_name(&record.type_name);
            if derived != *stored {
                warn!(
                    node = %record.name,
                    derived = %schema.flags().describe(derived),
                    stored = %schema.flags().describe(*stored),
                    "stored flags differ from those implied by the type name"
                );
            }

            let defs = schema.params(record.level);
            let mut params = ParamRecord::default();
            for (name, value) in &record.fields {
                if defs.get(name).is_some() {
                    params.values.insert(name.clone(), value.clone());
                } else {
                    warn!(
                        node = %record.name,
                        field = %name,
                        "dropping stored field unknown to the schema"
                    );
                }
            }
            params
                .values
                .insert("type".to_owned(), Value::from(record.type_name.as_str()));

            let kind = if record.leaf {
                RecordKind::Leaf {
                    material: record.material.clone(),
                }
            } else {
                RecordKind::Composite { children }
            };
            nodes.push(NodeRecord {
                name: record.name.clone(),
                level: record.level,
                kind,
                params,
                locator: record.locator.clone(),
                grid: record.grid.clone(),
                attachment: None,
            });
        }

        let payload = SubtreePayload {
            flags: self.flags.clone(),
            nodes,
        };
        let mut model = Model::new(schema, resources);
        let root = model.graft(&payload)?;
        debug!(%root, nodes = model.len(), "restored layout");
        Ok((model, root))
    }

    /// Child positions of every record, checking that parents precede
    /// their children and only the first record is a root.
    fn children(&self) -> Result<Vec<Vec<usize>>, PersistError> {
        let mut children = vec![Vec::new(); self.records.len()];
        for (index, record) in self.records.iter().enumerate() {
            match (index, record.parent) {
                (0, None) => {}
                (0, Some(_)) => {
                    return Err(PersistError::Malformed("first record has a parent".to_owned()));
                }
                (_, None) => {
                    return Err(PersistError::Malformed(format!("record {index} has no parent")));
                }
                (_, Some(parent)) if parent >= index => {
                    return Err(PersistError::Malformed(format!(
                        "record {index} precedes its parent {parent}"
                    )));
                }
                (_, Some(parent)) => {
                    if self.records[parent].leaf {
                        return Err(PersistError::Malformed(format!(
                            "record {index} has a leaf parent"
                        )));
                    }
                    children[parent].push(index);
                }
            }
        }
        if children.is_empty() {
            return Err(PersistError::Malformed("no records".to_owned()));
        }
        Ok(children)
    }

    /// # Errors
    ///
    /// Fails if a stored value cannot be represented as JSON.
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Fails if `text` is not a valid layout document.
    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Model {
    /// Shorthand for [`Layout::capture`].
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn layout(&self, root: NodeId) -> Result<Layout, ModelError> {
        Layout::capture(self, root)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        model::NodeKind,
        params::{ParamDef, ValueKind},
        spatial::Symmetry,
    };

    fn same_shape(model: &Model, root: NodeId, layout: &Layout) -> bool {
        let Ok(ids) = model.subtree(root) else {
            return false;
        };
        ids.len() == layout.records.len()
            && ids.iter().zip(&layout.records).all(|(&id, record)| {
                model.node(id).is_ok_and(|node| {
                    node.name() == record.name
                        && matches!(node.kind(), NodeKind::Leaf { .. }) == record.leaf
                })
            })
    }

    fn small_core(schema: Arc<Schema>) -> (Model, NodeId, NodeId) {
        let mut model = Model::new(schema, Resources::default());
        let core = model.create_composite("core", Level::Core, "core").unwrap();
        model
            .set_grid(core, Some(Grid::hex(16.0, Symmetry::Third { periodic: true })))
            .unwrap();
        let assembly = model.create_composite("A1", Level::Assembly, "inner fuel").unwrap();
        model.set_locator(assembly, Locator::index(1, 0, 0)).unwrap();
        model.set_grid(assembly, Some(Grid::axial(vec![0.0, 10.0, 20.0]))).unwrap();
        let block = model.create_composite("B1", Level::Block, "fuel").unwrap();
        model.set_locator(block, Locator::index(0, 0, 1)).unwrap();
        let leaf = model.create_leaf("pin", "fuel", Some("UZr")).unwrap();
        model.set_param(leaf, "volume", 3.0).unwrap();
        model.add(block, leaf).unwrap();
        model.add(assembly, block).unwrap();
        model.add(core, assembly).unwrap();
        model.set_param(core, "keff", 1.002).unwrap();
        (model, core, block)
    }

    #[test]
    fn restore_rebuilds_shape_fields_and_labels() {
        let (model, core, block) = small_core(Schema::base());
        let layout = Layout::capture(&model, core).unwrap();
        assert!(same_shape(&model, core, &layout));
        assert!(layout.records.iter().all(|record| !record.fields.contains_key("flags")));

        let text = layout.to_json().unwrap();
        let (restored, root) = Layout::from_json(&text)
            .unwrap()
            .restore(Schema::base(), Resources::default())
            .unwrap();
        assert!(same_shape(&restored, root, &layout));
        assert_relative_eq!(restored.param_f64(root, "keff").unwrap(), 1.002);

        let copy = restored.find_by_label(root, "002-001-001").unwrap().unwrap();
        assert_eq!(restored.node(copy).unwrap().name(), "B1");
        assert_eq!(restored.node(copy).unwrap().serial(), model.node(block).unwrap().serial());
        assert_eq!(restored.node(copy).unwrap().flags(), model.node(block).unwrap().flags());
        assert_relative_eq!(restored.volume(root).unwrap(), 3.0);
    }

    #[test]
    fn unknown_fields_are_dropped_and_new_ones_default() {
        let extended = Schema::builder()
            .param(Level::Block, ParamDef::new("peakTemp", ValueKind::Float).default_value(0.0))
            .build()
            .unwrap();
        let (mut model, core, block) = small_core(extended);
        model.set_param(block, "peakTemp", 650.0).unwrap();
        let layout = Layout::capture(&model, core).unwrap();

        let (restored, root) = layout.restore(Schema::base(), Resources::default()).unwrap();
        let copy = restored.find_by_label(root, "002-001-001").unwrap().unwrap();
        assert!(restored.param(copy, "peakTemp").is_err());

        let (mut model, core, _) = small_core(Schema::base());
        model.set_param(core, "keff", 0.99).unwrap();
        let layout = Layout::capture(&model, core).unwrap();
        let extended = Schema::builder()
            .param(Level::Core, ParamDef::new("peakTemp", ValueKind::Float).default_value(0.0))
            .build()
            .unwrap();
        let (restored, root) = layout.restore(extended, Resources::default()).unwrap();
        assert_relative_eq!(restored.param_f64(root, "peakTemp").unwrap(), 0.0);
        assert_relative_eq!(restored.param_f64(root, "keff").unwrap(), 0.99);
    }

    #[test]
    fn flags_unknown_to_the_reader_are_registered() {
        let writer = Schema::base();
        writer.flags().extend(["WIDGET"]).unwrap();
        let (mut model, core, block) = small_core(Arc::clone(&writer));
        model.set_type(block, "widget fuel", None).unwrap();
        let layout = Layout::capture(&model, core).unwrap();

        let reader = Schema::base();
        assert!(reader.flags().bit("WIDGET").is_none());
        let (restored, root) = layout.restore(Arc::clone(&reader), Resources::default()).unwrap();
        let copy = restored.find_by_label(root, "002-001-001").unwrap().unwrap();
        let names = reader.flags().to_names(restored.node(copy).unwrap().flags());
        assert!(names.iter().any(|name| name == "WIDGET"));
        assert!(names.iter().any(|name| name == "FUEL"));
    }

    #[test]
    fn malformed_layouts_are_rejected() {
        let (model, core, _) = small_core(Schema::base());
        let mut layout = Layout::capture(&model, core).unwrap();
        layout.records[2].parent = Some(3);
        assert!(matches!(
            layout.restore(Schema::base(), Resources::default()),
            Err(PersistError::Malformed(_))
        ));

        let mut layout = Layout::capture(&model, core).unwrap();
        layout.records[3].parent = None;
        assert!(matches!(
            layout.restore(Schema::base(), Resources::default()),
            Err(PersistError::Malformed(_))
        ));

        assert!(matches!(Layout::from_json("{}"), Err(PersistError::Json(_))));
    }
}
