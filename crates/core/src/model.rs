//! The composite tree of reactor parts.
//!
//! A [`Model`] is an arena: nodes live in a vector and refer to each other
//! through [`NodeId`] handles. Parent links, child lists and grid owners are
//! all handles, so the tree can be transmitted as plain data and re-linked
//! after it is received.
//!
//! A node is either a composite, which owns an ordered set of children, or a
//! leaf, which names a material. Aggregate quantities such as volume, mass
//! and number densities are computed by summing over children and bottom out
//! at leaves.

mod aggregate;
mod composition;
mod error;
mod location;
mod reconcile;
mod structure;
mod traverse;
mod wire;


use std::{any::Any, cell::RefCell, collections::BTreeMap, fmt, sync::Arc};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize, Serializer, ser::Error as _};

use crate::{
    flags::Flags,
    material::MaterialLibrary,
    nuclide::NuclideTable,
    params::{ParamError, ParameterCollection, Value},
    schema::{Level, Schema},
    spatial::{Grid, Locator},
};

pub use aggregate::Weighting;
pub use error::ModelError;
pub use traverse::{Depth, Descendants};
pub use wire::{NodeRecord, RecordKind, SubtreePayload};

/// Handle to a node in a [`Model`].
///
/// Handles are never reused within a model, so a stale handle fails with
/// [`ModelError::UnknownNode`] instead of reaching a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a node owns children or names a material.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Composite { children: IndexSet<NodeId> },
    Leaf { material: Option<String> },
}

/// A live handle to a process-local resource.
///
/// Attachments never travel with a subtree: serializing one fails, so they
/// must be removed with [`Model::detach_attachments`] before a distribution.
#[derive(Clone)]
pub struct Attachment {
    label: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl Attachment {
    pub fn new(label: impl Into<String>, handle: impl Any + Send + Sync) -> Self {
        Self {
            label: label.into(),
            handle: Arc::new(handle),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment").field("label", &self.label).finish_non_exhaustive()
    }
}

impl Serialize for Attachment {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(format!(
            "attachment `{}` is a process-local handle and cannot be serialized",
            self.label
        )))
    }
}

/// Process-local collaborators that are never transmitted.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub nuclides: NuclideTable,
    pub materials: MaterialLibrary,
}

/// Memoized derived quantities of one node.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cache {
    values: RefCell<BTreeMap<String, f64>>,
    backups: Vec<BTreeMap<String, f64>>,
}

impl Cache {
    fn get(&self, key: &str) -> Option<f64> {
        self.values.borrow().get(key).copied()
    }

    fn insert(&self, key: &str, value: f64) {
        self.values.borrow_mut().insert(key.to_owned(), value);
    }

    fn clear(&self) {
        self.values.borrow_mut().clear();
    }

    pub(crate) fn back_up(&mut self) {
        self.backups.push(self.values.get_mut().clone());
    }

    /// Pops the newest backup and empties the cache.
    pub(crate) fn discard_backup(&mut self) {
        self.backups.pop();
        self.values.get_mut().clear();
    }
}

/// One part of the reactor.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    level: Level,
    kind: NodeKind,
    parent: Option<NodeId>,
    params: ParameterCollection,
    locator: Option<Locator>,
    grid: Option<Grid>,
    pub(crate) cache: Cache,
    attachment: Option<Attachment>,
}

impl Node {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in order; empty for leaves.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        let children = match &self.kind {
            NodeKind::Composite { children } => Some(children.iter().copied()),
            NodeKind::Leaf { .. } => None,
        };
        children.into_iter().flatten()
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Composite { children } => children.len(),
            NodeKind::Leaf { .. } => 0,
        }
    }

    #[must_use]
    pub fn material(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Leaf { material } => material.as_deref(),
            NodeKind::Composite { .. } => None,
        }
    }

    #[must_use]
    pub fn params(&self) -> &ParameterCollection {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut ParameterCollection {
        &mut self.params
    }

    #[must_use]
    pub fn locator(&self) -> Option<&Locator> {
        self.locator.as_ref()
    }

    #[must_use]
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub(crate) fn grid_mut(&mut self) -> Option<&mut Grid> {
        self.grid.as_mut()
    }

    #[must_use]
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// The free-form type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.params.get("type").ok().and_then(Value::as_str).unwrap_or("")
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.params
            .get("flags")
            .ok()
            .and_then(Value::as_flags)
            .unwrap_or_default()
    }

    /// Serial number assigned at creation.
    #[must_use]
    pub fn serial(&self) -> i64 {
        match self.params.get("serialNum") {
            Ok(Value::Int(serial)) => *serial,
            _ => -1,
        }
    }
}

/// An arena of nodes sharing one schema and one set of resources.
#[derive(Debug, Clone)]
pub struct Model {
    schema: Arc<Schema>,
    resources: Resources,
    nodes: Vec<Option<Node>>,
    next_serial: i64,
}

impl Model {
    #[must_use]
    pub fn new(schema: Arc<Schema>, resources: Resources) -> Self {
        Self {
            schema,
            resources,
            nodes: Vec::new(),
            next_serial: 0,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(Option::is_none)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    /// Handles of every live node in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_some())
            .map(|(index, _)| NodeId(index))
    }

    /// Live nodes without a parent.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids().filter(|&id| self.nodes[id.0].as_ref().is_some_and(|n| n.parent.is_none()))
    }

    /// Returns the node behind `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ModelError::UnknownNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ModelError> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ModelError::UnknownNode(id))
    }

    /// A short human-readable description of a node for messages.
    #[must_use]
    pub fn describe(&self, id: NodeId) -> String {
        match self.node(id) {
            Ok(node) => format!("<{:?} {} {id}>", node.level, node.name),
            Err(_) => id.to_string(),
        }
    }

    pub(crate) fn param_error(&self, id: NodeId) -> impl Fn(ParamError) -> ModelError + '_ {
        move |source| ModelError::Param {
            node: self.describe(id),
            source,
        }
    }

    /// Returns the parameters of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn params(&self, id: NodeId) -> Result<&ParameterCollection, ModelError> {
        self.node(id).map(Node::params)
    }

    /// Returns parameter `name` of `id`.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist or does not define `name`.
    pub fn param(&self, id: NodeId, name: &str) -> Result<&Value, ModelError> {
        self.node(id)?.params.get(name).map_err(self.param_error(id))
    }

    /// Returns numeric parameter `name` of `id`.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist, or the parameter is undefined,
    /// unset or not numeric.
    pub fn param_f64(&self, id: NodeId, name: &str) -> Result<f64, ModelError> {
        self.node(id)?.params.get_f64(name).map_err(self.param_error(id))
    }

    /// Writes parameter `name` of `id` and invalidates cached aggregates.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist, or the write is rejected by the
    /// parameter definition.
    pub fn set_param(
        &mut self,
        id: NodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), ModelError> {
        let result = self.node_mut(id)?.params.set(name, value);
        result.map_err(self.param_error(id))?;
        self.invalidate(id);
        Ok(())
    }

    /// Drops memoized quantities of `id` and every ancestor.
    pub fn clear_cache(&self, id: NodeId) {
        self.invalidate(id);
    }

    pub(crate) fn invalidate(&self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Ok(node) = self.node(id) else {
                return;
            };
            node.cache.clear();
            current = node.parent;
        }
    }

    pub(crate) fn cached(&self, id: NodeId, key: &str) -> Option<f64> {
        self.node(id).ok()?.cache.get(key)
    }

    pub(crate) fn memoize(&self, id: NodeId, key: &str, value: f64) {
        if let Ok(node) = self.node(id) {
            node.cache.insert(key, value);
        }
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() - 1)
    }

    fn take_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.get_mut(id.0).and_then(Option::take)
    }

    fn allocate_serial(&mut self) -> i64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Builds an unattached node with type, flags and serial number set.
    fn spawn(
        &mut self,
        name: String,
        level: Level,
        kind: NodeKind,
        type_name: &str,
    ) -> Result<NodeId, ModelError> {
        let flags = self.schema.flags().from_type_name(type_name);
        let serial = self.allocate_serial();
        let mut params = ParameterCollection::new(Arc::clone(self.schema.params(level)));
        let init = [
            ("type", Value::from(type_name)),
            ("flags", Value::Flags(flags)),
            ("serialNum", Value::Int(serial)),
        ];
        for (field, value) in init {
            params.load(field, value).map_err(|source| ModelError::Param {
                node: name.clone(),
                source,
            })?;
        }
        Ok(self.push_node(Node {
            name,
            level,
            kind,
            parent: None,
            params,
            locator: None,
            grid: None,
            cache: Cache::default(),
            attachment: None,
        }))
    }
}
