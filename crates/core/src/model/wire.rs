use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    flags::{FlagColumn, FlagSerializer},
    params::{ParamRecord, ParameterCollection, Value},
    schema::Level,
    spatial::{Grid, Locator},
};

use super::{Attachment, Cache, Model, ModelError, Node, NodeId, NodeKind};

/// Shape of a transmitted node; child references are positions in the
/// payload's node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Composite { children: Vec<usize> },
    Leaf { material: Option<String> },
}

/// One node in transmissible form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub level: Level,
    pub kind: RecordKind,
    pub params: ParamRecord,
    pub locator: Option<Locator>,
    pub grid: Option<Grid>,
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// A subtree flattened in pre-order, with its flags packed into one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtreePayload {
    pub flags: FlagColumn,
    pub nodes: Vec<NodeRecord>,
}

impl SubtreePayload {
    /// Checks that the child references describe a single tree rooted at
    /// the first record, returning each record's parent position.
    fn parents(&self) -> Result<Vec<Option<usize>>, ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Payload("no nodes".to_owned()));
        }
        if self.flags.rows.len() != self.nodes.len() {
            return Err(ModelError::Payload(format!(
                "{} flag rows for {} nodes",
                self.flags.rows.len(),
                self.nodes.len()
            )));
        }
        let mut parents = vec![None; self.nodes.len()];
        for (index, record) in self.nodes.iter().enumerate() {
            let RecordKind::Composite { children } = &record.kind else {
                continue;
            };
            for &child in children {
                if child <= index || child >= self.nodes.len() {
                    return Err(ModelError::Payload(format!(
                        "node {index} refers to child {child}"
                    )));
                }
                if parents[child].replace(index).is_some() {
                    return Err(ModelError::Payload(format!("node {child} has two parents")));
                }
            }
        }
        if let Some(orphan) = parents.iter().skip(1).position(Option::is_none) {
            return Err(ModelError::Payload(format!("node {} is unreachable", orphan + 1)));
        }
        Ok(parents)
    }
}

impl Model {
    fn record(&self, id: NodeId, kind: RecordKind) -> Result<NodeRecord, ModelError> {
        let node = self.node(id)?;
        Ok(NodeRecord {
            name: node.name.clone(),
            level: node.level,
            kind,
            params: node.params.to_record(),
            locator: node.locator.clone(),
            grid: node.grid.clone(),
            attachment: node.attachment.clone(),
        })
    }

    /// Flattens the subtree under `root` for transmission.
    ///
    /// Attachments are carried along and make the payload fail to
    /// serialize; remove them first with
    /// [`detach_attachments`](Self::detach_attachments).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn payload(&self, root: NodeId) -> Result<SubtreePayload, ModelError> {
        let ids = self.subtree(root)?;
        let positions: HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(index, &id)| (id, index)).collect();

        let mut flags = Vec::with_capacity(ids.len());
        let mut nodes = Vec::with_capacity(ids.len());
        for &id in &ids {
            let node = self.node(id)?;
            flags.push(node.flags());
            let kind = match &node.kind {
                NodeKind::Composite { children } => RecordKind::Composite {
                    children: children
                        .iter()
                        .map(|child| {
                            positions.get(child).copied().ok_or(ModelError::UnknownNode(*child))
                        })
                        .collect::<Result<_, _>>()?,
                },
                NodeKind::Leaf { material } => RecordKind::Leaf {
                    material: material.clone(),
                },
            };
            nodes.push(self.record(id, kind)?);
        }
        Ok(SubtreePayload {
            flags: FlagSerializer::pack(self.schema.flags(), &flags),
            nodes,
        })
    }

    /// Rebuilds a received subtree as a new, unattached subtree and re-links
    /// its parent, grid and locator references.
    ///
    /// Nothing is added to the model if the payload is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Payload`] if the records do not form a tree,
    /// and fails if a record names parameters or flags the schema cannot
    /// accept.
    pub fn graft(&mut self, payload: &SubtreePayload) -> Result<NodeId, ModelError> {
        payload.parents()?;
        let flags = FlagSerializer::unpack(self.schema.flags(), &payload.flags)?;

        let mut params = Vec::with_capacity(payload.nodes.len());
        for (record, flags) in payload.nodes.iter().zip(flags) {
            let param_error = |source| ModelError::Param {
                node: record.name.clone(),
                source,
            };
            let defs = Arc::clone(self.schema.params(record.level));
            let mut collection =
                ParameterCollection::from_record(defs, &record.params).map_err(param_error)?;
            collection.load("flags", Value::Flags(flags)).map_err(param_error)?;
            params.push(collection);
        }

        let base = self.nodes.len();
        let mut max_serial = -1;
        for (record, params) in payload.nodes.iter().zip(params) {
            let kind = match &record.kind {
                RecordKind::Composite { children } => NodeKind::Composite {
                    children: children.iter().map(|&child| NodeId(base + child)).collect(),
                },
                RecordKind::Leaf { material } => NodeKind::Leaf {
                    material: material.clone(),
                },
            };
            let node = Node {
                name: record.name.clone(),
                level: record.level,
                kind,
                parent: None,
                params,
                locator: record.locator.clone(),
                grid: record.grid.clone(),
                cache: Cache::default(),
                attachment: None,
            };
            max_serial = max_serial.max(node.serial());
            self.push_node(node);
        }
        self.next_serial = self.next_serial.max(max_serial + 1);

        let root = NodeId(base);
        let node = self.node_mut(root)?;
        node.locator = node.locator.as_ref().map(Locator::detached_copy);
        let relinked = self.relink(root)?;
        debug!(%root, nodes = relinked, "grafted subtree");
        Ok(root)
    }

    /// Replaces the subtree under `old_root` with a received one.
    ///
    /// The attachment of the old root, if any, moves to the new root; the
    /// rest of the old subtree is discarded. Resources are untouched.
    ///
    /// # Errors
    ///
    /// Fails like [`graft`](Self::graft), in which case the old subtree is
    /// kept.
    pub fn replace_with_payload(
        &mut self,
        old_root: Option<NodeId>,
        payload: &SubtreePayload,
    ) -> Result<NodeId, ModelError> {
        let root = self.graft(payload)?;
        if let Some(old) = old_root.filter(|&old| self.contains(old)) {
            let attachment = self.node_mut(old)?.attachment.take();
            self.discard(old)?;
            self.node_mut(root)?.attachment = attachment;
        }
        Ok(root)
    }

    /// Tries to serialize every node under `root` on its own and reports
    /// the ones that fail, each as `path: reason`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn diagnose_serialization(&self, root: NodeId) -> Result<Vec<String>, ModelError> {
        let mut failures = Vec::new();
        for id in self.subtree(root)? {
            let record = self.record(id, RecordKind::Composite { children: Vec::new() })?;
            if let Err(err) = serde_json::to_vec(&record) {
                let path = self.path(id)?;
                error!(node = %path, error = %err, "node cannot be serialized");
                failures.push(format!("{path}: {err}"));
            }
        }
        Ok(failures)
    }
}
