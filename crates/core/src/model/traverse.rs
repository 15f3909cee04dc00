use crate::flags::{Flags, TypeSpec};

use super::{Model, ModelError, Node, NodeId};

/// How far below a node a traversal reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Every generation.
    Deep,
    /// Exactly this generation; 1 is the direct children.
    Generation(usize),
}

/// Lazy pre-order walk over the descendants of a node.
///
/// Produced by [`Model::descendants`]. Filtering the iterator only filters
/// what it yields; descent continues below nodes that are filtered out.
#[derive(Debug, Clone)]
pub struct Descendants<'a> {
    model: &'a Model,
    stack: Vec<(NodeId, usize)>,
    depth: Depth,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some((id, generation)) = self.stack.pop() {
            let descend = match self.depth {
                Depth::Deep => true,
                Depth::Generation(target) => generation < target,
            };
            if descend {
                if let Ok(node) = self.model.node(id) {
                    self.stack
                        .extend(node.children().rev().map(|child| (child, generation + 1)));
                }
            }
            let produce = match self.depth {
                Depth::Deep => generation > 0,
                Depth::Generation(target) => generation == target,
            };
            if produce {
                return Some(id);
            }
        }
        None
    }
}

impl Model {
    /// Walks the descendants of `id` lazily, in pre-order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn descendants(&self, id: NodeId, depth: Depth) -> Result<Descendants<'_>, ModelError> {
        self.node(id)?;
        Ok(Descendants {
            model: self,
            stack: vec![(id, 0)],
            depth,
        })
    }

    /// Collects the descendants of `id` that satisfy `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn get_children(
        &self,
        id: NodeId,
        depth: Depth,
        predicate: impl Fn(&Node) -> bool,
    ) -> Result<Vec<NodeId>, ModelError> {
        Ok(self
            .descendants(id, depth)?
            .filter(|&child| self.node(child).is_ok_and(&predicate))
            .collect())
    }

    /// Direct children of `id`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        Ok(self.node(id)?.children().collect())
    }

    /// `id` followed by all of its descendants, in pre-order.
    ///
    /// This order is deterministic and is the order used to align per-node
    /// data between copies of the same tree.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let mut ids = vec![id];
        ids.extend(self.descendants(id, Depth::Deep)?);
        Ok(ids)
    }

    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, ModelError> {
        Ok(self.node(id)?.parent)
    }

    /// The topmost ancestor of `id`, which may be `id` itself.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn root_of(&self, id: NodeId) -> Result<NodeId, ModelError> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn flags(&self, id: NodeId) -> Result<Flags, ModelError> {
        Ok(self.node(id)?.flags())
    }

    /// Whether the flags of `id` match `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn has_flags(&self, id: NodeId, spec: &TypeSpec, exact: bool) -> Result<bool, ModelError> {
        Ok(spec.matches(self.node(id)?.flags(), exact))
    }

    /// Direct children of `id` whose flags match `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn children_with_flags(
        &self,
        id: NodeId,
        spec: &TypeSpec,
        exact: bool,
    ) -> Result<Vec<NodeId>, ModelError> {
        self.get_children(id, Depth::Generation(1), |child| spec.matches(child.flags(), exact))
    }

    /// Direct children of `id` with the given type name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn children_of_type(&self, id: NodeId, type_name: &str) -> Result<Vec<NodeId>, ModelError> {
        self.get_children(id, Depth::Generation(1), |child| child.type_name() == type_name)
    }

    /// The nearest of `id` and its ancestors that satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn ancestor(
        &self,
        id: NodeId,
        predicate: impl Fn(&Node) -> bool,
    ) -> Result<Option<NodeId>, ModelError> {
        let mut current = Some(id);
        while let Some(candidate) = current {
            let node = self.node(candidate)?;
            if predicate(node) {
                return Ok(Some(candidate));
            }
            current = node.parent;
        }
        Ok(None)
    }

    /// The nearest of `id` and its ancestors whose flags match `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn ancestor_with_flags(
        &self,
        id: NodeId,
        spec: &TypeSpec,
        exact: bool,
    ) -> Result<Option<NodeId>, ModelError> {
        self.ancestor(id, |node| spec.matches(node.flags(), exact))
    }

    /// Whether `id` has children and every one of them matches `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn contains_only_children_with_flags(
        &self,
        id: NodeId,
        spec: &TypeSpec,
    ) -> Result<bool, ModelError> {
        let node = self.node(id)?;
        if node.child_count() == 0 {
            return Ok(false);
        }
        for child in node.children() {
            if !spec.matches(self.node(child)?.flags(), false) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether any direct child of `id` matches `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn contains_at_least_one_child_with_flags(
        &self,
        id: NodeId,
        spec: &TypeSpec,
    ) -> Result<bool, ModelError> {
        Ok(!self.children_with_flags(id, spec, false)?.is_empty())
    }

    /// Slash-separated names from the root down to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn path(&self, id: NodeId) -> Result<String, ModelError> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id)?;
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.reverse();
        Ok(names.join("/"))
    }
}
