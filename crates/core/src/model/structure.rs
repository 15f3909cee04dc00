use std::collections::HashMap;

use indexmap::IndexSet;
use tracing::debug;

use crate::{
    flags::Flags,
    params::Value,
    schema::Level,
    spatial::{Grid, GridLink, Locator, Symmetry},
};

use super::{Attachment, Cache, Model, ModelError, NodeId, NodeKind};

impl Model {
    /// Creates an unattached composite node.
    ///
    /// Flags are derived from `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] for [`Level::Component`],
    /// which is always a leaf.
    pub fn create_composite(
        &mut self,
        name: impl Into<String>,
        level: Level,
        type_name: &str,
    ) -> Result<NodeId, ModelError> {
        let name = name.into();
        if level == Level::Component {
            return Err(ModelError::InvalidOperation {
                node: name,
                reason: "components are leaves".to_owned(),
            });
        }
        let kind = NodeKind::Composite {
            children: IndexSet::new(),
        };
        self.spawn(name, level, kind, type_name)
    }

    /// Creates an unattached leaf backed by `material`.
    ///
    /// # Errors
    ///
    /// Fails only if the schema lacks the common parameters.
    pub fn create_leaf(
        &mut self,
        name: impl Into<String>,
        type_name: &str,
        material: Option<&str>,
    ) -> Result<NodeId, ModelError> {
        let kind = NodeKind::Leaf {
            material: material.map(str::to_owned),
        };
        self.spawn(name.into(), Level::Component, kind, type_name)
    }

    fn children_mut(&mut self, id: NodeId) -> Result<&mut IndexSet<NodeId>, ModelError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Composite { children } => Ok(children),
            NodeKind::Leaf { .. } => Err(ModelError::NotComposite {
                node: format!("<{:?} {} {id}>", node.level, node.name),
            }),
        }
    }

    fn check_attachable(&self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        let NodeKind::Composite { children } = &self.node(parent)?.kind else {
            return Err(ModelError::NotComposite {
                node: self.describe(parent),
            });
        };
        if children.contains(&child) {
            return Err(ModelError::DuplicateChild {
                parent: self.describe(parent),
                child: self.describe(child),
            });
        }
        if let Some(owner) = self.node(child)?.parent {
            return Err(ModelError::AlreadyParented {
                parent: self.describe(owner),
                child: self.describe(child),
            });
        }
        if self.is_ancestor_or_self(child, parent)? {
            return Err(ModelError::InvalidOperation {
                node: self.describe(parent),
                reason: format!("{} is one of its ancestors", self.describe(child)),
            });
        }
        Ok(())
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, id: NodeId) -> Result<bool, ModelError> {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == candidate {
                return Ok(true);
            }
            current = self.node(node)?.parent;
        }
        Ok(false)
    }

    fn grid_link(&self, id: NodeId) -> Result<GridLink, ModelError> {
        Ok(if self.node(id)?.grid.is_some() {
            GridLink::Live(id)
        } else {
            GridLink::Detached
        })
    }

    /// Sets the parent link and gives the child a fresh locator on the
    /// parent's grid.
    fn attach_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        let link = self.grid_link(parent)?;
        let node = self.node_mut(child)?;
        node.parent = Some(parent);
        node.locator = node.locator.as_ref().map(|locator| {
            let mut fresh = locator.detached_copy();
            fresh.associate(link);
            fresh
        });
        self.invalidate(parent);
        Ok(())
    }

    /// Appends `child` to the children of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateChild`] if `child` is already a child
    /// of `parent`, [`ModelError::AlreadyParented`] if it belongs to another
    /// node, and [`ModelError::InvalidOperation`] if it is an ancestor of
    /// `parent`.
    pub fn add(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        let end = self.node(parent)?.child_count();
        self.insert(parent, end, child)
    }

    /// Inserts `child` at `index` among the children of `parent`.
    ///
    /// An index past the end appends.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add).
    pub fn insert(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), ModelError> {
        self.check_attachable(parent, child)?;
        let children = self.children_mut(parent)?;
        let index = index.min(children.len());
        children.shift_insert(index, child);
        self.attach_child(parent, child)
    }

    /// Detaches `child` from `parent`.
    ///
    /// The child keeps a detached copy of its locator.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotFound`] if `child` is not a child of `parent`.
    pub fn remove(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        if self.index_of(parent, child)?.is_none() {
            return Err(ModelError::NotFound {
                parent: self.describe(parent),
                child: self.describe(child),
            });
        }
        self.children_mut(parent)?.shift_remove(&child);
        let node = self.node_mut(child)?;
        node.parent = None;
        node.locator = node.locator.as_ref().map(Locator::detached_copy);
        node.cache.clear();
        self.invalidate(parent);
        Ok(())
    }

    /// Detaches every child of `parent`, returning them in order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `parent` is not live.
    pub fn remove_all(&mut self, parent: NodeId) -> Result<Vec<NodeId>, ModelError> {
        let children = self.children(parent)?;
        for &child in &children {
            self.remove(parent, child)?;
        }
        Ok(children)
    }

    /// Replaces the children of `parent` with `children`, in order.
    ///
    /// Nothing changes if any new child cannot be attached.
    ///
    /// # Errors
    ///
    /// Fails if `children` repeats a node, names a node owned by another
    /// parent, or names an ancestor of `parent`.
    pub fn set_children(&mut self, parent: NodeId, children: &[NodeId]) -> Result<(), ModelError> {
        let current: IndexSet<NodeId> = self.children(parent)?.into_iter().collect();
        let mut seen = IndexSet::with_capacity(children.len());
        for &child in children {
            if !seen.insert(child) {
                return Err(ModelError::DuplicateChild {
                    parent: self.describe(parent),
                    child: self.describe(child),
                });
            }
            if !current.contains(&child) {
                self.check_attachable(parent, child)?;
            }
        }
        self.remove_all(parent)?;
        for &child in children {
            self.add(parent, child)?;
        }
        Ok(())
    }

    /// Position of `child` among the children of `parent`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `parent` is not live.
    pub fn index_of(&self, parent: NodeId, child: NodeId) -> Result<Option<usize>, ModelError> {
        Ok(match &self.node(parent)?.kind {
            NodeKind::Composite { children } => children.get_index_of(&child),
            NodeKind::Leaf { .. } => None,
        })
    }

    /// Removes `id` and its whole subtree from the arena.
    ///
    /// Returns the number of nodes dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn discard(&mut self, id: NodeId) -> Result<usize, ModelError> {
        if let Some(parent) = self.node(id)?.parent {
            self.remove(parent, id)?;
        }
        let ids = self.subtree(id)?;
        for &node in &ids {
            self.take_node(node);
        }
        Ok(ids.len())
    }

    /// Deep-copies the subtree under `id` into a new, unattached subtree.
    ///
    /// Every copied name gets `suffix` appended and a new serial number.
    /// Parameter values, locators and grids are copied; caches are not.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn duplicate(&mut self, id: NodeId, suffix: &str) -> Result<NodeId, ModelError> {
        let originals = self.subtree(id)?;
        let mut copies: HashMap<NodeId, NodeId> = HashMap::with_capacity(originals.len());

        for &original in &originals {
            let mut node = self.node(original)?.clone();
            let original_parent = node.parent.filter(|_| original != id);
            node.name.push_str(suffix);
            node.parent = None;
            node.cache = Cache::default();
            if let Some(grid) = node.grid.as_mut() {
                grid.clear_backups();
            }
            if let NodeKind::Composite { children } = &mut node.kind {
                children.clear();
            }
            let serial = self.allocate_serial();
            node.params
                .load("serialNum", Value::Int(serial))
                .map_err(self.param_error(original))?;

            let copy = self.push_node(node);
            copies.insert(original, copy);
            if let Some(parent) = original_parent {
                let parent_copy = copies
                    .get(&parent)
                    .copied()
                    .ok_or(ModelError::UnknownNode(parent))?;
                self.children_mut(parent_copy)?.insert(copy);
            }
        }

        let root = copies.get(&id).copied().ok_or(ModelError::UnknownNode(id))?;
        let node = self.node_mut(root)?;
        node.locator = node.locator.as_ref().map(Locator::detached_copy);
        self.relink(root)?;
        debug!(source = %id, copy = %root, nodes = originals.len(), "duplicated subtree");
        Ok(root)
    }

    /// Orders children by reversed grid indices, recursively.
    ///
    /// Every composite with two or more children is reordered. Its children
    /// must all carry index locators on one shared grid; detached locators
    /// count as sharing the absence of a grid.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Comparison`] if a child has no locator, sits on
    /// a different grid than its siblings, or has no indices.
    pub fn sort(&mut self, id: NodeId) -> Result<(), ModelError> {
        for composite in self.subtree(id)? {
            let node = self.node(composite)?;
            if node.child_count() < 2 {
                continue;
            }
            let mut shared = None;
            let mut keyed = Vec::with_capacity(node.child_count());
            for child in node.children() {
                let fail = |reason: &str| ModelError::Comparison {
                    parent: self.describe(composite),
                    reason: format!("{} {reason}", self.describe(child)),
                };
                let locator = self
                    .node(child)?
                    .locator
                    .as_ref()
                    .ok_or_else(|| fail("has no locator"))?;
                if *shared.get_or_insert(locator.link()) != locator.link() {
                    return Err(fail("is not on the grid of its siblings"));
                }
                let [i, j, k] = locator.indices().ok_or_else(|| fail("has no grid indices"))?;
                keyed.push(([k, j, i], child));
            }
            keyed.sort_by_key(|&(key, _)| key);
            *self.children_mut(composite)? = keyed.into_iter().map(|(_, child)| child).collect();
        }
        Ok(())
    }

    /// Moves `id` to another position on its parent's grid.
    ///
    /// A detached `locator` is placed on the parent's grid.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoParent`] for a root and
    /// [`ModelError::Locator`] if the parent has no grid or `locator` belongs
    /// to a different grid.
    pub fn move_to(&mut self, id: NodeId, locator: Locator) -> Result<(), ModelError> {
        let parent = self.node(id)?.parent.ok_or_else(|| ModelError::NoParent {
            node: self.describe(id),
        })?;
        let link = self.grid_link(parent)?;
        let compatible = match locator.link() {
            GridLink::Detached => true,
            other => other == link,
        };
        if link == GridLink::Detached || !compatible {
            return Err(ModelError::Locator {
                node: self.describe(id),
                parent: self.describe(parent),
            });
        }
        let mut fresh = locator;
        fresh.associate(link);
        self.node_mut(id)?.locator = Some(fresh);
        self.invalidate(id);
        Ok(())
    }

    /// Gives `id` a locator, placed on its parent's grid when it has one.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn set_locator(&mut self, id: NodeId, locator: Locator) -> Result<(), ModelError> {
        let link = match self.node(id)?.parent {
            Some(parent) => self.grid_link(parent)?,
            None => GridLink::Detached,
        };
        let mut fresh = locator;
        fresh.associate(link);
        self.node_mut(id)?.locator = Some(fresh);
        self.invalidate(id);
        Ok(())
    }

    /// Installs or removes the grid of `id` and re-places its children.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn set_grid(&mut self, id: NodeId, grid: Option<Grid>) -> Result<(), ModelError> {
        let node = self.node_mut(id)?;
        node.grid = grid.map(|mut grid| {
            grid.set_owner(Some(id));
            grid
        });
        let link = self.grid_link(id)?;
        for child in self.children(id)? {
            if let Some(locator) = self.node_mut(child)?.locator.as_mut() {
                locator.associate(link);
            }
        }
        self.invalidate(id);
        Ok(())
    }

    /// Changes the symmetry of the grid owned by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidOperation`] if `id` has no grid.
    pub fn set_grid_symmetry(&mut self, id: NodeId, symmetry: Symmetry) -> Result<(), ModelError> {
        let describe = self.describe(id);
        let grid = self.node_mut(id)?.grid_mut().ok_or(ModelError::InvalidOperation {
            node: describe,
            reason: "has no grid".to_owned(),
        })?;
        grid.set_symmetry(symmetry);
        Ok(())
    }

    /// Rebuilds parent links, grid owners and locator links below `root`
    /// from the child lists.
    ///
    /// Returns the number of nodes visited.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if a child list names a node that
    /// is not live.
    pub fn relink(&mut self, root: NodeId) -> Result<usize, ModelError> {
        let ids = self.subtree(root)?;
        for &id in &ids {
            let node = self.node_mut(id)?;
            if let Some(grid) = node.grid_mut() {
                grid.set_owner(Some(id));
            }
            let link = self.grid_link(id)?;
            for child in self.children(id)? {
                let child = self.node_mut(child)?;
                child.parent = Some(id);
                if let Some(locator) = child.locator.as_mut() {
                    locator.associate(link);
                }
            }
            self.invalidate(id);
        }
        Ok(ids.len())
    }

    /// Renames `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), ModelError> {
        self.node_mut(id)?.name = name.into();
        Ok(())
    }

    /// Changes the type name of `id`, deriving flags from it when `flags`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn set_type(
        &mut self,
        id: NodeId,
        type_name: &str,
        flags: Option<Flags>,
    ) -> Result<(), ModelError> {
        let flags = flags.unwrap_or_else(|| self.schema.flags().from_type_name(type_name));
        self.set_param(id, "type", type_name)?;
        self.set_flags(id, flags)
    }

    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn set_flags(&mut self, id: NodeId, flags: Flags) -> Result<(), ModelError> {
        self.set_param(id, "flags", flags)
    }

    /// Attaches a process-local resource handle to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn attach(&mut self, id: NodeId, attachment: Attachment) -> Result<(), ModelError> {
        self.node_mut(id)?.attachment = Some(attachment);
        Ok(())
    }

    /// Removes every attachment below and including `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn detach_attachments(
        &mut self,
        root: NodeId,
    ) -> Result<Vec<(NodeId, Attachment)>, ModelError> {
        let mut removed = Vec::new();
        for id in self.subtree(root)? {
            if let Some(attachment) = self.node_mut(id)?.attachment.take() {
                removed.push((id, attachment));
            }
        }
        Ok(removed)
    }
}
