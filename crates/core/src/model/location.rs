use crate::spatial::{GridKind, GridLink, hex};

use super::{Model, ModelError, NodeId};

impl Model {
    /// Flat location label of an attached node.
    ///
    /// Nodes on a hex grid are labelled `RRR-PPP` by ring and position.
    /// Nodes on an axial grid append `-KKK` to their parent's label.
    /// Returns `None` for detached nodes and coordinate locators.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `id` is not live.
    pub fn location_label(&self, id: NodeId) -> Result<Option<String>, ModelError> {
        let node = self.node(id)?;
        let (Some(parent), Some(locator)) = (node.parent, node.locator()) else {
            return Ok(None);
        };
        if locator.link() != GridLink::Live(parent) {
            return Ok(None);
        }
        let Some([i, j, k]) = locator.indices() else {
            return Ok(None);
        };
        let Some(grid) = self.node(parent)?.grid() else {
            return Ok(None);
        };
        Ok(match grid.kind() {
            GridKind::Hex { .. } => {
                let (ring, position) = hex::ring_position(i, j);
                Some(hex::label(ring, position))
            }
            GridKind::Axial { .. } => Some(match self.location_label(parent)? {
                Some(prefix) => format!("{prefix}-{k:03}"),
                None => format!("{k:03}"),
            }),
            GridKind::Cartesian { .. } => Some(format!("{i:03}-{j:03}")),
            GridKind::ThetaRZ { .. } => Some(format!("T{i:03}-R{j:03}")),
        })
    }

    /// The attached node in the subtree under `root` with the given label.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] if `root` is not live.
    pub fn find_by_label(&self, root: NodeId, label: &str) -> Result<Option<NodeId>, ModelError> {
        for id in self.subtree(root)? {
            if self.location_label(id)?.as_deref() == Some(label) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}
