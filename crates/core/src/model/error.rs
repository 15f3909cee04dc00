use thiserror::Error;

use crate::{NodeId, flags::FlagError, material::MaterialError, params::ParamError};

/// Errors raised by operations on a [`Model`](crate::Model).
///
/// Node-specific variants carry a description of the offending node so that
/// messages can be reported without access to the model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("{child} is already a child of {parent}")]
    DuplicateChild { parent: String, child: String },

    #[error("{child} already belongs to {parent}")]
    AlreadyParented { parent: String, child: String },

    #[error("{child} is not a child of {parent}")]
    NotFound { parent: String, child: String },

    #[error("cannot order the children of {parent}: {reason}")]
    Comparison { parent: String, reason: String },

    #[error("invalid operation on {node}: {reason}")]
    InvalidOperation { node: String, reason: String },

    #[error("{node} has zero mass density")]
    ZeroDensity { node: String },

    #[error("{node} cannot have children")]
    NotComposite { node: String },

    #[error("{node} has no parent")]
    NoParent { node: String },

    #[error("unknown nuclide `{0}`")]
    UnknownNuclide(String),

    #[error("parameter error on {node}")]
    Param {
        node: String,
        #[source]
        source: ParamError,
    },

    #[error("material error on {node}")]
    Material {
        node: String,
        #[source]
        source: MaterialError,
    },

    #[error(transparent)]
    Flag(#[from] FlagError),

    #[error("locator of {node} is not on the grid of {parent}")]
    Locator { node: String, parent: String },

    #[error("invalid subtree payload: {0}")]
    Payload(String),
}
