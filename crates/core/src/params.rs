//! Typed, named parameter records attached to every node.
//!
//! Parameter definitions ([`ParamDef`]) are declared per [`Level`](crate::Level)
//! and shared by all nodes of that level. Each node owns a
//! [`ParameterCollection`] holding one value and one [`AssignmentFlags`]
//! mask per definition.

mod collection;
mod definition;
mod merge;
mod value;

use thiserror::Error;

pub use collection::{ParamRecord, ParameterCollection};
pub use definition::{AssignmentFlags, ParamDef, ParamDefCollection, ParamLocation, SerializerKind};
pub use merge::{FieldConflict, MergePlan, SyncDiff};
pub use value::{Value, ValueKind};

/// Errors raised by parameter access.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{name}` expects {expected:?} but was given {found:?}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("parameter `{0}` has no value")]
    Unset(String),

    #[error("no backup to restore")]
    NoBackup,

    #[error("parameter `{0}` is defined more than once")]
    Duplicate(String),
}
