//! Core types for the Arbor reactor model.
//!
//! A reactor is a tree of parts. Composites (reactor, core, assemblies,
//! blocks) own ordered children; leaves are material-bearing components.
//! This crate provides:
//!
//! - [`Flags`] and [`TypeSpec`]: extensible bit sets classifying parts
//! - [`ParameterCollection`]: typed, schema-declared fields with
//!   assignment tracking and backup stacks
//! - [`Model`]: the arena holding the tree, with traversal, composition
//!   and aggregation queries
//! - [`StateRetainer`]: scoped checkpoint and rollback over a subtree
//! - [`Layout`]: durable snapshots that survive schema changes
//!
//! Distribution across processes lives in `arbor-sync`, and geometry
//! conversions in `arbor-converters`.

mod flags;
mod material;
mod model;
mod nuclide;
mod params;
mod persist;
mod retainer;
mod schema;
mod settings;
mod spatial;

pub mod units;

pub use flags::{
    FLAG_SERIALIZER_VERSION, FlagColumn, FlagError, FlagRegistry, FlagSerializer, Flags, MAX_FLAGS,
    TypeSpec,
};
pub use material::{DENSITY, Material, MaterialError, MaterialLibrary, TabulatedMaterial};
pub use model::{
    Attachment, Depth, Descendants, Model, ModelError, Node, NodeId, NodeKind, NodeRecord,
    RecordKind, Resources, SubtreePayload, Weighting,
};
pub use nuclide::NuclideTable;
pub use params::{
    AssignmentFlags, FieldConflict, MergePlan, ParamDef, ParamDefCollection, ParamError,
    ParamLocation, ParamRecord, ParameterCollection, SerializerKind, SyncDiff, Value, ValueKind,
};
pub use persist::{Layout, LayoutRecord, PersistError};
pub use retainer::{RetainError, StateRetainer};
pub use schema::{Level, ParamAssignments, Plugin, Schema, SchemaBuilder, SchemaError};
pub use settings::{SettingValue, Settings, SettingsError};
pub use spatial::{Grid, GridKind, GridLink, Locator, Symmetry, hex};
