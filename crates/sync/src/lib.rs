//! Keeping an Arbor model consistent across cooperating processes.
//!
//! Every rank holds its own [`Model`](arbor_core::Model). The coordinator
//! owns the authoritative tree and hands it out with [`distribute_state`];
//! after ranks have worked on disjoint parts, [`sync_state`] merges what
//! each one assigned and refuses to guess when two ranks wrote the same
//! field.
//!
//! Ranks talk through a [`Communicator`]. [`SerialComm`] is the
//! single-process group, and [`LocalCluster`] runs ranks as threads of one
//! process for tests and small jobs.

mod actions;
mod comm;
mod context;
mod distribute;
mod error;

pub use actions::{
    Action, DEFAULT_PRIORITY, partition_for_rank, plan_batches, run_actions, run_actions_serial,
};
pub use comm::{Communicator, LocalCluster, LocalComm, SerialComm};
pub use context::{COORDINATOR, DistributedContext, Envelope};
pub use distribute::{distribute_state, sync_state};
pub use error::{ConflictEntry, ConflictReport, SyncError};
