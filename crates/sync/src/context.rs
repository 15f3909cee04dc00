use std::fmt;

use serde::{
    Deserialize, Serialize,
    de::{DeserializeOwned, IgnoredAny},
};
use tracing::{debug, warn};

use crate::{
    SyncError,
    comm::{Communicator, SerialComm},
};

/// The rank that coordinates distributed operations.
pub const COORDINATOR: usize = 0;

/// What every rank puts on the wire: either its payload or the reason it
/// cannot take part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope<T> {
    Payload(T),
    Abort(String),
}

/// A communicator plus the typed collectives built on it.
///
/// Distributed operations take the context explicitly. A sub-context made
/// with [`sub_context`](Self::sub_context) is independent of its parent,
/// which is untouched and used again once the sub-context is dropped.
pub struct DistributedContext {
    comm: Box<dyn Communicator>,
}

impl fmt::Debug for DistributedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedContext")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

impl Default for DistributedContext {
    fn default() -> Self {
        Self::serial()
    }
}

fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<Vec<u8>, String> {
    serde_json::to_vec(envelope).map_err(|err| err.to_string())
}

fn abort_bytes(reason: &str) -> Vec<u8> {
    // An `Envelope<()>` holding a string always serializes.
    serde_json::to_vec(&Envelope::<()>::Abort(reason.to_owned())).unwrap_or_default()
}

fn open<T: DeserializeOwned>(rank: usize, bytes: &[u8]) -> Result<T, SyncError> {
    match serde_json::from_slice::<Envelope<T>>(bytes)? {
        Envelope::Payload(value) => Ok(value),
        Envelope::Abort(reason) => Err(SyncError::Aborted { rank, reason }),
    }
}

/// Opens every rank's envelope, failing with the first abort in rank order.
fn open_all<T: DeserializeOwned>(parts: &[Vec<u8>]) -> Result<Vec<T>, SyncError> {
    for (rank, bytes) in parts.iter().enumerate() {
        if let Ok(Envelope::Abort(reason)) = serde_json::from_slice::<Envelope<IgnoredAny>>(bytes) {
            return Err(SyncError::Aborted { rank, reason });
        }
    }
    parts.iter().enumerate().map(|(rank, bytes)| open(rank, bytes)).collect()
}

impl DistributedContext {
    #[must_use]
    pub fn new(comm: impl Communicator + 'static) -> Self {
        Self { comm: Box::new(comm) }
    }

    /// A context for a single process.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(SerialComm)
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Returns `true` if there is more than one rank to distribute to.
    #[must_use]
    pub fn is_distributable(&self) -> bool {
        self.size() > 1
    }

    #[must_use]
    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    pub fn barrier(&self) -> Result<(), SyncError> {
        self.comm.barrier()
    }

    /// Sends the coordinator's `value` to every rank.
    ///
    /// Only the coordinator's argument is read. If it cannot be encoded,
    /// every other rank fails with [`SyncError::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Encode`] on the coordinator if `value` cannot be
    /// encoded, and fails if the coordinator aborts or a peer is
    /// unreachable.
    pub fn broadcast<T>(&self, value: Option<&T>) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned,
    {
        if !self.is_coordinator() {
            let bytes = self.comm.broadcast(COORDINATOR, Vec::new())?;
            return open(COORDINATOR, &bytes);
        }
        let Some(value) = value else {
            return Err(self.abort_broadcast("the coordinator has nothing to send"));
        };
        match encode(&Envelope::Payload(value)) {
            Ok(bytes) => {
                let bytes = self.comm.broadcast(COORDINATOR, bytes)?;
                open(COORDINATOR, &bytes)
            }
            Err(reason) => match self.abort_broadcast(&reason) {
                SyncError::Aborted { .. } => Err(SyncError::Encode { reason }),
                err => Err(err),
            },
        }
    }

    /// Ends a broadcast on the coordinator without a value, so that every
    /// other rank's [`broadcast`](Self::broadcast) fails.
    ///
    /// Returns the error the coordinator should report.
    pub fn abort_broadcast(&self, reason: &str) -> SyncError {
        warn!(rank = self.rank(), reason, "aborting broadcast");
        match self.comm.broadcast(COORDINATOR, abort_bytes(reason)) {
            Ok(_) => SyncError::Aborted {
                rank: self.rank(),
                reason: reason.to_owned(),
            },
            Err(err) => err,
        }
    }

    /// Collects every rank's `value`, in rank order, on every rank.
    ///
    /// # Errors
    ///
    /// Fails on every rank if any rank cannot encode its value.
    pub fn all_gather<T>(&self, value: &T) -> Result<Vec<T>, SyncError>
    where
        T: Serialize + DeserializeOwned,
    {
        let bytes = encode(&Envelope::Payload(value)).unwrap_or_else(|reason| abort_bytes(&reason));
        let parts = self.comm.all_gather(bytes)?;
        debug!(
            rank = self.rank(),
            bytes = parts.iter().map(Vec::len).sum::<usize>(),
            "all-gathered"
        );
        open_all(&parts)
    }

    /// Collects every rank's `value` on the coordinator.
    ///
    /// # Errors
    ///
    /// Fails on the coordinator if any rank cannot encode its value.
    pub fn gather<T>(&self, value: &T) -> Result<Option<Vec<T>>, SyncError>
    where
        T: Serialize + DeserializeOwned,
    {
        let bytes = encode(&Envelope::Payload(value)).unwrap_or_else(|reason| abort_bytes(&reason));
        match self.comm.gather(COORDINATOR, bytes)? {
            Some(parts) => open_all(&parts).map(Some),
            None => Ok(None),
        }
    }

    /// Hands the `i`th of the coordinator's `values` to rank `i`.
    ///
    /// # Errors
    ///
    /// Fails on every rank if the coordinator's list does not hold one value
    /// per rank or a value cannot be encoded.
    pub fn scatter<T>(&self, values: Option<Vec<T>>) -> Result<T, SyncError>
    where
        T: Serialize + DeserializeOwned,
    {
        if !self.is_coordinator() {
            let bytes = self.comm.scatter(COORDINATOR, Vec::new())?;
            return open(COORDINATOR, &bytes);
        }
        let values = values.unwrap_or_default();
        let parts: Result<Vec<Vec<u8>>, String> = if values.len() == self.size() {
            values.iter().map(|value| encode(&Envelope::Payload(value))).collect()
        } else {
            Err(format!("{} values for {} ranks", values.len(), self.size()))
        };
        match parts {
            Ok(parts) => {
                let bytes = self.comm.scatter(COORDINATOR, parts)?;
                open(COORDINATOR, &bytes)
            }
            Err(reason) => {
                let abort = abort_bytes(&reason);
                self.comm.scatter(COORDINATOR, vec![abort; self.size()])?;
                Err(SyncError::Encode { reason })
            }
        }
    }

    /// Splits off the ranks passing the same `color` into a new context.
    ///
    /// Every rank must call this; ranks passing `None` get no context.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    pub fn sub_context(
        &self,
        color: Option<usize>,
    ) -> Result<Option<DistributedContext>, SyncError> {
        Ok(self.comm.split(color)?.map(|comm| Self { comm }))
    }
}
