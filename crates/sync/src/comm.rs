mod local;

pub use local::{LocalCluster, LocalComm};

use crate::SyncError;

/// A group of ranks exchanging byte messages through blocking collectives.
///
/// Every member must enter the same collectives in the same order. A
/// collective returns on a rank only once that rank's part is complete, and
/// there is no timeout: a rank that never arrives stalls the others.
pub trait Communicator: Send {
    /// This process's position in the group, starting at zero.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Blocks until every rank has arrived.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    fn barrier(&self) -> Result<(), SyncError>;

    /// Sends `data` from `root` to every rank; the data of other ranks is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    fn broadcast(&self, root: usize, data: Vec<u8>) -> Result<Vec<u8>, SyncError>;

    /// Collects every rank's `data`, in rank order, on every rank.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, SyncError>;

    /// Collects every rank's `data`, in rank order, on `root` only.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    fn gather(&self, root: usize, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, SyncError>;

    /// Sends the `i`th element of root's `data` to rank `i`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ScatterLength`] on the root if `data` does not
    /// hold one element per rank, and fails if a peer is unreachable.
    fn scatter(&self, root: usize, data: Vec<Vec<u8>>) -> Result<Vec<u8>, SyncError>;

    /// Partitions the group by `color`.
    ///
    /// Ranks passing the same color form a new group, ordered by their rank
    /// in this one. Ranks passing `None` take part but receive no group.
    ///
    /// # Errors
    ///
    /// Fails if a peer is unreachable.
    fn split(&self, color: Option<usize>) -> Result<Option<Box<dyn Communicator>>, SyncError>;
}

/// The single-process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn broadcast(&self, _root: usize, data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        Ok(data)
    }

    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, SyncError> {
        Ok(vec![data])
    }

    fn gather(&self, _root: usize, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, SyncError> {
        Ok(Some(vec![data]))
    }

    fn scatter(&self, _root: usize, data: Vec<Vec<u8>>) -> Result<Vec<u8>, SyncError> {
        let found = data.len();
        let mut data = data.into_iter();
        match (data.next(), data.next()) {
            (Some(first), None) => Ok(first),
            _ => Err(SyncError::ScatterLength { expected: 1, found }),
        }
    }

    fn split(&self, color: Option<usize>) -> Result<Option<Box<dyn Communicator>>, SyncError> {
        Ok(color.map(|_| Box::new(SerialComm) as Box<dyn Communicator>))
    }
}
