use std::{
    collections::HashMap,
    panic,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use super::Communicator;
use crate::SyncError;

/// Runs a group of ranks as threads of the current process.
///
/// Each rank owns its data and exchanges messages only through its
/// [`LocalComm`], so code written against [`Communicator`] behaves as it
/// would across processes.
#[derive(Debug, Clone, Copy)]
pub struct LocalCluster;

impl LocalCluster {
    /// Runs `f` once per rank, each on its own thread, and returns the
    /// results in rank order.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of any rank that panics.
    pub fn spawn<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let (peers, inboxes): (Vec<Sender<Packet>>, Vec<Receiver<Packet>>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        thread::scope(|scope| {
            let handles: Vec<_> = inboxes
                .into_iter()
                .enumerate()
                .map(|(rank, inbox)| {
                    let comm = LocalComm::world(rank, peers.clone(), inbox);
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        })
    }
}

#[derive(Debug)]
struct Packet {
    group: Arc<str>,
    seq: u64,
    from: usize,
    data: Vec<u8>,
}

type PacketKey = (Arc<str>, u64, usize);

/// The mailbox of one rank, shared by every group it belongs to.
#[derive(Debug)]
struct Endpoint {
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    early: Mutex<HashMap<PacketKey, Vec<u8>>>,
}

/// A rank's handle on a group run by [`LocalCluster`].
///
/// Members are identified by their rank in the whole cluster; messages are
/// tagged with the group and a per-group sequence number so that packets
/// from collectives that overlap in time are never confused.
#[derive(Debug)]
pub struct LocalComm {
    endpoint: Arc<Endpoint>,
    group: Arc<str>,
    members: Vec<usize>,
    rank: usize,
    seq: AtomicU64,
    splits: AtomicU64,
}

impl LocalComm {
    fn world(rank: usize, peers: Vec<Sender<Packet>>, inbox: Receiver<Packet>) -> Self {
        let members = (0..peers.len()).collect();
        let endpoint = Endpoint {
            peers,
            inbox,
            early: Mutex::new(HashMap::new()),
        };
        Self::member(Arc::new(endpoint), Arc::from("world"), members, rank)
    }

    fn member(endpoint: Arc<Endpoint>, group: Arc<str>, members: Vec<usize>, rank: usize) -> Self {
        Self {
            endpoint,
            group,
            members,
            rank,
            seq: AtomicU64::new(0),
            splits: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, to: usize, seq: u64, data: Vec<u8>) -> Result<(), SyncError> {
        let packet = Packet {
            group: Arc::clone(&self.group),
            seq,
            from: self.members[self.rank],
            data,
        };
        self.endpoint.peers[self.members[to]]
            .send(packet)
            .map_err(|_| SyncError::Disconnected { rank: to })
    }

    /// Waits for the packet of collective `seq` from group rank `from`,
    /// setting aside packets that arrive ahead of their collective.
    fn recv(&self, from: usize, seq: u64) -> Result<Vec<u8>, SyncError> {
        let key: PacketKey = (Arc::clone(&self.group), seq, self.members[from]);
        if let Some(data) = self.endpoint.early.lock().remove(&key) {
            return Ok(data);
        }
        loop {
            let packet = self
                .endpoint
                .inbox
                .recv()
                .map_err(|_| SyncError::Disconnected { rank: from })?;
            if packet.group == key.0 && packet.seq == seq && packet.from == key.2 {
                return Ok(packet.data);
            }
            trace!(
                group = %packet.group,
                seq = packet.seq,
                from = packet.from,
                "holding early packet"
            );
            self.endpoint
                .early
                .lock()
                .insert((packet.group, packet.seq, packet.from), packet.data);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn barrier(&self) -> Result<(), SyncError> {
        self.all_gather(Vec::new()).map(drop)
    }

    fn broadcast(&self, root: usize, data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        let seq = self.next_seq();
        if self.rank != root {
            return self.recv(root, seq);
        }
        for to in (0..self.size()).filter(|&to| to != root) {
            self.send(to, seq, data.clone())?;
        }
        Ok(data)
    }

    fn all_gather(&self, data: Vec<u8>) -> Result<Vec<Vec<u8>>, SyncError> {
        let seq = self.next_seq();
        for to in (0..self.size()).filter(|&to| to != self.rank) {
            self.send(to, seq, data.clone())?;
        }
        let mut data = Some(data);
        (0..self.size())
            .map(|from| {
                if from == self.rank {
                    Ok(data.take().unwrap_or_default())
                } else {
                    self.recv(from, seq)
                }
            })
            .collect()
    }

    fn gather(&self, root: usize, data: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, SyncError> {
        let seq = self.next_seq();
        if self.rank != root {
            self.send(root, seq, data)?;
            return Ok(None);
        }
        let mut data = Some(data);
        (0..self.size())
            .map(|from| {
                if from == root {
                    Ok(data.take().unwrap_or_default())
                } else {
                    self.recv(from, seq)
                }
            })
            .collect::<Result<_, _>>()
            .map(Some)
    }

    fn scatter(&self, root: usize, data: Vec<Vec<u8>>) -> Result<Vec<u8>, SyncError> {
        let seq = self.next_seq();
        if self.rank != root {
            return self.recv(root, seq);
        }
        if data.len() != self.size() {
            return Err(SyncError::ScatterLength {
                expected: self.size(),
                found: data.len(),
            });
        }
        let mut own = Vec::new();
        for (to, part) in data.into_iter().enumerate() {
            if to == root {
                own = part;
            } else {
                self.send(to, seq, part)?;
            }
        }
        Ok(own)
    }

    fn split(&self, color: Option<usize>) -> Result<Option<Box<dyn Communicator>>, SyncError> {
        let split = self.splits.fetch_add(1, Ordering::Relaxed);
        let own = serde_json::to_vec(&color).map_err(|err| SyncError::Encode {
            reason: err.to_string(),
        })?;
        let colors = self
            .all_gather(own)?
            .iter()
            .map(|bytes| serde_json::from_slice::<Option<usize>>(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(color) = color else {
            return Ok(None);
        };

        let mut members = Vec::new();
        let mut rank = 0;
        for (index, other) in colors.iter().enumerate() {
            if *other == Some(color) {
                if index == self.rank {
                    rank = members.len();
                }
                members.push(self.members[index]);
            }
        }
        let group: Arc<str> = Arc::from(format!("{}/{split}:{color}", self.group));
        Ok(Some(Box::new(Self::member(
            Arc::clone(&self.endpoint),
            group,
            members,
            rank,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let received = LocalCluster::spawn(4, |comm| {
            let data = if comm.rank() == 2 { b"hello".to_vec() } else { Vec::new() };
            text(&comm.broadcast(2, data).unwrap())
        });
        assert_eq!(received, vec!["hello"; 4]);
    }

    #[test]
    fn gathers_keep_rank_order() {
        let results = LocalCluster::spawn(3, |comm| {
            let own = comm.rank().to_string().into_bytes();
            let all: Vec<String> =
                comm.all_gather(own.clone()).unwrap().iter().map(|b| text(b)).collect();
            let rooted = comm.gather(1, own).unwrap();
            (all, rooted.map(|parts| parts.iter().map(|b| text(b)).collect::<Vec<_>>()))
        });
        for (rank, (all, rooted)) in results.into_iter().enumerate() {
            assert_eq!(all, vec!["0", "1", "2"]);
            if rank == 1 {
                assert_eq!(rooted.unwrap(), vec!["0", "1", "2"]);
            } else {
                assert!(rooted.is_none());
            }
        }
    }

    #[test]
    fn scatter_hands_out_one_part_each() {
        let parts = LocalCluster::spawn(3, |comm| {
            let data = if comm.rank() == 0 {
                vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
            } else {
                Vec::new()
            };
            text(&comm.scatter(0, data).unwrap())
        });
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[test]
    fn split_groups_ranks_by_color() {
        let results = LocalCluster::spawn(5, |comm| {
            let color = match comm.rank() {
                4 => None,
                rank => Some(rank % 2),
            };
            let Some(sub) = comm.split(color).unwrap() else {
                comm.barrier().unwrap();
                return None;
            };
            let members = sub.all_gather(comm.rank().to_string().into_bytes()).unwrap();
            let members: Vec<String> = members.iter().map(|b| text(b)).collect();
            comm.barrier().unwrap();
            Some((sub.rank(), sub.size(), members))
        });
        assert_eq!(results[0], Some((0, 2, vec!["0".to_owned(), "2".to_owned()])));
        assert_eq!(results[3], Some((1, 2, vec!["1".to_owned(), "3".to_owned()])));
        assert_eq!(results[2].as_ref().map(|r| r.0), Some(1));
        assert!(results[4].is_none());
    }

    #[test]
    fn interleaved_collectives_do_not_mix() {
        let results = LocalCluster::spawn(3, |comm| {
            let mut seen = Vec::new();
            for round in 0..10_u8 {
                let data = comm
                    .all_gather(vec![round, u8::try_from(comm.rank()).unwrap()])
                    .unwrap();
                seen.push(data);
            }
            seen
        });
        for seen in results {
            for (round, data) in seen.into_iter().enumerate() {
                let round = u8::try_from(round).unwrap();
                assert_eq!(data, vec![vec![round, 0], vec![round, 1], vec![round, 2]]);
            }
        }
    }
}
