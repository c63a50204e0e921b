//! The parallel runtime beneath the engine: point-to-point delivery of
//! serialized entries between processes plus a global reduction.
//!
//! The engine only relies on the [`Transport`] contract. Two runtimes ship
//! with the crate: [`SingleProcess`] for one-rank runs and
//! [`ChannelTransport`], an in-memory mesh where each rank is driven by its
//! own OS thread. The transport is assumed reliable and ordered per sender;
//! any failure it reports is fatal to the run.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SimError, SimResult};
use crate::event::EventQueueEntry;
use crate::traits::Payload;

/// Reduction operators for votes. Each is associative and commutative so the
/// runtime may combine ballots in any order or topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteOp {
    Min,
    Max,
    /// Logical and; any non-zero value counts as true.
    And,
}

impl VoteOp {
    pub fn identity(self) -> u64 {
        match self {
            VoteOp::Min => u64::MAX,
            VoteOp::Max => 0,
            VoteOp::And => 1,
        }
    }

    pub fn combine(self, a: u64, b: u64) -> u64 {
        match self {
            VoteOp::Min => a.min(b),
            VoteOp::Max => a.max(b),
            VoteOp::And => u64::from(a != 0 && b != 0),
        }
    }

    pub fn fold(self, values: impl IntoIterator<Item = u64>) -> u64 {
        values.into_iter().fold(self.identity(), |acc, v| self.combine(acc, v))
    }
}

pub trait Transport: Send {
    fn rank(&self) -> u32;

    fn nproc(&self) -> u32;

    fn send(&mut self, dst: u32, bytes: Vec<u8>) -> SimResult<()>;

    /// Non-blocking drain of everything delivered so far.
    fn receive_all(&mut self) -> SimResult<Vec<Vec<u8>>>;

    /// Global reduction over all ranks. Blocks until every rank has voted.
    /// `round` is checked against the peers' round index.
    fn reduce(&mut self, round: u64, value: u64, op: VoteOp) -> SimResult<u64>;
}

/// Serializes an entry for the inter-process path.
pub fn encode_entry<E: Payload>(entry: &EventQueueEntry<E>) -> SimResult<Vec<u8>> {
    Ok(bincode::serialize(entry)?)
}

pub fn decode_entry<E: Payload>(bytes: &[u8]) -> SimResult<EventQueueEntry<E>> {
    Ok(bincode::deserialize(bytes)?)
}

/// Runtime for a run confined to one process. Units of one process reach
/// each other through their inboxes, so there is never anyone to send to.
#[derive(Debug, Default)]
pub struct SingleProcess;

impl SingleProcess {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn nproc(&self) -> u32 {
        1
    }

    fn send(&mut self, dst: u32, _bytes: Vec<u8>) -> SimResult<()> {
        Err(SimError::Transport(format!("no peer rank {} in a single-process run", dst)))
    }

    fn receive_all(&mut self) -> SimResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    fn reduce(&mut self, _round: u64, value: u64, _op: VoteOp) -> SimResult<u64> {
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Ballot {
    /// Index of the collective call on the sending rank.
    epoch: u64,
    round: u64,
    op: VoteOp,
    value: u64,
    rank: u32,
}

/// One rank of an in-memory mesh. Build the whole mesh with
/// [`ChannelTransport::mesh`] and hand each endpoint to its own thread.
pub struct ChannelTransport {
    rank: u32,
    data_tx: Vec<Sender<Vec<u8>>>,
    data_rx: Receiver<Vec<u8>>,
    vote_tx: Vec<Sender<Ballot>>,
    vote_rx: Receiver<Ballot>,
    epoch: u64,
    early: Vec<Ballot>,
    timeout: Option<Duration>,
}

impl ChannelTransport {
    pub fn mesh(nproc: u32) -> Vec<ChannelTransport> {
        let n = nproc.max(1) as usize;
        let (data_tx, data_rx): (Vec<_>, Vec<_>) = (0..n).map(|_| unbounded()).unzip();
        let (vote_tx, vote_rx): (Vec<_>, Vec<_>) = (0..n).map(|_| unbounded()).unzip();
        data_rx
            .into_iter()
            .zip(vote_rx)
            .enumerate()
            .map(|(rank, (data_rx, vote_rx))| ChannelTransport {
                rank: rank as u32,
                data_tx: data_tx.clone(),
                data_rx,
                vote_tx: vote_tx.clone(),
                vote_rx,
                epoch: 0,
                early: Vec::new(),
                timeout: None,
            })
            .collect()
    }

    /// Bounds how long a reduction waits for a peer before failing.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn next_ballot(&mut self, epoch: u64) -> SimResult<Ballot> {
        if let Some(pos) = self.early.iter().position(|b| b.epoch == epoch) {
            return Ok(self.early.swap_remove(pos));
        }
        loop {
            let ballot = match self.timeout {
                Some(t) => self.vote_rx.recv_timeout(t).map_err(|e| match e {
                    RecvTimeoutError::Timeout => {
                        SimError::Transport(format!("rank {} timed out waiting for votes", self.rank))
                    }
                    RecvTimeoutError::Disconnected => {
                        SimError::Transport(format!("rank {} lost its vote channel", self.rank))
                    }
                })?,
                None => self
                    .vote_rx
                    .recv()
                    .map_err(|_| SimError::Transport(format!("rank {} lost its vote channel", self.rank)))?,
            };
            if ballot.epoch == epoch {
                return Ok(ballot);
            }
            if ballot.epoch < epoch {
                return Err(SimError::Transport(format!(
                    "rank {} got a stale ballot from rank {} (epoch {} < {})",
                    self.rank, ballot.rank, ballot.epoch, epoch
                )));
            }
            self.early.push(ballot);
        }
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn nproc(&self) -> u32 {
        self.data_tx.len() as u32
    }

    fn send(&mut self, dst: u32, bytes: Vec<u8>) -> SimResult<()> {
        let tx = self
            .data_tx
            .get(dst as usize)
            .ok_or_else(|| SimError::Transport(format!("no rank {}", dst)))?;
        tx.send(bytes)
            .map_err(|_| SimError::Transport(format!("rank {} is gone", dst)))
    }

    fn receive_all(&mut self) -> SimResult<Vec<Vec<u8>>> {
        Ok(self.data_rx.try_iter().collect())
    }

    fn reduce(&mut self, round: u64, value: u64, op: VoteOp) -> SimResult<u64> {
        let epoch = self.epoch;
        self.epoch += 1;
        let ballot = Ballot {
            epoch,
            round,
            op,
            value,
            rank: self.rank,
        };
        for (peer, tx) in self.vote_tx.iter().enumerate() {
            if peer as u32 == self.rank {
                continue;
            }
            tx.send(ballot)
                .map_err(|_| SimError::Transport(format!("rank {} is gone", peer)))?;
        }

        let mut acc = value;
        for _ in 1..self.vote_tx.len() {
            let b = self.next_ballot(epoch)?;
            if b.round != round || b.op != op {
                return Err(SimError::UnmatchedVote {
                    expected: round,
                    found: b.round,
                    rank: b.rank,
                });
            }
            acc = op.combine(acc, b.value);
        }
        Ok(acc)
    }
}
