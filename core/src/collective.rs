//! Votes among the execution units of one process, chained into the
//! transport's global reduction.
//!
//! Every unit deposits its ballot, the units meet at a barrier, unit 0 folds
//! the local ballots and runs the global reduction, and a second barrier
//! publishes the outcome. Each vote is therefore a full barrier for the
//! threads of the process and, through the transport, for all processes.

use std::sync::{Barrier, Mutex, MutexGuard, PoisonError};

use crate::error::{SimError, SimResult};
use crate::transport::{Transport, VoteOp};

pub(crate) struct Collective {
    barrier: Barrier,
    ballots: Mutex<Vec<Option<(u64, u64)>>>,
    outcome: Mutex<Option<SimResult<u64>>>,
    transport: Mutex<Box<dyn Transport>>,
    rank: u32,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Collective {
    pub(crate) fn new(nthread: usize, transport: Box<dyn Transport>) -> Self {
        let rank = transport.rank();
        Self {
            barrier: Barrier::new(nthread),
            ballots: Mutex::new(vec![None; nthread]),
            outcome: Mutex::new(None),
            transport: Mutex::new(transport),
            rank,
        }
    }

    /// Every unit of the process must call this with the same `round` and
    /// `op`, in the same order.
    pub(crate) fn vote(&self, thread: usize, round: u64, value: u64, op: VoteOp) -> SimResult<u64> {
        lock(&self.ballots)[thread] = Some((round, value));
        self.barrier.wait();

        if thread == 0 {
            let result = self
                .fold_local(round, op)
                .and_then(|local| lock(&self.transport).reduce(round, local, op));
            *lock(&self.outcome) = Some(result);
        }
        self.barrier.wait();

        lock(&self.outcome)
            .clone()
            .unwrap_or_else(|| Err(SimError::Transport("vote outcome was never published".into())))
    }

    pub(crate) fn barrier(&self) {
        self.barrier.wait();
    }

    pub(crate) fn with_transport<R>(&self, f: impl FnOnce(&mut dyn Transport) -> R) -> R {
        let mut guard = lock(&self.transport);
        f(guard.as_mut())
    }

    pub(crate) fn into_transport(self) -> Box<dyn Transport> {
        self.transport.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn fold_local(&self, round: u64, op: VoteOp) -> SimResult<u64> {
        let mut ballots = lock(&self.ballots);
        let mut acc = op.identity();
        for slot in ballots.iter_mut() {
            let (r, v) = slot
                .take()
                .ok_or_else(|| SimError::Transport("a unit skipped a vote".into()))?;
            if r != round {
                return Err(SimError::UnmatchedVote {
                    expected: round,
                    found: r,
                    rank: self.rank,
                });
            }
            acc = op.combine(acc, v);
        }
        Ok(acc)
    }
}
