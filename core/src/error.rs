//! Error kinds of the scheduling kernel.
//!
//! Every variant is fatal: they describe programming faults in a simulated
//! entity, broken protocol bookkeeping, or infrastructure failures below the
//! kernel. None of them is retried.

use thiserror::Error;

use crate::time::{TimeDelta, Timestamp};
use crate::traits::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("causality violation: {device} scheduled an event at {requested} while its unit is at {now} (round {round})")]
    CausalityViolation {
        device: DeviceId,
        requested: Timestamp,
        now: Timestamp,
        round: u64,
    },

    #[error("lookahead violation: {src} -> {dst} at {requested}, earliest legal time is {earliest} (round {round})")]
    LookaheadViolation {
        src: DeviceId,
        dst: DeviceId,
        requested: Timestamp,
        earliest: Timestamp,
        round: u64,
    },

    #[error("invalid delay {delay}")]
    InvalidDelay { delay: TimeDelta },

    #[error("unmatched vote on rank {rank}: expected round {expected}, found round {found}")]
    UnmatchedVote { expected: u64, found: u64, rank: u32 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("{device} is not registered on this unit")]
    UnknownDevice { device: DeviceId },

    #[error("{device} is already registered")]
    DeviceAlreadyRegistered { device: DeviceId },

    #[error("{device} does not live on rank {rank}")]
    NotLocal { device: DeviceId, rank: u32 },

    #[error("handler of {device} panicked in round {round}: {message}")]
    HandlerPanicked {
        device: DeviceId,
        round: u64,
        message: String,
    },

    #[error("a peer unit aborted the run in round {round}")]
    PeerAborted { round: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for SimError {
    fn from(err: bincode::Error) -> Self {
        SimError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Config(err.to_string())
    }
}

pub type SimResult<T> = Result<T, SimError>;
