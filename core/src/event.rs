use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::time::Timestamp;
use crate::traits::DeviceId;

/// A scheduled event: the payload plus its scheduling envelope. Only the
/// envelope takes part in ordering; the payload is never inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueueEntry<E> {
    pub time: Timestamp,
    pub dst: DeviceId,
    pub src: DeviceId,
    pub seq: u64,
    pub event: E,
}

impl<E> EventQueueEntry<E> {
    pub fn new(time: Timestamp, dst: DeviceId, src: DeviceId, seq: u64, event: E) -> Self {
        Self { time, dst, src, seq, event }
    }

    /// `(time, seq, src)` decides. Each device numbers its own events, so
    /// `dst` only separates injected events, which are numbered per
    /// destination.
    pub fn key(&self) -> (Timestamp, u64, DeviceId, DeviceId) {
        (self.time, self.seq, self.src, self.dst)
    }

    pub fn delivery(&self) -> Delivery {
        Delivery {
            time: self.time,
            dst: self.dst,
            src: self.src,
            seq: self.seq,
        }
    }
}

impl<E> PartialEq for EventQueueEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl<E> Eq for EventQueueEntry<E> {}
impl<E> PartialOrd for EventQueueEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<E> Ord for EventQueueEntry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// One line of a unit's delivery trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Delivery {
    pub time: Timestamp,
    pub dst: DeviceId,
    pub src: DeviceId,
    pub seq: u64,
}
