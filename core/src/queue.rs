use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::event::EventQueueEntry;
use crate::time::Timestamp;
use crate::traits::DeviceId;

/// Pending work of one execution unit, ordered by `(time, seq, src)`.
pub struct EventQueue<E> {
    heap: BinaryHeap<Reverse<EventQueueEntry<E>>>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn insert(&mut self, entry: EventQueueEntry<E>) {
        self.heap.push(Reverse(entry));
    }

    pub fn peek_min(&self) -> Option<&EventQueueEntry<E>> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    pub fn extract_min(&mut self) -> Option<EventQueueEntry<E>> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    /// Pops the minimum only if it is due at or before `limit`.
    pub fn extract_due(&mut self, limit: Timestamp) -> Option<EventQueueEntry<E>> {
        match self.peek_min() {
            Some(e) if e.time <= limit => self.extract_min(),
            _ => None,
        }
    }

    pub fn next_time(&self) -> Option<Timestamp> {
        self.peek_min().map(|e| e.time)
    }

    /// Drops every entry addressed to `device`. Returns how many went.
    pub fn remove_all_for(&mut self, device: DeviceId) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(e)| e.dst != device);
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
