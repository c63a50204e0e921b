use crossbeam_channel::{Receiver, Sender};
use log::{trace, warn};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::event::{Delivery, EventQueueEntry};
use crate::partition::{DeviceMap, Location};
use crate::queue::EventQueue;
use crate::scheduler::EventScheduler;
use crate::time::Timestamp;
use crate::traits::{DeviceId, Handler, Payload};

/// Where a unit is in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ComputingHorizon,
    Executing,
    Exchanging,
    Voting,
    Terminated,
}

/// The part of a unit a running handler may touch through its scheduler.
pub(crate) struct UnitCore<E> {
    pub(crate) queue: EventQueue<E>,
    pub(crate) now: Timestamp,
    pub(crate) round: u64,
    pub(crate) rank: u32,
    pub(crate) thread: u32,
    pub(crate) nthread: u32,
    pub(crate) lookahead: u64,
    pub(crate) devices: Arc<dyn DeviceMap>,
    /// Inboxes of every unit of this process, indexed by thread.
    pub(crate) peers: Vec<Sender<EventQueueEntry<E>>>,
    /// Entries bound for other processes, tagged with their rank.
    pub(crate) remote: Vec<(u32, EventQueueEntry<E>)>,
    /// Devices cancelled during the current delivery.
    pub(crate) cancelled: Vec<DeviceId>,
}

impl<E> UnitCore<E> {
    pub(crate) fn locate(&self, device: DeviceId) -> SimResult<Location> {
        self.devices
            .locate(device)
            .ok_or(SimError::UnknownDevice { device })
    }

    pub(crate) fn check_lookahead(&self, src: DeviceId, dst: DeviceId, time: Timestamp) -> SimResult<()> {
        let earliest = self.now.saturating_add_ticks(self.lookahead);
        if time < earliest {
            return Err(SimError::LookaheadViolation {
                src,
                dst,
                requested: time,
                earliest,
                round: self.round,
            });
        }
        Ok(())
    }

    pub(crate) fn route(&mut self, entry: EventQueueEntry<E>) -> SimResult<()> {
        let loc = self.locate(entry.dst)?;
        if loc.rank == self.rank && loc.thread == self.thread {
            self.queue.insert(entry);
            return Ok(());
        }
        self.check_lookahead(entry.src, entry.dst, entry.time)?;
        if loc.rank == self.rank {
            let inbox = self
                .peers
                .get(loc.thread as usize)
                .ok_or_else(|| SimError::Transport(format!("no unit {} on rank {}", loc.thread, self.rank)))?;
            inbox
                .send(entry)
                .map_err(|_| SimError::Transport(format!("inbox of unit {} is closed", loc.thread)))
        } else {
            self.remote.push((loc.rank, entry));
            Ok(())
        }
    }
}

/// One execution unit: its queue, clock, handlers and sequence counters.
pub struct EventManager<E: Payload> {
    core: UnitCore<E>,
    handlers: BTreeMap<DeviceId, Box<dyn Handler<E>>>,
    seqnums: BTreeMap<DeviceId, u64>,
    destroyed: BTreeSet<DeviceId>,
    inbox: Receiver<EventQueueEntry<E>>,
    phase: Phase,
    delivered: u64,
    trace: Option<Vec<Delivery>>,
}

impl<E: Payload> EventManager<E> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        rank: u32,
        thread: u32,
        nthread: u32,
        lookahead: u64,
        devices: Arc<dyn DeviceMap>,
        peers: Vec<Sender<EventQueueEntry<E>>>,
        inbox: Receiver<EventQueueEntry<E>>,
        trace: bool,
    ) -> Self {
        Self {
            core: UnitCore {
                queue: EventQueue::new(),
                now: Timestamp::ZERO,
                round: 0,
                rank,
                thread,
                nthread,
                lookahead,
                devices,
                peers,
                remote: Vec::new(),
                cancelled: Vec::new(),
            },
            handlers: BTreeMap::new(),
            seqnums: BTreeMap::new(),
            destroyed: BTreeSet::new(),
            inbox,
            phase: Phase::ComputingHorizon,
            delivered: 0,
            trace: trace.then(Vec::new),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.core.now
    }

    pub fn rank(&self) -> u32 {
        self.core.rank
    }

    pub fn thread_id(&self) -> u32 {
        self.core.thread
    }

    pub fn nthread(&self) -> u32 {
        self.core.nthread
    }

    pub fn round(&self) -> u64 {
        self.core.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.core.queue.len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Deliveries in the order they happened, when tracing is on.
    pub fn trace(&self) -> Option<&[Delivery]> {
        self.trace.as_deref()
    }

    pub fn has_device(&self, device: DeviceId) -> bool {
        self.handlers.contains_key(&device)
    }

    pub(crate) fn register(&mut self, device: DeviceId, handler: Box<dyn Handler<E>>) -> SimResult<()> {
        if self.handlers.contains_key(&device) || self.destroyed.contains(&device) {
            return Err(SimError::DeviceAlreadyRegistered { device });
        }
        self.handlers.insert(device, handler);
        self.seqnums.entry(device).or_insert(0);
        Ok(())
    }

    pub(crate) fn insert(&mut self, entry: EventQueueEntry<E>) {
        self.core.queue.insert(entry);
    }

    /// Destroys a device: drops its handler and every entry addressed to it.
    pub fn destroy(&mut self, device: DeviceId) -> SimResult<usize> {
        if self.handlers.remove(&device).is_none() {
            return Err(SimError::UnknownDevice { device });
        }
        self.destroyed.insert(device);
        Ok(self.core.queue.remove_all_for(device))
    }

    /// Delivers, in key order, every entry due at or before `limit`.
    pub fn run_until(&mut self, limit: Timestamp) -> SimResult<u64> {
        let mut count = 0;
        while let Some(entry) = self.core.queue.extract_due(limit) {
            self.deliver(entry)?;
            count += 1;
        }
        Ok(count)
    }

    fn deliver(&mut self, entry: EventQueueEntry<E>) -> SimResult<()> {
        if entry.time < self.core.now {
            return Err(SimError::CausalityViolation {
                device: entry.dst,
                requested: entry.time,
                now: self.core.now,
                round: self.core.round,
            });
        }
        self.core.now = entry.time;

        let dst = entry.dst;
        let Some(mut handler) = self.handlers.remove(&dst) else {
            if self.destroyed.contains(&dst) {
                warn!("dropping event for destroyed {} at {}", dst, entry.time);
                return Ok(());
            }
            return Err(SimError::UnknownDevice { device: dst });
        };

        trace!(
            "deliver {} ({}) <- {} at {} seq {}",
            dst,
            handler.name(),
            entry.src,
            entry.time,
            entry.seq
        );
        if let Some(t) = self.trace.as_mut() {
            t.push(entry.delivery());
        }
        self.delivered += 1;

        let seq = self.seqnums.entry(dst).or_insert(0);
        let outcome = {
            let mut sched = EventScheduler::new(&mut self.core, dst, seq);
            panic::catch_unwind(AssertUnwindSafe(|| handler.handle(entry.time, entry.event, &mut sched)))
        };
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                // The handler may be half-updated; it is dropped here.
                return Err(SimError::HandlerPanicked {
                    device: dst,
                    round: self.core.round,
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        self.handlers.insert(dst, handler);
        for device in std::mem::take(&mut self.core.cancelled) {
            self.handlers.remove(&device);
            self.destroyed.insert(device);
        }
        result
    }

    /// This unit's offer for the next horizon: its earliest pending entry.
    /// An idle unit cannot send anything, so it offers no bound at all;
    /// whatever reaches it later is already bounded by its sender's offer.
    pub(crate) fn horizon_candidate(&self) -> Timestamp {
        self.core.queue.next_time().unwrap_or(Timestamp::MAX)
    }

    pub(crate) fn take_remote(&mut self) -> Vec<(u32, EventQueueEntry<E>)> {
        std::mem::take(&mut self.core.remote)
    }

    pub(crate) fn peers(&self) -> &[Sender<EventQueueEntry<E>>] {
        &self.core.peers
    }

    pub(crate) fn devices(&self) -> &dyn DeviceMap {
        self.core.devices.as_ref()
    }

    /// Moves everything other units sent this round into the queue.
    pub(crate) fn merge_inbox(&mut self) -> SimResult<usize> {
        let mut merged = 0;
        while let Ok(entry) = self.inbox.try_recv() {
            if self.destroyed.contains(&entry.dst) {
                warn!("dropping inbound event for destroyed {} at {}", entry.dst, entry.time);
                continue;
            }
            if entry.time < self.core.now {
                return Err(SimError::CausalityViolation {
                    device: entry.src,
                    requested: entry.time,
                    now: self.core.now,
                    round: self.core.round,
                });
            }
            trace!("merge {} <- {} at {} seq {}", entry.dst, entry.src, entry.time, entry.seq);
            self.core.queue.insert(entry);
            merged += 1;
        }
        Ok(merged)
    }

    pub(crate) fn advance_to(&mut self, time: Timestamp) {
        self.core.now = self.core.now.max(time);
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn next_round(&mut self) {
        self.core.round += 1;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.core.queue.is_empty() && self.inbox.is_empty() && self.core.remote.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
