//! The scheduling front end handed to a handler while it runs.
//!
//! Every call resolves to exactly one entry, routed by the device map:
//! straight into the unit's own queue, into the inbox of another unit of the
//! same process, or into the outbox bound for another process. Calls that
//! cross a unit boundary must respect the lookahead.

use log::trace;

use crate::error::{SimError, SimResult};
use crate::event::EventQueueEntry;
use crate::manager::UnitCore;
use crate::time::{TimeDelta, Timestamp};
use crate::traits::{DeviceId, Payload};

pub struct EventScheduler<'a, E: Payload> {
    core: &'a mut UnitCore<E>,
    source: DeviceId,
    seq: &'a mut u64,
}

impl<'a, E: Payload> EventScheduler<'a, E> {
    pub(crate) fn new(core: &'a mut UnitCore<E>, source: DeviceId, seq: &'a mut u64) -> Self {
        Self { core, source, seq }
    }

    pub fn now(&self) -> Timestamp {
        self.core.now
    }

    /// The device on whose behalf events are being scheduled.
    pub fn source(&self) -> DeviceId {
        self.source
    }

    pub fn round(&self) -> u64 {
        self.core.round
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

    pub fn schedule(&mut self, time: Timestamp, dst: DeviceId, event: E) -> SimResult<()> {
        if time < self.core.now {
            return Err(SimError::CausalityViolation {
                device: self.source,
                requested: time,
                now: self.core.now,
                round: self.core.round,
            });
        }
        let seq = *self.seq;
        *self.seq += 1;
        self.core.route(EventQueueEntry::new(time, dst, self.source, seq, event))
    }

    pub fn schedule_now(&mut self, dst: DeviceId, event: E) -> SimResult<()> {
        self.schedule(self.core.now, dst, event)
    }

    pub fn schedule_delay(&mut self, delay: TimeDelta, dst: DeviceId, event: E) -> SimResult<()> {
        let at = self.core.now.add_delay(delay)?;
        self.schedule(at, dst, event)
    }

    /// Delivery across a link that is entered right now with no latency.
    pub fn send_to_link(&mut self, dst: DeviceId, event: E) -> SimResult<()> {
        self.schedule(self.core.now, dst, event)
    }

    /// Delivery across a link entered at `enter` with the given latency.
    pub fn send_to_link_at(&mut self, enter: Timestamp, latency: TimeDelta, dst: DeviceId, event: E) -> SimResult<()> {
        let at = enter.add_delay(latency)?;
        self.schedule(at, dst, event)
    }

    /// Delivery across a link entered `extra_delay` from now.
    pub fn send_delayed_to_link(
        &mut self,
        extra_delay: TimeDelta,
        latency: TimeDelta,
        dst: DeviceId,
        event: E,
    ) -> SimResult<()> {
        let enter = self.core.now.add_delay(extra_delay)?;
        self.send_to_link_at(enter, latency, dst, event)
    }

    /// Forwards an entry whose sequence number was already assigned by the
    /// originating process. `dst` must live on another process.
    pub fn ipc_schedule(&mut self, time: Timestamp, dst: DeviceId, src: DeviceId, seq: u64, event: E) -> SimResult<()> {
        let loc = self.core.locate(dst)?;
        if loc.rank == self.core.rank {
            return Err(SimError::Transport(format!(
                "ipc_schedule to {} which lives on this rank ({})",
                dst, self.core.rank
            )));
        }
        self.core.check_lookahead(src, dst, time)?;
        trace!("ipc {} -> {} at {} seq {}", src, dst, time, seq);
        self.core.remote.push((loc.rank, EventQueueEntry::new(time, dst, src, seq, event)));
        Ok(())
    }

    /// Destroys a device owned by this unit. Its handler is dropped once the
    /// current delivery returns and its pending entries are removed now.
    pub fn cancel_device(&mut self, device: DeviceId) -> SimResult<usize> {
        let loc = self.core.locate(device)?;
        if loc.rank != self.core.rank || loc.thread != self.core.thread {
            return Err(SimError::NotLocal {
                device,
                rank: self.core.rank,
            });
        }
        let removed = self.core.queue.remove_all_for(device);
        self.core.cancelled.push(device);
        Ok(removed)
    }
}
