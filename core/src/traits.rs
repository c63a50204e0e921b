use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SimResult;
use crate::scheduler::EventScheduler;
use crate::time::Timestamp;

/// Identity of a simulated entity: the source or destination of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Source of events injected before the run starts.
    pub const ENVIRONMENT: DeviceId = DeviceId(u32::MAX);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == DeviceId::ENVIRONMENT {
            write!(f, "D<env>")
        } else {
            write!(f, "D{}", self.0)
        }
    }
}

/// Anything that can ride in an event. Payloads may cross a process
/// boundary, so they must round-trip through serde.
pub trait Payload: Send + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Send + Serialize + DeserializeOwned + 'static {}

/// A simulated entity. Invoked on its owning unit's thread; it may schedule
/// further events through `sched` but must never block on another entity.
pub trait Handler<E: Payload>: Send {
    fn handle(&mut self, at: Timestamp, event: E, sched: &mut EventScheduler<'_, E>) -> SimResult<()>;

    fn name(&self) -> &str {
        "handler"
    }
}

impl<E: Payload, H: Handler<E> + ?Sized> Handler<E> for Box<H> {
    fn handle(&mut self, at: Timestamp, event: E, sched: &mut EventScheduler<'_, E>) -> SimResult<()> {
        (**self).handle(at, event, sched)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
