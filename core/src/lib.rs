pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod partition;
pub mod queue;
pub mod scheduler;
pub mod time;
pub mod traits;
pub mod transport;

mod collective;

pub use config::EngineConfig;
pub use engine::{Engine, RunReport};
pub use error::{SimError, SimResult};
pub use event::{Delivery, EventQueueEntry};
pub use manager::{EventManager, Phase};
pub use partition::{DeviceMap, Location, Partition};
pub use queue::EventQueue;
pub use scheduler::EventScheduler;
pub use time::{TimeDelta, Timestamp, TICKS_PER_MS, TICKS_PER_NS, TICKS_PER_US};
pub use traits::{DeviceId, Handler, Payload};
pub use transport::{ChannelTransport, SingleProcess, Transport, VoteOp};
