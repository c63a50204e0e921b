use lockstep_core::*;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Msg {
    Kick,
    Hop { remaining: u32 },
    Note(u64),
}

/// Shared log of `(round, delivery time, receiving device, message)`.
pub type Journal = Arc<Mutex<Vec<(u64, Timestamp, DeviceId, Msg)>>>;

/// Writes down everything it receives.
pub struct Recorder {
    pub journal: Journal,
}

impl Handler<Msg> for Recorder {
    fn handle(&mut self, at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
        self.journal
            .lock()
            .unwrap()
            .push((sched.round(), at, sched.source(), event));
        Ok(())
    }
}

/// On a kick, sends `message` to `target` after `delay` ticks.
pub struct Sender {
    pub target: DeviceId,
    pub delay: i64,
    pub message: Msg,
}

impl Handler<Msg> for Sender {
    fn handle(&mut self, _at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
        if event == Msg::Kick {
            sched.schedule_delay(TimeDelta::from_ticks(self.delay), self.target, self.message.clone())?;
        }
        Ok(())
    }
}

/// PHOLD: every hop is forwarded to a random device after the lookahead
/// plus a random extra delay. The generator is seeded from the device id,
/// so a device's behaviour depends only on what it receives.
pub struct Phold {
    pub rng: StdRng,
    pub devices: u32,
    pub lookahead: u64,
    pub mean_extra: u64,
}

impl Phold {
    pub fn new(device: DeviceId, devices: u32, lookahead: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(0x5eed ^ u64::from(device.0)),
            devices,
            lookahead,
            mean_extra: 25,
        }
    }
}

impl Handler<Msg> for Phold {
    fn handle(&mut self, _at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
        if let Msg::Hop { remaining } = event {
            if remaining == 0 {
                return Ok(());
            }
            let dst = DeviceId(self.rng.gen_range(0..self.devices));
            let extra = self.rng.gen_range(0..=2 * self.mean_extra);
            let delay = (self.lookahead + extra) as i64;
            sched.schedule_delay(TimeDelta::from_ticks(delay), dst, Msg::Hop { remaining: remaining - 1 })?;
        }
        Ok(())
    }
}

/// Journals every delivery, then hands the event on to `inner`.
pub struct Journaled<H> {
    pub inner: H,
    pub journal: Journal,
}

impl<H: Handler<Msg>> Handler<Msg> for Journaled<H> {
    fn handle(&mut self, at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
        self.journal
            .lock()
            .unwrap()
            .push((sched.round(), at, sched.source(), event.clone()));
        self.inner.handle(at, event, sched)
    }
}

/// A layout of devices over `ranks` processes of `threads` units each.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub devices: u32,
    pub ranks: u32,
    pub threads: usize,
    pub lookahead: u64,
    pub stop: Option<u64>,
}

impl Scenario {
    pub fn new(devices: u32, ranks: u32, threads: usize, lookahead: u64) -> Self {
        Self {
            devices,
            ranks,
            threads,
            lookahead,
            stop: None,
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::round_robin((0..self.devices).map(DeviceId), self.ranks, self.threads as u32)
    }

    pub fn config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default()
            .with_lookahead(self.lookahead)
            .with_threads(self.threads)
            .with_trace(true);
        cfg.stop_time_ticks = self.stop;
        cfg
    }
}

pub struct Outcome {
    pub reports: Vec<RunReport>,
    pub deliveries: Vec<Delivery>,
}

impl Outcome {
    /// Each device's deliveries, in the order that device saw them.
    pub fn per_device(&self) -> BTreeMap<DeviceId, Vec<Delivery>> {
        let mut out: BTreeMap<DeviceId, Vec<Delivery>> = BTreeMap::new();
        for d in &self.deliveries {
            out.entry(d.dst).or_default().push(*d);
        }
        out
    }

    pub fn total_delivered(&self) -> u64 {
        self.reports.iter().map(|r| r.total_delivered()).sum()
    }
}

pub struct TestHarness;

impl TestHarness {
    /// Runs one engine per rank, each on its own thread over an in-memory
    /// mesh. `make` builds the handler for every device local to a rank and
    /// `seeds` are injected on whichever rank owns their destination.
    pub fn run<F>(scenario: &Scenario, make: F, seeds: &[(Timestamp, DeviceId, Msg)]) -> SimResult<Outcome>
    where
        F: Fn(DeviceId) -> Box<dyn Handler<Msg>> + Sync,
    {
        let partition = scenario.partition();
        let results: Vec<SimResult<(RunReport, Vec<Delivery>)>> = thread::scope(|s| {
            let handles: Vec<_> = ChannelTransport::mesh(scenario.ranks)
                .into_iter()
                .map(|transport| {
                    let partition = partition.clone();
                    let make = &make;
                    s.spawn(move || -> SimResult<(RunReport, Vec<Delivery>)> {
                        let rank = transport.rank();
                        let mut engine =
                            Engine::new(scenario.config(), partition.clone(), Box::new(transport))?;
                        for (device, _) in partition.devices_on(rank) {
                            engine.register(device, make(device))?;
                        }
                        for (time, dst, msg) in seeds {
                            if partition.locate(*dst).map(|l| l.rank) == Some(rank) {
                                engine.inject(*time, *dst, msg.clone())?;
                            }
                        }
                        let report = engine.run()?;
                        let deliveries = engine.traces().concat();
                        Ok((report, deliveries))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut outcome = Outcome {
            reports: Vec::new(),
            deliveries: Vec::new(),
        };
        let mut failure = None;
        for r in results {
            match r {
                Ok((report, deliveries)) => {
                    outcome.reports.push(report);
                    outcome.deliveries.extend(deliveries);
                }
                Err(e @ SimError::PeerAborted { .. }) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    if matches!(failure, None | Some(SimError::PeerAborted { .. })) {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Every device a `Recorder` writing to one journal.
    pub fn recorders(scenario: &Scenario, journal: &Journal, seeds: &[(Timestamp, DeviceId, Msg)]) -> SimResult<Outcome> {
        let journal = journal.clone();
        Self::run(
            scenario,
            move |_| Box::new(Recorder { journal: journal.clone() }) as Box<dyn Handler<Msg>>,
            seeds,
        )
    }
}

pub fn t(ticks: u64) -> Timestamp {
    Timestamp::from_ticks(ticks)
}
