//! The clock-cycle synchronization engine.
//!
//! Each round every unit offers a candidate time, the global minimum becomes
//! the horizon, and every unit executes independently up to the safe limit
//! that the lookahead buys past the horizon. Cross-unit traffic produced in
//! the round is exchanged at the boundary, and a unanimous vote decides
//! whether anything is left to do.
//!
//! ```text
//! ComputingHorizon --min--> Executing --> Exchanging --max--> Voting --and--> Terminated
//!        ^                                                       |
//!        +-------------------------------------------------------+
//! ```

use crossbeam_channel::unbounded;
use log::{debug, error, info, trace};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crate::collective::Collective;
use crate::config::EngineConfig;
use crate::error::{SimError, SimResult};
use crate::event::{Delivery, EventQueueEntry};
use crate::manager::{EventManager, Phase};
use crate::partition::DeviceMap;
use crate::time::Timestamp;
use crate::traits::{DeviceId, Handler, Payload};
use crate::transport::{decode_entry, encode_entry, SingleProcess, Transport, VoteOp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rank: u32,
    pub rounds: u64,
    pub final_time: Timestamp,
    pub delivered: Vec<u64>,
    /// Entries left behind by a stop time.
    pub pending: usize,
    pub reached_stop_time: bool,
}

impl RunReport {
    pub fn total_delivered(&self) -> u64 {
        self.delivered.iter().sum()
    }
}

/// How a single unit's round loop ended.
struct UnitOutcome {
    rounds: u64,
    reached_stop_time: bool,
}

pub struct Engine<E: Payload> {
    config: EngineConfig,
    devices: Arc<dyn DeviceMap>,
    transport: Option<Box<dyn Transport>>,
    units: Vec<EventManager<E>>,
    rank: u32,
    nproc: u32,
    /// Injected events are numbered per destination so that the numbering
    /// does not depend on how devices are spread over processes.
    env_seqs: BTreeMap<DeviceId, u64>,
}

impl<E: Payload> Engine<E> {
    pub fn new(config: EngineConfig, devices: impl DeviceMap + 'static, transport: Box<dyn Transport>) -> SimResult<Self> {
        config.validate()?;
        let devices: Arc<dyn DeviceMap> = Arc::new(devices);
        let rank = transport.rank();
        let nproc = transport.nproc();
        let nthread = config.threads as u32;

        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..nthread).map(|_| unbounded()).unzip();
        let units = inboxes
            .into_iter()
            .enumerate()
            .map(|(thread, inbox)| {
                EventManager::new(
                    rank,
                    thread as u32,
                    nthread,
                    config.lookahead_ticks,
                    Arc::clone(&devices),
                    senders.clone(),
                    inbox,
                    config.trace,
                )
            })
            .collect();

        Ok(Self {
            config,
            devices,
            transport: Some(transport),
            units,
            rank,
            nproc,
            env_seqs: BTreeMap::new(),
        })
    }

    /// An engine whose every device lives in this process.
    pub fn single_process(config: EngineConfig, devices: impl DeviceMap + 'static) -> SimResult<Self> {
        Self::new(config, devices, Box::new(SingleProcess::new()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn nproc(&self) -> u32 {
        self.nproc
    }

    pub fn units(&self) -> &[EventManager<E>] {
        &self.units
    }

    /// Latest clock among this process's units.
    pub fn now(&self) -> Timestamp {
        self.units
            .iter()
            .map(|u| u.now())
            .max()
            .unwrap_or(Timestamp::ZERO)
    }

    pub fn pending(&self) -> usize {
        self.units.iter().map(|u| u.pending()).sum()
    }

    pub fn phase(&self) -> Phase {
        self.units
            .first()
            .map(|u| u.phase())
            .unwrap_or(Phase::ComputingHorizon)
    }

    /// Per-unit delivery traces, when tracing is enabled.
    pub fn traces(&self) -> Vec<&[Delivery]> {
        self.units.iter().filter_map(|u| u.trace()).collect()
    }

    fn local_unit(&self, device: DeviceId) -> SimResult<usize> {
        let loc = self
            .devices
            .locate(device)
            .ok_or(SimError::UnknownDevice { device })?;
        if loc.rank != self.rank {
            return Err(SimError::NotLocal { device, rank: self.rank });
        }
        if loc.thread as usize >= self.units.len() {
            return Err(SimError::Config(format!(
                "{} is mapped to unit {} but rank {} runs {} units",
                device,
                loc.thread,
                self.rank,
                self.units.len()
            )));
        }
        Ok(loc.thread as usize)
    }

    pub fn register(&mut self, device: DeviceId, handler: impl Handler<E> + 'static) -> SimResult<()> {
        let unit = self.local_unit(device)?;
        self.units[unit].register(device, Box::new(handler))
    }

    /// Seeds the run with an event from outside the simulation.
    pub fn inject(&mut self, time: Timestamp, dst: DeviceId, event: E) -> SimResult<()> {
        let unit = self.local_unit(dst)?;
        let now = self.units[unit].now();
        if time < now {
            return Err(SimError::CausalityViolation {
                device: DeviceId::ENVIRONMENT,
                requested: time,
                now,
                round: self.units[unit].round(),
            });
        }
        let next = self.env_seqs.entry(dst).or_insert(0);
        let seq = *next;
        *next += 1;
        self.units[unit].insert(EventQueueEntry::new(time, dst, DeviceId::ENVIRONMENT, seq, event));
        Ok(())
    }

    /// Destroys a device between runs, removing all of its pending entries.
    pub fn destroy(&mut self, device: DeviceId) -> SimResult<usize> {
        let unit = self.local_unit(device)?;
        self.units[unit].destroy(device)
    }

    /// Runs rounds until every unit of every process votes to terminate, or
    /// the horizon passes the stop time.
    pub fn run(&mut self) -> SimResult<RunReport> {
        let transport = self
            .transport
            .take()
            .ok_or_else(|| SimError::Config("engine lost its transport in an earlier run".into()))?;
        let collective = Collective::new(self.units.len(), transport);
        let config = &self.config;
        info!(
            "rank {}/{}: starting with {} units, lookahead {} ticks",
            self.rank,
            self.nproc,
            self.units.len(),
            config.lookahead_ticks
        );

        let outcomes: Vec<SimResult<UnitOutcome>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .units
                .iter_mut()
                .map(|unit| {
                    let collective = &collective;
                    s.spawn(move || run_unit(unit, collective, config))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(SimError::Transport("execution unit panicked".into())))
                })
                .collect()
        });
        self.transport = Some(collective.into_transport());

        let mut first_error = None;
        let mut summary = UnitOutcome {
            rounds: 0,
            reached_stop_time: false,
        };
        for outcome in outcomes {
            match outcome {
                Ok(o) => {
                    summary.rounds = summary.rounds.max(o.rounds);
                    summary.reached_stop_time |= o.reached_stop_time;
                }
                Err(e @ SimError::PeerAborted { .. }) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    if matches!(first_error, None | Some(SimError::PeerAborted { .. })) {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            error!("rank {}: run aborted: {}", self.rank, e);
            return Err(e);
        }

        let report = RunReport {
            rank: self.rank,
            rounds: summary.rounds,
            final_time: self.now(),
            delivered: self.units.iter().map(|u| u.delivered()).collect(),
            pending: self.pending(),
            reached_stop_time: summary.reached_stop_time,
        };
        info!(
            "rank {}: finished after {} rounds at {}, {} events delivered",
            self.rank,
            report.rounds,
            report.final_time,
            report.total_delivered()
        );
        Ok(report)
    }
}

/// Inclusive upper bound of what may execute this round. Every cross-unit
/// event is at least `horizon + lookahead`, so everything strictly before
/// that is safe; with no lookahead the units move in lock-step.
fn execution_limit(horizon: Timestamp, lookahead: u64, stop: Option<Timestamp>) -> Timestamp {
    let limit = if lookahead == 0 {
        horizon
    } else {
        Timestamp::from_ticks(horizon.saturating_add_ticks(lookahead).ticks() - 1)
    };
    match stop {
        Some(stop) => limit.min(stop),
        None => limit,
    }
}

/// Serializes and sends this unit's entries bound for other processes.
fn flush_remote<E: Payload>(unit: &mut EventManager<E>, collective: &Collective) -> SimResult<usize> {
    let outgoing = unit.take_remote();
    let count = outgoing.len();
    if count == 0 {
        return Ok(0);
    }
    let mut encoded = Vec::with_capacity(count);
    for (rank, entry) in &outgoing {
        encoded.push((*rank, encode_entry(entry)?));
    }
    collective.with_transport(|t| {
        for (rank, bytes) in encoded {
            t.send(rank, bytes)?;
        }
        Ok(count)
    })
}

/// Drains the transport and hands each entry to its destination unit.
fn route_remote<E: Payload>(unit: &EventManager<E>, collective: &Collective) -> SimResult<usize> {
    let incoming = collective.with_transport(|t| t.receive_all())?;
    let count = incoming.len();
    for bytes in incoming {
        let entry: EventQueueEntry<E> = decode_entry(&bytes)?;
        let loc = unit
            .devices()
            .locate(entry.dst)
            .ok_or(SimError::UnknownDevice { device: entry.dst })?;
        trace!("received {} -> {} at {} seq {}", entry.src, entry.dst, entry.time, entry.seq);
        unit.peers()
            .get(loc.thread as usize)
            .ok_or_else(|| SimError::Transport(format!("no unit {} for {}", loc.thread, entry.dst)))?
            .send(entry)
            .map_err(|_| SimError::Transport(format!("inbox of unit {} is closed", loc.thread)))?;
    }
    Ok(count)
}

/// Every unit learns whether any unit of any process has failed. The failing
/// units return their own diagnostic, the rest stop with `PeerAborted`.
fn settle_failures(
    unit: &mut EventManager<impl Payload>,
    collective: &Collective,
    round: u64,
    failure: &mut Option<SimError>,
) -> SimResult<()> {
    let thread = unit.thread_id() as usize;
    let failed = collective.vote(thread, round, u64::from(failure.is_some()), VoteOp::Max)?;
    if failed != 0 {
        unit.set_phase(Phase::Terminated);
        return Err(failure.take().unwrap_or(SimError::PeerAborted { round }));
    }
    Ok(())
}

/// One unit's side of the protocol. All units of all processes walk through
/// the same sequence of votes, so a failure is held back until the next
/// failure vote rather than abandoning peers at a barrier. Two such votes
/// close every round: one after execution, one after the exchange.
fn run_unit<E: Payload>(
    unit: &mut EventManager<E>,
    collective: &Collective,
    config: &EngineConfig,
) -> SimResult<UnitOutcome> {
    let thread = unit.thread_id() as usize;
    let lookahead = config.lookahead_ticks;
    let stop = config.stop_time();
    let mut reached_stop_time = false;

    loop {
        let round = unit.round();
        let mut failure: Option<SimError> = None;

        unit.set_phase(Phase::ComputingHorizon);
        let candidate = unit.horizon_candidate();
        let horizon = Timestamp::from_ticks(collective.vote(thread, round, candidate.ticks(), VoteOp::Min)?);
        if horizon == Timestamp::MAX {
            // Nothing pending anywhere and nothing in flight.
            break;
        }
        if stop.is_some_and(|stop| horizon > stop) {
            reached_stop_time = true;
            break;
        }
        let limit = execution_limit(horizon, lookahead, stop);

        unit.set_phase(Phase::Executing);
        let mut delivered = 0;
        match unit.run_until(limit) {
            Ok(n) => delivered = n,
            Err(e) => {
                error!("unit {} failed in round {}: {}", thread, round, e);
                failure = Some(e);
            }
        }

        unit.set_phase(Phase::Exchanging);
        if failure.is_none() {
            if let Err(e) = flush_remote(unit, collective) {
                failure = Some(e);
            }
        }
        settle_failures(unit, collective, round, &mut failure)?;
        if thread == 0 {
            if let Err(e) = route_remote(unit, collective) {
                error!("rank {} could not route round {} traffic: {}", unit.rank(), round, e);
                failure = Some(e);
            }
        }
        collective.barrier();
        if let Err(e) = unit.merge_inbox() {
            error!("unit {} could not merge round {} traffic: {}", thread, round, e);
            failure.get_or_insert(e);
        }
        settle_failures(unit, collective, round, &mut failure)?;
        unit.advance_to(horizon);

        if thread == 0 {
            debug!(
                "rank {} round {}: horizon {} limit {} delivered {} on unit 0",
                unit.rank(),
                round,
                horizon,
                limit,
                delivered
            );
        }

        unit.set_phase(Phase::Voting);
        let all_idle = collective.vote(thread, round, u64::from(unit.is_idle()), VoteOp::And)?;
        unit.next_round();
        if all_idle != 0 {
            break;
        }
    }

    unit.set_phase(Phase::Terminated);
    Ok(UnitOutcome {
        rounds: unit.round(),
        reached_stop_time,
    })
}
