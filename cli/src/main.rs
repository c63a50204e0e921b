mod phold;

use clap::{Parser, ValueEnum};
use lockstep_core::{
    ChannelTransport, DeviceId, Engine, EngineConfig, Partition, RunReport, SimError, SimResult, Timestamp, Transport,
};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use phold::{Phold, PholdParams, Token};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    /// Neighbouring device ids land on different units
    RoundRobin,
    /// Contiguous ranges of device ids per unit
    Block,
}

#[derive(Debug, Parser)]
#[command(version, about = "Runs a PHOLD workload on the lockstep kernel", long_about = None)]
struct Cli {
    /// Engine configuration as JSON; the flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Simulated processes, each on its own OS thread
    #[arg(long, default_value_t = 2)]
    ranks: u32,

    /// Execution units per process
    #[arg(long)]
    threads: Option<usize>,

    /// Lookahead in ticks (picoseconds)
    #[arg(long)]
    lookahead: Option<u64>,

    /// Stop once the horizon passes this tick
    #[arg(long)]
    stop: Option<u64>,

    #[arg(long, default_value_t = 64)]
    devices: u32,

    /// Tokens seeded on every device
    #[arg(long, default_value_t = 4)]
    population: u32,

    /// Hops every token makes before it is retired
    #[arg(long, default_value_t = 100)]
    hops: u32,

    /// Mean of the exponential delay added on top of the lookahead, in ticks
    #[arg(long, default_value_t = 1_000.0)]
    mean_extra: f64,

    /// Chance that a hop stays on the same device
    #[arg(long, default_value_t = 0.5)]
    locality: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = Layout::RoundRobin)]
    layout: Layout,
}

impl Cli {
    fn engine_config(&self) -> SimResult<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(lookahead) = self.lookahead {
            config.lookahead_ticks = lookahead;
        }
        if let Some(stop) = self.stop {
            config = config.with_stop_time(Timestamp::from_ticks(stop));
        }
        config.validate()?;
        Ok(config)
    }

    fn partition(&self, threads: usize) -> SimResult<Partition> {
        if self.ranks == 0 || self.devices == 0 {
            return Err(SimError::Config("need at least one rank and one device".into()));
        }
        let devices = (0..self.devices).map(DeviceId);
        Ok(match self.layout {
            Layout::RoundRobin => Partition::round_robin(devices, self.ranks, threads as u32),
            Layout::Block => Partition::block(devices, self.ranks, threads as u32),
        })
    }

    fn params(&self, lookahead: u64) -> SimResult<PholdParams> {
        if !(0.0..=1.0).contains(&self.locality) {
            return Err(SimError::Config(format!("locality {} is not a probability", self.locality)));
        }
        if self.mean_extra.is_nan() || self.mean_extra < 0.0 {
            return Err(SimError::Config(format!("mean extra delay {} is negative", self.mean_extra)));
        }
        Ok(PholdParams {
            devices: self.devices,
            lookahead,
            mean_extra: self.mean_extra,
            locality: self.locality,
            seed: self.seed,
        })
    }
}

/// One engine per rank over an in-memory mesh; returns the reports in rank
/// order, or the first error that is not just a peer giving up.
fn run(cli: &Cli) -> SimResult<Vec<RunReport>> {
    let config = cli.engine_config()?;
    let partition = cli.partition(config.threads)?;
    let params = cli.params(config.lookahead_ticks)?;
    info!(
        "PHOLD: {} devices x {} tokens x {} hops over {} ranks x {} units",
        cli.devices, cli.population, cli.hops, cli.ranks, config.threads
    );

    let results: Vec<SimResult<RunReport>> = thread::scope(|s| {
        let handles: Vec<_> = ChannelTransport::mesh(cli.ranks)
            .into_iter()
            .map(|transport| {
                let (config, partition, params) = (&config, &partition, &params);
                s.spawn(move || -> SimResult<RunReport> {
                    let rank = transport.rank();
                    let mut engine = Engine::new(config.clone(), partition.clone(), Box::new(transport))?;
                    for (device, _) in partition.devices_on(rank) {
                        engine.register(device, Phold::new(device, params.clone()))?;
                        for k in 0..cli.population {
                            let id = u64::from(device.0) * u64::from(cli.population) + u64::from(k);
                            let token = Token {
                                id,
                                remaining: cli.hops,
                            };
                            engine.inject(Timestamp::from_ticks(u64::from(k)), device, token)?;
                        }
                    }
                    engine.run()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(SimError::Transport("rank thread panicked".into())))
            })
            .collect()
    });

    let mut reports = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
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
        None => Ok(reports),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let reports = match run(&cli) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("lockstep: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&reports) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("lockstep: cannot render report: {}", e);
            ExitCode::FAILURE
        }
    }
}
