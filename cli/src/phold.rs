//! PHOLD: a fixed population of tokens hops between randomly chosen
//! devices, each hop taking the lookahead plus an exponentially distributed
//! extra delay.

use lockstep_core::{DeviceId, EventScheduler, Handler, SimResult, TimeDelta, Timestamp};
use rand::prelude::*;
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: u64,
    pub remaining: u32,
}

#[derive(Debug, Clone)]
pub struct PholdParams {
    pub devices: u32,
    pub lookahead: u64,
    pub mean_extra: f64,
    /// Chance that a hop stays on the device that received it.
    pub locality: f64,
    pub seed: u64,
}

pub struct Phold {
    params: PholdParams,
    rng: StdRng,
    /// `None` when hops carry no extra delay.
    extra: Option<Exp<f64>>,
}

impl Phold {
    pub fn new(device: DeviceId, params: PholdParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed ^ (u64::from(device.0) << 32));
        let extra = if params.mean_extra > 0.0 {
            Exp::new(1.0 / params.mean_extra).ok()
        } else {
            None
        };
        Self { params, rng, extra }
    }

    fn extra_delay(&mut self) -> u64 {
        match &self.extra {
            Some(exp) => exp.sample(&mut self.rng) as u64,
            None => 0,
        }
    }
}

impl Handler<Token> for Phold {
    fn handle(&mut self, _at: Timestamp, token: Token, sched: &mut EventScheduler<'_, Token>) -> SimResult<()> {
        if token.remaining == 0 {
            return Ok(());
        }
        let dst = if self.rng.gen_bool(self.params.locality) {
            sched.source()
        } else {
            DeviceId(self.rng.gen_range(0..self.params.devices))
        };
        let delay = self.params.lookahead.saturating_add(self.extra_delay());
        let delay = TimeDelta::from_ticks(i64::try_from(delay).unwrap_or(i64::MAX));
        sched.schedule_delay(
            delay,
            dst,
            Token {
                id: token.id,
                remaining: token.remaining - 1,
            },
        )
    }

    fn name(&self) -> &str {
        "phold"
    }
}
