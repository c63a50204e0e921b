use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum delay, in ticks, of any event that crosses a unit boundary.
    pub lookahead_ticks: u64,
    /// Execution units (threads) per process.
    pub threads: usize,
    /// Events later than this stay pending and the run stops.
    pub stop_time_ticks: Option<u64>,
    /// Record every delivery's envelope per unit.
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_ticks: 1_000,
            threads: 1,
            stop_time_ticks: None,
            trace: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> SimResult<Self> {
        let cfg: EngineConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.threads == 0 {
            return Err(SimError::Config("threads must be at least 1".into()));
        }
        if self.threads > u32::MAX as usize {
            return Err(SimError::Config(format!("{} threads is too many", self.threads)));
        }
        Ok(())
    }

    pub fn with_lookahead(mut self, ticks: u64) -> Self {
        self.lookahead_ticks = ticks;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_stop_time(mut self, stop: Timestamp) -> Self {
        self.stop_time_ticks = Some(stop.ticks());
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn stop_time(&self) -> Option<Timestamp> {
        self.stop_time_ticks.map(Timestamp::from_ticks)
    }
}
