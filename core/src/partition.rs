use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::traits::DeviceId;

/// Where a device lives: which process (rank) and which unit (thread) on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub rank: u32,
    pub thread: u32,
}

/// Resolves a device to its owner. Consulted once per scheduling call that
/// may cross a unit boundary.
pub trait DeviceMap: Send + Sync {
    fn locate(&self, device: DeviceId) -> Option<Location>;
}

/// A static assignment of devices to units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    owners: BTreeMap<DeviceId, Location>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, device: DeviceId, location: Location) {
        self.owners.insert(device, location);
    }

    pub fn with(mut self, device: DeviceId, rank: u32, thread: u32) -> Self {
        self.assign(device, Location { rank, thread });
        self
    }

    /// Deals devices out one unit at a time, cycling threads fastest.
    pub fn round_robin(devices: impl IntoIterator<Item = DeviceId>, nproc: u32, nthread: u32) -> Self {
        let units = (nproc.max(1) * nthread.max(1)) as usize;
        let mut p = Self::new();
        for (i, device) in devices.into_iter().enumerate() {
            let unit = (i % units) as u32;
            p.assign(
                device,
                Location {
                    rank: unit / nthread.max(1),
                    thread: unit % nthread.max(1),
                },
            );
        }
        p
    }

    /// Contiguous runs of devices per unit.
    pub fn block(devices: impl IntoIterator<Item = DeviceId>, nproc: u32, nthread: u32) -> Self {
        let devices: Vec<DeviceId> = devices.into_iter().collect();
        let units = (nproc.max(1) * nthread.max(1)) as usize;
        let per_unit = devices.len().div_ceil(units).max(1);
        let mut p = Self::new();
        for (i, device) in devices.into_iter().enumerate() {
            let unit = (i / per_unit) as u32;
            p.assign(
                device,
                Location {
                    rank: unit / nthread.max(1),
                    thread: unit % nthread.max(1),
                },
            );
        }
        p
    }

    pub fn devices_on(&self, rank: u32) -> impl Iterator<Item = (DeviceId, Location)> + '_ {
        self.owners
            .iter()
            .filter(move |(_, loc)| loc.rank == rank)
            .map(|(d, loc)| (*d, *loc))
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl DeviceMap for Partition {
    fn locate(&self, device: DeviceId) -> Option<Location> {
        self.owners.get(&device).copied()
    }
}
