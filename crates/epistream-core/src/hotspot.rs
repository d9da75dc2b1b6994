//! Outbreak spike detection over places.
//!
//! A place is flagged at a timestep when its infected count is positive, the
//! previous count was positive, and the new count is at least `factor` times
//! the previous one. The baseline is updated after every observation,
//! including zero counts. Homes are never tracked.

use crate::model::{CompactFrame, HotspotMap, Timestep};

/// Default spike multiplier.
pub const DEFAULT_HOTSPOT_FACTOR: u32 = 5;

/// Incremental detector; one instance per cache build.
#[derive(Debug, Clone)]
pub struct HotspotDetector {
    place_ids: Vec<String>,
    previous: Vec<u32>,
    factor: u64,
    hotspots: HotspotMap,
}

impl HotspotDetector {
    pub fn new(place_ids: Vec<String>) -> Self {
        Self::with_factor(place_ids, DEFAULT_HOTSPOT_FACTOR)
    }

    pub fn with_factor(place_ids: Vec<String>, factor: u32) -> Self {
        let previous = vec![0; place_ids.len()];
        Self {
            place_ids,
            previous,
            factor: u64::from(factor),
            hotspots: HotspotMap::new(),
        }
    }

    /// Record the place counts of one frame. Returns how many places fired.
    pub fn observe(&mut self, timestep: Timestep, frame: &CompactFrame) -> usize {
        let mut fired = 0;
        for index in 0..self.place_ids.len() {
            if self.observe_place(index, timestep, frame.place_infected(index)) {
                fired += 1;
            }
        }
        fired
    }

    /// Record one place's infected count at `timestep`.
    pub fn observe_place(&mut self, index: usize, timestep: Timestep, infected: u32) -> bool {
        let Some(previous) = self.previous.get_mut(index) else {
            return false;
        };
        let prior = *previous;
        *previous = infected;

        let spike =
            infected > 0 && prior > 0 && u64::from(infected) >= self.factor * u64::from(prior);
        if spike {
            self.hotspots
                .entry(self.place_ids[index].clone())
                .or_default()
                .push(timestep);
        }
        spike
    }

    pub fn hotspots(&self) -> &HotspotMap {
        &self.hotspots
    }

    pub fn into_hotspots(self) -> HotspotMap {
        self.hotspots
    }

    pub fn hotspot_count(&self) -> usize {
        self.hotspots.values().map(Vec::len).sum()
    }
}
