//! Typed records for the two source streams and the compact output.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Simulation-time offset (minutes) identifying one frame in both streams.
pub type Timestep = u64;

/// Compartmental state flags carried in a person's bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateFlag {
    Infected,
    Infectious,
    Symptomatic,
    Hospitalized,
    Recovered,
    Removed,
}

impl StateFlag {
    pub const ALL: [StateFlag; 6] = [
        StateFlag::Infected,
        StateFlag::Infectious,
        StateFlag::Symptomatic,
        StateFlag::Hospitalized,
        StateFlag::Recovered,
        StateFlag::Removed,
    ];

    pub fn bit(self) -> u32 {
        match self {
            StateFlag::Infected => 1,
            StateFlag::Infectious => 2,
            StateFlag::Symptomatic => 4,
            StateFlag::Hospitalized => 8,
            StateFlag::Recovered => 16,
            StateFlag::Removed => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateFlag::Infected => "Infected",
            StateFlag::Infectious => "Infectious",
            StateFlag::Symptomatic => "Symptomatic",
            StateFlag::Hospitalized => "Hospitalized",
            StateFlag::Recovered => "Recovered",
            StateFlag::Removed => "Removed",
        }
    }

    /// Flags set in `mask`, in bit order.
    pub fn decode(mask: u32) -> impl Iterator<Item = StateFlag> {
        Self::ALL.into_iter().filter(move |f| mask & f.bit() != 0)
    }
}

/// Name of the implicit state for persons absent from every disease map.
pub const SUSCEPTIBLE: &str = "Susceptible";

/// One simdata entry: disease -> person id -> state bitmask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfectionRecord {
    pub diseases: BTreeMap<String, HashMap<String, u32>>,
}

impl InfectionRecord {
    /// Distinct person ids recorded under any disease.
    pub fn infected_people(&self) -> HashSet<&str> {
        self.diseases
            .values()
            .flat_map(|people| people.keys().map(String::as_str))
            .collect()
    }
}

/// One patterns entry: where every present person is at this timestep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    #[serde(default)]
    pub homes: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub places: HashMap<String, Vec<String>>,
}

/// `(population, infected)` pairs per location, in canonical index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactFrame {
    pub h: Vec<u32>,
    pub p: Vec<u32>,
}

impl CompactFrame {
    /// Infected count of the place at `index` in the place id list.
    pub fn place_infected(&self, index: usize) -> u32 {
        self.p.get(index * 2 + 1).copied().unwrap_or(0)
    }

    /// Infected count of the home at `index` in the home id list.
    pub fn home_infected(&self, index: usize) -> u32 {
        self.h.get(index * 2 + 1).copied().unwrap_or(0)
    }
}

/// Place id -> timesteps at which a spike was flagged, in emission order.
pub type HotspotMap = BTreeMap<String, Vec<Timestep>>;

/// Inclusive timestep window requested by a paginated query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<Timestep>,
    pub to: Option<Timestep>,
}

impl TimeRange {
    pub fn new(from: Option<Timestep>, to: Option<Timestep>) -> Self {
        Self { from, to }
    }

    /// A range with neither bound is a full-document request.
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, ts: Timestep) -> bool {
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
    }
}

/// Everything the frame pipeline needs to know about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub run_id: i64,
    pub simdata: PathBuf,
    pub patterns: PathBuf,
    /// Declared length in timesteps.
    pub length: u64,
    /// Canonically sorted home ids.
    pub home_ids: Vec<String>,
    /// Canonically sorted place ids.
    pub place_ids: Vec<String>,
}

impl RunInputs {
    pub fn new(run_id: i64, simdata: impl Into<PathBuf>, patterns: impl Into<PathBuf>) -> Self {
        Self {
            run_id,
            simdata: simdata.into(),
            patterns: patterns.into(),
            length: 0,
            home_ids: Vec::new(),
            place_ids: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// Set location ids; both lists are sorted into canonical order.
    pub fn with_locations(mut self, mut home_ids: Vec<String>, mut place_ids: Vec<String>) -> Self {
        sort_location_ids(&mut home_ids);
        sort_location_ids(&mut place_ids);
        self.home_ids = home_ids;
        self.place_ids = place_ids;
        self
    }
}

/// Canonical location order: numeric ids numerically, then the rest lexically.
pub fn sort_location_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
}
