//! Per-location rows derived from aligned frames.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::compact::AlignedFrame;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{InfectionRecord, Timestep};

/// Disease -> person id -> state bitmask, for the people at one location.
pub type Breakdown = BTreeMap<String, BTreeMap<String, u32>>;

/// Location kind prefix used in stored location ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Home,
    Place,
}

impl LocationKind {
    pub fn prefix(self) -> &'static str {
        match self {
            LocationKind::Home => "home",
            LocationKind::Place => "place",
        }
    }

    /// Stored id for a raw location id, e.g. `place:17`.
    pub fn key(self, id: &str) -> String {
        format!("{}:{}", self.prefix(), id)
    }
}

/// One `(run, location, timestep)` row of the location store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationStatRow {
    pub run_id: i64,
    pub location_id: String,
    pub timestep: Timestep,
    pub population: u32,
    pub infected: u32,
    pub breakdown: Breakdown,
}

impl LocationStatRow {
    /// The breakdown as an infection record for chart accumulation.
    pub fn to_infection_record(&self) -> InfectionRecord {
        InfectionRecord {
            diseases: self
                .breakdown
                .iter()
                .map(|(disease, people)| {
                    let people: HashMap<String, u32> =
                        people.iter().map(|(id, mask)| (id.clone(), *mask)).collect();
                    (disease.clone(), people)
                })
                .collect(),
        }
    }
}

/// Rows for every occupied home and place of one aligned timestep.
pub fn location_rows(run_id: i64, frame: &AlignedFrame) -> Vec<LocationStatRow> {
    let infected = frame.infection.infected_people();
    let mut rows = Vec::with_capacity(frame.movement.homes.len() + frame.movement.places.len());
    for (kind, occupants) in [
        (LocationKind::Home, &frame.movement.homes),
        (LocationKind::Place, &frame.movement.places),
    ] {
        for (id, people) in occupants {
            rows.push(row(run_id, kind.key(id), frame, people, &infected));
        }
    }
    rows.sort_by(|a, b| a.location_id.cmp(&b.location_id));
    rows
}

fn row(
    run_id: i64,
    location_id: String,
    frame: &AlignedFrame,
    people: &[String],
    infected: &HashSet<&str>,
) -> LocationStatRow {
    let present: HashSet<&str> = people.iter().map(String::as_str).collect();
    let mut breakdown = Breakdown::new();
    for (disease, states) in &frame.infection.diseases {
        let local: BTreeMap<String, u32> = states
            .iter()
            .filter(|(person, _)| present.contains(person.as_str()))
            .map(|(person, mask)| (person.clone(), *mask))
            .collect();
        if !local.is_empty() {
            breakdown.insert(disease.clone(), local);
        }
    }
    LocationStatRow {
        run_id,
        location_id,
        timestep: frame.timestep,
        population: people.len() as u32,
        infected: people.iter().filter(|p| infected.contains(p.as_str())).count() as u32,
        breakdown,
    }
}

/// Gzip-compressed JSON blob for the `breakdown` column.
pub fn encode_breakdown(breakdown: &Breakdown) -> PipelineResult<Vec<u8>> {
    let json = serde_json::to_vec(breakdown)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode_breakdown(blob: &[u8]) -> PipelineResult<Breakdown> {
    let mut json = Vec::new();
    GzDecoder::new(blob)
        .read_to_end(&mut json)
        .map_err(|e| PipelineError::store(format!("corrupt breakdown blob: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| PipelineError::store(format!("corrupt breakdown blob: {}", e)))
}
