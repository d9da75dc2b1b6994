//! Single-pass chart accumulation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{InfectionRecord, StateFlag, Timestep, SUSCEPTIBLE};

use super::demographics::{DemographicIndex, AGE_BRACKETS, SEX_LABELS};

/// One chart sample: `{"time": t, "<counter>": n, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: Timestep,
    #[serde(flatten)]
    pub counts: BTreeMap<String, u64>,
}

impl TimePoint {
    pub fn get(&self, counter: &str) -> u64 {
        self.counts.get(counter).copied().unwrap_or(0)
    }
}

/// Four parallel series, one point per observed timestep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDataset {
    pub iot: Vec<TimePoint>,
    pub ages: Vec<TimePoint>,
    pub sexes: Vec<TimePoint>,
    pub states: Vec<TimePoint>,
}

impl ChartDataset {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Persisted `{"data": {...}}` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDocument {
    pub data: ChartDataset,
}

/// Accumulates chart series one infection record at a time.
#[derive(Debug)]
pub struct ChartAccumulator {
    index: DemographicIndex,
    dataset: ChartDataset,
    last: Option<Timestep>,
}

impl ChartAccumulator {
    pub fn new(index: DemographicIndex) -> Self {
        Self {
            index,
            dataset: ChartDataset::default(),
            last: None,
        }
    }

    /// Observe a timestep against the whole population.
    pub fn observe(&mut self, timestep: Timestep, record: &InfectionRecord) -> PipelineResult<()> {
        let population = self.index.total();
        self.observe_scoped(timestep, record, population)
    }

    /// Observe a timestep against a sub-population (one location).
    pub fn observe_scoped(
        &mut self,
        timestep: Timestep,
        record: &InfectionRecord,
        population: u64,
    ) -> PipelineResult<()> {
        if let Some(last) = self.last {
            if timestep < last {
                return Err(PipelineError::Join {
                    message: format!("chart timestep {} does not follow {}", timestep, last),
                });
            }
            // Same policy as the merge-join: the first member for a timestep wins.
            if timestep == last {
                debug!(timestep, "repeated chart timestep skipped");
                return Ok(());
            }
        }
        self.last = Some(timestep);

        let mut iot = BTreeMap::new();
        let mut states = zeroed(StateFlag::ALL.iter().map(|f| f.name()));
        for (disease, people) in &record.diseases {
            iot.insert(disease.clone(), people.len() as u64);
            for mask in people.values() {
                for flag in StateFlag::decode(*mask) {
                    *states.entry(flag.name().to_string()).or_default() += 1;
                }
            }
        }

        let infected = record.infected_people();
        states.insert(
            SUSCEPTIBLE.to_string(),
            population.saturating_sub(infected.len() as u64),
        );

        let mut ages = zeroed(AGE_BRACKETS);
        let mut sexes = zeroed(SEX_LABELS);
        for person in &infected {
            let Some(demographic) = self.index.lookup(person) else {
                continue;
            };
            if let Some(bracket) = demographic.age {
                *ages.entry(bracket.to_string()).or_default() += 1;
            }
            if let Some(sex) = demographic.sex {
                *sexes.entry(sex.to_string()).or_default() += 1;
            }
        }

        let point = |counts| TimePoint {
            time: timestep,
            counts,
        };
        self.dataset.iot.push(point(iot));
        self.dataset.ages.push(point(ages));
        self.dataset.sexes.push(point(sexes));
        self.dataset.states.push(point(states));
        Ok(())
    }

    /// Close the pass. Diseases first seen mid-run are back-filled with zeros.
    pub fn finish(mut self) -> ChartDataset {
        let diseases: BTreeSet<String> = self
            .dataset
            .iot
            .iter()
            .flat_map(|p| p.counts.keys().cloned())
            .collect();
        for point in &mut self.dataset.iot {
            for disease in &diseases {
                point.counts.entry(disease.clone()).or_insert(0);
            }
        }
        self.dataset
    }
}

fn zeroed<'a>(labels: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, u64> {
    labels.into_iter().map(|l| (l.to_string(), 0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::papdata::{Person, PopulationSnapshot};
    use std::collections::HashMap;

    fn index() -> DemographicIndex {
        let mut people = HashMap::new();
        for (id, sex, age) in [("a", 0, 3), ("b", 1, 40), ("c", 1, 80), ("d", 0, 20)] {
            people.insert(
                id.to_string(),
                Person {
                    sex: Some(sex),
                    age: Some(age),
                    home: None,
                },
            );
        }
        DemographicIndex::new(&PopulationSnapshot::new(people))
    }

    fn record(json: &str) -> InfectionRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_multi_disease_person_counted_once_for_susceptible() {
        let mut acc = ChartAccumulator::new(index());
        acc.observe(60, &record(r#"{"flu":{"a":3},"covid":{"a":1,"b":5}}"#))
            .unwrap();
        let chart = acc.finish();

        let states = &chart.states[0];
        assert_eq!(states.get(SUSCEPTIBLE), 2);
        // Flag tallies count once per disease record.
        assert_eq!(states.get("Infected"), 3);
        assert_eq!(states.get("Infectious"), 1);
        assert_eq!(states.get("Symptomatic"), 1);
        assert_eq!(states.get("Removed"), 0);

        assert_eq!(chart.iot[0].get("flu"), 1);
        assert_eq!(chart.iot[0].get("covid"), 2);
        assert_eq!(chart.ages[0].get("0-4"), 1);
        assert_eq!(chart.ages[0].get("18-49"), 1);
        assert_eq!(chart.sexes[0].get("male"), 1);
        assert_eq!(chart.sexes[0].get("female"), 1);
    }

    #[test]
    fn test_unknown_person_skipped_for_demographics() {
        let mut acc = ChartAccumulator::new(index());
        acc.observe(60, &record(r#"{"flu":{"ghost":1,"c":1}}"#)).unwrap();
        let chart = acc.finish();
        assert_eq!(chart.ages[0].counts.values().sum::<u64>(), 1);
        assert_eq!(chart.ages[0].get("65+"), 1);
        assert_eq!(chart.states[0].get(SUSCEPTIBLE), 2);
    }

    #[test]
    fn test_late_disease_backfilled_and_time_increasing() {
        let mut acc = ChartAccumulator::new(index());
        acc.observe(60, &record(r#"{"flu":{"a":1}}"#)).unwrap();
        acc.observe(120, &record(r#"{"flu":{},"covid":{"b":1}}"#)).unwrap();
        let chart = acc.finish();
        assert_eq!(chart.iot[0].get("covid"), 0);
        assert!(chart.iot[0].counts.contains_key("covid"));
        assert_eq!(chart.len(), 2);

        let mut acc = ChartAccumulator::new(index());
        acc.observe(120, &InfectionRecord::default()).unwrap();
        assert!(acc.observe(60, &InfectionRecord::default()).is_err());
    }

    #[test]
    fn test_repeated_timestep_keeps_first_record() {
        let mut acc = ChartAccumulator::new(index());
        acc.observe(60, &record(r#"{"flu":{"a":1}}"#)).unwrap();
        acc.observe(60, &record(r#"{"flu":{"a":1,"b":1,"c":1}}"#)).unwrap();
        acc.observe(120, &record(r#"{"flu":{"b":1}}"#)).unwrap();
        let chart = acc.finish();
        assert_eq!(chart.len(), 2);
        assert_eq!(chart.iot[0].time, 60);
        assert_eq!(chart.iot[0].get("flu"), 1);
        assert_eq!(chart.iot[1].time, 120);
    }

    #[test]
    fn test_document_shape() {
        let mut acc = ChartAccumulator::new(index());
        acc.observe(60, &record(r#"{"flu":{"a":1}}"#)).unwrap();
        let doc = ChartDocument { data: acc.finish() };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["data"]["iot"][0]["time"], 60);
        assert_eq!(value["data"]["iot"][0]["flu"], 1);
        assert_eq!(value["data"]["states"][0]["Susceptible"], 3);

        let back: ChartDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }
}
