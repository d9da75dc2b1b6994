//! Frame compaction: one aligned timestep to `(population, infected)` pairs.

use std::collections::{HashMap, HashSet};

use crate::join::Aligned;
use crate::model::{CompactFrame, InfectionRecord, MovementRecord};

/// Aligned simdata/patterns member for one timestep.
pub type AlignedFrame = Aligned<InfectionRecord, MovementRecord>;

/// Fixed location universe for a run. Frame arrays are sized from it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCompactor {
    home_ids: Vec<String>,
    place_ids: Vec<String>,
}

impl FrameCompactor {
    /// Both lists must already be in canonical order.
    pub fn new(home_ids: Vec<String>, place_ids: Vec<String>) -> Self {
        Self {
            home_ids,
            place_ids,
        }
    }

    pub fn home_ids(&self) -> &[String] {
        &self.home_ids
    }

    pub fn place_ids(&self) -> &[String] {
        &self.place_ids
    }

    /// Compact one aligned timestep.
    ///
    /// A person recorded under several diseases counts once per location.
    /// Locations absent from the movement record contribute `(0, 0)`.
    pub fn compact(&self, infection: &InfectionRecord, movement: &MovementRecord) -> CompactFrame {
        let infected = infection.infected_people();
        CompactFrame {
            h: pairs(&self.home_ids, &movement.homes, &infected),
            p: pairs(&self.place_ids, &movement.places, &infected),
        }
    }

    pub fn compact_aligned(&self, aligned: &AlignedFrame) -> CompactFrame {
        self.compact(&aligned.infection, &aligned.movement)
    }
}

fn pairs(
    ids: &[String],
    occupants: &HashMap<String, Vec<String>>,
    infected: &HashSet<&str>,
) -> Vec<u32> {
    let mut out = Vec::with_capacity(ids.len() * 2);
    for id in ids {
        let (population, sick) = match occupants.get(id) {
            Some(people) => (
                people.len() as u32,
                people
                    .iter()
                    .filter(|p| infected.contains(p.as_str()))
                    .count() as u32,
            ),
            None => (0, 0),
        };
        out.push(population);
        out.push(sick);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_home_example() {
        let infection: InfectionRecord = serde_json::from_str(r#"{"flu":{"p1":1}}"#).unwrap();
        let movement: MovementRecord =
            serde_json::from_str(r#"{"homes":{"h1":["p1","p2"]},"places":{}}"#).unwrap();

        let frame = FrameCompactor::new(ids(&["h1"]), vec![]).compact(&infection, &movement);

        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"h":[2,1],"p":[]}"#);
    }

    #[test]
    fn test_multi_disease_person_counted_once() {
        let infection: InfectionRecord =
            serde_json::from_str(r#"{"flu":{"p1":1,"p3":3},"covid":{"p1":5}}"#).unwrap();
        let movement: MovementRecord = serde_json::from_str(
            r#"{"homes":{"h1":["p1","p2"]},"places":{"s":["p1","p2","p3"]}}"#,
        )
        .unwrap();

        let frame = FrameCompactor::new(ids(&["h1"]), ids(&["s"])).compact(&infection, &movement);

        assert_eq!(frame.h, vec![2, 1]);
        assert_eq!(frame.p, vec![3, 2]);
    }

    #[test]
    fn test_missing_locations_fill_zero_pairs() {
        let movement: MovementRecord =
            serde_json::from_str(r#"{"homes":{"h2":["p9"]},"places":{"unknown":["p1"]}}"#).unwrap();

        let frame = FrameCompactor::new(ids(&["h1", "h2", "h3"]), ids(&["a", "b"]))
            .compact(&InfectionRecord::default(), &movement);

        assert_eq!(frame.h, vec![0, 0, 1, 0, 0, 0]);
        assert_eq!(frame.p, vec![0, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn prop_compaction_is_deterministic(
            homes in prop::collection::btree_map("h[0-9]", prop::collection::vec("p[0-9]", 0..6), 0..6),
            sick in prop::collection::btree_map("p[0-9]", 1u32..64, 0..8),
        ) {
            let movement = MovementRecord {
                homes: homes.clone().into_iter().collect(),
                places: HashMap::new(),
            };
            let mut infection = InfectionRecord::default();
            infection.diseases.insert("flu".into(), sick.into_iter().collect());
            let compactor = FrameCompactor::new(homes.keys().cloned().collect(), vec![]);

            let a = serde_json::to_vec(&compactor.compact(&infection, &movement)).unwrap();
            let b = serde_json::to_vec(&compactor.compact(&infection, &movement)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
