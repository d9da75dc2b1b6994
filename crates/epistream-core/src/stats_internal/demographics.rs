use std::collections::HashMap;

use crate::papdata::{PopulationSnapshot, Sex};

/// Age bracket labels in chart order.
pub const AGE_BRACKETS: [&str; 5] = ["0-4", "5-17", "18-49", "50-64", "65+"];

/// Sex labels in chart order.
pub const SEX_LABELS: [&str; 2] = ["male", "female"];

pub fn age_bracket(age: u32) -> &'static str {
    match age {
        0..=4 => AGE_BRACKETS[0],
        5..=17 => AGE_BRACKETS[1],
        18..=49 => AGE_BRACKETS[2],
        50..=64 => AGE_BRACKETS[3],
        _ => AGE_BRACKETS[4],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demographic {
    pub age: Option<&'static str>,
    pub sex: Option<&'static str>,
}

/// Person id -> bracket labels, resolved once before a pass.
#[derive(Debug, Clone, Default)]
pub struct DemographicIndex {
    people: HashMap<String, Demographic>,
    total: u64,
}

impl DemographicIndex {
    pub fn new(snapshot: &PopulationSnapshot) -> Self {
        let people = snapshot
            .iter()
            .map(|(id, person)| {
                let demographic = Demographic {
                    age: person.age.map(age_bracket),
                    sex: person.sex.and_then(Sex::from_code).map(Sex::label),
                };
                (id.to_string(), demographic)
            })
            .collect();
        Self {
            people,
            total: snapshot.total(),
        }
    }

    /// Static population size.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn lookup(&self, person_id: &str) -> Option<Demographic> {
        self.people.get(person_id).copied()
    }
}
