//! Population and location document for a run ("papdata").
//!
//! ```json
//! {"people": {"<pid>": {"sex": 0, "age": 34, "home": "12"}},
//!  "homes":  {"<hid>": {...}},
//!  "places": {"<lid>": {...}}}
//! ```
//!
//! Location ids come out in canonical order (see [`sort_location_ids`]); the
//! people table becomes the static [`PopulationSnapshot`] used by the
//! statistics pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::decode::{open_source, Compression};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{sort_location_ids, RunInputs};

/// Sex code as stored in papdata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Sex::Male),
            1 => Some(Sex::Female),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

/// Demographic attributes of one person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub sex: Option<u8>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default, deserialize_with = "location_id")]
    pub home: Option<String>,
}

/// Static person table for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationSnapshot {
    people: HashMap<String, Person>,
}

impl PopulationSnapshot {
    pub fn new(people: HashMap<String, Person>) -> Self {
        Self { people }
    }

    pub fn total(&self) -> u64 {
        self.people.len() as u64
    }

    pub fn get(&self, person_id: &str) -> Option<&Person> {
        self.people.get(person_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Person)> {
        self.people.iter().map(|(id, p)| (id.as_str(), p))
    }
}

/// Parsed papdata document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PapData {
    #[serde(default)]
    people: HashMap<String, Person>,
    #[serde(default)]
    homes: Map<String, Value>,
    #[serde(default)]
    places: Map<String, Value>,
}

impl PapData {
    /// Read a papdata file, gzip-compressed or not.
    pub fn load(path: &Path, compression: Compression) -> PipelineResult<Self> {
        let reader = open_source(path, compression)?;
        serde_json::from_reader(reader).map_err(|e| {
            PipelineError::decode(
                path.display().to_string(),
                e.column() as u64,
                format!("invalid papdata: {}", e),
            )
        })
    }

    pub fn from_slice(bytes: &[u8]) -> PipelineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn home_ids(&self) -> Vec<String> {
        sorted_keys(&self.homes)
    }

    pub fn place_ids(&self) -> Vec<String> {
        sorted_keys(&self.places)
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot::new(self.people.clone())
    }

    /// Client-facing `{"homes":[..],"places":[..]}` in canonical order, each
    /// location object tagged with its `id`.
    pub fn client_view(&self) -> Value {
        serde_json::json!({
            "homes": tagged(&self.homes),
            "places": tagged(&self.places),
        })
    }

    /// Run inputs with this document's location universe.
    pub fn run_inputs(
        &self,
        run_id: i64,
        simdata: impl Into<PathBuf>,
        patterns: impl Into<PathBuf>,
        length: u64,
    ) -> RunInputs {
        RunInputs::new(run_id, simdata, patterns)
            .with_length(length)
            .with_locations(self.home_ids(), self.place_ids())
    }
}

fn sorted_keys(map: &Map<String, Value>) -> Vec<String> {
    let mut ids: Vec<String> = map.keys().cloned().collect();
    sort_location_ids(&mut ids);
    ids
}

fn tagged(map: &Map<String, Value>) -> Vec<Value> {
    sorted_keys(map)
        .into_iter()
        .map(|id| {
            let mut entry = match map.get(&id) {
                Some(Value::Object(fields)) => fields.clone(),
                Some(other) => {
                    let mut fields = Map::new();
                    fields.insert("value".to_string(), other.clone());
                    fields
                }
                None => Map::new(),
            };
            entry.insert("id".to_string(), Value::String(id));
            Value::Object(entry)
        })
        .collect()
}

/// Home ids appear as strings or bare numbers depending on the generator.
fn location_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
