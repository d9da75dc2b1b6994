//! Statistics pipeline tests: chart invariants and location ingest through
//! the run service.

use std::fs;
use std::io::Write;
use std::sync::Arc;

use epistream_core::decode::Compression;
use epistream_core::model::SUSCEPTIBLE;
use epistream_core::{PapData, PipelineConfig, RunService, StatsStore, TimeRange};
use flate2::write::GzEncoder;
use tempfile::TempDir;

const PAPDATA: &str = r#"{
    "people": {
        "a": {"sex": 0, "age": 2,  "home": 1},
        "b": {"sex": 1, "age": 16, "home": 1},
        "c": {"sex": 0, "age": 35, "home": 2},
        "d": {"sex": 1, "age": 58, "home": 2},
        "e": {"sex": 1, "age": 90, "home": 2}
    },
    "homes": {"1": {}, "2": {}},
    "places": {"10": {}}
}"#;

const SIMDATA: &str = r#"{
    "0":   {},
    "60":  {"flu": {"a": 1}},
    "120": {"flu": {"a": 3, "b": 1}, "covid": {"a": 1, "zz": 1}},
    "180": {"flu": {"a": 16, "c": 7}, "covid": {"d": 33}}
}"#;

const PATTERNS: &str = r#"{
    "0":   {"homes": {"1": ["a", "b"], "2": ["c", "d", "e"]}, "places": {}},
    "60":  {"homes": {"1": ["b"], "2": ["c", "d", "e"]}, "places": {"10": ["a"]}},
    "120": {"homes": {"2": ["c", "d", "e"]}, "places": {"10": ["a", "b"]}},
    "180": {"homes": {"1": ["a", "b"], "2": ["c", "d", "e"]}, "places": {}}
}"#;

fn gzip(text: &str) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    enc.finish().unwrap()
}

fn setup() -> (TempDir, RunService, PapData) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("simdata.json.gz"), gzip(SIMDATA)).unwrap();
    fs::write(dir.path().join("patterns.json"), PATTERNS).unwrap();
    fs::write(dir.path().join("papdata.json"), PAPDATA).unwrap();

    let config = PipelineConfig::default()
        .with_cache_dir(dir.path().join("cache"))
        .with_db_path(dir.path().join("db").join("stats.db"))
        .with_stats_batch_size(2);
    let service = RunService::open(config).unwrap();
    let papdata = PapData::load(&dir.path().join("papdata.json"), Compression::Auto).unwrap();
    (dir, service, papdata)
}

#[tokio::test]
async fn test_susceptible_plus_distinct_infected_is_population() {
    let (dir, service, papdata) = setup();
    let inputs = papdata.run_inputs(
        1,
        dir.path().join("simdata.json.gz"),
        dir.path().join("patterns.json"),
        4,
    );
    let snapshot = Arc::new(papdata.snapshot());
    let chart = service.chart(&inputs, snapshot.clone()).await.unwrap().data;

    // Distinct ids per timestep; "zz" is outside the snapshot.
    let distinct = [0u64, 1, 3, 3];
    assert_eq!(chart.len(), 4);
    for (point, infected) in chart.states.iter().zip(distinct) {
        assert_eq!(point.get(SUSCEPTIBLE) + infected, snapshot.total(), "t={}", point.time);
    }

    let times: Vec<_> = chart.iot.iter().map(|p| p.time).collect();
    assert_eq!(times, vec![0, 60, 120, 180]);

    // 120: a(3) + b(1) under flu, a(1) + zz(1) under covid.
    let t120 = &chart.states[2];
    assert_eq!(t120.get("Infected"), 4);
    assert_eq!(t120.get("Infectious"), 1);
    assert_eq!(chart.ages[2].get("0-4"), 1);
    assert_eq!(chart.ages[2].get("5-17"), 1);
    assert_eq!(chart.ages[2].counts.values().sum::<u64>(), 2);

    // 180: a(16=Recovered), c(7), d(33=Infected|Removed).
    let t180 = &chart.states[3];
    assert_eq!(t180.get("Recovered"), 1);
    assert_eq!(t180.get("Removed"), 1);
    assert_eq!(chart.sexes[3].get("male"), 2);
    assert_eq!(chart.sexes[3].get("female"), 1);
    assert_eq!(chart.iot[0].get("covid"), 0);
}

#[tokio::test]
async fn test_upload_then_location_queries() {
    let (dir, service, papdata) = setup();
    let inputs = papdata.run_inputs(
        2,
        dir.path().join("simdata.json.gz"),
        dir.path().join("patterns.json"),
        4,
    );

    let report = service.on_upload(inputs.clone(), papdata.snapshot()).wait().await;
    assert!(report.is_ok(), "{:?}", report);
    let ingest = report.locations.unwrap();
    assert_eq!(ingest.timesteps, 4);
    assert_eq!(ingest.rows, 9);
    assert_eq!(ingest.batches, 5);

    let store: &StatsStore = service.store();
    assert_eq!(
        store.location_ids(2).unwrap(),
        vec!["home:1", "home:2", "place:10"]
    );

    let home2 = store
        .location_rows(2, "home:2", &TimeRange::new(Some(120), None))
        .unwrap();
    assert_eq!(home2.len(), 2);
    assert_eq!((home2[1].population, home2[1].infected), (3, 2));
    assert_eq!(home2[1].breakdown["covid"]["d"], 33);

    let chart = service
        .location_chart(2, "place:10", TimeRange::default(), Arc::new(papdata.snapshot()))
        .await
        .unwrap();
    assert_eq!(chart.len(), 2);
    assert_eq!(chart.states[1].get(SUSCEPTIBLE), 0);

    // Uploading again replaces rows rather than duplicating them.
    let again = service.on_upload(inputs, papdata.snapshot()).wait().await;
    assert_eq!(again.locations.unwrap().inserted, 9);
    assert_eq!(store.count_location_rows(2).unwrap(), 9);
}

#[tokio::test]
async fn test_cancelled_upload_reports_cancellation() {
    let (dir, service, papdata) = setup();
    let inputs = papdata.run_inputs(
        3,
        dir.path().join("simdata.json.gz"),
        dir.path().join("patterns.json"),
        4,
    );
    let handle = service.on_upload(inputs, papdata.snapshot());
    // The test runtime is single-threaded: no task has started yet.
    handle.cancel();
    let report = handle.wait().await;

    assert!(report.frames.unwrap_err().is_cancellation());
    assert!(report.chart.unwrap_err().is_cancellation());
    assert!(report.locations.unwrap_err().is_cancellation());
    assert!(!service.frames().cache().exists(3));
    assert!(service.store().get_chart(3).unwrap().is_none());
    assert_eq!(service.frames().cache().sweep_temp_files().unwrap(), 0);
}
