//! Tests de bout en bout du pipeline (API et Nominatim simulés, entrepôt en mémoire)

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use evpoi::PoiRecord;
use evpoi_sync::warehouse::TableRef;
use evpoi_sync::{AppConfig, MemoryWarehouse, Pipeline, PipelineError, RunStatus};
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Carré autour de la City (lon -0.12..-0.07, lat 51.50..51.53)
const CITY: &str = r#"{"type": "Feature", "properties": {"name": "City"}, "geometry": {"type": "Polygon", "coordinates": [[[-0.12, 51.50], [-0.07, 51.50], [-0.07, 51.53], [-0.12, 51.53], [-0.12, 51.50]]]}}"#;

/// Trois stations, un connecteur chacune: deux dans la City (dont une sans
/// localité), une à Westminster
const STATIONS: &str = r#"[
    {
        "ID": 201, "UUID": "GUILDHALL", "NumberOfPoints": 1, "StatusTypeID": 50,
        "AddressInfo": {"ID": 9001, "Title": "Guildhall Yard", "Town": "London", "CountryID": 1,
                        "Latitude": 51.5155, "Longitude": -0.0922},
        "Connections": [{"ID": 7001, "ConnectionTypeID": 25, "PowerKW": 22.0, "Quantity": 1}]
    },
    {
        "ID": 202, "UUID": "BARBICAN", "NumberOfPoints": 1,
        "AddressInfo": {"ID": 9002, "Title": "Barbican Car Park", "Town": null,
                        "Latitude": 51.5200, "Longitude": -0.0900},
        "Connections": [{"ID": 7002, "ConnectionTypeID": 33, "PowerKW": 50.0, "Quantity": 2}]
    },
    {
        "ID": 203, "UUID": "WESTMINSTER", "NumberOfPoints": 1,
        "AddressInfo": {"ID": 9003, "Title": "Parliament Square", "Town": "London",
                        "Latitude": 51.5007, "Longitude": -0.1276},
        "Connections": [{"ID": 7003, "ConnectionTypeID": 25, "PowerKW": 7.0}]
    }
]"#;

struct Fixture {
    server: MockServer,
    boundary: NamedTempFile,
    dir: TempDir,
}

impl Fixture {
    async fn new(boundary: &str) -> Self {
        let server = MockServer::start().await;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", boundary).unwrap();
        Self {
            server,
            boundary: file,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn export_path(&self) -> std::path::PathBuf {
        self.dir.path().join("geo_london.csv")
    }

    fn config(&self) -> AppConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("OCM_API_KEY", "test-key".to_string()),
            ("OCM_BASE_URL", format!("{}/v3/poi/", self.server.uri())),
            ("NOMINATIM_BASE_URL", self.server.uri()),
            ("NOMINATIM_USER_AGENT", "evpoi-tests".to_string()),
            ("BOUNDARY_FILE", self.boundary.path().display().to_string()),
            ("EXPORT_PATH", self.export_path().display().to_string()),
            ("WAREHOUSE_BACKEND", "memory".to_string()),
        ]);
        AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    async fn mount_stations(&self, body: &str) {
        Mock::given(method("GET"))
            .and(path("/v3/poi/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_reverse(&self) {
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"address": {"town": "Testville"}})),
            )
            .mount(&self.server)
            .await;
    }
}

fn target() -> TableRef {
    TableRef::new("data_ev", "ev_tbl").unwrap()
}

fn staging() -> TableRef {
    TableRef::new("staging_ev", "staging_tbl").unwrap()
}

fn read_export(path: &Path) -> Vec<PoiRecord> {
    csv::Reader::from_path(path)
        .unwrap()
        .deserialize()
        .map(|r| r.unwrap())
        .collect()
}

#[tokio::test]
async fn test_end_to_end_filters_backfills_exports_and_syncs() {
    let fixture = Fixture::new(CITY).await;
    fixture.mount_stations(STATIONS).await;
    fixture.mount_reverse().await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();
    let mut report = pipeline.new_report();
    pipeline.run(&mut report).await.unwrap();
    report.finalize();

    let exported = read_export(&fixture.export_path());
    assert_eq!(exported.len(), 2);
    assert!(exported.iter().all(|r| r.town.is_some()));
    let barbican = exported.iter().find(|r| r.uuid == "BARBICAN").unwrap();
    assert_eq!(barbican.town.as_deref(), Some("Testville"));
    assert!(!exported.iter().any(|r| r.uuid == "WESTMINSTER"));

    let rows = warehouse.rows(&target());
    assert_eq!(rows.len(), 2);
    assert!(!warehouse.contains_table(&staging()));

    assert_eq!(report.stations_fetched, 3);
    assert_eq!(report.records_in_boundary, 2);
    assert_eq!(report.backfill.attempted, 1);
    assert_eq!(report.backfill.resolved, 1);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.sync.as_ref().unwrap().merged_rows, 2);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fixture = Fixture::new(CITY).await;
    fixture.mount_stations(STATIONS).await;
    fixture.mount_reverse().await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();

    let mut first = pipeline.new_report();
    pipeline.run(&mut first).await.unwrap();
    let once = warehouse.rows(&target());

    let mut second = pipeline.new_report();
    pipeline.run(&mut second).await.unwrap();
    assert_eq!(warehouse.rows(&target()), once);
}

#[tokio::test]
async fn test_upstream_error_aborts_before_export_and_sync() {
    let fixture = Fixture::new(CITY).await;
    Mock::given(method("GET"))
        .and(path("/v3/poi/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&fixture.server)
        .await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();
    let mut report = pipeline.new_report();
    let err = pipeline.run(&mut report).await.unwrap_err();

    assert!(matches!(err, PipelineError::Source(_)));
    assert!(err.to_string().contains("503"));
    assert!(!fixture.export_path().exists());
    assert!(!warehouse.contains_table(&target()));
}

#[tokio::test]
async fn test_boundary_in_other_crs_is_configuration_error() {
    let projected = r#"{"type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::27700"}},
        "features": [{"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
            "coordinates": [[[530000, 180000], [535000, 180000], [535000, 183000], [530000, 180000]]]}}]}"#;
    let fixture = Fixture::new(projected).await;
    // la limite est rejetée avant tout appel à l'API
    Mock::given(method("GET"))
        .and(path("/v3/poi/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STATIONS))
        .expect(0)
        .mount(&fixture.server)
        .await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();
    let mut report = pipeline.new_report();
    let err = pipeline.run(&mut report).await.unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(err.to_string().contains("EPSG:27700"));
    assert_eq!(report.stations_fetched, 0);
    let requests = fixture.server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/v3/poi/"));
    assert!(!fixture.export_path().exists());
    assert!(!warehouse.contains_table(&target()));
}

#[tokio::test]
async fn test_nothing_in_boundary_exports_header_and_skips_sync() {
    let fixture = Fixture::new(CITY).await;
    fixture
        .mount_stations(
            r#"[{"ID": 1, "UUID": "FAR", "AddressInfo": {"Latitude": 55.95, "Longitude": -3.19},
                 "Connections": [{"ID": 1}]}]"#,
        )
        .await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();
    let mut report = pipeline.new_report();
    pipeline.run(&mut report).await.unwrap();
    report.finalize();

    assert!(read_export(&fixture.export_path()).is_empty());
    assert!(!warehouse.contains_table(&target()));
    assert_eq!(report.status, RunStatus::NothingToSync);
}

#[tokio::test]
async fn test_empty_source_does_nothing() {
    let fixture = Fixture::new(CITY).await;
    fixture.mount_stations("[]").await;

    let warehouse = MemoryWarehouse::new();
    let mut pipeline = Pipeline::from_config(&fixture.config(), warehouse.clone()).unwrap();
    let mut report = pipeline.new_report();
    pipeline.run(&mut report).await.unwrap();

    assert_eq!(report.stations_fetched, 0);
    assert!(!fixture.export_path().exists());
    assert!(!warehouse.contains_table(&target()));
}
