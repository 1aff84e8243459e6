//! End-to-end tests: survey CSV → SQLite → pipeline → HTTP

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use wifi_locator::domain::{DeviceId, Payload, UplinkObservation};
use wifi_locator::infra::Metrics;
use wifi_locator::io::importer::import_file;
use wifi_locator::io::{AccessPointRepository, ImportOptions, SqliteRepository};
use wifi_locator::services::{HistoryBuffer, IngestStatus, IngestionPipeline};

const SURVEY: &str = "WigleWifi-1.4,appRelease=2.64,model=Pixel 7\n\
MAC,SSID,AuthMode,FirstSeen,Channel,RSSI,CurrentLatitude,CurrentLongitude,AltitudeMeters,AccuracyMeters,Type\n\
AA:BB:CC:DD:EE:01,north,[WPA2],2024-03-01 10:00:00,6,-70,48.80,2.30,35,5,WIFI\n\
AA:BB:CC:DD:EE:02,south,[WPA2],2024-03-01 10:00:00,6,-70,48.90,2.40,35,5,WIFI\n\
AA:BB:CC:DD:EE:03,east,[WPA2],2024-03-01 10:00:00,6,-70,48.85,2.35,35,5,WIFI\n";

fn import_survey(dir: &TempDir, survey: &str) -> std::path::PathBuf {
    let csv_path = dir.path().join("survey.csv");
    let db_path = dir.path().join("aps.db");
    std::fs::write(&csv_path, survey).unwrap();

    import_file(&csv_path, &db_path, &ImportOptions::default()).unwrap();
    db_path
}

fn build_database(dir: &TempDir) -> std::path::PathBuf {
    import_survey(dir, SURVEY)
}

fn pipeline_for(db_path: &Path) -> IngestionPipeline {
    let repository: Arc<dyn AccessPointRepository> =
        Arc::new(SqliteRepository::open(db_path, 4).unwrap());
    IngestionPipeline::new(repository, Arc::new(HistoryBuffer::default()), Arc::new(Metrics::new()))
}

fn structured(device: &str, fields: Value) -> UplinkObservation {
    UplinkObservation::new(
        DeviceId(device.to_string()),
        Some(Payload::Structured(fields.as_object().cloned().unwrap())),
    )
}

#[tokio::test]
async fn test_imported_database_resolves_uplinks() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline_for(&build_database(&dir));

    let outcome = pipeline
        .process(structured(
            "tracker-1",
            json!({
                "mac_1": "aa-bb-cc-dd-ee-01", "rssi_1": -65,
                "mac_2": "AABBCCDDEE02", "rssi_2": -65,
                "mac_3": "ff:ff:ff:ff:ff:ff", "rssi_3": -30,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, IngestStatus::Success);
    let position = &pipeline.history().snapshot().history[0];
    assert!((position.lat - 48.85).abs() < 1e-9);
    assert!((position.lon - 2.35).abs() < 1e-9);
    assert_eq!(position.aps_count, 2);
}

#[tokio::test]
async fn test_raw_payload_against_sqlite() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline_for(&build_database(&dir));

    // aa:bb:cc:dd:ee:03 at -30 dBm, plus 3 trailing bytes
    let raw = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03, 0xe2, 0x01, 0x02, 0x03];
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    let uplink = UplinkObservation::new(DeviceId("raw".to_string()), Some(Payload::Raw(encoded)));

    let outcome = pipeline.process(uplink).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Success);
    let position = &pipeline.history().snapshot().history[0];
    assert_eq!((position.lat, position.lon), (48.85, 2.35));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion_keeps_last_hundred() {
    // One surveyed access point per device, latitude = device index / 10
    let mut survey = String::from(
        "MAC,SSID,AuthMode,FirstSeen,Channel,RSSI,CurrentLatitude,CurrentLongitude,AltitudeMeters,AccuracyMeters,Type\n",
    );
    for i in 0..120u32 {
        survey.push_str(&format!(
            "02:00:00:00:00:{i:02x},ap{i},[WPA2],2024-03-01 10:00:00,6,-70,{},1.0,0,5,WIFI\n",
            f64::from(i) / 10.0
        ));
    }
    let dir = tempdir().unwrap();
    let pipeline = pipeline_for(&import_survey(&dir, &survey));

    let mut handles = Vec::new();
    for i in 0..120u32 {
        let p = pipeline.clone();
        handles.push(tokio::spawn(async move {
            p.process(structured(
                &format!("dev-{i}"),
                json!({"mac_1": format!("02:00:00:00:00:{i:02x}"), "rssi_1": -50}),
            ))
            .await
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().status, IngestStatus::Success);
    }

    let snapshot = pipeline.history().snapshot();
    assert_eq!(snapshot.count, 100);
    let mut seen: Vec<u32> = snapshot.history.iter().map(|p| (p.lat * 10.0).round() as u32).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 100);
    assert!(seen.iter().all(|&i| i < 120));
    assert_eq!(pipeline.metrics().uplinks_total(), 120);
}

/// Send one HTTP/1.1 request and return (status, body)
async fn http_request(addr: std::net::SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();

    let status: u16 = response.split(' ').nth(1).unwrap().parse().unwrap();
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn test_http_webhook_and_history() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline_for(&build_database(&dir));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(wifi_locator::io::http::serve(listener, pipeline, shutdown_rx));

    let uplink = json!({
        "end_device_ids": {"device_id": "tracker-42"},
        "uplink_message": {"decoded_payload": {"mac_1": "AA:BB:CC:DD:EE:03", "rssi_1": -40}}
    });
    let (status, body) = http_request(addr, "POST", "/ttn-webhook", &uplink.to_string()).await;
    assert_eq!(status, 200);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"status": "success", "history_size": 1}));

    let (status, body) = http_request(addr, "POST", "/ttn-webhook", r#"{"uplink_message": {}}"#).await;
    assert_eq!(status, 200);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"status": "no_data", "history_size": 1}));

    let (status, body) = http_request(addr, "POST", "/ttn-webhook", "{oops").await;
    assert_eq!(status, 400);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["status"], "error");

    let (status, body) = http_request(
        addr,
        "POST",
        "/ttn-webhook",
        r#"{"uplink_message": {"decoded_payload": [1, 2, 3]}}"#,
    )
    .await;
    assert_eq!(status, 400);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["history_size"], 1);

    let (status, body) = http_request(addr, "GET", "/api/data", "").await;
    assert_eq!(status, 200);
    let data: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(data["count"], 1);
    assert_eq!(data["history"][0]["lat"], 48.85);
    assert_eq!(data["history"][0]["aps_count"], 1);
    assert!(data["history"][0]["timestamp"].as_str().unwrap().contains('T'));

    let (status, body) = http_request(addr, "GET", "/health", "").await;
    assert_eq!((status, body.as_str()), (200, "ok"));

    let (status, body) = http_request(addr, "GET", "/metrics", "").await;
    assert_eq!(status, 200);
    assert!(body.contains("wifi_locator_uplinks_total 2"));
    assert!(body.contains("wifi_locator_uplinks_rejected_total 2"));

    let (status, _) = http_request(addr, "GET", "/nope", "").await;
    assert_eq!(status, 404);

    shutdown_tx.send(true).unwrap();
    server.await.unwrap().unwrap();
}
