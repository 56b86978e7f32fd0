use sensorshell::domain::{EventBatch, EventRecord};
use sensorshell::reliability::{
    ACTIVE_FILE, OfflineConfig, OfflineRecovery, OfflineStore, PromoteOutcome,
    READY_FILE, RecoveryOutcome, parse_records, serialize_record,
};
use sensorshell::sender::{ClientConfig, HttpClient};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn open_store(dir: &TempDir) -> OfflineStore {
    OfflineStore::open(OfflineConfig {
        directory: dir.path().to_path_buf(),
        queue_capacity: 4,
    })
    .await
    .unwrap()
}

fn record(ts: i64) -> EventRecord {
    EventRecord::new(ts, ts)
        .with_tool("Eclipse")
        .with_sensor_data_type("DevEvent")
        .with_property("Note", "line one\nline two & <three>")
}

async fn collector() -> (MockServer, HttpClient) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sensorbase/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sensorbase/sensordata"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let client = HttpClient::new(ClientConfig {
        host: format!("{}/sensorbase/", server.uri()),
        ..Default::default()
    })
    .unwrap();
    (server, client)
}

#[tokio::test]
async fn test_concurrent_stores_are_all_written() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);

    let handles: Vec<_> = (0..8)
        .map(|task| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    let batch: EventBatch = std::iter::once(record(task * 100 + i)).collect();
                    store.store(batch).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    store.flush().await.unwrap();

    let text = std::fs::read_to_string(dir.path().join(ACTIVE_FILE)).unwrap();
    let parsed = parse_records(&text);
    assert_eq!(parsed.records.len(), 80);
    assert_eq!(parsed.skipped, 0);
    assert_eq!(parsed.records[0].property("Note"), Some("line one\nline two & <three>"));
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_crash_tail_is_skipped_on_recovery() {
    let dir = TempDir::new().unwrap();
    let mut text = serialize_record(&record(1));
    text.push_str(&serialize_record(&record(2)));
    let torn = serialize_record(&record(3));
    text.push_str(&torn[..torn.len() / 2]);
    std::fs::write(dir.path().join(ACTIVE_FILE), text).unwrap();

    let store = open_store(&dir).await;
    assert!(store.has_offline_data().await);

    let (_server, client) = collector().await;
    let outcome = store
        .recover(&client, client.host(), Duration::from_secs(1))
        .await;
    assert_eq!(outcome, RecoveryOutcome::Recovered { sent: 2, deferred: 0 });
    assert!(!dir.path().join(READY_FILE).exists());
    assert!(!store.has_offline_data().await);
}

#[tokio::test]
async fn test_existing_ready_file_is_consumed_before_promotion() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(READY_FILE), serialize_record(&record(1))).unwrap();

    let store = open_store(&dir).await;
    store
        .store(std::iter::once(record(2)).collect())
        .await
        .unwrap();
    store.flush().await.unwrap();
    assert_eq!(store.promote().await.unwrap(), PromoteOutcome::AlreadyReady);

    let (_server, client) = collector().await;
    let first = store
        .recover(&client, client.host(), Duration::from_secs(1))
        .await;
    assert_eq!(first, RecoveryOutcome::Recovered { sent: 1, deferred: 0 });
    assert!(dir.path().join(ACTIVE_FILE).exists());

    let second = store
        .recover(&client, client.host(), Duration::from_secs(1))
        .await;
    assert_eq!(second, RecoveryOutcome::Recovered { sent: 1, deferred: 0 });
    assert!(!store.has_offline_data().await);
    assert_eq!(client.stats().successful_requests, 2);
}

#[tokio::test]
async fn test_recovery_job_against_http_collector() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);
    store
        .store((1..=3).map(record).collect())
        .await
        .unwrap();

    let (_server, client) = collector().await;
    let host = client.host().to_string();
    let job = Arc::new(OfflineRecovery::new(
        store.clone(),
        Arc::new(client),
        host,
        Duration::from_secs(1),
    ));

    let permit = store.post_guard().try_acquire().unwrap();
    assert_eq!(job.run_once().await, RecoveryOutcome::AlreadyRunning);
    drop(permit);

    assert_eq!(
        job.clone().spawn_once().await.unwrap(),
        RecoveryOutcome::Recovered { sent: 3, deferred: 0 }
    );
    assert_eq!(job.run_once().await, RecoveryOutcome::NothingToRecover);
}
