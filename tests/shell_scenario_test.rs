use sensorshell::app::{App, ShellProperties};
use sensorshell::reliability::{ACTIVE_FILE, READY_FILE, RecoveryOutcome, parse_records};
use sensorshell::sender::{ClientConfig, HttpClient};
use sensorshell::shell::{Shell, ShellError};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWrite;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn properties_for(server: &MockServer, dir: &TempDir) -> ShellProperties {
    ShellProperties {
        host: format!("{}/sensorbase/", server.uri()),
        ping_timeout: Duration::from_secs(1),
        timeout: Duration::from_secs(2),
        offline_dir: dir.path().to_path_buf(),
        autosend_interval: Duration::ZERO,
        autosend_max_buffer: 3,
        ..ShellProperties::default()
    }
}

fn transport_for(properties: &ShellProperties) -> Arc<HttpClient> {
    Arc::new(
        HttpClient::new(ClientConfig {
            host: properties.host.clone(),
            timeout: properties.timeout,
            ..Default::default()
        })
        .unwrap(),
    )
}

async fn mount_collector(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/sensorbase/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sensorbase/sensordata"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn event(n: usize) -> Vec<(String, String)> {
    vec![
        ("Tool".to_string(), "Eclipse".to_string()),
        ("SensorDataType".to_string(), "DevEvent".to_string()),
        ("URI".to_string(), format!("/src/File{n}.java")),
        ("Type".to_string(), "Edit".to_string()),
    ]
}

#[tokio::test]
async fn test_unreachable_then_recovered() {
    // Nothing mounted: every request is a 404, so the ping fails.
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let properties = properties_for(&server, &dir);
    let transport = transport_for(&properties);
    let shell = Shell::start(properties, transport.clone()).await.unwrap();

    for n in 0..4 {
        shell.add(event(n)).await.unwrap();
    }
    assert_eq!(shell.queued_len().await, 0);
    assert!(shell.has_offline_data().await);
    assert_eq!(transport.stats().total_requests, 0);

    mount_collector(&server).await;
    assert_eq!(
        shell.recover().await,
        RecoveryOutcome::Recovered { sent: 4, deferred: 0 }
    );
    assert!(!dir.path().join(READY_FILE).exists());
    assert!(!shell.has_offline_data().await);
    assert_eq!(transport.stats().successful_requests, 4);

    assert_eq!(shell.quit().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_without_offline_data_skips_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let properties = properties_for(&server, &dir);
    let transport = transport_for(&properties);
    let shell = Shell::start(properties, transport.clone()).await.unwrap();

    assert_eq!(shell.recover().await, RecoveryOutcome::NothingToRecover);
    let stats = transport.stats();
    assert_eq!(stats.pings, 0);
    assert_eq!(stats.total_requests, 0);
    shell.quit().await.unwrap();
}

#[tokio::test]
async fn test_data_loss_without_offline_cache() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let properties = ShellProperties {
        offline_cache_enabled: false,
        offline_recovery_enabled: false,
        autosend_max_buffer: 0,
        ..properties_for(&server, &dir)
    };
    let shell = Shell::start(properties.clone(), transport_for(&properties))
        .await
        .unwrap();

    shell.add(event(1)).await.unwrap();
    shell.add(event(2)).await.unwrap();
    match shell.send().await {
        Err(ShellError::DataLost { count, .. }) => assert_eq!(count, 2),
        other => panic!("expected data loss, got {other:?}"),
    }
    assert!(!shell.has_offline_data().await);
    assert!(!dir.path().join("active.sensordata").exists());
}

#[tokio::test]
async fn test_multishell_delivers_everything() {
    let server = MockServer::start().await;
    mount_collector(&server).await;
    let dir = TempDir::new().unwrap();
    let properties = ShellProperties {
        multishell_enabled: true,
        multishell_num_shells: 3,
        multishell_batch_size: 2,
        multishell_autosend_interval: Duration::ZERO,
        ..properties_for(&server, &dir)
    }
    .normalized();
    let transport = transport_for(&properties);
    let shell = Shell::start(properties, transport.clone()).await.unwrap();

    for n in 0..12 {
        shell.add(event(n)).await.unwrap();
    }
    assert_eq!(shell.send().await.unwrap(), 12);
    assert!(!shell.has_offline_data().await);
    assert_eq!(transport.stats().successful_requests, 12);
    shell.quit().await.unwrap();
}

#[tokio::test]
async fn test_command_loop_end_to_end() {
    let server = MockServer::start().await;
    mount_collector(&server).await;
    let dir = TempDir::new().unwrap();
    let properties = ShellProperties {
        autosend_max_buffer: 0,
        ..properties_for(&server, &dir)
    };

    let app = App::from_properties(properties).await.unwrap();
    let input: &[u8] = b"add#Tool=Eclipse#Type=Edit\nadd#Tool=Eclipse#Type=Save\n\nbogus\nsend\nping\nhasOfflineData\nquit\nadd#Tool=ignored\n";
    let mut output = Vec::new();
    app.run(input, &mut output).await.unwrap();

    let output = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "OK: added");
    assert_eq!(lines[1], "OK: added");
    assert!(lines[2].starts_with("ERROR: Unknown command 'bogus'"));
    assert_eq!(lines[3], "OK: sent 2 records");
    assert!(lines[4].ends_with("is reachable"));
    assert_eq!(lines[5], "OK: false");
    assert!(lines[6].starts_with("OK: sent 0 records"));
    assert_eq!(lines.len(), 7);
}

#[tokio::test]
async fn test_command_loop_quits_on_end_of_input() {
    let server = MockServer::start().await;
    mount_collector(&server).await;
    let dir = TempDir::new().unwrap();
    let properties = ShellProperties {
        autosend_max_buffer: 0,
        ..properties_for(&server, &dir)
    };

    let app = App::from_properties(properties).await.unwrap();
    let input: &[u8] = b"add#Tool=Eclipse\n";
    let mut output = Vec::new();
    app.run(input, &mut output).await.unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.ends_with("OK: sent 1 records, shell stopped\n"));
}

/// Output whose reader has gone away.
struct ClosedOutput;

impl AsyncWrite for ClosedOutput {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_closed_output_still_quits_shell() {
    // Nothing mounted: the collector is unreachable, so quit stores offline.
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = App::from_properties(properties_for(&server, &dir)).await.unwrap();

    let input: &[u8] = b"add#Tool=Eclipse#Type=Edit\nadd#Tool=Eclipse#Type=Save\n";
    let result = app.run(input, ClosedOutput).await;
    assert!(result.is_err());

    let text = std::fs::read_to_string(dir.path().join(ACTIVE_FILE)).unwrap();
    assert_eq!(parse_records(&text).records.len(), 1);
}
