//! Real listeners: binding, bind failures, HTTPS setup and status subscriptions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use engine_host::lifecycle::mode::OperatingMode;
use engine_host::lifecycle::{EngineLauncher, Orchestrator, StartupError};
use engine_host::worker::{LocalQueueFactory, LoggingHandler};

mod common;
use common::*;

fn launcher() -> EngineLauncher {
    let factory = Arc::new(LocalQueueFactory::new(
        Default::default(),
        Arc::new(LoggingHandler),
    ));
    EngineLauncher::new(factory)
}

#[tokio::test]
async fn server_only_listens_and_starts_no_workers() {
    let orchestrator = Orchestrator::new(test_config(OperatingMode::ServerOnly), launcher());
    let started = orchestrator.start().await.unwrap();

    assert!(started.queues.is_empty());
    assert!(orchestrator.coordinator().handles().is_empty());

    let port = started.server.as_ref().unwrap().local_addr().port();
    let response = reqwest::get(format!("http://127.0.0.1:{port}/system/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-engine-mode"], "server_only");

    let report = orchestrator.shutdown(started, "test").await;
    assert!(report.queues.is_empty());
    assert_eq!(report.exit_code(), 0);

    // Stopped servers refuse new connections.
    let result = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/system/health"))
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn worker_only_binds_nothing() {
    let orchestrator = Orchestrator::new(test_config(OperatingMode::WorkerOnly), launcher());
    let started = orchestrator.start().await.unwrap();
    assert!(started.server.is_none());
    assert_eq!(started.queues.len(), 8);
    orchestrator.shutdown(started, "test").await;
}

#[tokio::test]
async fn occupied_port_is_a_fatal_bind_error() {
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let mut config = test_config(OperatingMode::ServerOnly);
    config.listener.port = port;
    let orchestrator = Orchestrator::new(config, launcher());

    let err = orchestrator
        .run(std::future::pending::<()>())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StartupError::Bind(_)));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn missing_tls_material_is_fatal() {
    let mut config = test_config(OperatingMode::ServerOnly);
    config.listener.https.enabled = true;
    config.listener.https.cert_path = "/nonexistent/cert.pem".to_string();
    config.listener.https.key_path = "/nonexistent/key.pem".to_string();
    let orchestrator = Orchestrator::new(config, launcher());

    let err = orchestrator.start().await.err().unwrap();
    assert!(matches!(err, StartupError::Tls(_)));
    assert_eq!(err.exit_code(), 1);
}

fn tls_fixture(name: &str) -> String {
    format!("{}/tests/fixtures/tls/{name}", env!("CARGO_MANIFEST_DIR"))
}

#[tokio::test]
async fn https_serves_with_encrypted_key_and_stops() {
    let mut config = test_config(OperatingMode::ServerOnly);
    config.listener.https.enabled = true;
    config.listener.https.cert_path = tls_fixture("cert.pem");
    config.listener.https.key_path = tls_fixture("key.encrypted.pem");
    config.listener.https.passphrase = Some("engine-secret".to_string());
    let orchestrator = Orchestrator::new(config, launcher());
    let started = orchestrator.start().await.unwrap();
    let port = started.server.as_ref().unwrap().local_addr().port();

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let url = format!("https://127.0.0.1:{port}/system/health");

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("strict-transport-security"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Plain HTTP is not spoken on the TLS port.
    let plain = client
        .get(format!("http://127.0.0.1:{port}/system/health"))
        .send()
        .await;
    assert!(plain.map(|r| !r.status().is_success()).unwrap_or(true));

    let report = orchestrator.shutdown(started, "test").await;
    assert_eq!(report.exit_code(), 0);

    let fresh = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    assert!(fresh.get(&url).send().await.is_err());
}

#[tokio::test]
async fn encrypted_key_without_passphrase_is_fatal() {
    let mut config = test_config(OperatingMode::ServerOnly);
    config.listener.https.enabled = true;
    config.listener.https.cert_path = tls_fixture("cert.pem");
    config.listener.https.key_path = tls_fixture("key.encrypted.pem");
    let orchestrator = Orchestrator::new(config, launcher());

    let err = orchestrator.start().await.err().unwrap();
    assert!(matches!(err, StartupError::Tls(_)));
}

#[tokio::test]
async fn status_subscribers_receive_notifications() {
    let launcher = launcher();
    let connections = launcher.connections();
    let orchestrator = Orchestrator::new(test_config(OperatingMode::ServerOnly), launcher);
    let started = orchestrator.start().await.unwrap();
    let port = started.server.as_ref().unwrap().local_addr().port();

    let url = format!("ws://127.0.0.1:{port}/transaction/status/ws/req-42?access_token={TOKEN}");
    let (mut socket, _) = connect_async(url.as_str()).await.unwrap();

    let ack = socket.next().await.unwrap().unwrap();
    let ack: serde_json::Value = serde_json::from_str(ack.to_text().unwrap()).unwrap();
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(connections.subscribed("req-42"), 1);

    let delivered = connections.notify("req-42", &json!({ "status": "mined" }));
    assert_eq!(delivered, 1);
    let update = socket.next().await.unwrap().unwrap();
    assert_eq!(update.to_text().unwrap(), r#"{"status":"mined"}"#);

    socket.send(Message::Close(None)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while connections.count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    orchestrator.shutdown(started, "test").await;
}

#[tokio::test]
async fn subscription_requires_a_token() {
    let orchestrator = Orchestrator::new(test_config(OperatingMode::ServerOnly), launcher());
    let started = orchestrator.start().await.unwrap();
    let port = started.server.as_ref().unwrap().local_addr().port();

    let url = format!("ws://127.0.0.1:{port}/transaction/status/ws/req-1");
    assert!(connect_async(url.as_str()).await.is_err());

    orchestrator.shutdown(started, "test").await;
}
