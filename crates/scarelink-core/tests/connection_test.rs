#![allow(clippy::unwrap_used)]
// End-to-end arbitration over the real channels: wiremock stands in for the
// camera board and the cloud relay, a loopback server for the actuator socket.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scarelink_core::{
    CloudConfig, ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionMode,
    DeviceAddress, ManagerState,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn address_of(server: &MockServer, path: &str) -> DeviceAddress {
    let url = Url::parse(&server.uri()).unwrap();
    DeviceAddress::new(url.host_str().unwrap(), url.port().unwrap(), path)
}

/// A loopback port with nothing listening on it.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Accepts WebSocket clients and holds them open.
async fn socket_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while ws.next().await.is_some() {}
            });
        }
    });
    port
}

fn setup(status: DeviceAddress, socket: DeviceAddress) -> ConnectionConfig {
    ConnectionConfig {
        status_address: status,
        socket_address: socket,
        poll_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(2),
        reconnect_interval: Duration::from_millis(20),
        ..ConnectionConfig::default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_local_device_wins_arbitration() {
    let camera = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"soilHumidity": 55, "motion": false})),
        )
        .mount(&camera)
        .await;
    let socket_port = socket_server().await;

    let config = setup(
        address_of(&camera, "/status"),
        DeviceAddress::new("127.0.0.1", socket_port, "/ws"),
    );
    let manager = ConnectionManager::from_config(config).unwrap();
    let mut events = manager.subscribe();
    let mut telemetry = manager.cache().subscribe();

    assert_eq!(manager.initialize().await, ConnectionMode::Local);
    assert_eq!(
        events.recv().await.unwrap(),
        ConnectionEvent::new(ConnectionMode::Local, true)
    );

    let snapshot = match telemetry.current().cloned() {
        Some(snapshot) => snapshot,
        None => tokio::time::timeout(Duration::from_secs(5), telemetry.changed())
            .await
            .unwrap()
            .unwrap(),
    };
    assert_eq!(snapshot.soil_humidity, Some(55.0));
    assert_eq!(snapshot.motion, Some(false));

    let health = manager.local_health();
    assert!(health.socket.connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_device_falls_back_to_cloud() {
    let relay = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/scarecrow-1/presence.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"lastSeen": 0})))
        .mount(&relay)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/scarecrow-1/telemetry.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: keep-alive\ndata: null\n\n"),
        )
        .mount(&relay)
        .await;
    Mock::given(method("POST"))
        .and(path("/devices/scarecrow-1/commands.json"))
        .and(body_partial_json(json!({
            "action": "SET_VOLUME",
            "params": {"volume": 0.5},
            "status": "pending"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "-Ncmd1"})))
        .expect(1)
        .mount(&relay)
        .await;

    let port = closed_port().await;
    let config = setup(
        DeviceAddress::new("127.0.0.1", port, "/status"),
        DeviceAddress::new("127.0.0.1", port, "/ws"),
    )
    .with_cloud(CloudConfig::new(
        Url::parse(&relay.uri()).unwrap(),
        "scarecrow-1",
    ));
    let manager = ConnectionManager::from_config(config).unwrap();
    let mut events = manager.subscribe();

    assert_eq!(manager.initialize().await, ConnectionMode::Remote);
    assert_eq!(manager.state(), ManagerState::Remote);
    assert_eq!(
        events.recv().await.unwrap(),
        ConnectionEvent::new(ConnectionMode::Remote, true)
    );

    let result = manager.router().send_command("SET_VOLUME", Some(0.5)).await;
    assert!(result.success, "{:?}", result.error);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_nothing_reachable_ends_disconnected() {
    let port = closed_port().await;
    let config = setup(
        DeviceAddress::new("127.0.0.1", port, "/status"),
        DeviceAddress::new("127.0.0.1", port, "/ws"),
    );
    let manager = ConnectionManager::from_config(config).unwrap();
    let mut events = manager.subscribe();

    assert_eq!(manager.initialize().await, ConnectionMode::None);
    assert_eq!(
        events.recv().await.unwrap(),
        ConnectionEvent::new(ConnectionMode::None, false)
    );

    let result = manager.router().send_command("SOUND_ALARM", None).await;
    assert!(!result.success);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let port = closed_port().await;
    let config = setup(
        DeviceAddress::new("127.0.0.1", port, "/status"),
        DeviceAddress::new("127.0.0.1", port, "/ws"),
    );
    let manager = ConnectionManager::from_config(config).unwrap();

    let result = manager.router().send_command("FOO", None).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().to_string(), "unknown command");
}
