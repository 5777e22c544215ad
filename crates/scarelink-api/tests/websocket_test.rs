#![allow(clippy::unwrap_used)]
// Integration tests for `SocketChannel` against a loopback WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use scarelink_api::{
    DeviceAddress, ReconnectConfig, ServoId, SocketChannel, SocketCommand, SocketEvent,
};

// ── Helpers ─────────────────────────────────────────────────────────

const FAST_RECONNECT: ReconnectConfig = ReconnectConfig {
    delay: Duration::from_millis(10),
    max_attempts: 5,
};

async fn next_event(rx: &mut broadcast::Receiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for socket event")
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_telemetry_frames_are_published() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::text(r#"{"type":"telemetry","soilHumidity":55,"motion":false}"#))
            .await
            .unwrap();
        ws.send(Message::text("{broken")).await.unwrap();
        ws.send(Message::text(r#"{"type":"detection","data":{"label":"crow"}}"#))
            .await
            .unwrap();
        // Hold the connection open until the client goes away.
        while ws.next().await.is_some() {}
    });

    let socket = SocketChannel::new();
    let mut events = socket.subscribe();
    assert!(
        socket
            .connect(&DeviceAddress::new("127.0.0.1", port, "/ws"), FAST_RECONNECT)
            .unwrap()
    );

    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);

    let SocketEvent::Telemetry(payload) = next_event(&mut events).await else {
        panic!("expected telemetry");
    };
    assert_eq!(payload.soil_humidity, Some(55.0));
    assert_eq!(payload.motion, Some(false));

    // The malformed frame is dropped; the next event is the detection.
    let SocketEvent::Detection(alert) = next_event(&mut events).await else {
        panic!("expected detection");
    };
    assert_eq!(alert.label.as_deref(), Some("crow"));

    let health = socket.health();
    assert!(health.connected);
    assert_eq!(health.reconnect_attempts, 0);

    socket.shutdown();
}

#[tokio::test]
async fn test_send_writes_frame_while_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (frame_tx, mut frame_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                frame_tx.send(text.as_str().to_owned()).unwrap();
            }
        }
    });

    let socket = SocketChannel::new();
    let mut events = socket.subscribe();
    assert!(!socket.send(&SocketCommand::Alarm));

    socket
        .connect(&DeviceAddress::new("127.0.0.1", port, "/ws"), FAST_RECONNECT)
        .unwrap();
    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);

    assert!(socket.send(&SocketCommand::Servo {
        servo: ServoId::Head,
        angle: 180,
    }));

    let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        value,
        serde_json::json!({"type": "servo", "servo": "head", "angle": 180})
    );

    socket.shutdown();
}

#[tokio::test]
async fn test_reconnect_gives_up_after_cap() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // No further connections will be accepted.
        drop(listener);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let socket = SocketChannel::new();
    let mut events = socket.subscribe();
    socket
        .connect(&DeviceAddress::new("127.0.0.1", port, "/ws"), FAST_RECONNECT)
        .unwrap();

    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);
    assert!(matches!(
        next_event(&mut events).await,
        SocketEvent::Disconnected { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::GaveUp { attempts: 5 }
    );

    let health = socket.health();
    assert!(!health.connected);
    assert_eq!(health.reconnect_attempts, 5);
    assert!(health.last_error.is_some());

    // Nothing further is attempted once the loop has given up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(socket.health().reconnect_attempts, 5);
}

#[tokio::test]
async fn test_disconnect_publishes_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let socket = SocketChannel::new();
    let mut events = socket.subscribe();
    socket
        .connect(&DeviceAddress::new("127.0.0.1", port, "/ws"), FAST_RECONNECT)
        .unwrap();
    assert_eq!(next_event(&mut events).await, SocketEvent::Connected);

    socket.disconnect();
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Disconnected {
            reason: "closed by client".into()
        }
    );
    assert!(!socket.is_open());
    assert!(!socket.send(&SocketCommand::StopAudio));
}
