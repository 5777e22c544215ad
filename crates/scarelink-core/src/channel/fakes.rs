// Scriptable transports for manager and router tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use scarelink_api::{CameraControl, SocketCommand};

use super::{CloudTransport, LinkEvent, LocalHealth, LocalTransport};
use crate::config::ConnectionConfig;

// ── Local ────────────────────────────────────────────────────────────

pub(crate) struct FakeLocal {
    pub probe_ok: AtomicBool,
    pub connect_ok: AtomicBool,
    pub send_ok: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub probes: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sent: Mutex<Vec<SocketCommand>>,
    pub camera: Mutex<Vec<CameraControl>>,
    pub configs: AtomicUsize,
    pub events: broadcast::Sender<LinkEvent>,
    pub health: Mutex<LocalHealth>,
}

impl FakeLocal {
    pub fn new(probe_ok: bool, connect_ok: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            probe_ok: AtomicBool::new(probe_ok),
            connect_ok: AtomicBool::new(connect_ok),
            send_ok: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            probes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            camera: Mutex::new(Vec::new()),
            configs: AtomicUsize::new(0),
            events,
            health: Mutex::new(LocalHealth::default()),
        })
    }

    pub fn reachable() -> Arc<Self> {
        Self::new(true, true)
    }

    pub fn unreachable() -> Arc<Self> {
        Self::new(false, false)
    }

    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.connect_delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len() + self.camera.lock().unwrap().len()
    }

    pub fn set_links(&self, poll: bool, socket: bool) {
        let mut health = self.health.lock().unwrap();
        health.poll.connected = poll;
        health.socket.connected = socket;
    }
}

#[async_trait]
impl LocalTransport for FakeLocal {
    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.probe_ok.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connect_ok.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, command: &SocketCommand) -> bool {
        self.sent.lock().unwrap().push(command.clone());
        self.send_ok.load(Ordering::SeqCst)
    }

    async fn camera_control(&self, control: CameraControl) -> bool {
        self.camera.lock().unwrap().push(control);
        true
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn health(&self) -> LocalHealth {
        self.health.lock().unwrap().clone()
    }

    fn apply_config(&self, _config: Arc<ConnectionConfig>) {
        self.configs.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Cloud ────────────────────────────────────────────────────────────

pub(crate) struct FakeCloud {
    pub connect_ok: AtomicBool,
    pub connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub sent: Mutex<Vec<(String, Map<String, Value>)>>,
    pub configs: AtomicUsize,
    pub events: broadcast::Sender<LinkEvent>,
}

impl FakeCloud {
    pub fn new(connect_ok: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            connect_ok: AtomicBool::new(connect_ok),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            configs: AtomicUsize::new(0),
            events,
        })
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudTransport for FakeCloud {
    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let ok = self.connect_ok.load(Ordering::SeqCst);
        self.connected.store(ok, Ordering::SeqCst);
        ok
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send_command(&self, action: &str, params: Map<String, Value>) -> bool {
        self.sent.lock().unwrap().push((action.to_owned(), params));
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    fn apply_config(&self, _config: Arc<ConnectionConfig>) {
        self.configs.fetch_add(1, Ordering::SeqCst);
    }
}
