// scarelink-api: wire-level clients for scarecrow field devices
// (camera board HTTP, actuator board WebSocket, cloud document relay)

pub mod address;
pub mod cloud;
pub mod error;
pub mod health;
pub mod probe;
pub mod status;
pub mod telemetry;
pub mod transport;
pub mod websocket;

pub use address::DeviceAddress;
pub use cloud::{DocumentStore, DocumentStream, RestDocumentStore};
pub use error::Error;
pub use health::{ChannelHealth, HealthTracker};
pub use probe::DeviceProbe;
pub use status::StatusClient;
pub use telemetry::{
    CameraControl, CameraVar, DetectionPayload, ServoId, SocketCommand, TelemetryPayload,
};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ReconnectConfig, SocketChannel, SocketEvent};
