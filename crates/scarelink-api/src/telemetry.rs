// ── Wire payloads ──
//
// Raw shapes exchanged with the on-device controllers. Every sensor field is
// optional on the wire; a field of the wrong JSON type is a hard
// deserialization error rather than a silent default. Validation into domain
// types happens in `scarelink-core`.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

// ── Inbound ──────────────────────────────────────────────────────────

/// Sensor and actuator readings as reported by either controller or the
/// cloud telemetry document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    #[serde(default)]
    pub soil_humidity: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub air_humidity: Option<f64>,
    #[serde(default)]
    pub light_level: Option<f64>,
    #[serde(default)]
    pub motion: Option<bool>,
    #[serde(default)]
    pub servo_left: Option<f64>,
    #[serde(default)]
    pub servo_right: Option<f64>,
    #[serde(default)]
    pub servo_head: Option<f64>,
    #[serde(default)]
    pub track_index: Option<u32>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub playing: Option<bool>,
    #[serde(default)]
    pub detection_enabled: Option<bool>,
    #[serde(default)]
    pub grayscale: Option<bool>,
    #[serde(default)]
    pub birds_detected: Option<u32>,
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub rssi: Option<i32>,
    /// Device-side epoch milliseconds, if the firmware stamps its messages.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A detection alert raised by the on-device vision pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPayload {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A decoded inbound WebSocket frame, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Telemetry(TelemetryPayload),
    Detection(DetectionPayload),
    /// A well-formed frame with a `type` this client does not handle.
    Unrecognized(String),
}

/// Parse a WebSocket text frame.
///
/// Frames are JSON objects with a mandatory string `type`. The payload is
/// either nested under `data` or laid out flat beside `type`.
pub fn parse_frame(text: &str) -> Result<InboundFrame, Error> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| deserialization(&e, text))?;

    let Some(frame_type) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err(Error::Deserialization {
            message: "frame has no string `type` field".into(),
            body: text.to_owned(),
        });
    };
    let frame_type = frame_type.to_owned();

    let body = match value.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => value,
    };

    match frame_type.as_str() {
        "telemetry" | "sensor_data" | "status" => serde_json::from_value(body)
            .map(InboundFrame::Telemetry)
            .map_err(|e| deserialization(&e, text)),
        "detection" | "detection_alert" => serde_json::from_value(body)
            .map(InboundFrame::Detection)
            .map_err(|e| deserialization(&e, text)),
        _ => Ok(InboundFrame::Unrecognized(frame_type)),
    }
}

/// Parse an HTTP status body or a cloud telemetry document.
pub fn parse_telemetry(text: &str) -> Result<TelemetryPayload, Error> {
    serde_json::from_str(text).map_err(|e| deserialization(&e, text))
}

fn deserialization(err: &serde_json::Error, body: &str) -> Error {
    Error::Deserialization {
        message: err.to_string(),
        body: body.to_owned(),
    }
}

// ── Outbound ─────────────────────────────────────────────────────────

/// Physical servo channels on the actuator board.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ServoId {
    Left,
    Right,
    Head,
}

/// Command frames understood by the actuator board's socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketCommand {
    Alarm,
    PlayTrack { track: u32 },
    NextTrack,
    Volume { level: f64 },
    MoveArms,
    StopMovement,
    StopAudio,
    Servo { servo: ServoId, angle: u16 },
    Reset,
}

/// Settings exposed by the camera board's `/control` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CameraVar {
    Framesize,
    Brightness,
    Contrast,
    Grayscale,
    Detection,
    Sensitivity,
    Reboot,
}

/// One `GET /control?var=<var>&val=<value>` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraControl {
    pub var: CameraVar,
    pub value: i32,
}

impl CameraControl {
    pub fn new(var: CameraVar, value: i32) -> Self {
        Self { var, value }
    }
}
