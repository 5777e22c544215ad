// ── Telemetry snapshot ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

/// Which path a snapshot arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TelemetrySource {
    /// Camera board status poll.
    Poll,
    /// Actuator board WebSocket.
    Socket,
    /// Cloud telemetry document.
    Cloud,
}

/// Last-known device state.
///
/// Every field is `None` when the message that produced the snapshot did
/// not carry it. A snapshot is never patched: each inbound message yields a
/// new one that replaces the previous wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Soil moisture, percent.
    pub soil_humidity: Option<f64>,
    /// Air temperature, °C.
    pub temperature: Option<f64>,
    /// Relative air humidity, percent.
    pub air_humidity: Option<f64>,
    /// Ambient light, raw sensor units.
    pub light_level: Option<f64>,
    pub motion: Option<bool>,

    // Servo angles, degrees.
    pub servo_left: Option<f64>,
    pub servo_right: Option<f64>,
    pub servo_head: Option<f64>,

    pub track_index: Option<u32>,
    /// 0.0 ..= 1.0
    pub volume: Option<f64>,
    pub playing: Option<bool>,

    pub detection_enabled: Option<bool>,
    pub grayscale: Option<bool>,
    pub birds_detected: Option<u32>,

    pub uptime_secs: Option<u64>,
    pub rssi: Option<i32>,

    pub source: TelemetrySource,
    /// When this process received the message.
    pub received_at: DateTime<Utc>,
    /// When the device stamped it, if it did.
    pub device_time: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    /// A snapshot with every reading unknown.
    pub fn empty(source: TelemetrySource) -> Self {
        Self {
            soil_humidity: None,
            temperature: None,
            air_humidity: None,
            light_level: None,
            motion: None,
            servo_left: None,
            servo_right: None,
            servo_head: None,
            track_index: None,
            volume: None,
            playing: None,
            detection_enabled: None,
            grayscale: None,
            birds_detected: None,
            uptime_secs: None,
            rssi: None,
            source,
            received_at: Utc::now(),
            device_time: None,
        }
    }
}

/// A detection raised by the on-device vision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionAlert {
    pub label: String,
    pub confidence: Option<f64>,
    pub count: u32,
    pub received_at: DateTime<Utc>,
}
