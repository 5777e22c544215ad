// ── Wire-to-domain conversions ──
//
// Bridges `scarelink_api` payloads into validated domain types. A payload
// either becomes a complete snapshot or is rejected; a bad reading is never
// clamped or zeroed.

use chrono::{DateTime, Utc};
use thiserror::Error;

use scarelink_api::{DetectionPayload, TelemetryPayload};

use crate::model::{DetectionAlert, TelemetrySnapshot, TelemetrySource};

/// Why a telemetry payload was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────

fn bounded(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<Option<f64>, TelemetryError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if !value.is_finite() {
        return Err(TelemetryError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(TelemetryError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(Some(value))
}

fn percent(field: &'static str, value: Option<f64>) -> Result<Option<f64>, TelemetryError> {
    bounded(field, value, 0.0, 100.0)
}

fn servo(field: &'static str, value: Option<f64>) -> Result<Option<f64>, TelemetryError> {
    bounded(field, value, 0.0, 180.0)
}

fn epoch_millis(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(DateTime::from_timestamp_millis)
}

// ── Telemetry ──────────────────────────────────────────────────────

/// Validate a payload into a snapshot stamped with the current time.
pub fn snapshot_from_payload(
    payload: TelemetryPayload,
    source: TelemetrySource,
) -> Result<TelemetrySnapshot, TelemetryError> {
    Ok(TelemetrySnapshot {
        soil_humidity: percent("soilHumidity", payload.soil_humidity)?,
        temperature: bounded("temperature", payload.temperature, -50.0, 100.0)?,
        air_humidity: percent("airHumidity", payload.air_humidity)?,
        light_level: bounded("lightLevel", payload.light_level, 0.0, f64::MAX)?,
        motion: payload.motion,
        servo_left: servo("servoLeft", payload.servo_left)?,
        servo_right: servo("servoRight", payload.servo_right)?,
        servo_head: servo("servoHead", payload.servo_head)?,
        track_index: payload.track_index,
        volume: bounded("volume", payload.volume, 0.0, 1.0)?,
        playing: payload.playing,
        detection_enabled: payload.detection_enabled,
        grayscale: payload.grayscale,
        birds_detected: payload.birds_detected,
        uptime_secs: payload.uptime,
        rssi: payload.rssi,
        source,
        received_at: Utc::now(),
        device_time: epoch_millis(payload.timestamp),
    })
}

// ── Detection ──────────────────────────────────────────────────────

impl From<DetectionPayload> for DetectionAlert {
    fn from(p: DetectionPayload) -> Self {
        Self {
            label: p.label.unwrap_or_else(|| "bird".into()),
            confidence: p.confidence.filter(|c| c.is_finite()),
            count: p.count.unwrap_or(1),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_payload_leaves_fields_unknown() {
        let payload = TelemetryPayload {
            soil_humidity: Some(55.0),
            motion: Some(false),
            ..TelemetryPayload::default()
        };
        let snap = snapshot_from_payload(payload, TelemetrySource::Poll).unwrap();

        assert_eq!(snap.soil_humidity, Some(55.0));
        assert_eq!(snap.motion, Some(false));
        assert_eq!(snap.temperature, None);
        assert_eq!(snap.servo_head, None);
        assert_eq!(snap.source, TelemetrySource::Poll);
    }

    #[test]
    fn out_of_range_reading_is_rejected() {
        let payload = TelemetryPayload {
            soil_humidity: Some(140.0),
            ..TelemetryPayload::default()
        };
        let err = snapshot_from_payload(payload, TelemetrySource::Socket).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::OutOfRange {
                field: "soilHumidity",
                ..
            }
        ));
    }

    #[test]
    fn device_timestamp_is_epoch_millis() {
        let payload = TelemetryPayload {
            timestamp: Some(1_700_000_000_000),
            ..TelemetryPayload::default()
        };
        let snap = snapshot_from_payload(payload, TelemetrySource::Cloud).unwrap();
        assert_eq!(
            snap.device_time.unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn detection_defaults() {
        let alert = DetectionAlert::from(DetectionPayload::default());
        assert_eq!(alert.label, "bird");
        assert_eq!(alert.count, 1);
    }
}
