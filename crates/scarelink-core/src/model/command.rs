// ── Commands ──
//
// The semantic command vocabulary. Names are the wire names used by the
// cloud relay (`SOUND_ALARM`, `SET_VOLUME`, ...); `CommandRouter` decides
// what each one becomes on the live transport.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use scarelink_api::ServoId;

/// Every command the device understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    SoundAlarm,
    PlayTrack,
    NextTrack,
    SetVolume,
    MoveArms,
    StopMovement,
    StopAudio,
    StopAll,
    SetServoAngle,
    RotateHeadLeft,
    RotateHeadCenter,
    RotateHeadRight,
    ToggleDetection,
    SetSensitivity,
    SetBrightness,
    SetContrast,
    SetResolution,
    ToggleGrayscale,
    ResetSystem,
}

/// Accepted range of a command's value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

impl ValueRange {
    const fn int(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            integer: true,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite()
            && value >= self.min
            && value <= self.max
            && (!self.integer || value.fract().abs() < f64::EPSILON)
    }
}

impl CommandKind {
    /// The value this command requires, if any.
    pub fn value_range(self) -> Option<ValueRange> {
        match self {
            Self::SetVolume => Some(ValueRange {
                min: 0.0,
                max: 1.0,
                integer: false,
            }),
            Self::PlayTrack => Some(ValueRange::int(1.0, f64::from(u16::MAX))),
            Self::SetServoAngle => Some(ValueRange::int(0.0, 180.0)),
            Self::SetBrightness | Self::SetContrast => Some(ValueRange::int(-2.0, 2.0)),
            Self::SetSensitivity => Some(ValueRange::int(0.0, 100.0)),
            Self::SetResolution => Some(ValueRange::int(0.0, 13.0)),
            _ => None,
        }
    }

    pub fn needs_servo(self) -> bool {
        self == Self::SetServoAngle
    }
}

/// One command invocation. Built per call, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub kind: CommandKind,
    pub value: Option<f64>,
    pub servo: Option<ServoId>,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            value: None,
            servo: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_servo(mut self, servo: ServoId) -> Self {
        self.servo = Some(servo);
        self
    }

    /// The value, checked against the command's range.
    pub fn checked_value(&self) -> Result<Option<f64>, CommandError> {
        let Some(range) = self.kind.value_range() else {
            return Ok(None);
        };
        let value = self.value.ok_or(CommandError::MissingValue { command: self.kind })?;
        if range.contains(value) {
            Ok(Some(value))
        } else {
            Err(CommandError::InvalidValue {
                command: self.kind,
                value,
                min: range.min,
                max: range.max,
            })
        }
    }
}

/// Why a command was not delivered.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandError {
    #[error("unknown command")]
    UnknownCommand { name: String },

    #[error("not connected")]
    NotConnected,

    #[error("{command} requires a value")]
    MissingValue { command: CommandKind },

    #[error("{command} requires a servo (left, right or head)")]
    MissingServo { command: CommandKind },

    #[error("{command} value {value} is outside {min}..={max}")]
    InvalidValue {
        command: CommandKind,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{command} was not delivered over the {transport} channel")]
    TransportFailed {
        command: CommandKind,
        transport: &'static str,
    },
}

/// Outcome of `CommandRouter::send_command`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub error: Option<CommandError>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: CommandError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

impl From<Result<(), CommandError>> for CommandResult {
    fn from(result: Result<(), CommandError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}
