// ── Command routing ──
//
// One semantic entry point regardless of mode. In local mode a command
// becomes one or more socket frames and/or camera control calls; in remote
// mode it is queued on the relay under its own name with its value passed
// through as a named parameter. Values are checked before any transport is
// touched.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{debug, warn};

use scarelink_api::{CameraControl, CameraVar, ServoId, SocketCommand};

use crate::channel::{CloudTransport, LocalTransport};
use crate::model::{Command, CommandError, CommandKind, CommandResult, ConnectionMode};
use crate::store::TelemetryCache;

/// Head servo angles for the three preset positions.
const HEAD_LEFT: u16 = 180;
const HEAD_CENTER: u16 = 90;
const HEAD_RIGHT: u16 = 0;

/// One transport call in local mode.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalCall {
    Socket(SocketCommand),
    Camera(CameraControl),
}

/// Dispatches commands to whichever channel is live.
#[derive(Clone)]
pub struct CommandRouter {
    mode: watch::Receiver<ConnectionMode>,
    local: Arc<dyn LocalTransport>,
    cloud: Arc<dyn CloudTransport>,
    cache: TelemetryCache,
}

impl CommandRouter {
    pub fn new(
        mode: watch::Receiver<ConnectionMode>,
        local: Arc<dyn LocalTransport>,
        cloud: Arc<dyn CloudTransport>,
        cache: TelemetryCache,
    ) -> Self {
        Self {
            mode,
            local,
            cloud,
            cache,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        *self.mode.borrow()
    }

    /// Send a command by name. Unknown names fail with "unknown command".
    pub async fn send_command(&self, name: &str, value: Option<f64>) -> CommandResult {
        let Ok(kind) = CommandKind::from_str(name) else {
            debug!(name, "unknown command");
            return CommandResult::failed(CommandError::UnknownCommand {
                name: name.to_owned(),
            });
        };
        let mut command = Command::new(kind);
        command.value = value;
        self.send(&command).await
    }

    /// Send a fully built command.
    pub async fn send(&self, command: &Command) -> CommandResult {
        let mode = self.mode();
        let result = match mode {
            ConnectionMode::None => Err(CommandError::NotConnected),
            ConnectionMode::Local => self.send_local(command).await,
            ConnectionMode::Remote => self.send_remote(command).await,
        };
        if let Err(e) = &result {
            debug!(command = %command.kind, %mode, error = %e, "command not delivered");
        }
        result.into()
    }

    async fn send_local(&self, command: &Command) -> Result<(), CommandError> {
        let plan = local_plan(command, &self.cache)?;
        let mut delivered = true;

        // Every constituent is attempted even after a failure so that stop
        // commands reach as much hardware as possible.
        for call in &plan {
            let ok = match call {
                LocalCall::Socket(frame) => self.local.send(frame),
                LocalCall::Camera(control) => self.local.camera_control(*control).await,
            };
            if !ok {
                warn!(command = %command.kind, ?call, "local call failed");
                delivered = false;
            }
        }

        if delivered {
            Ok(())
        } else {
            Err(CommandError::TransportFailed {
                command: command.kind,
                transport: "local",
            })
        }
    }

    async fn send_remote(&self, command: &Command) -> Result<(), CommandError> {
        let params = cloud_params(command)?;
        if self.cloud.send_command(command.kind.as_ref(), params).await {
            Ok(())
        } else {
            Err(CommandError::TransportFailed {
                command: command.kind,
                transport: "cloud",
            })
        }
    }
}

// ── Routing tables ───────────────────────────────────────────────────

fn servo_of(command: &Command) -> Result<ServoId, CommandError> {
    command
        .servo
        .ok_or(CommandError::MissingServo {
            command: command.kind,
        })
}

/// Checked value as an integer. Only called for integer-ranged commands,
/// whose bounds all fit in `i32`.
#[allow(clippy::cast_possible_truncation)]
fn int_value(value: Option<f64>) -> i32 {
    value.map_or(0, |v| v.round() as i32)
}

fn toggled(current: Option<bool>) -> i32 {
    // Unknown state: assume off, so the toggle turns it on.
    i32::from(!current.unwrap_or(false))
}

/// The local calls a command expands to.
pub fn local_plan(command: &Command, cache: &TelemetryCache) -> Result<Vec<LocalCall>, CommandError> {
    use CommandKind as K;
    use LocalCall::{Camera, Socket};

    let value = command.checked_value()?;
    let snapshot = cache.current();

    let plan = match command.kind {
        K::SoundAlarm => vec![Socket(SocketCommand::Alarm)],
        K::PlayTrack => vec![Socket(SocketCommand::PlayTrack {
            track: u32::try_from(int_value(value)).unwrap_or(1),
        })],
        K::NextTrack => vec![Socket(SocketCommand::NextTrack)],
        K::SetVolume => vec![Socket(SocketCommand::Volume {
            level: value.unwrap_or_default(),
        })],
        K::MoveArms => vec![Socket(SocketCommand::MoveArms)],
        K::StopMovement => vec![Socket(SocketCommand::StopMovement)],
        K::StopAudio => vec![Socket(SocketCommand::StopAudio)],
        K::StopAll => vec![
            Socket(SocketCommand::StopMovement),
            Socket(SocketCommand::StopAudio),
        ],
        K::SetServoAngle => vec![Socket(SocketCommand::Servo {
            servo: servo_of(command)?,
            angle: u16::try_from(int_value(value)).unwrap_or(HEAD_CENTER),
        })],
        K::RotateHeadLeft => vec![Socket(SocketCommand::Servo {
            servo: ServoId::Head,
            angle: HEAD_LEFT,
        })],
        K::RotateHeadCenter => vec![Socket(SocketCommand::Servo {
            servo: ServoId::Head,
            angle: HEAD_CENTER,
        })],
        K::RotateHeadRight => vec![Socket(SocketCommand::Servo {
            servo: ServoId::Head,
            angle: HEAD_RIGHT,
        })],
        K::ToggleDetection => vec![Camera(CameraControl::new(
            CameraVar::Detection,
            toggled(snapshot.as_ref().and_then(|s| s.detection_enabled)),
        ))],
        K::SetSensitivity => vec![Camera(CameraControl::new(
            CameraVar::Sensitivity,
            int_value(value),
        ))],
        K::SetBrightness => vec![Camera(CameraControl::new(
            CameraVar::Brightness,
            int_value(value),
        ))],
        K::SetContrast => vec![Camera(CameraControl::new(
            CameraVar::Contrast,
            int_value(value),
        ))],
        K::SetResolution => vec![Camera(CameraControl::new(
            CameraVar::Framesize,
            int_value(value),
        ))],
        K::ToggleGrayscale => vec![Camera(CameraControl::new(
            CameraVar::Grayscale,
            toggled(snapshot.as_ref().and_then(|s| s.grayscale)),
        ))],
        K::ResetSystem => vec![
            Socket(SocketCommand::Reset),
            Camera(CameraControl::new(CameraVar::Reboot, 1)),
        ],
    };
    Ok(plan)
}

/// The relay parameters for a command.
pub fn cloud_params(command: &Command) -> Result<Map<String, Value>, CommandError> {
    use CommandKind as K;

    let value = command.checked_value()?;
    let mut params = Map::new();

    match command.kind {
        K::SetVolume => {
            params.insert("volume".into(), json!(value.unwrap_or_default()));
        }
        K::PlayTrack => {
            params.insert("track".into(), json!(int_value(value)));
        }
        K::SetServoAngle => {
            params.insert("servo".into(), json!(servo_of(command)?));
            params.insert("angle".into(), json!(int_value(value)));
        }
        K::SetSensitivity => {
            params.insert("sensitivity".into(), json!(int_value(value)));
        }
        K::SetBrightness => {
            params.insert("brightness".into(), json!(int_value(value)));
        }
        K::SetContrast => {
            params.insert("contrast".into(), json!(int_value(value)));
        }
        K::SetResolution => {
            params.insert("resolution".into(), json!(int_value(value)));
        }
        _ => {}
    }
    Ok(params)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::fakes::{FakeCloud, FakeLocal};
    use crate::model::{TelemetrySnapshot, TelemetrySource};

    fn router(
        mode: ConnectionMode,
    ) -> (CommandRouter, Arc<FakeLocal>, Arc<FakeCloud>, TelemetryCache) {
        let local = FakeLocal::reachable();
        let cloud = FakeCloud::new(true);
        let cache = TelemetryCache::new();
        let (_tx, rx) = watch::channel(mode);
        let router = CommandRouter::new(
            rx,
            Arc::clone(&local) as Arc<dyn LocalTransport>,
            Arc::clone(&cloud) as Arc<dyn CloudTransport>,
            cache.clone(),
        );
        (router, local, cloud, cache)
    }

    #[tokio::test]
    async fn no_mode_fails_without_transport_call() {
        let (router, local, cloud, _) = router(ConnectionMode::None);

        let result = router.send_command("SOUND_ALARM", None).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(CommandError::NotConnected));
        assert_eq!(local.calls(), 0);
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn alarm_in_local_mode_is_one_socket_frame() {
        let (router, local, cloud, _) = router(ConnectionMode::Local);

        let result = router.send_command("SOUND_ALARM", None).await;

        assert_eq!(result, CommandResult::ok());
        assert_eq!(*local.sent.lock().unwrap(), vec![SocketCommand::Alarm]);
        assert_eq!(cloud.calls(), 0);
    }

    #[tokio::test]
    async fn alarm_in_remote_mode_is_one_cloud_call() {
        let (router, local, cloud, _) = router(ConnectionMode::Remote);

        let result = router.send_command("SOUND_ALARM", None).await;

        assert!(result.success);
        assert_eq!(local.calls(), 0);
        let sent = cloud.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "SOUND_ALARM");
        assert!(sent[0].1.is_empty());
    }

    #[tokio::test]
    async fn unknown_command() {
        let (router, local, cloud, _) = router(ConnectionMode::Local);

        let result = router.send_command("FOO", None).await;

        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().to_string(), "unknown command");
        assert_eq!(local.calls() + cloud.calls(), 0);
    }

    #[tokio::test]
    async fn set_volume_remote_passes_value_through() {
        let (router, _, cloud, _) = router(ConnectionMode::Remote);

        assert!(router.send_command("SET_VOLUME", Some(0.5)).await.success);

        let sent = cloud.sent.lock().unwrap();
        assert_eq!(sent[0].0, "SET_VOLUME");
        assert_eq!(Value::Object(sent[0].1.clone()), json!({"volume": 0.5}));
    }

    #[tokio::test]
    async fn invalid_value_is_rejected_before_sending() {
        let (router, local, _, _) = router(ConnectionMode::Local);

        let result = router.send_command("SET_BRIGHTNESS", Some(5.0)).await;
        assert!(matches!(result.error, Some(CommandError::InvalidValue { .. })));

        let result = router.send_command("PLAY_TRACK", None).await;
        assert!(matches!(result.error, Some(CommandError::MissingValue { .. })));

        let result = router.send_command("SET_SERVO_ANGLE", Some(90.0)).await;
        assert!(matches!(result.error, Some(CommandError::MissingServo { .. })));

        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn stop_all_fans_out_and_needs_every_call() {
        let (router, local, _, _) = router(ConnectionMode::Local);

        assert!(router.send_command("STOP_ALL", None).await.success);
        assert_eq!(
            *local.sent.lock().unwrap(),
            vec![SocketCommand::StopMovement, SocketCommand::StopAudio]
        );

        local
            .send_ok
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let result = router.send_command("STOP_ALL", None).await;
        assert!(!result.success);
        // Both frames were still attempted.
        assert_eq!(local.sent.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn reset_system_hits_both_boards() {
        let (router, local, _, _) = router(ConnectionMode::Local);

        assert!(router.send_command("RESET_SYSTEM", None).await.success);
        assert_eq!(*local.sent.lock().unwrap(), vec![SocketCommand::Reset]);
        assert_eq!(
            *local.camera.lock().unwrap(),
            vec![CameraControl::new(CameraVar::Reboot, 1)]
        );
    }

    #[tokio::test]
    async fn toggles_read_cached_state() {
        let (router, local, _, cache) = router(ConnectionMode::Local);
        cache.update(TelemetrySnapshot {
            detection_enabled: Some(true),
            ..TelemetrySnapshot::empty(TelemetrySource::Poll)
        });

        router.send_command("TOGGLE_DETECTION", None).await;
        router.send_command("TOGGLE_GRAYSCALE", None).await;

        assert_eq!(
            *local.camera.lock().unwrap(),
            vec![
                CameraControl::new(CameraVar::Detection, 0),
                CameraControl::new(CameraVar::Grayscale, 1),
            ]
        );
    }

    #[tokio::test]
    async fn servo_and_head_presets() {
        let (router, local, _, _) = router(ConnectionMode::Local);

        let command = Command::new(CommandKind::SetServoAngle)
            .with_value(45.0)
            .with_servo(ServoId::Left);
        assert!(router.send(&command).await.success);
        assert!(router.send_command("ROTATE_HEAD_LEFT", None).await.success);

        assert_eq!(
            *local.sent.lock().unwrap(),
            vec![
                SocketCommand::Servo {
                    servo: ServoId::Left,
                    angle: 45
                },
                SocketCommand::Servo {
                    servo: ServoId::Head,
                    angle: HEAD_LEFT
                },
            ]
        );
    }

    #[test]
    fn servo_params_for_cloud() {
        let command = Command::new(CommandKind::SetServoAngle)
            .with_value(120.0)
            .with_servo(ServoId::Right);
        assert_eq!(
            Value::Object(cloud_params(&command).unwrap()),
            json!({"servo": "right", "angle": 120})
        );
    }
}
