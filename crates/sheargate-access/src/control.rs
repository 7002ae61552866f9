//! Manual output control.
//!
//! Validates a request against the channel model before anything reaches
//! the I/O command queue. The unlock relay is owned by the access manager:
//! `unlock_relay = true` opens a timed manual session and
//! `unlock_relay = false` forces a relock, so the relay is never left
//! energized outside an unlock window.

use crate::manager::ManagerCommand;
use serde::{Deserialize, Serialize};
use sheargate_core::{Channel, ChannelValue};
use sheargate_hardware::{HardwareError, IoHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Set one output channel, e.g. `{"channel": "led_blue", "value": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub channel: String,
    pub value: ChannelValue,
}

impl ControlRequest {
    pub fn new(channel: impl Into<String>, value: ChannelValue) -> Self {
        Self {
            channel: channel.into(),
            value,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel {0} is read-only")]
    ReadOnlyChannel(Channel),

    #[error("Invalid value for channel {channel}: {message}")]
    InvalidValue { channel: Channel, message: String },

    #[error("Relay request rejected: {0}")]
    Rejected(&'static str),

    #[error("Access manager is not running")]
    ManagerStopped,

    #[error(transparent)]
    Device(#[from] HardwareError),
}

#[derive(Debug, Clone)]
pub struct IoControl {
    io: IoHandle,
    manager: mpsc::Sender<ManagerCommand>,
    unlock_window: Duration,
}

impl IoControl {
    /// `unlock_window` is the duration of a manual unlock requested
    /// through [`apply`](Self::apply).
    pub fn new(io: IoHandle, manager: mpsc::Sender<ManagerCommand>, unlock_window: Duration) -> Self {
        Self {
            io,
            manager,
            unlock_window,
        }
    }

    /// Validate `request` and forward it to the I/O module.
    ///
    /// # Errors
    ///
    /// `UnknownChannel`, `ReadOnlyChannel` and `InvalidValue` are returned
    /// without touching the device; `Device` carries the adapter error
    /// (typically `Disconnected` or `CommandTimeout`). Relay requests fail
    /// with `Rejected` while a session is active or the system is faulted.
    pub async fn apply(&self, request: ControlRequest) -> Result<(), ControlError> {
        let channel: Channel = request
            .channel
            .parse()
            .map_err(|_| ControlError::UnknownChannel(request.channel.clone()))?;

        if channel.kind().is_input() {
            return Err(ControlError::ReadOnlyChannel(channel));
        }

        channel
            .validate_value(request.value)
            .map_err(|e| ControlError::InvalidValue {
                channel,
                message: e.to_string(),
            })?;

        if channel == Channel::UnlockRelay {
            return match request.value {
                ChannelValue::Digital(true) => self.unlock_for(self.unlock_window).await,
                _ => self.lock().await,
            };
        }

        self.io.write(channel, request.value).await?;
        info!(component = "io_control", channel = %channel, value = %request.value, "Output set");
        Ok(())
    }

    /// Unlock the shear for `duration` as a manual session.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for a zero duration, `Rejected` when a session is
    /// already active or the system is faulted.
    pub async fn unlock_for(&self, duration: Duration) -> Result<(), ControlError> {
        if duration.is_zero() {
            return Err(ControlError::InvalidValue {
                channel: Channel::UnlockRelay,
                message: "unlock duration must be greater than zero".to_string(),
            });
        }
        self.request(|reply| ManagerCommand::Unlock { duration, reply })
            .await
    }

    /// End any session and switch the relay off.
    pub async fn lock(&self) -> Result<(), ControlError> {
        self.request(|reply| ManagerCommand::Lock { reply }).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), ControlError>>) -> ManagerCommand,
    ) -> Result<(), ControlError> {
        let (reply, outcome) = oneshot::channel();
        self.manager
            .send(command(reply))
            .await
            .map_err(|_| ControlError::ManagerStopped)?;
        outcome.await.map_err(|_| ControlError::ManagerStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sheargate_core::{IoModuleConfig, WatchdogConfig};
    use sheargate_hardware::{
        ConnState, IoModule, IoModuleTask, devices::AnyIoTransport,
        mock::{MockIoHandle, MockIoModule},
    };
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        control: IoControl,
        mock: MockIoHandle,
        manager: mpsc::Receiver<ManagerCommand>,
        task: IoModuleTask,
    }

    async fn connected() -> Fixture {
        let (module, mock) = MockIoModule::new();
        let (adapter, io) = IoModule::new(&IoModuleConfig::default(), AnyIoTransport::Mock(module));
        let task = adapter.start(WatchdogConfig::default(), &CancellationToken::new());
        io.connection().clone().wait_for(ConnState::Connected).await;

        let (commands, manager) = mpsc::channel(4);
        let control = IoControl::new(io, commands, Duration::from_secs(5));
        Fixture {
            control,
            mock,
            manager,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_sets_output() {
        let Fixture {
            control, mock, task, ..
        } = connected().await;

        control
            .apply(ControlRequest::new("led_blue", ChannelValue::Digital(true)))
            .await
            .unwrap();
        control
            .apply(ControlRequest::new("analog_out0", ChannelValue::Analog(2.5)))
            .await
            .unwrap();

        assert_eq!(mock.digital_level(Channel::LedBlue), Some(true));
        assert_eq!(mock.analog_output(Channel::AnalogOut0), Some(2.5));
        task.stop().await;
    }

    #[rstest]
    #[case::unknown("garage_door", ChannelValue::Digital(true))]
    #[case::read_only("door_sensor", ChannelValue::Digital(true))]
    #[case::kind_mismatch("unlock_relay", ChannelValue::Analog(1.0))]
    #[case::out_of_range("analog_out1", ChannelValue::Analog(7.5))]
    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_never_reach_device(
        #[case] channel: &str,
        #[case] value: ChannelValue,
    ) {
        let Fixture {
            control,
            mock,
            mut manager,
            task,
        } = connected().await;
        mock.clear_writes();

        let err = control
            .apply(ControlRequest::new(channel, value))
            .await
            .unwrap_err();

        match channel {
            "garage_door" => assert!(matches!(err, ControlError::UnknownChannel(_))),
            "door_sensor" => {
                assert!(matches!(err, ControlError::ReadOnlyChannel(Channel::DoorSensor)))
            }
            _ => assert!(matches!(err, ControlError::InvalidValue { .. })),
        }
        assert!(mock.writes().is_empty());
        assert!(manager.try_recv().is_err());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_requests_go_to_the_manager() {
        let Fixture {
            control,
            mock,
            mut manager,
            task,
        } = connected().await;
        mock.clear_writes();

        let responder = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                match manager.recv().await.unwrap() {
                    ManagerCommand::Unlock { duration, reply } => {
                        seen.push(format!("unlock {}s", duration.as_secs()));
                        reply.send(Ok(())).unwrap();
                    }
                    ManagerCommand::Lock { reply } => {
                        seen.push("lock".to_string());
                        reply.send(Err(ControlError::Rejected("relock failed"))).unwrap();
                    }
                }
            }
            seen
        });

        control
            .apply(ControlRequest::new("unlock_relay", ChannelValue::Digital(true)))
            .await
            .unwrap();
        let err = control
            .apply(ControlRequest::new("unlock_relay", ChannelValue::Digital(false)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Rejected("relock failed")));

        assert_eq!(responder.await.unwrap(), vec!["unlock 5s", "lock"]);
        // Only the manager drives the relay.
        assert!(mock.writes_to(Channel::UnlockRelay).is_empty());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_request_without_manager() {
        let Fixture {
            control,
            manager,
            task,
            ..
        } = connected().await;
        drop(manager);

        let err = control.lock().await.unwrap_err();
        assert!(matches!(err, ControlError::ManagerStopped));

        let err = control.unlock_for(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidValue { channel: Channel::UnlockRelay, .. }));
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_while_disconnected() {
        let Fixture {
            control, mock, task, ..
        } = connected().await;
        mock.disconnect();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let err = control
            .apply(ControlRequest::new("led_red", ChannelValue::Digital(true)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Device(HardwareError::Disconnected { .. })));
        task.stop().await;
    }

    #[test]
    fn test_request_json() {
        let request: ControlRequest =
            serde_json::from_str(r#"{"channel":"led_green","value":true}"#).unwrap();
        assert_eq!(request, ControlRequest::new("led_green", ChannelValue::Digital(true)));
    }
}
