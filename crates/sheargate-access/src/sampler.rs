//! Periodic safety-sensor sampling.
//!
//! Reads the door sensor, the motion sensor and the temperature input
//! through the I/O command queue on a fixed interval, whatever the access
//! state. Door readings refresh the channel cache the access manager
//! watches; motion and temperature are published as a [`SensorSample`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheargate_core::{Channel, ChannelValue};
use sheargate_hardware::{ConnState, IoHandle, io_module::tmp36_celsius};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const COMPONENT_SAMPLER: &str = "sampler";

/// Latest motion and temperature reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub motion_detected: Option<bool>,
    pub temperature_c: Option<f64>,
    pub sampled_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Sampler {
    io: IoHandle,
    interval: Duration,
    samples: watch::Sender<SensorSample>,
}

impl Sampler {
    pub fn new(io: IoHandle, interval: Duration) -> (Self, watch::Receiver<SensorSample>) {
        let (samples, rx) = watch::channel(SensorSample::default());
        (
            Self {
                io,
                interval,
                samples,
            },
            rx,
        )
    }

    /// Sample until `cancel` fires. Publishes one sample per tick, with
    /// `None` values when the module cannot be read.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = self.sample().await;
                    trace!(component = COMPONENT_SAMPLER, ?sample, "Sensor sample");
                    self.samples.send_replace(sample);
                }
            }
        }

        debug!(component = COMPONENT_SAMPLER, "Sampler stopped");
    }

    async fn sample(&self) -> SensorSample {
        if self.io.latest_state() != ConnState::Connected {
            return SensorSample {
                sampled_at: Some(Utc::now()),
                ..SensorSample::default()
            };
        }

        if let Err(e) = self.io.read(Channel::DoorSensor).await {
            debug!(component = COMPONENT_SAMPLER, error = %e, "Door sensor read failed");
        }

        let motion_detected = match self.io.read(Channel::MotionSensor).await {
            Ok(ChannelValue::Digital(high)) => Some(high),
            Ok(_) => None,
            Err(e) => {
                debug!(component = COMPONENT_SAMPLER, error = %e, "Motion sensor read failed");
                None
            }
        };

        let temperature_c = match self.io.read(Channel::TempAin).await {
            Ok(value) => value.as_f64().and_then(tmp36_celsius),
            Err(e) => {
                debug!(component = COMPONENT_SAMPLER, error = %e, "Temperature read failed");
                None
            }
        };

        SensorSample {
            motion_detected,
            temperature_c,
            sampled_at: Some(Utc::now()),
        }
    }
}
