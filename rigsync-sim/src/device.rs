use std::sync::Arc;

use jiff::Timestamp;
use rand::Rng;
use rigsync_core::wire::{ProtocolError, ServerMessage};
use rigsync_core::{DeviceSnapshot, MotorSpeed, StateError, Temperature, UpdateIntent};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, TelemetryConfig};

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("stale original_state")]
    StaleOriginal,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid device state: {0}")]
    State(#[from] StateError),
}

struct Inner {
    snapshot: DeviceSnapshot,
    last_temp_update: Timestamp,
}

/// Authoritative state of the simulated device, shared by every connection.
///
/// Every accepted change is broadcast as a full `update` message.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<Mutex<Inner>>,
    updates: broadcast::Sender<ServerMessage>,
    jitter: f64,
}

impl DeviceHandle {
    pub fn new(initial: DeviceSnapshot, jitter: f64) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            inner: Arc::new(Mutex::new(Inner {
                snapshot: initial,
                last_temp_update: Timestamp::now(),
            })),
            updates,
            jitter: jitter.max(0.0),
        }
    }

    pub fn from_config(device: &DeviceConfig, telemetry: &TelemetryConfig) -> Result<Self, SimError> {
        let initial = DeviceSnapshot {
            temperature: Temperature::new(device.temperature)?,
            valve_open: device.valve_open,
            motor_speed_rpm: MotorSpeed::new(device.motor_speed)?,
        };

        Ok(Self::new(initial, telemetry.jitter))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        self.inner.lock().await.snapshot
    }

    /// The current state as an `update` message.
    pub async fn current(&self) -> ServerMessage {
        let inner = self.inner.lock().await;
        ServerMessage::state(inner.snapshot, inner.last_temp_update)
    }

    /// Apply a client proposal if it was made against the current state.
    ///
    /// Only the valve and motor are compared and written; the temperature
    /// belongs to the device.
    pub async fn apply(&self, intent: UpdateIntent) -> Result<(), SimError> {
        let message = {
            let mut inner = self.inner.lock().await;
            let current = inner.snapshot;

            if intent.original.valve_open != current.valve_open
                || intent.original.motor_speed_rpm != current.motor_speed_rpm
            {
                debug!(?current, original = ?intent.original, "rejecting stale proposal");
                return Err(SimError::StaleOriginal);
            }

            let noise = if self.jitter > 0.0 {
                rand::rng().random_range(0.0..self.jitter)
            } else {
                0.0
            };

            inner.snapshot = DeviceSnapshot {
                temperature: Temperature::new(current.temperature.celsius() + noise)?,
                valve_open: intent.proposed.valve_open,
                motor_speed_rpm: intent.proposed.motor_speed_rpm,
            };

            info!(
                valve_open = inner.snapshot.valve_open,
                motor_speed = inner.snapshot.motor_speed_rpm.rpm(),
                "device state updated"
            );
            ServerMessage::state(inner.snapshot, inner.last_temp_update)
        };

        self.publish(message);
        Ok(())
    }

    /// Store a new temperature sample and broadcast it.
    pub async fn record_temperature(&self, temperature: Temperature) {
        let message = {
            let mut inner = self.inner.lock().await;
            inner.snapshot.temperature = temperature;
            inner.last_temp_update = Timestamp::now();
            ServerMessage::state(inner.snapshot, inner.last_temp_update)
        };

        debug!(temperature = temperature.celsius(), "temperature sampled");
        self.publish(message);
    }

    fn publish(&self, message: ServerMessage) {
        // No receivers just means no clients are connected.
        let receivers = self.updates.send(message).unwrap_or(0);
        debug!(receivers, "state broadcast");
    }
}

/// Sample a temperature every `interval_secs` until cancelled.
pub async fn run_telemetry(device: DeviceHandle, config: TelemetryConfig, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(config.interval());
    // The first tick fires immediately; the initial state is already set.
    interval.tick().await;

    info!(interval_secs = config.interval().as_secs(), "telemetry sampler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("telemetry sampler shutting down");
                break;
            }
            _ = interval.tick() => {
                match Temperature::new(sample(&config)) {
                    Ok(temperature) => device.record_temperature(temperature).await,
                    Err(e) => warn!(error = %e, "discarding temperature sample"),
                }
            }
        }
    }
}

fn sample(config: &TelemetryConfig) -> f64 {
    if config.max_temp <= config.min_temp {
        return config.min_temp;
    }

    rand::rng().random_range(config.min_temp..config.max_temp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(rpm: i64, valve_open: bool) -> DeviceSnapshot {
        DeviceSnapshot {
            temperature: Temperature::new(25.0).unwrap(),
            valve_open,
            motor_speed_rpm: MotorSpeed::new(rpm).unwrap(),
        }
    }

    #[tokio::test]
    async fn applies_proposal_made_against_current_state() {
        let device = DeviceHandle::new(snapshot(0, false), 0.0);
        let mut updates = device.subscribe();

        device
            .apply(UpdateIntent {
                original: snapshot(0, false),
                proposed: snapshot(1200, true),
            })
            .await
            .unwrap();

        let state = device.snapshot().await;
        assert_eq!(state.motor_speed_rpm.rpm(), 1200);
        assert!(state.valve_open);

        let ServerMessage::Update { data, .. } = updates.recv().await.unwrap() else {
            panic!("expected a state broadcast");
        };
        assert_eq!(data.motor_speed, 1200);
    }

    #[tokio::test]
    async fn rejects_stale_proposal() {
        let device = DeviceHandle::new(snapshot(500, false), 0.0);

        let result = device
            .apply(UpdateIntent {
                original: snapshot(0, false),
                proposed: snapshot(1200, false),
            })
            .await;

        assert!(matches!(result, Err(SimError::StaleOriginal)));
        assert_eq!(device.snapshot().await.motor_speed_rpm.rpm(), 500);
    }

    #[tokio::test]
    async fn client_cannot_set_temperature() {
        let device = DeviceHandle::new(snapshot(0, false), 0.0);
        let mut proposed = snapshot(0, true);
        proposed.temperature = Temperature::new(99.0).unwrap();

        device
            .apply(UpdateIntent {
                original: snapshot(0, false),
                proposed,
            })
            .await
            .unwrap();

        assert_eq!(device.snapshot().await.temperature.celsius(), 25.0);
    }

    #[tokio::test]
    async fn jitter_stays_within_bound() {
        let device = DeviceHandle::new(snapshot(0, false), 0.1);
        device
            .apply(UpdateIntent {
                original: snapshot(0, false),
                proposed: snapshot(0, true),
            })
            .await
            .unwrap();

        let celsius = device.snapshot().await.temperature.celsius();
        assert!((25.0..25.1).contains(&celsius));
    }

    #[tokio::test]
    async fn temperature_sample_is_broadcast() {
        let device = DeviceHandle::new(snapshot(0, false), 0.0);
        let mut updates = device.subscribe();

        device
            .record_temperature(Temperature::new(27.5).unwrap())
            .await;

        let ServerMessage::Update { data, .. } = updates.recv().await.unwrap() else {
            panic!("expected a state broadcast");
        };
        assert_eq!(data.temperature, 27.5);
    }

    #[test]
    fn sample_respects_bounds() {
        let config = TelemetryConfig::default();
        for _ in 0..100 {
            let t = sample(&config);
            assert!((config.min_temp..config.max_temp).contains(&t));
        }

        let flat = TelemetryConfig {
            min_temp: 21.0,
            max_temp: 21.0,
            ..TelemetryConfig::default()
        };
        assert_eq!(sample(&flat), 21.0);
    }
}
