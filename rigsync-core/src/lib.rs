use jiff::{SignedDuration, Timestamp};
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

pub mod wire;

// The in-memory model never uses wire field names. Everything that touches
// `motor_speed`/`valve_state` spellings lives in `wire`.
type BoxStr = Box<str>;

/// Errors raised when a value falls outside the device's data model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("motor speed {rpm} RPM is outside {min}..={max}")]
    MotorSpeedOutOfRange { rpm: i64, min: u16, max: u16 },
    #[error("temperature is not a number")]
    NanTemperature,
}

/// Motor speed in revolutions per minute, `0..=5000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct MotorSpeed(u16);

impl MotorSpeed {
    pub const MIN: MotorSpeed = MotorSpeed(0);
    pub const MAX: MotorSpeed = MotorSpeed(5000);

    pub fn new(rpm: i64) -> Result<Self, StateError> {
        if rpm < i64::from(Self::MIN.0) || rpm > i64::from(Self::MAX.0) {
            return Err(StateError::MotorSpeedOutOfRange {
                rpm,
                min: Self::MIN.0,
                max: Self::MAX.0,
            });
        }

        Ok(Self(rpm as u16))
    }

    pub fn rpm(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for MotorSpeed {
    type Error = StateError;

    fn try_from(rpm: u16) -> Result<Self, Self::Error> {
        Self::new(i64::from(rpm))
    }
}

impl From<MotorSpeed> for u16 {
    fn from(speed: MotorSpeed) -> Self {
        speed.0
    }
}

impl std::fmt::Display for MotorSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} RPM", self.0)
    }
}

/// Temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(NotNan<f64>);

impl Temperature {
    pub fn new(celsius: f64) -> Result<Self, StateError> {
        NotNan::new(celsius)
            .map(Self)
            .map_err(|_| StateError::NanTemperature)
    }

    pub fn celsius(self) -> f64 {
        self.0.into_inner()
    }
}

impl std::fmt::Display for Temperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} °C", self.celsius())
    }
}

/// The fields a proposal carries: the writable pair plus the temperature,
/// which is passed through untouched so both sides of an update have the
/// same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Last temperature reported by the device. Read-only for the client.
    pub temperature: Temperature,
    /// Whether the valve is open.
    pub valve_open: bool,
    /// Commanded motor speed.
    pub motor_speed_rpm: MotorSpeed,
}

impl DeviceSnapshot {
    pub fn with_valve_open(self, valve_open: bool) -> Self {
        Self { valve_open, ..self }
    }

    pub fn with_motor_speed(self, motor_speed_rpm: MotorSpeed) -> Self {
        Self {
            motor_speed_rpm,
            ..self
        }
    }

    pub fn toggled_valve(self) -> Self {
        self.with_valve_open(!self.valve_open)
    }
}

/// The client's mirror of the device, as last confirmed by the server.
///
/// A mirror is only ever built whole from one server report; there is no
/// way to patch individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Temperature in degrees Celsius.
    pub temperature: Temperature,
    /// Valve position.
    pub valve_open: bool,
    /// Motor speed.
    pub motor_speed_rpm: MotorSpeed,
    /// When the server last sampled the temperature.
    pub last_telemetry_at: Timestamp,
    /// When this mirror was built from a server message.
    pub last_synced_at: Timestamp,
}

impl DeviceState {
    pub fn from_report(
        snapshot: DeviceSnapshot,
        last_telemetry_at: Timestamp,
        last_synced_at: Timestamp,
    ) -> Self {
        Self {
            temperature: snapshot.temperature,
            valve_open: snapshot.valve_open,
            motor_speed_rpm: snapshot.motor_speed_rpm,
            last_telemetry_at,
            last_synced_at,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            temperature: self.temperature,
            valve_open: self.valve_open,
            motor_speed_rpm: self.motor_speed_rpm,
        }
    }

    /// Age of the mirror relative to `now`.
    pub fn staleness(&self, now: Timestamp) -> SignedDuration {
        now.duration_since(self.last_synced_at)
    }
}

/// A proposed transition. Built when the operator commits a change and
/// dropped once it has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateIntent {
    /// The mirror as the client saw it when proposing.
    pub original: DeviceSnapshot,
    /// The state the client asks for.
    pub proposed: DeviceSnapshot,
}

/// Connection status of the transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No connection has been attempted yet.
    #[default]
    Uninstantiated,
    /// The channel is dialing or re-dialing.
    Connecting,
    /// Frames can flow both ways.
    Open,
    /// The channel has shut down and will not reopen.
    Closed,
    /// The channel failed and will not reopen.
    Errored,
}

impl ConnectionStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Closed | ConnectionStatus::Errored)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionStatus::Uninstantiated => "uninstantiated",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Last rejection reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    /// Message exactly as the server sent it.
    pub message: BoxStr,
    /// Local time the rejection arrived.
    pub occurred_at: Timestamp,
}

/// Where the mirror stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Nothing received yet; the connection may still come up.
    #[default]
    NoStateYet,
    /// At least one server report has been applied.
    Synced,
    /// The channel went away before any report arrived. Terminal.
    NeverSynced,
}

/// Everything a presentation layer may read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncView {
    pub state: Option<DeviceState>,
    pub error: Option<SyncError>,
    pub connection_status: ConnectionStatus,
    pub phase: SyncPhase,
}
