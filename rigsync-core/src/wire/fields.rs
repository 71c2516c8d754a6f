use jiff::Timestamp;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::{ProtocolError, ProtocolResult};
use crate::{DeviceSnapshot, MotorSpeed, Temperature};

/// Device fields as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateFields {
    #[serde(deserialize_with = "whole_number")]
    pub motor_speed: i64,
    pub valve_state: bool,
    pub temperature: f64,
}

// Servers written against a float schema send `0.0` for a stopped motor.
// Accept any JSON number as long as it has no fractional part.
fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw.fract() != 0.0 {
        return Err(D::Error::custom(format!(
            "motor_speed must be a whole number, got {raw}"
        )));
    }

    Ok(raw as i64)
}

impl From<DeviceSnapshot> for StateFields {
    fn from(snapshot: DeviceSnapshot) -> Self {
        Self {
            motor_speed: i64::from(snapshot.motor_speed_rpm.rpm()),
            valve_state: snapshot.valve_open,
            temperature: snapshot.temperature.celsius(),
        }
    }
}

impl TryFrom<StateFields> for DeviceSnapshot {
    type Error = ProtocolError;

    fn try_from(fields: StateFields) -> Result<Self, Self::Error> {
        Ok(Self {
            temperature: Temperature::new(fields.temperature)?,
            valve_open: fields.valve_state,
            motor_speed_rpm: MotorSpeed::new(fields.motor_speed)?,
        })
    }
}

/// Converts `last_temp_update` (epoch seconds, possibly fractional) to a
/// millisecond-precision timestamp.
pub fn telemetry_timestamp(seconds: f64) -> ProtocolResult<Timestamp> {
    let millis = seconds * 1000.0;
    if !millis.is_finite() {
        return Err(ProtocolError::InvalidTimestamp(seconds));
    }

    Timestamp::from_millisecond(millis.round() as i64)
        .map_err(|_| ProtocolError::InvalidTimestamp(seconds))
}

/// Inverse of [`telemetry_timestamp`].
pub fn epoch_seconds(at: Timestamp) -> f64 {
    at.as_millisecond() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_integral_float_motor_speed() {
        let fields: StateFields = serde_json::from_str(
            r#"{"motor_speed": 0.0, "valve_state": true, "temperature": 25.0}"#,
        )
        .unwrap();
        assert_eq!(fields.motor_speed, 0);
    }

    #[test]
    fn rejects_fractional_motor_speed() {
        let result = serde_json::from_str::<StateFields>(
            r#"{"motor_speed": 12.5, "valve_state": true, "temperature": 25.0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_speed_is_an_invalid_state() {
        let fields = StateFields {
            motor_speed: 9000,
            valve_state: false,
            temperature: 20.0,
        };
        assert!(matches!(
            DeviceSnapshot::try_from(fields),
            Err(ProtocolError::InvalidState(_))
        ));
    }

    #[test]
    fn snapshot_maps_to_wire_names() {
        let snapshot = DeviceSnapshot {
            temperature: Temperature::new(21.5).unwrap(),
            valve_open: true,
            motor_speed_rpm: MotorSpeed::new(1200).unwrap(),
        };

        let json = serde_json::to_value(StateFields::from(snapshot)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"motor_speed": 1200, "valve_state": true, "temperature": 21.5})
        );
    }

    #[test]
    fn telemetry_seconds_become_milliseconds() {
        let at = telemetry_timestamp(1_700_000_000.0).unwrap();
        assert_eq!(at.as_millisecond(), 1_700_000_000_000);

        let at = telemetry_timestamp(1_700_000_000.25).unwrap();
        assert_eq!(at.as_millisecond(), 1_700_000_000_250);
        assert_eq!(epoch_seconds(at), 1_700_000_000.25);
    }

    #[test]
    fn absurd_timestamps_are_rejected() {
        assert!(telemetry_timestamp(f64::INFINITY).is_err());
        assert!(telemetry_timestamp(1e300).is_err());
    }
}
