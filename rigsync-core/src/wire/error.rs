use crate::StateError;

pub type ProtocolResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message carries an invalid device state: {0}")]
    InvalidState(#[from] StateError),
    #[error("telemetry timestamp {0} is not a valid epoch time")]
    InvalidTimestamp(f64),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
