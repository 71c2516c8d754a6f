use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::fields::{epoch_seconds, telemetry_timestamp};
use super::{ProtocolError, ProtocolResult, StateFields};
use crate::{DeviceSnapshot, UpdateIntent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBody {
    pub original_state: StateFields,
    pub new_state: StateFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Frames a client sends to the device server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Proposed transition, carrying the client's view of the state it
    /// started from so the server can refuse stale proposals.
    Update { data: UpdateBody },
}

impl ClientMessage {
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Validates both sides of the proposal against the data model.
    pub fn into_intent(self) -> ProtocolResult<UpdateIntent> {
        match self {
            ClientMessage::Update { data } => Ok(UpdateIntent {
                original: DeviceSnapshot::try_from(data.original_state)?,
                proposed: DeviceSnapshot::try_from(data.new_state)?,
            }),
        }
    }
}

impl From<UpdateIntent> for ClientMessage {
    fn from(intent: UpdateIntent) -> Self {
        ClientMessage::Update {
            data: UpdateBody {
                original_state: intent.original.into(),
                new_state: intent.proposed.into(),
            },
        }
    }
}

/// Frames the device server sends to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full authoritative state.
    Update {
        data: StateFields,
        /// Epoch seconds of the last temperature sample.
        last_temp_update: f64,
    },
    /// The last proposal was refused, or the server hit an unrelated fault.
    Error { data: ErrorBody },
}

impl ServerMessage {
    pub fn state(snapshot: DeviceSnapshot, last_temp_update: Timestamp) -> Self {
        ServerMessage::Update {
            data: snapshot.into(),
            last_temp_update: epoch_seconds(last_temp_update),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: ErrorBody {
                message: message.into(),
            },
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// A server report converted into the in-memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateReport {
    pub snapshot: DeviceSnapshot,
    pub telemetry_at: Timestamp,
}

/// The closed set of messages a client acts on. Anything else is a
/// [`ProtocolError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Update(StateReport),
    Error { message: Box<str> },
}

impl InboundMessage {
    pub fn parse(frame: &str) -> ProtocolResult<Self> {
        ServerMessage::decode(frame)?.try_into()
    }
}

impl TryFrom<ServerMessage> for InboundMessage {
    type Error = ProtocolError;

    // `Self::Error` would be ambiguous with the `Error` variant.
    fn try_from(message: ServerMessage) -> Result<Self, ProtocolError> {
        match message {
            ServerMessage::Update {
                data,
                last_temp_update,
            } => Ok(InboundMessage::Update(StateReport {
                snapshot: DeviceSnapshot::try_from(data)?,
                telemetry_at: telemetry_timestamp(last_temp_update)?,
            })),
            ServerMessage::Error { data } => Ok(InboundMessage::Error {
                message: data.message.into_boxed_str(),
            }),
        }
    }
}
