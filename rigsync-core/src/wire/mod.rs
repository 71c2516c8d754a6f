//! JSON wire contract shared by the client and the device server.
//!
//! Field names here follow the wire (`motor_speed`, `valve_state`). The
//! conversions in this module are the only place those names meet the
//! in-memory model.

mod error;
mod fields;
mod message;

pub use error::{ProtocolError, ProtocolResult};
pub use fields::{StateFields, epoch_seconds, telemetry_timestamp};
pub use message::{
    ClientMessage, ErrorBody, InboundMessage, ServerMessage, StateReport, UpdateBody,
};
