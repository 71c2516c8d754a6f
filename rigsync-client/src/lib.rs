mod engine;
pub use engine::*;
mod session;
pub use session::*;
pub mod transport;
pub use transport::{ChannelEvent, Transport, TransportError};

pub use tokio_util::sync::CancellationToken;
