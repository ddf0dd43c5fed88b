//! STOMP 1.2 framing.
//!
//! Just enough of the protocol for a client session: frame encoding with
//! header escaping, an incremental decoder that tolerates heart-beat EOLs and
//! several frames per transport message, and heart-beat negotiation.

mod frame;
mod heartbeat;

pub use frame::{Frame, FrameDecoder, Incoming, MAX_BUFFERED, StompCommand};
pub use heartbeat::HeartBeat;

/// Protocol versions offered in the `CONNECT` frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";
