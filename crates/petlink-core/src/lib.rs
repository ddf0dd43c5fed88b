// petlink-core: device real-time channel and command console between
// petlink-api and consumers (CLI).

pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod model;
pub mod poller;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::DeviceChannel;
pub use config::{ChannelConfig, TlsVerification};
pub use console::DeviceConsole;
pub use error::CoreError;
pub use poller::{Poller, Visibility};
pub use stream::{Slot, SlotStream};

pub use model::{
    CommandCreateRequest, CommandState, CommandStatus, DeviceId, DeviceTopics, PresenceEvent,
};

// Session types consumers need alongside the channel.
pub use petlink_api::transport::WsConnector;
pub use petlink_api::{MemoryTokenStore, SessionEvent, SessionState, TokenStore};
