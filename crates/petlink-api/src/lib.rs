// petlink-api: STOMP session, WebSocket/SockJS transports, and REST command client

pub mod credentials;
pub mod error;
pub mod models;
pub mod rest;
pub mod session;
pub mod stomp;
pub mod transport;

pub use credentials::{MemoryTokenStore, TokenStore};
pub use error::Error;
pub use rest::CommandClient;
pub use session::{
    ReconnectConfig, SessionConfig, SessionEvent, SessionState, StompMessage, StompSession,
    SubscriptionHandle,
};
