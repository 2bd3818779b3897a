//! Mesh video rooms: a WebSocket signaling server that tracks room
//! membership and relays connection setup, and a client that turns that
//! signaling into one WebRTC link per remote participant.

pub mod config;
pub mod error;
pub mod peer;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod rtc;
pub mod server;
pub mod session;
pub mod signaling;

pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use session::{Session, SessionEvent, SessionHandle};
pub use signaling::SignalingClient;
