use crate::peer::MediaConstraints;
use crate::protocol::RoomId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;

pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the signaling WebSocket listens on
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signaling server URL (ws:// or wss://)
    pub server_url: String,

    /// Name shown to the other participants
    pub display_name: String,

    /// Room to join; a new room is created when absent
    pub room_id: Option<RoomId>,

    /// STUN/TURN URLs handed to the media engine
    pub ice_servers: Vec<String>,

    pub audio: bool,
    pub video: bool,

    /// Whether the engine may open a screen source
    pub screen_share: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}", DEFAULT_PORT),
            display_name: "Guest".to_string(),
            room_id: None,
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            audio: true,
            video: true,
            screen_share: true,
        }
    }
}

impl ClientConfig {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio,
            video: self.video,
        }
    }
}
