use crate::protocol::{ConnectionId, RoomId};
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Join attempted on a room that is not registered.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Relay target has already disconnected.
    #[error("Relay target is no longer connected: {0}")]
    StaleTarget(ConnectionId),

    /// Answer, candidate or offer arrived for a link that cannot take it.
    #[error("Negotiation message from {remote} discarded: {reason}")]
    NegotiationDiscarded { remote: ConnectionId, reason: String },

    /// Local capture could not be opened.
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn discarded(remote: impl Into<ConnectionId>, reason: impl Into<String>) -> Self {
        Error::NegotiationDiscarded {
            remote: remote.into(),
            reason: reason.into(),
        }
    }

    /// Errors that are expected races and only worth a debug line.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::StaleTarget(_) | Error::NegotiationDiscarded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
