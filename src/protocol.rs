//! Signaling envelopes exchanged over the WebSocket.
//!
//! Every frame is one JSON object tagged by `message_type`, using the
//! kebab-case event names (`join-room`, `ice-candidate`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ConnectionId = String;
pub type RoomId = String;

/// Display name reported for a member that has not joined with a name yet.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ConnectionId,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Same shape as a browser `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    RoomNotFound,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum ClientMessage {
    CreateRoom,
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },
    LeaveRoom,
    Offer {
        sdp: SessionDescription,
        to: ConnectionId,
    },
    Answer {
        sdp: SessionDescription,
        to: ConnectionId,
    },
    IceCandidate {
        candidate: IceCandidate,
        to: ConnectionId,
    },
    ChatMessage {
        room_id: RoomId,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection: the identifier the server assigned.
    Welcome {
        id: ConnectionId,
    },
    RoomCreated {
        room_id: RoomId,
    },
    RoomJoined {
        room_id: RoomId,
        members: Vec<Member>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    UserJoined {
        id: ConnectionId,
        display_name: String,
    },
    UserLeft {
        id: ConnectionId,
        display_name: String,
    },
    Offer {
        sdp: SessionDescription,
        from: ConnectionId,
        display_name: String,
    },
    Answer {
        sdp: SessionDescription,
        from: ConnectionId,
    },
    IceCandidate {
        candidate: IceCandidate,
        from: ConnectionId,
    },
    ChatMessage {
        display_name: String,
        text: String,
        timestamp: DateTime<Utc>,
        sender_id: ConnectionId,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom => "create-room",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ChatMessage { .. } => "chat-message",
        }
    }
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::RoomCreated { .. } => "room-created",
            Self::RoomJoined { .. } => "room-joined",
            Self::Error { .. } => "error",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ChatMessage { .. } => "chat-message",
        }
    }

    pub fn room_not_found() -> Self {
        Self::Error {
            code: ErrorCode::RoomNotFound,
            message: "Room not found".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let msg = ClientMessage::JoinRoom {
            room_id: "a1b2c3d4".into(),
            display_name: "Bob".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"message_type": "join-room", "room_id": "a1b2c3d4", "display_name": "Bob"})
        );
    }

    #[test]
    fn test_unit_request_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"message_type":"create-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CreateRoom);
    }

    #[test]
    fn test_offer_carries_browser_description() {
        let raw = r#"{
            "message_type": "offer",
            "sdp": {"type": "offer", "sdp": "v=0"},
            "to": "peer-1"
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Offer {
                sdp: SessionDescription::offer("v=0"),
                to: "peer-1".into()
            }
        );
    }

    #[test]
    fn test_candidate_optional_fields_default() {
        let raw = r#"{
            "message_type": "ice-candidate",
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"},
            "to": "peer-1"
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::IceCandidate { candidate, .. } => {
                assert_eq!(candidate.sdp_mid, None);
                assert_eq!(candidate.sdp_mline_index, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_error_code_is_kebab_case() {
        let value = serde_json::to_value(ServerMessage::room_not_found()).unwrap();
        assert_eq!(value["message_type"], "error");
        assert_eq!(value["code"], "room-not-found");
    }

    #[test]
    fn test_names_match_tags() {
        let msg = ServerMessage::UserLeft {
            id: "x".into(),
            display_name: "X".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["message_type"], msg.name());
    }
}
