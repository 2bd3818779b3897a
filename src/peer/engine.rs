//! Seam between the orchestrator and the real-time media subsystem.
//!
//! The orchestrator never touches capture, codecs or ICE directly; it only
//! drives these traits. `crate::rtc` implements them on top of webrtc-rs.

use super::state::TransportState;
use crate::error::Result;
use crate::protocol::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

/// Tracks opened from the local capture devices.
#[derive(Debug, Clone)]
pub struct LocalStream<T> {
    pub audio: Option<T>,
    pub video: Option<T>,
}

/// Callbacks raised by a link's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    LocalCandidate(IceCandidate),
    StateChanged(TransportState),
    RemoteTrack { kind: TrackKind, track_id: String },
}

pub type LinkEventSink = mpsc::UnboundedSender<LinkEvent>;

/// A captured screen. `ended` resolves when the source stops on its own,
/// for example when the user closes the shared window.
#[derive(Debug)]
pub struct DisplaySource<T> {
    pub track: T,
    pub ended: oneshot::Receiver<()>,
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Track: Clone + Send + Sync + 'static;
    type Link: PeerLink<Track = Self::Track>;

    /// Open camera and/or microphone. Fails with `MediaAccessDenied`.
    async fn open_user_media(&self, constraints: MediaConstraints)
        -> Result<LocalStream<Self::Track>>;

    /// Open a screen source for substitution into the video sender.
    async fn open_display_media(&self) -> Result<DisplaySource<Self::Track>>;

    /// Create an unconnected link to `remote`. Transport callbacks are
    /// delivered to `events` for the lifetime of the link.
    async fn create_link(&self, remote: &str, events: LinkEventSink) -> Result<Self::Link>;
}

#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    type Track: Clone + Send + Sync + 'static;

    async fn attach_local_track(&self, kind: TrackKind, track: Self::Track) -> Result<()>;

    /// Swap the track on the existing sender for `kind`. Must not require a
    /// new offer/answer round trip.
    async fn replace_track(&self, kind: TrackKind, track: Self::Track) -> Result<()>;

    /// Pause or resume sending on the `kind` sender. The track stays
    /// attached and a later `replace_track` is kept for when sending resumes.
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}
