//! Media engine backed by webrtc-rs.
//!
//! Local tracks are `TrackLocalStaticSample`s; whoever owns capture writes
//! samples into them. Each link is one `RTCPeerConnection` whose callbacks are
//! forwarded to the link's event sink.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::peer::{
    DisplaySource, LinkEvent, LinkEventSink, LocalStream, MediaConstraints, MediaEngine, PeerLink,
    TrackKind, TransportState,
};
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

pub type RtcTrack = Arc<TrackLocalStaticSample>;

const STREAM_ID: &str = "roomcall";

pub struct RtcEngine {
    api: API,
    ice_servers: Vec<String>,
    screen_share: bool,
    screen_end: Mutex<Option<oneshot::Sender<()>>>,
}

impl RtcEngine {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut codecs = CodecRegistry::default();
        codecs.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut codecs)?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
            screen_share: config.screen_share,
            screen_end: Mutex::new(None),
        })
    }

    /// Called by whoever feeds the screen track once capture stops. The
    /// session then puts the camera back on every link.
    pub fn end_screen_capture(&self) {
        if let Some(end) = self.screen_end.lock().take() {
            let _ = end.send(());
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

fn sample_track(kind: TrackKind, id: &str) -> RtcTrack {
    let capability = match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    };
    Arc::new(TrackLocalStaticSample::new(
        capability,
        id.to_owned(),
        STREAM_ID.to_owned(),
    ))
}

fn transport_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::New => Some(TransportState::New),
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let description = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(description)
}

#[async_trait]
impl MediaEngine for RtcEngine {
    type Track = RtcTrack;
    type Link = RtcLink;

    async fn open_user_media(&self, constraints: MediaConstraints) -> Result<LocalStream<RtcTrack>> {
        if !constraints.audio && !constraints.video {
            return Err(Error::MediaAccessDenied(
                "neither audio nor video requested".to_string(),
            ));
        }
        Ok(LocalStream {
            audio: constraints
                .audio
                .then(|| sample_track(TrackKind::Audio, "audio")),
            video: constraints
                .video
                .then(|| sample_track(TrackKind::Video, "camera")),
        })
    }

    async fn open_display_media(&self) -> Result<DisplaySource<RtcTrack>> {
        if !self.screen_share {
            return Err(Error::MediaAccessDenied(
                "screen capture is disabled".to_string(),
            ));
        }
        let (end, ended) = oneshot::channel();
        *self.screen_end.lock() = Some(end);
        Ok(DisplaySource {
            track: sample_track(TrackKind::Video, "screen"),
            ended,
        })
    }

    async fn create_link(&self, remote: &str, events: LinkEventSink) -> Result<RtcLink> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_configuration()).await?);

        let tx = events.clone();
        let remote_id = remote.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            let remote_id = remote_id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("Candidate gathering for {} complete", remote_id);
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(LinkEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("Unusable local candidate for {}: {}", remote_id, e),
                }
            })
        }));

        let tx = events.clone();
        let remote_id = remote.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            info!("Peer connection to {} is {}", remote_id, s);
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(state) = transport_state(s) {
                    let _ = tx.send(LinkEvent::StateChanged(state));
                }
            })
        }));

        let tx = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    RTPCodecType::Unspecified => None,
                };
                let track_id = track.id();
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(kind) = kind {
                        let _ = tx.send(LinkEvent::RemoteTrack { kind, track_id });
                    }
                })
            },
        ));

        Ok(RtcLink {
            remote: remote.to_string(),
            pc,
            senders: Mutex::new(HashMap::new()),
        })
    }
}

/// A local track's sender. While paused the sender carries no track and
/// `track` is what goes back on when sending resumes.
struct Outbound {
    sender: Arc<RTCRtpSender>,
    track: RtcTrack,
    enabled: bool,
}

pub struct RtcLink {
    remote: String,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Outbound>>,
}

impl RtcLink {
    fn missing_sender(&self, kind: TrackKind) -> Error {
        Error::Signaling(format!("no {:?} sender on link to {}", kind, self.remote))
    }
}

fn as_local(track: RtcTrack) -> Arc<dyn TrackLocal + Send + Sync> {
    track
}

#[async_trait]
impl PeerLink for RtcLink {
    type Track = RtcTrack;

    async fn attach_local_track(&self, kind: TrackKind, track: RtcTrack) -> Result<()> {
        let sender = self.pc.add_track(as_local(Arc::clone(&track))).await?;
        self.senders.lock().insert(
            kind,
            Outbound {
                sender: Arc::clone(&sender),
                track,
                enabled: true,
            },
        );

        // Interceptors only work while RTCP is drained
        let remote = self.remote.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!("RTCP reader for {} finished", remote);
        });
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: RtcTrack) -> Result<()> {
        let (sender, enabled) = {
            let mut senders = self.senders.lock();
            let outbound = senders
                .get_mut(&kind)
                .ok_or_else(|| self.missing_sender(kind))?;
            outbound.track = Arc::clone(&track);
            (Arc::clone(&outbound.sender), outbound.enabled)
        };
        if enabled {
            sender.replace_track(Some(as_local(track))).await?;
        }
        Ok(())
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        let (sender, track) = {
            let mut senders = self.senders.lock();
            let outbound = senders
                .get_mut(&kind)
                .ok_or_else(|| self.missing_sender(kind))?;
            outbound.enabled = enabled;
            (Arc::clone(&outbound.sender), Arc::clone(&outbound.track))
        };
        let track = if enabled { Some(as_local(track)) } else { None };
        sender.replace_track(track).await?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
