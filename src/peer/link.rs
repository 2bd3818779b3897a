//! One task per remote participant.
//!
//! The actor owns its `PeerLink` exclusively, so slow media calls on one link
//! never hold up another. It receives negotiation input from the orchestrator
//! through its inbox and transport callbacks through its own event channel.

use super::candidates::MAX_BUFFERED_CANDIDATES;
use super::engine::{LinkEvent, LocalStream, MediaEngine, PeerLink, TrackKind};
use super::state::{LinkMonitor, LinkState, TransportState};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ConnectionId, IceCandidate, SessionDescription};
use crate::session::SessionEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub(crate) enum LinkCommand<T> {
    StartOffer,
    RemoteOffer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
    ReplaceVideo {
        track: T,
        reply: oneshot::Sender<Result<()>>,
    },
    SetEnabled {
        kind: TrackKind,
        enabled: bool,
    },
    Close,
}

/// Sent to the orchestrator once the actor has released its link.
#[derive(Debug)]
pub(crate) struct LinkClosed {
    pub remote: ConnectionId,
    pub generation: u64,
}

pub(crate) struct LinkActor {
    pub remote: ConnectionId,
    pub display_name: String,
    pub generation: u64,
    pub monitor: LinkMonitor,
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub closed: mpsc::UnboundedSender<LinkClosed>,
    pending: Vec<IceCandidate>,
    remote_applied: bool,
    transport_connected: bool,
}

enum Flow {
    Continue,
    Stop,
}

impl LinkActor {
    pub fn new(
        remote: ConnectionId,
        display_name: String,
        generation: u64,
        monitor: LinkMonitor,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedSender<SessionEvent>,
        closed: mpsc::UnboundedSender<LinkClosed>,
    ) -> Self {
        Self {
            remote,
            display_name,
            generation,
            monitor,
            outbound,
            events,
            closed,
            pending: Vec::new(),
            remote_applied: false,
            transport_connected: false,
        }
    }

    pub async fn run<E: MediaEngine>(
        mut self,
        engine: Arc<E>,
        tracks: LocalStream<E::Track>,
        mut commands: mpsc::UnboundedReceiver<LinkCommand<E::Track>>,
    ) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        match self.open(engine.as_ref(), tracks, event_tx).await {
            Ok(link) => {
                loop {
                    let flow = tokio::select! {
                        cmd = commands.recv() => match cmd {
                            None | Some(LinkCommand::Close) => Flow::Stop,
                            Some(cmd) => self.handle_command(&link, cmd).await,
                        },
                        Some(event) = event_rx.recv() => self.handle_event(event),
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }
                if let Err(e) = link.close().await {
                    debug!("Closing link to {} failed: {}", self.remote, e);
                }
            }
            Err(e) => warn!("Failed to set up link to {}: {}", self.remote, e),
        }

        self.finish();
    }

    async fn open<E: MediaEngine>(
        &self,
        engine: &E,
        tracks: LocalStream<E::Track>,
        event_tx: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<E::Link> {
        let link = engine.create_link(&self.remote, event_tx).await?;
        let attached = async {
            if let Some(audio) = tracks.audio {
                link.attach_local_track(TrackKind::Audio, audio).await?;
            }
            if let Some(video) = tracks.video {
                link.attach_local_track(TrackKind::Video, video).await?;
            }
            Ok::<_, Error>(())
        }
        .await;

        if let Err(e) = attached {
            let _ = link.close().await;
            return Err(e);
        }
        Ok(link)
    }

    async fn handle_command<L: PeerLink>(
        &mut self,
        link: &L,
        cmd: LinkCommand<L::Track>,
    ) -> Flow {
        let result = match cmd {
            LinkCommand::StartOffer => self.start_offer(link).await,
            LinkCommand::RemoteOffer(sdp) => self.accept_offer(link, sdp).await,
            LinkCommand::RemoteAnswer(sdp) => self.accept_answer(link, sdp).await,
            LinkCommand::RemoteCandidate(candidate) => {
                self.accept_candidate(link, candidate).await;
                Ok(())
            }
            LinkCommand::ReplaceVideo { track, reply } => {
                let result = link.replace_track(TrackKind::Video, track).await;
                if let Err(e) = &result {
                    warn!("Replacing video track for {} failed: {}", self.remote, e);
                }
                let _ = reply.send(result);
                Ok(())
            }
            LinkCommand::SetEnabled { kind, enabled } => {
                // A sender that cannot be paused leaves the link usable
                if let Err(e) = link.set_track_enabled(kind, enabled).await {
                    warn!("Toggling {:?} for {} failed: {}", kind, self.remote, e);
                }
                Ok(())
            }
            LinkCommand::Close => return Flow::Stop,
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) if e.is_benign() => {
                debug!("{}", e);
                Flow::Continue
            }
            Err(e) => {
                warn!("Negotiation with {} failed: {}", self.remote, e);
                Flow::Stop
            }
        }
    }

    async fn start_offer<L: PeerLink>(&mut self, link: &L) -> Result<()> {
        let state = self.monitor.current();
        if state != LinkState::New {
            return Err(Error::discarded(
                self.remote.clone(),
                format!("cannot offer from state {}", state),
            ));
        }

        let offer = link.create_offer().await?;
        link.set_local_description(offer.clone()).await?;
        self.send(ClientMessage::Offer {
            sdp: offer,
            to: self.remote.clone(),
        });
        self.transition(LinkState::OfferSent);
        info!("Sent offer to {}", self.remote);
        Ok(())
    }

    async fn accept_offer<L: PeerLink>(&mut self, link: &L, sdp: SessionDescription) -> Result<()> {
        let state = self.monitor.current();
        if !matches!(state, LinkState::New | LinkState::OfferReceived) {
            return Err(Error::discarded(
                self.remote.clone(),
                format!("offer in state {}", state),
            ));
        }
        self.transition(LinkState::OfferReceived);

        link.set_remote_description(sdp).await?;
        self.remote_applied = true;
        self.flush_candidates(link).await;

        let answer = link.create_answer().await?;
        link.set_local_description(answer.clone()).await?;
        self.send(ClientMessage::Answer {
            sdp: answer,
            to: self.remote.clone(),
        });
        self.transition(LinkState::AnswerSent);
        info!("Answered offer from {}", self.remote);
        self.promote_if_connected();
        Ok(())
    }

    async fn accept_answer<L: PeerLink>(
        &mut self,
        link: &L,
        sdp: SessionDescription,
    ) -> Result<()> {
        let state = self.monitor.current();
        if state != LinkState::OfferSent {
            return Err(Error::discarded(
                self.remote.clone(),
                format!("answer in state {}", state),
            ));
        }

        link.set_remote_description(sdp).await?;
        self.remote_applied = true;
        self.transition(LinkState::AnswerReceived);
        self.flush_candidates(link).await;
        self.promote_if_connected();
        Ok(())
    }

    async fn accept_candidate<L: PeerLink>(&mut self, link: &L, candidate: IceCandidate) {
        if !self.remote_applied {
            if self.pending.len() >= MAX_BUFFERED_CANDIDATES {
                warn!("Candidate buffer for {} is full, dropping candidate", self.remote);
            } else {
                self.pending.push(candidate);
            }
            return;
        }
        if let Err(e) = link.add_remote_candidate(candidate).await {
            warn!("Failed to add candidate from {}: {}", self.remote, e);
        }
    }

    async fn flush_candidates<L: PeerLink>(&mut self, link: &L) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("Applying {} buffered candidates for {}", pending.len(), self.remote);
        }
        for candidate in pending {
            if let Err(e) = link.add_remote_candidate(candidate).await {
                warn!("Failed to add candidate from {}: {}", self.remote, e);
            }
        }
    }

    fn handle_event(&mut self, event: LinkEvent) -> Flow {
        match event {
            LinkEvent::LocalCandidate(candidate) => {
                self.send(ClientMessage::IceCandidate {
                    candidate,
                    to: self.remote.clone(),
                });
            }
            LinkEvent::RemoteTrack { kind, track_id } => {
                info!("Remote {:?} track {} from {}", kind, track_id, self.remote);
                let _ = self.events.send(SessionEvent::RemoteTrack {
                    remote: self.remote.clone(),
                    display_name: self.display_name.clone(),
                    kind,
                    track_id,
                });
            }
            LinkEvent::StateChanged(state) => {
                debug!("Transport to {} is {}", self.remote, state);
                if state.is_terminal() {
                    info!("Transport to {} ended: {}", self.remote, state);
                    return Flow::Stop;
                }
                if state == TransportState::Connected {
                    self.transport_connected = true;
                    self.promote_if_connected();
                }
            }
        }
        Flow::Continue
    }

    /// Transport connectivity can be reported before the description exchange
    /// has finished; `Connected` is only entered once both are in.
    fn promote_if_connected(&mut self) {
        if self.transport_connected && self.monitor.current().is_negotiated() {
            self.transition(LinkState::Connected);
            info!("Connected to {}", self.remote);
        }
    }

    fn transition(&self, state: LinkState) {
        if self.monitor.current() == state {
            return;
        }
        self.monitor.update_state(state);
        let _ = self.events.send(SessionEvent::LinkStateChanged {
            remote: self.remote.clone(),
            state,
        });
    }

    fn send(&self, msg: ClientMessage) {
        if self.outbound.send(msg).is_err() {
            debug!("Signaling channel closed, dropping message for {}", self.remote);
        }
    }

    fn finish(self) {
        self.transition(LinkState::Closed);
        let _ = self.events.send(SessionEvent::PeerClosed {
            remote: self.remote.clone(),
            display_name: self.display_name.clone(),
        });
        let _ = self.closed.send(LinkClosed {
            remote: self.remote,
            generation: self.generation,
        });
    }
}
