//! Owner of the peer link arena.
//!
//! Turns room membership and relayed negotiation messages into link actors.
//! Links are created and destroyed explicitly here and nowhere else; a remote
//! id never gets a link just because a message mentions it.

use super::candidates::CandidateBuffer;
use super::engine::{DisplaySource, LocalStream, MediaEngine, TrackKind};
use super::link::{LinkActor, LinkClosed, LinkCommand};
use super::state::{LinkMonitor, LinkState};
use crate::error::{Error, Result};
use crate::presence::{ChatEntry, Roster};
use crate::protocol::{ClientMessage, ConnectionId, Member, RoomId, ServerMessage};
use crate::session::{SessionCommand, SessionEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Outcome of swapping the outbound video track on every live link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceReport {
    pub replaced: Vec<ConnectionId>,
    pub failed: Vec<(ConnectionId, String)>,
}

pub(crate) type ReplaceReply = oneshot::Sender<Result<ReplaceReport>>;
pub(crate) type ScreenResult<T> = (Result<DisplaySource<T>>, ReplaceReply);

struct LinkHandle<T> {
    generation: u64,
    commands: mpsc::UnboundedSender<LinkCommand<T>>,
    monitor: LinkMonitor,
}

struct LocalMedia<T> {
    audio: Option<T>,
    camera: Option<T>,
    screen: Option<T>,
}

impl<T: Clone> LocalMedia<T> {
    /// Track new links attach to: the screen while it is shared.
    fn current_video(&self) -> Option<T> {
        self.screen.clone().or_else(|| self.camera.clone())
    }
}

pub struct Orchestrator<E: MediaEngine> {
    engine: Arc<E>,
    display_name: String,
    local_id: Option<ConnectionId>,
    room_id: Option<RoomId>,
    links: HashMap<ConnectionId, LinkHandle<E::Track>>,
    next_generation: u64,
    roster: Roster,
    candidates: CandidateBuffer,
    torn_down: HashSet<ConnectionId>,
    media: LocalMedia<E::Track>,
    /// Kinds the user paused; new links start with these paused too.
    paused: HashSet<TrackKind>,
    screen_generation: u64,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed_tx: mpsc::UnboundedSender<LinkClosed>,
    screen_tx: mpsc::UnboundedSender<ScreenResult<E::Track>>,
    screen_ended_tx: mpsc::UnboundedSender<u64>,
}

/// Receivers the session loop selects on alongside signaling input.
pub(crate) struct OrchestratorInputs<T> {
    pub closed: mpsc::UnboundedReceiver<LinkClosed>,
    pub screen: mpsc::UnboundedReceiver<ScreenResult<T>>,
    /// Generation of a shared screen whose source stopped.
    pub screen_ended: mpsc::UnboundedReceiver<u64>,
}

impl<E: MediaEngine> Orchestrator<E> {
    pub(crate) fn new(
        engine: Arc<E>,
        display_name: String,
        stream: LocalStream<E::Track>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, OrchestratorInputs<E::Track>) {
        let (closed_tx, closed) = mpsc::unbounded_channel();
        let (screen_tx, screen) = mpsc::unbounded_channel();
        let (screen_ended_tx, screen_ended) = mpsc::unbounded_channel();
        let orchestrator = Self {
            engine,
            display_name,
            local_id: None,
            room_id: None,
            links: HashMap::new(),
            next_generation: 0,
            roster: Roster::new(),
            candidates: CandidateBuffer::new(),
            torn_down: HashSet::new(),
            media: LocalMedia {
                audio: stream.audio,
                camera: stream.video,
                screen: None,
            },
            paused: HashSet::new(),
            screen_generation: 0,
            outbound,
            events,
            closed_tx,
            screen_tx,
            screen_ended_tx,
        };
        let inputs = OrchestratorInputs {
            closed,
            screen,
            screen_ended,
        };
        (orchestrator, inputs)
    }

    pub fn link_states(&self) -> Vec<(ConnectionId, LinkState)> {
        let mut states: Vec<_> = self
            .links
            .iter()
            .map(|(id, handle)| (id.clone(), handle.monitor.current()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    pub(crate) fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::CreateRoom => self.send(ClientMessage::CreateRoom),
            SessionCommand::JoinRoom { room_id } => self.send(ClientMessage::JoinRoom {
                room_id,
                display_name: self.display_name.clone(),
            }),
            SessionCommand::SendChat { text } => match &self.room_id {
                Some(room_id) => self.send(ClientMessage::ChatMessage {
                    room_id: room_id.clone(),
                    text,
                }),
                None => warn!("Not in a room, chat message dropped"),
            },
            SessionCommand::ShareScreen { reply } => self.share_screen(reply),
            SessionCommand::StopScreenShare { reply } => self.stop_screen_share(reply),
            SessionCommand::SetTrackEnabled { kind, enabled } => {
                self.set_track_enabled(kind, enabled)
            }
            SessionCommand::LinkStates { reply } => {
                let _ = reply.send(self.link_states());
            }
            SessionCommand::Leave => self.leave(),
        }
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) {
        debug!("Received {}", msg.name());
        match msg {
            ServerMessage::Welcome { id } => {
                info!("Signaling assigned id {}", id);
                self.local_id = Some(id);
            }
            ServerMessage::RoomCreated { room_id } => {
                info!("Room {} created, joining", room_id);
                self.leave_local_room();
                self.emit(SessionEvent::RoomCreated {
                    room_id: room_id.clone(),
                });
                self.send(ClientMessage::JoinRoom {
                    room_id,
                    display_name: self.display_name.clone(),
                });
            }
            ServerMessage::RoomJoined { room_id, members } => self.on_joined(room_id, members),
            ServerMessage::Error { code, message } => {
                warn!("Server error {:?}: {}", code, message);
                self.emit(SessionEvent::ServerError { code, message });
            }
            ServerMessage::UserJoined { id, display_name } => {
                // The newcomer sends the offer; only remember who it is.
                info!("{} ({}) joined", display_name, id);
                self.roster.insert(id.clone(), display_name.clone());
                self.torn_down.remove(&id);
                self.emit(SessionEvent::ParticipantJoined { id, display_name });
            }
            ServerMessage::UserLeft { id, display_name } => {
                info!("{} ({}) left", display_name, id);
                self.teardown(&id);
                self.roster.remove(&id);
                self.emit(SessionEvent::ParticipantLeft { id, display_name });
            }
            ServerMessage::Offer {
                sdp,
                from,
                display_name,
            } => {
                if self.torn_down.contains(&from) {
                    debug!("{}", Error::discarded(from, "offer for closed link"));
                    return;
                }
                self.roster.insert(from.clone(), display_name);
                if !self.links.contains_key(&from) {
                    self.spawn_link(&from);
                }
                self.forward(&from, LinkCommand::RemoteOffer(sdp));
                for candidate in self.candidates.take(&from) {
                    self.forward(&from, LinkCommand::RemoteCandidate(candidate));
                }
            }
            ServerMessage::Answer { sdp, from } => {
                if self.links.contains_key(&from) {
                    self.forward(&from, LinkCommand::RemoteAnswer(sdp));
                } else {
                    debug!("{}", Error::discarded(from, "answer without a link"));
                }
            }
            ServerMessage::IceCandidate { candidate, from } => {
                if self.links.contains_key(&from) {
                    self.forward(&from, LinkCommand::RemoteCandidate(candidate));
                } else if self.torn_down.contains(&from) {
                    debug!("{}", Error::discarded(from, "candidate for closed link"));
                } else {
                    self.candidates.push(&from, candidate);
                }
            }
            ServerMessage::ChatMessage {
                display_name,
                text,
                timestamp,
                sender_id,
            } => {
                let entry = ChatEntry::new(
                    display_name,
                    text,
                    timestamp,
                    sender_id,
                    self.local_id.as_deref(),
                );
                self.emit(SessionEvent::Chat(entry));
            }
        }
    }

    fn on_joined(&mut self, room_id: RoomId, members: Vec<Member>) {
        info!("Joined room {} with {} other members", room_id, members.len());
        if self.room_id.as_deref() != Some(room_id.as_str()) {
            self.leave_local_room();
        }
        self.room_id = Some(room_id.clone());
        self.emit(SessionEvent::Joined {
            room_id,
            members: members.clone(),
        });

        for member in members {
            self.roster.insert(member.id.clone(), member.display_name);
            if self.links.contains_key(&member.id) {
                continue;
            }
            self.torn_down.remove(&member.id);
            self.spawn_link(&member.id);
            self.forward(&member.id, LinkCommand::StartOffer);
        }
    }

    /// A link actor finished. Only the generation still registered is
    /// removed, so a stale notice cannot drop a newer link.
    pub(crate) fn handle_link_closed(&mut self, closed: LinkClosed) {
        let current = self
            .links
            .get(&closed.remote)
            .map_or(false, |handle| handle.generation == closed.generation);
        if current {
            self.links.remove(&closed.remote);
            self.torn_down.insert(closed.remote.clone());
            self.candidates.discard(&closed.remote);
            debug!("Link to {} released", closed.remote);
        }
    }

    fn spawn_link(&mut self, remote: &str) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let monitor = LinkMonitor::new(LinkState::New);
        let (commands, inbox) = mpsc::unbounded_channel();
        let actor = LinkActor::new(
            remote.to_string(),
            self.roster.name_of(remote),
            generation,
            monitor.clone(),
            self.outbound.clone(),
            self.events.clone(),
            self.closed_tx.clone(),
        );
        let tracks = LocalStream {
            audio: self.media.audio.clone(),
            video: self.media.current_video(),
        };
        tokio::spawn(actor.run(Arc::clone(&self.engine), tracks, inbox));

        debug!("Created link {} to {}", generation, remote);
        self.links.insert(
            remote.to_string(),
            LinkHandle {
                generation,
                commands,
                monitor,
            },
        );
        for kind in &self.paused {
            self.forward(
                remote,
                LinkCommand::SetEnabled {
                    kind: *kind,
                    enabled: false,
                },
            );
        }
    }

    fn forward(&self, remote: &str, cmd: LinkCommand<E::Track>) {
        if let Some(handle) = self.links.get(remote) {
            if handle.commands.send(cmd).is_err() {
                debug!("Link to {} already finished", remote);
            }
        }
    }

    /// Close the link to `remote`. Safe to call any number of times.
    fn teardown(&mut self, remote: &str) {
        if let Some(handle) = self.links.remove(remote) {
            let _ = handle.commands.send(LinkCommand::Close);
            info!("Closing link to {}", remote);
        }
        self.torn_down.insert(remote.to_string());
        self.candidates.discard(remote);
    }

    /// Opening a screen source may block on the user, so it runs off the
    /// loop and the result comes back through `apply_screen`.
    fn share_screen(&mut self, reply: ReplaceReply) {
        let engine = Arc::clone(&self.engine);
        let screen_tx = self.screen_tx.clone();
        tokio::spawn(async move {
            let result = engine.open_display_media().await;
            let _ = screen_tx.send((result, reply));
        });
    }

    pub(crate) fn apply_screen(
        &mut self,
        result: Result<DisplaySource<E::Track>>,
        reply: ReplaceReply,
    ) {
        match result {
            Ok(DisplaySource { track, ended }) => {
                info!("Sharing screen on {} links", self.links.len());
                self.screen_generation += 1;
                let generation = self.screen_generation;
                let ended_tx = self.screen_ended_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        result = ended => {
                            if result.is_ok() {
                                let _ = ended_tx.send(generation);
                            }
                        }
                        _ = ended_tx.closed() => {}
                    }
                });
                self.media.screen = Some(track.clone());
                self.replace_video(track, reply);
            }
            Err(e) => {
                warn!("Screen share unavailable: {}", e);
                let _ = reply.send(Err(e));
            }
        }
    }

    /// The screen stays current when there is no camera to go back to.
    fn stop_screen_share(&mut self, reply: ReplaceReply) {
        match self.media.camera.clone() {
            Some(camera) => {
                self.media.screen = None;
                info!("Restoring camera on {} links", self.links.len());
                self.replace_video(camera, reply);
            }
            None => {
                let _ = reply.send(Err(Error::MediaAccessDenied(
                    "no camera track to restore".to_string(),
                )));
            }
        }
    }

    /// The shared source stopped by itself. Only the screen currently shared
    /// is acted on; notices for an earlier share are ignored.
    pub(crate) fn handle_screen_ended(&mut self, generation: u64) {
        if generation != self.screen_generation || self.media.screen.is_none() {
            debug!("Ignoring end of screen share {}", generation);
            return;
        }
        info!("Shared screen ended");
        if self.media.camera.is_none() {
            self.media.screen = None;
            self.emit(SessionEvent::ScreenShareEnded(ReplaceReport::default()));
            return;
        }

        let (reply, restored) = oneshot::channel();
        self.stop_screen_share(reply);
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Ok(Ok(report)) = restored.await {
                let _ = events.send(SessionEvent::ScreenShareEnded(report));
            }
        });
    }

    /// Pause or resume a local track on every link.
    fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) {
        let available = match kind {
            TrackKind::Audio => self.media.audio.is_some(),
            TrackKind::Video => self.media.current_video().is_some(),
        };
        if !available {
            warn!("No local {:?} track to toggle", kind);
            return;
        }
        let changed = if enabled {
            self.paused.remove(&kind)
        } else {
            self.paused.insert(kind)
        };
        if !changed {
            return;
        }

        info!(
            "{} {:?} on {} links",
            if enabled { "Resuming" } else { "Pausing" },
            kind,
            self.links.len()
        );
        for handle in self.links.values() {
            let _ = handle.commands.send(LinkCommand::SetEnabled { kind, enabled });
        }
    }

    /// Fan the replacement out to every live link and collect a per-link
    /// report without waiting on the loop.
    fn replace_video(&self, track: E::Track, reply: ReplaceReply) {
        let pending: Vec<_> = self
            .links
            .iter()
            .map(|(remote, handle)| {
                let (tx, rx) = oneshot::channel();
                let sent = handle
                    .commands
                    .send(LinkCommand::ReplaceVideo {
                        track: track.clone(),
                        reply: tx,
                    })
                    .is_ok();
                (remote.clone(), sent, rx)
            })
            .collect();

        tokio::spawn(async move {
            let results = futures::future::join_all(pending.into_iter().map(
                |(remote, sent, rx)| async move {
                    let outcome = if sent {
                        match rx.await {
                            Ok(result) => result.map_err(|e| e.to_string()),
                            Err(_) => Err("link closed".to_string()),
                        }
                    } else {
                        Err("link closed".to_string())
                    };
                    (remote, outcome)
                },
            ))
            .await;

            let mut report = ReplaceReport::default();
            for (remote, outcome) in results {
                match outcome {
                    Ok(()) => report.replaced.push(remote),
                    Err(reason) => report.failed.push((remote, reason)),
                }
            }
            report.replaced.sort();
            report.failed.sort();
            let _ = reply.send(Ok(report));
        });
    }

    /// Close every link and tell the server we are gone.
    pub(crate) fn leave(&mut self) {
        if let Some(room_id) = self.room_id.take() {
            info!("Leaving room {}", room_id);
        }
        self.send(ClientMessage::LeaveRoom);
        self.close_all();
    }

    /// Close every link. Only the remotes closed here stay marked as torn
    /// down, so late traffic from them is still dropped.
    pub(crate) fn close_all(&mut self) {
        let remotes: Vec<_> = self.links.keys().cloned().collect();
        for remote in &remotes {
            self.teardown(remote);
        }
        self.torn_down = remotes.into_iter().collect();
        self.candidates.clear();
        self.roster.clear();
    }

    /// Drop links and roster of the current room before entering another.
    fn leave_local_room(&mut self) {
        if let Some(previous) = self.room_id.take() {
            info!("Closing links of room {}", previous);
            self.close_all();
        }
    }

    fn send(&self, msg: ClientMessage) {
        if self.outbound.send(msg).is_err() {
            debug!("Signaling channel closed, message dropped");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
