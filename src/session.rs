//! Client session: drives the peer orchestrator from signaling input and
//! user commands, and reports back through [`SessionEvent`]s.

use crate::error::{Error, Result};
use crate::peer::{
    LinkState, MediaConstraints, MediaEngine, Orchestrator, OrchestratorInputs, ReplaceReply,
    ReplaceReport, TrackKind,
};
use crate::presence::ChatEntry;
use crate::protocol::{ClientMessage, ConnectionId, ErrorCode, Member, RoomId, ServerMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) enum SessionCommand {
    CreateRoom,
    JoinRoom { room_id: RoomId },
    SendChat { text: String },
    ShareScreen { reply: ReplaceReply },
    StopScreenShare { reply: ReplaceReply },
    SetTrackEnabled { kind: TrackKind, enabled: bool },
    LinkStates {
        reply: oneshot::Sender<Vec<(ConnectionId, LinkState)>>,
    },
    Leave,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomCreated {
        room_id: RoomId,
    },
    Joined {
        room_id: RoomId,
        members: Vec<Member>,
    },
    ServerError {
        code: ErrorCode,
        message: String,
    },
    ParticipantJoined {
        id: ConnectionId,
        display_name: String,
    },
    ParticipantLeft {
        id: ConnectionId,
        display_name: String,
    },
    /// A remote track is ready to render.
    RemoteTrack {
        remote: ConnectionId,
        display_name: String,
        kind: TrackKind,
        track_id: String,
    },
    LinkStateChanged {
        remote: ConnectionId,
        state: LinkState,
    },
    /// Rendering handles for `remote` can be released.
    PeerClosed {
        remote: ConnectionId,
        display_name: String,
    },
    Chat(ChatEntry),
    /// The shared screen stopped by itself and the camera was put back.
    ScreenShareEnded(ReplaceReport),
    /// The signaling connection went away.
    Disconnected,
}

pub struct Session;

impl Session {
    /// Open local media and start the session loop.
    ///
    /// Media is opened before anything is sent, so a denied camera or
    /// microphone fails here with `MediaAccessDenied` and no room is touched.
    pub async fn start<E: MediaEngine>(
        engine: Arc<E>,
        display_name: impl Into<String>,
        constraints: MediaConstraints,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::Receiver<ServerMessage>,
    ) -> Result<SessionHandle> {
        let stream = engine.open_user_media(constraints).await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (orchestrator, inputs) =
            Orchestrator::new(engine, display_name.into(), stream, outbound, event_tx.clone());
        let task = tokio::spawn(run(orchestrator, inputs, inbound, command_rx, event_tx));

        Ok(SessionHandle {
            commands,
            events,
            task,
        })
    }
}

async fn run<E: MediaEngine>(
    mut orchestrator: Orchestrator<E>,
    mut inputs: OrchestratorInputs<E::Track>,
    mut inbound: mpsc::Receiver<ServerMessage>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                Some(msg) => orchestrator.handle_server_message(msg),
                None => {
                    info!("Signaling connection closed");
                    orchestrator.close_all();
                    let _ = events.send(SessionEvent::Disconnected);
                    break;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Leave) | None => {
                    orchestrator.leave();
                    break;
                }
                Some(cmd) => orchestrator.handle_command(cmd),
            },
            Some(closed) = inputs.closed.recv() => orchestrator.handle_link_closed(closed),
            Some((result, reply)) = inputs.screen.recv() => orchestrator.apply_screen(result, reply),
            Some(generation) = inputs.screen_ended.recv() => {
                orchestrator.handle_screen_ended(generation)
            }
        }
    }
    debug!("Session loop finished");
}

/// Handle to a running session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn create_room(&self) -> Result<()> {
        self.command(SessionCommand::CreateRoom)
    }

    pub fn join_room(&self, room_id: impl Into<RoomId>) -> Result<()> {
        self.command(SessionCommand::JoinRoom {
            room_id: room_id.into(),
        })
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.command(SessionCommand::SendChat { text: text.into() })
    }

    /// Put the screen on every live link's video sender.
    pub async fn share_screen(&self) -> Result<ReplaceReport> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::ShareScreen { reply })?;
        rx.await.map_err(|_| session_ended())?
    }

    /// Put the camera back.
    pub async fn stop_screen_share(&self) -> Result<ReplaceReport> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::StopScreenShare { reply })?;
        rx.await.map_err(|_| session_ended())?
    }

    /// Mute or unmute the microphone, or pause the outgoing video, on every
    /// link. Links made later start in the same state.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        self.command(SessionCommand::SetTrackEnabled { kind, enabled })
    }

    pub async fn link_states(&self) -> Result<Vec<(ConnectionId, LinkState)>> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::LinkStates { reply })?;
        rx.await.map_err(|_| session_ended())
    }

    /// Close all links and leave the room. The session ends afterwards.
    pub fn leave(&self) -> Result<()> {
        self.command(SessionCommand::Leave)
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait for the session loop to finish.
    pub async fn finished(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("session task failed: {}", e)))
    }

    fn command(&self, cmd: SessionCommand) -> Result<()> {
        self.commands.send(cmd).map_err(|_| session_ended())
    }
}

fn session_ended() -> Error {
    Error::Signaling("session has ended".to_string())
}
