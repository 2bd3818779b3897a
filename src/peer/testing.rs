//! In-memory media engine that records every call per remote.

use super::engine::{
    DisplaySource, LinkEvent, LinkEventSink, LocalStream, MediaConstraints, MediaEngine, PeerLink,
    TrackKind,
};
use crate::error::{Error, Result};
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Attach(TrackKind, String),
    Replace(TrackKind, String),
    SetEnabled(TrackKind, bool),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

type OpLog = Arc<Mutex<HashMap<String, Vec<Op>>>>;

#[derive(Default)]
pub struct ScriptedEngine {
    deny_media: bool,
    no_screen: bool,
    failing_replace: Mutex<HashSet<String>>,
    ops: OpLog,
    sinks: Mutex<HashMap<String, LinkEventSink>>,
    screen_end: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying_media() -> Arc<Self> {
        Arc::new(Self {
            deny_media: true,
            ..Self::default()
        })
    }

    pub fn without_screen() -> Arc<Self> {
        Arc::new(Self {
            no_screen: true,
            ..Self::default()
        })
    }

    /// Make track replacement fail on links to `remote`.
    pub fn fail_replace_for(&self, remote: &str) {
        self.failing_replace.lock().insert(remote.to_string());
    }

    pub fn ops(&self, remote: &str) -> Vec<Op> {
        self.ops.lock().get(remote).cloned().unwrap_or_default()
    }

    pub fn count(&self, remote: &str, op: &Op) -> usize {
        self.ops(remote).iter().filter(|o| *o == op).count()
    }

    pub fn has_link(&self, remote: &str) -> bool {
        self.sinks.lock().contains_key(remote)
    }

    /// Stop the shared screen as if its window was closed.
    pub fn end_screen(&self) {
        if let Some(end) = self.screen_end.lock().take() {
            let _ = end.send(());
        }
    }

    /// Raise a transport callback on the link to `remote`.
    pub fn emit(&self, remote: &str, event: LinkEvent) {
        if let Some(sink) = self.sinks.lock().get(remote) {
            let _ = sink.send(event);
        }
    }
}

#[async_trait]
impl MediaEngine for ScriptedEngine {
    type Track = String;
    type Link = ScriptedLink;

    async fn open_user_media(&self, constraints: MediaConstraints) -> Result<LocalStream<String>> {
        if self.deny_media {
            return Err(Error::MediaAccessDenied("permission denied".to_string()));
        }
        Ok(LocalStream {
            audio: constraints.audio.then(|| "mic".to_string()),
            video: constraints.video.then(|| "camera".to_string()),
        })
    }

    async fn open_display_media(&self) -> Result<DisplaySource<String>> {
        if self.no_screen {
            return Err(Error::MediaAccessDenied("screen capture cancelled".to_string()));
        }
        let (end, ended) = oneshot::channel();
        *self.screen_end.lock() = Some(end);
        Ok(DisplaySource {
            track: "screen".to_string(),
            ended,
        })
    }

    async fn create_link(&self, remote: &str, events: LinkEventSink) -> Result<ScriptedLink> {
        self.sinks.lock().insert(remote.to_string(), events);
        Ok(ScriptedLink {
            remote: remote.to_string(),
            ops: Arc::clone(&self.ops),
            remote_applied: AtomicBool::new(false),
            fail_replace: self.failing_replace.lock().contains(remote),
        })
    }
}

pub struct ScriptedLink {
    remote: String,
    ops: OpLog,
    remote_applied: AtomicBool,
    fail_replace: bool,
}

impl ScriptedLink {
    fn record(&self, op: Op) {
        self.ops
            .lock()
            .entry(self.remote.clone())
            .or_default()
            .push(op);
    }
}

#[async_trait]
impl PeerLink for ScriptedLink {
    type Track = String;

    async fn attach_local_track(&self, kind: TrackKind, track: String) -> Result<()> {
        self.record(Op::Attach(kind, track));
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: String) -> Result<()> {
        if self.fail_replace {
            return Err(Error::Signaling("sender is gone".to_string()));
        }
        self.record(Op::Replace(kind, track));
        Ok(())
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<()> {
        self.record(Op::SetEnabled(kind, enabled));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-for-{}", self.remote)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-for-{}", self.remote)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Op::SetLocal(description.kind));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.remote_applied.store(true, Ordering::SeqCst);
        self.record(Op::SetRemote(description.kind));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !self.remote_applied.load(Ordering::SeqCst) {
            return Err(Error::Signaling(
                "candidate added before remote description".to_string(),
            ));
        }
        self.record(Op::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Op::Close);
        Ok(())
    }
}
