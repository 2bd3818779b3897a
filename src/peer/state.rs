use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Negotiation state of one peer link.
///
/// Outbound: `New -> OfferSent -> AnswerReceived -> Connected`.
/// Inbound: `New -> OfferReceived -> AnswerSent -> Connected`.
/// `Closed` is reachable from every state and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    New,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerSent,
    Connected,
    Closed,
}

impl LinkState {
    /// Both descriptions are applied and only transport confirmation is
    /// outstanding.
    pub fn is_negotiated(self) -> bool {
        matches!(self, LinkState::AnswerReceived | LinkState::AnswerSent)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::New => write!(f, "new"),
            LinkState::OfferSent => write!(f, "offer-sent"),
            LinkState::AnswerReceived => write!(f, "answer-received"),
            LinkState::OfferReceived => write!(f, "offer-received"),
            LinkState::AnswerSent => write!(f, "answer-sent"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// Connectivity as reported by the media transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Failure or closure ends the link. `Disconnected` may still recover.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::New => write!(f, "New"),
            TransportState::Connecting => write!(f, "Connecting"),
            TransportState::Connected => write!(f, "Connected"),
            TransportState::Disconnected => write!(f, "Disconnected"),
            TransportState::Failed => write!(f, "Failed"),
            TransportState::Closed => write!(f, "Closed"),
        }
    }
}

/// Watchable state of a single link. The link task owns the writes; the
/// orchestrator and anyone else holding a receiver only read.
#[derive(Clone)]
pub struct LinkMonitor {
    status: Arc<watch::Sender<LinkState>>,
    receiver: watch::Receiver<LinkState>,
}

impl LinkMonitor {
    pub fn new(initial: LinkState) -> Self {
        let (status, receiver) = watch::channel(initial);
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update_state(&self, state: LinkState) {
        self.status.send_replace(state);
    }

    pub fn current(&self) -> LinkState {
        *self.receiver.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.receiver.clone()
    }
}
