//! Client side of the mesh: one negotiated link per remote participant.

mod candidates;
mod engine;
mod link;
mod orchestrator;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use candidates::{CandidateBuffer, MAX_BUFFERED_CANDIDATES, MAX_BUFFERED_REMOTES};
pub use engine::{
    DisplaySource, LinkEvent, LinkEventSink, LocalStream, MediaConstraints, MediaEngine, PeerLink,
    TrackKind,
};
pub use orchestrator::{Orchestrator, ReplaceReport};
pub use state::{LinkMonitor, LinkState, TransportState};

pub(crate) use orchestrator::{OrchestratorInputs, ReplaceReply};
