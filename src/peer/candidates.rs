use crate::protocol::{ConnectionId, IceCandidate};
use std::collections::HashMap;
use tracing::warn;

/// Upper bound on candidates held for a single remote.
pub const MAX_BUFFERED_CANDIDATES: usize = 64;

/// Upper bound on remotes with candidates waiting at the same time.
pub const MAX_BUFFERED_REMOTES: usize = 32;

/// Remote ICE candidates that arrived before the link they belong to could
/// use them.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: HashMap<ConnectionId, Vec<IceCandidate>>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the remote's buffer is full, or too many remotes
    /// are already waiting, and the candidate was dropped.
    pub fn push(&mut self, remote: &str, candidate: IceCandidate) -> bool {
        if !self.pending.contains_key(remote) && self.pending.len() >= MAX_BUFFERED_REMOTES {
            warn!(
                "Candidates pending for {} remotes, dropping candidate from {}",
                self.pending.len(),
                remote
            );
            return false;
        }
        let queue = self.pending.entry(remote.to_string()).or_default();
        if queue.len() >= MAX_BUFFERED_CANDIDATES {
            warn!("Candidate buffer for {} is full, dropping candidate", remote);
            return false;
        }
        queue.push(candidate);
        true
    }

    /// Hand over everything buffered for `remote`, in arrival order.
    pub fn take(&mut self, remote: &str) -> Vec<IceCandidate> {
        self.pending.remove(remote).unwrap_or_default()
    }

    pub fn discard(&mut self, remote: &str) {
        self.pending.remove(remote);
    }

    pub fn len(&self, remote: &str) -> usize {
        self.pending.get(remote).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{}", n),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn test_take_preserves_order_and_empties() {
        let mut buffer = CandidateBuffer::new();
        buffer.push("a", candidate(1));
        buffer.push("a", candidate(2));
        buffer.push("b", candidate(3));
        assert_eq!(buffer.take("a"), vec![candidate(1), candidate(2)]);
        assert_eq!(buffer.len("a"), 0);
        assert_eq!(buffer.len("b"), 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buffer = CandidateBuffer::new();
        for n in 0..MAX_BUFFERED_CANDIDATES {
            assert!(buffer.push("a", candidate(n)));
        }
        assert!(!buffer.push("a", candidate(999)));
        assert_eq!(buffer.len("a"), MAX_BUFFERED_CANDIDATES);
    }

    #[test]
    fn test_remote_count_is_bounded() {
        let mut buffer = CandidateBuffer::new();
        for n in 0..MAX_BUFFERED_REMOTES {
            assert!(buffer.push(&format!("r{}", n), candidate(n)));
        }
        assert!(!buffer.push("late", candidate(1)));
        assert_eq!(buffer.len("late"), 0);
        // Remotes already waiting still accept more.
        assert!(buffer.push("r0", candidate(2)));
        assert_eq!(buffer.len("r0"), 2);

        buffer.discard("r0");
        assert!(buffer.push("late", candidate(1)));
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_discard_drops_remote() {
        let mut buffer = CandidateBuffer::new();
        buffer.push("a", candidate(1));
        buffer.discard("a");
        assert!(buffer.is_empty());
        assert!(buffer.take("a").is_empty());
    }
}
