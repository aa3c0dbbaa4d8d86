use std::collections::VecDeque;

use tracing::warn;

use crate::message::IceCandidate;
use crate::session::PeerConnection;

/// A remote candidate as handed to the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCandidate {
    Candidate(IceCandidate),
    EndOfCandidates,
}

/// Remote candidates that arrived before the remote description could be
/// applied. Entries leave only through [`PendingCandidateQueue::drain_into`]
/// or when the call is hung up.
#[derive(Debug, Default)]
pub struct PendingCandidateQueue {
    entries: VecDeque<RemoteCandidate>,
}

impl PendingCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends without deduplication.
    pub fn enqueue(&mut self, candidate: RemoteCandidate) {
        self.entries.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteCandidate> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Commits every entry to `session` in arrival order and leaves the queue
    /// empty. A candidate the transport refuses still counts as delivered.
    pub async fn drain_into(&mut self, session: &dyn PeerConnection) -> usize {
        let mut committed = 0;
        while let Some(candidate) = self.entries.pop_front() {
            if let Err(err) = session.add_remote_candidate(&candidate).await {
                warn!(error = %err, "remote candidate rejected by transport");
            }
            committed += 1;
        }
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SdpKind;
    use crate::mock::{MockPeerFactory, PeerOp};
    use crate::session::{PeerConnectionFactory, SessionEvents, SessionId};
    use crate::SessionDescription;

    fn candidate(n: u32) -> RemoteCandidate {
        RemoteCandidate::Candidate(IceCandidate::new(format!(
            "candidate:{n} 1 udp {n} 10.0.0.{n} 9 typ host"
        )))
    }

    #[tokio::test]
    async fn drains_in_arrival_order_then_empties() {
        let factory = MockPeerFactory::new();
        let (events, _rx) = SessionEvents::detached(SessionId::new(1));
        let peer = factory.create(events).await.unwrap();
        peer.apply_remote_description(&SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let mut queue = PendingCandidateQueue::new();
        queue.enqueue(candidate(1));
        queue.enqueue(candidate(2));
        queue.enqueue(candidate(1));
        queue.enqueue(RemoteCandidate::EndOfCandidates);

        assert_eq!(queue.drain_into(peer.as_ref()).await, 4);
        assert!(queue.is_empty());

        let mock = factory.latest().unwrap();
        assert_eq!(
            mock.ops(),
            vec![
                PeerOp::ApplyRemote(SdpKind::Offer),
                PeerOp::AddCandidate(candidate(1)),
                PeerOp::AddCandidate(candidate(2)),
                PeerOp::AddCandidate(candidate(1)),
                PeerOp::AddCandidate(RemoteCandidate::EndOfCandidates),
            ]
        );
    }

    #[tokio::test]
    async fn draining_empty_queue_is_a_no_op() {
        let factory = MockPeerFactory::new();
        let (events, _rx) = SessionEvents::detached(SessionId::new(1));
        let peer = factory.create(events).await.unwrap();

        let mut queue = PendingCandidateQueue::new();
        assert_eq!(queue.drain_into(peer.as_ref()).await, 0);
        assert_eq!(queue.drain_into(peer.as_ref()).await, 0);
        assert!(factory.latest().unwrap().ops().is_empty());
    }

    #[tokio::test]
    async fn rejected_candidates_still_leave_the_queue() {
        let factory = MockPeerFactory::new();
        let (events, _rx) = SessionEvents::detached(SessionId::new(1));
        let peer = factory.create(events).await.unwrap();

        // No remote description yet, so the mock transport refuses them.
        let mut queue = PendingCandidateQueue::new();
        queue.enqueue(candidate(7));
        assert_eq!(queue.drain_into(peer.as_ref()).await, 1);
        assert!(queue.is_empty());
    }
}
