use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::candidates::RemoteCandidate;
use crate::media::{MediaStream, MediaTrack};
use crate::message::{IceCandidate, SdpKind, SessionDescription};

/// Identity of one peer-connection resource. A new id is allocated every time
/// the session is torn down, so results computed against an old session can
/// be recognised and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("track setup failed: {0}")]
    Track(String),
    #[error("peer connection setup failed: {0}")]
    Setup(String),
    #[error("peer connection closed")]
    Closed,
}

/// Notifications a peer connection raises on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    RemoteTrack {
        track: MediaTrack,
        stream: MediaStream,
    },
    TrackUnmuted {
        track_id: String,
    },
}

pub type SessionEventStream = mpsc::UnboundedReceiver<(SessionId, SessionEvent)>;

/// Event subscription handed to a peer connection when it is created. Every
/// event is tagged with the session it came from.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, SessionEvent)>,
}

impl SessionEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<(SessionId, SessionEvent)>) -> Self {
        Self { session, tx }
    }

    /// A subscription with its own receiver, for driving a peer connection
    /// outside a state machine.
    pub fn detached(session: SessionId) -> (Self, SessionEventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session, tx), rx)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once nobody listens anymore.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send((self.session, event)).is_ok()
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(SessionEvent::LocalCandidate(candidate))
    }

    pub fn gathering_complete(&self) -> bool {
        self.emit(SessionEvent::GatheringComplete)
    }

    pub fn remote_track(&self, track: MediaTrack, stream: MediaStream) -> bool {
        self.emit(SessionEvent::RemoteTrack { track, stream })
    }

    pub fn track_unmuted(&self, track_id: impl Into<String>) -> bool {
        self.emit(SessionEvent::TrackUnmuted {
            track_id: track_id.into(),
        })
    }
}

/// The media transport engine for one session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerError>;

    /// Creates a local description of `kind` and applies it, returning the
    /// description as applied.
    async fn create_local_description(&self, kind: SdpKind)
    -> Result<SessionDescription, PeerError>;

    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError>;

    async fn add_remote_candidate(&self, candidate: &RemoteCandidate) -> Result<(), PeerError>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// The live peer connection together with its identity.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: Arc<dyn PeerConnection>,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: Arc<dyn PeerConnection>) -> Self {
        Self { id, peer }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &dyn PeerConnection {
        self.peer.as_ref()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_their_session() {
        let (events, mut rx) = SessionEvents::detached(SessionId::new(4));
        assert!(events.gathering_complete());
        assert!(events.track_unmuted("video-1"));
        assert_eq!(
            rx.try_recv().unwrap(),
            (SessionId::new(4), SessionEvent::GatheringComplete)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            (
                SessionId::new(4),
                SessionEvent::TrackUnmuted {
                    track_id: "video-1".into()
                }
            )
        );
    }

    #[test]
    fn emit_reports_closed_subscription() {
        let (events, rx) = SessionEvents::detached(SessionId::default());
        drop(rx);
        assert!(!events.local_candidate(IceCandidate::new("candidate:1")));
    }

    #[test]
    fn session_ids_advance() {
        let first = SessionId::default();
        assert_eq!(first.next().as_u64(), 1);
        assert_eq!(first.next().to_string(), "#1");
        assert!(first < first.next());
    }
}
