//! Recording collaborators for tests and non-media contexts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::candidates::RemoteCandidate;
use crate::media::{
    CaptureError, DeviceCapture, MediaConstraints, MediaStream, MediaTrack, RenderSink, TrackKind,
};
use crate::message::{IceCandidate, SdpKind, SessionDescription};
use crate::session::{
    PeerConnection, PeerConnectionFactory, PeerError, SessionEvents, SessionId,
};

/// One command a [`MockPeer`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    AddLocalStream(String),
    CreateLocal(SdpKind),
    ApplyRemote(SdpKind),
    AddCandidate(RemoteCandidate),
    Close,
}

#[derive(Debug, Default)]
struct Behaviour {
    reject_remote: AtomicBool,
    reject_local: AtomicBool,
    local_gate: Mutex<Option<Arc<Notify>>>,
    remote_gate: Mutex<Option<Arc<Notify>>>,
}

async fn pass(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

fn open(gate: &Mutex<Option<Arc<Notify>>>) {
    if let Some(gate) = gate.lock().take() {
        gate.notify_waiters();
        gate.notify_one();
    }
}

/// Creates [`MockPeer`]s and keeps every one it handed out.
#[derive(Debug, Default)]
pub struct MockPeerFactory {
    behaviour: Arc<Behaviour>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }

    /// Makes every peer treat remote descriptions as structurally invalid.
    pub fn reject_remote_descriptions(&self, reject: bool) {
        self.behaviour.reject_remote.store(reject, Ordering::SeqCst);
    }

    pub fn reject_local_descriptions(&self, reject: bool) {
        self.behaviour.reject_local.store(reject, Ordering::SeqCst);
    }

    /// Suspends local description creation until [`Self::release_local_descriptions`].
    pub fn hold_local_descriptions(&self) {
        *self.behaviour.local_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_local_descriptions(&self) {
        open(&self.behaviour.local_gate);
    }

    /// Suspends remote description application until
    /// [`Self::release_remote_descriptions`].
    pub fn hold_remote_descriptions(&self) {
        *self.behaviour.remote_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_remote_descriptions(&self) {
        open(&self.behaviour.remote_gate);
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(MockPeer {
            events,
            behaviour: Arc::clone(&self.behaviour),
            ops: Mutex::new(Vec::new()),
            remote_applied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Peer connection that records its commands and lets tests raise events.
#[derive(Debug)]
pub struct MockPeer {
    events: SessionEvents,
    behaviour: Arc<Behaviour>,
    ops: Mutex<Vec<PeerOp>>,
    remote_applied: AtomicBool,
    closed: AtomicBool,
}

impl MockPeer {
    pub fn session(&self) -> SessionId {
        self.events.session()
    }

    pub fn ops(&self) -> Vec<PeerOp> {
        self.ops.lock().clone()
    }

    pub fn committed_candidates(&self) -> Vec<RemoteCandidate> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                PeerOp::AddCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    fn record(&self, op: PeerOp) {
        self.ops.lock().push(op);
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.is_closed() {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(PeerOp::AddLocalStream(stream.id.clone()));
        Ok(())
    }

    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, PeerError> {
        pass(&self.behaviour.local_gate).await;
        self.ensure_open()?;
        self.record(PeerOp::CreateLocal(kind));
        if self.behaviour.reject_local.load(Ordering::SeqCst) {
            return Err(PeerError::Description("local description refused".into()));
        }
        Ok(SessionDescription {
            kind,
            sdp: format!("v=0\r\no=mock {} 0 IN IP4 127.0.0.1\r\n", self.session().as_u64()),
        })
    }

    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        pass(&self.behaviour.remote_gate).await;
        self.ensure_open()?;
        self.record(PeerOp::ApplyRemote(description.kind));
        if self.behaviour.reject_remote.load(Ordering::SeqCst) {
            return Err(PeerError::Description("structurally invalid sdp".into()));
        }
        self.remote_applied.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &RemoteCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.record(PeerOp::AddCandidate(candidate.clone()));
        if !self.remote_applied.load(Ordering::SeqCst) {
            return Err(PeerError::Candidate("no remote description".into()));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record(PeerOp::Close);
        }
    }
}

/// Capture device that hands out synthetic streams, or fails on demand.
#[derive(Debug, Default)]
pub struct MockCapture {
    failure: Mutex<Option<CaptureError>>,
    acquired: AtomicU64,
}

impl MockCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: CaptureError) -> Arc<Self> {
        let capture = Self::default();
        *capture.failure.lock() = Some(err);
        Arc::new(capture)
    }

    pub fn set_failure(&self, err: Option<CaptureError>) {
        *self.failure.lock() = err;
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceCapture for MockCapture {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, CaptureError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stream = MediaStream::new(format!("local-{n}"));
        if constraints.audio {
            stream = stream.with_track(MediaTrack::live(format!("audio-{n}"), TrackKind::Audio));
        }
        if constraints.video {
            stream = stream.with_track(MediaTrack::live(format!("video-{n}"), TrackKind::Video));
        }
        Ok(stream)
    }
}

/// Render sink that remembers which streams it was shown.
#[derive(Debug, Default)]
pub struct MockRender {
    local: Mutex<Vec<String>>,
    remote: Mutex<Vec<String>>,
}

impl MockRender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn local_streams(&self) -> Vec<String> {
        self.local.lock().clone()
    }

    pub fn remote_streams(&self) -> Vec<String> {
        self.remote.lock().clone()
    }
}

impl RenderSink for MockRender {
    fn show_local(&self, stream: &MediaStream) {
        self.local.lock().push(stream.id.clone());
    }

    fn show_remote(&self, stream: &MediaStream) {
        self.remote.lock().push(stream.id.clone());
    }
}

/// A host candidate with a recognisable address, for tests.
pub fn host_candidate(n: u8) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{n} 1 udp 2122260223 192.168.0.{n} {} typ host",
        50_000 + u32::from(n)
    ))
    .with_mid("0", 0)
}
