use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::candidates::{PendingCandidateQueue, RemoteCandidate};
use crate::error::CallError;
use crate::media::{DeviceCapture, MediaConstraints, MediaStream, MediaTrack, RenderSink};
use crate::message::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
use crate::phase::{NegotiationPhase, Step, Trigger};
use crate::session::{
    PeerConnectionFactory, SessionEvent, SessionEventStream, SessionEvents, SessionHandle,
    SessionId,
};
use crate::signaling::SignalingChannel;

/// Collaborators one call negotiates through.
#[derive(Clone)]
pub struct CallParts {
    pub signaling: Arc<dyn SignalingChannel>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub capture: Arc<dyn DeviceCapture>,
    pub render: Arc<dyn RenderSink>,
}

/// What became of a trigger that did not fail the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The trigger ran to completion.
    Applied,
    /// A remote candidate was queued until the remote description is applied.
    Buffered,
    /// Nothing to do, e.g. an event from a torn-down session.
    Ignored,
    /// The trigger was rejected and logged. Phase and queue are unchanged
    /// unless the error says the session was replaced underneath it.
    Dropped(CallError),
}

#[derive(Debug, Default)]
struct Inner {
    phase: NegotiationPhase,
    /// Id the live session has, or will have once created.
    epoch: SessionId,
    session: Option<SessionHandle>,
    /// Set once the remote description is applied and the queue flushed.
    remote_ready: bool,
    pending: PendingCandidateQueue,
    awaiting_live: HashMap<String, MediaStream>,
    rendered: HashSet<String>,
}

impl Inner {
    fn is_live(&self, id: SessionId) -> bool {
        self.epoch == id && self.session.as_ref().map(SessionHandle::id) == Some(id)
    }

    /// Returns to `Idle` and retires the current session id.
    fn tear_down(&mut self, clear_pending: bool) -> Option<SessionHandle> {
        self.phase = NegotiationPhase::Idle;
        self.remote_ready = false;
        self.awaiting_live.clear();
        self.rendered.clear();
        if clear_pending {
            self.pending.clear();
        }
        self.epoch = self.epoch.next();
        self.session.take()
    }
}

enum Install {
    Installed,
    Existing(SessionHandle),
    Superseded,
}

/// Offer/answer negotiation for one side of a two-party call.
///
/// Every trigger checks and moves the phase inside one critical section of a
/// synchronous lock and never awaits while holding it. Awaited work runs after
/// the phase already shows the transition in progress, and each result is
/// checked against the session it was started for before it is used.
pub struct NegotiationStateMachine {
    parts: CallParts,
    media: MediaConstraints,
    events_tx: mpsc::UnboundedSender<(SessionId, SessionEvent)>,
    inner: Mutex<Inner>,
    phase_tx: watch::Sender<NegotiationPhase>,
}

impl NegotiationStateMachine {
    /// Builds an idle machine. Peer connections it creates report on the
    /// returned stream, which belongs in [`Self::on_session_event`].
    pub fn new(parts: CallParts, media: MediaConstraints) -> (Arc<Self>, SessionEventStream) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(NegotiationPhase::Idle);
        let machine = Arc::new(Self {
            parts,
            media,
            events_tx,
            inner: Mutex::new(Inner::default()),
            phase_tx,
        });
        (machine, events_rx)
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.inner.lock().phase
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<NegotiationPhase> {
        self.phase_tx.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Id of the live session, if one exists.
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock().session.as_ref().map(SessionHandle::id)
    }

    /// Creates the session ahead of the first trigger.
    pub async fn prepare(&self) -> Result<SessionId, CallError> {
        self.acquire_session().await.map(|session| session.id())
    }

    /// Local user action: offer a call to the remote party.
    pub async fn start_call(&self) -> Result<Disposition, CallError> {
        let result = self.offer_call().await;
        self.settle(Trigger::StartCall.as_str(), result)
    }

    /// Decodes one raw inbound frame and handles it. Undecodable frames are
    /// dropped without touching the phase.
    pub async fn on_signaling_frame(&self, frame: &str) -> Result<Disposition, CallError> {
        match SignalingMessage::from_json(frame) {
            Ok(message) => self.on_signaling_message(message).await,
            Err(err) => self.settle("frame", Err(err)),
        }
    }

    pub async fn on_signaling_message(
        &self,
        message: SignalingMessage,
    ) -> Result<Disposition, CallError> {
        let kind = message.wire_type();
        let result = match message {
            SignalingMessage::Offer(offer) => self.accept_offer(offer).await,
            SignalingMessage::Answer(answer) => self.accept_answer(answer).await,
            SignalingMessage::Candidate(candidate) => {
                self.accept_candidate(RemoteCandidate::Candidate(candidate))
                    .await
            }
            SignalingMessage::EndOfCandidates => {
                self.accept_candidate(RemoteCandidate::EndOfCandidates)
                    .await
            }
        };
        self.settle(kind, result)
    }

    /// Relays a locally gathered candidate whatever the phase.
    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Disposition {
        self.relay(SignalingMessage::Candidate(candidate)).await
    }

    /// Tells the remote party local gathering is over.
    pub async fn on_local_gathering_complete(&self) -> Disposition {
        self.relay(SignalingMessage::EndOfCandidates).await
    }

    /// Shows the remote stream once `track` is live. Muted tracks wait for
    /// [`Self::on_track_unmuted`].
    pub fn on_remote_track(&self, track: MediaTrack, stream: MediaStream) -> Disposition {
        let ready = {
            let mut inner = self.inner.lock();
            if track.muted {
                debug!(track = %track.id, stream = %stream.id, "remote track muted, waiting");
                inner.awaiting_live.insert(track.id, stream);
                None
            } else if inner.rendered.insert(stream.id.clone()) {
                Some(stream)
            } else {
                None
            }
        };
        self.show_remote(ready)
    }

    pub fn on_track_unmuted(&self, track_id: &str) -> Disposition {
        let ready = {
            let mut inner = self.inner.lock();
            inner
                .awaiting_live
                .remove(track_id)
                .filter(|stream| inner.rendered.insert(stream.id.clone()))
        };
        self.show_remote(ready)
    }

    /// Routes an event raised by the peer connection of session `id`. Events
    /// from a session that was torn down are ignored.
    pub async fn on_session_event(&self, id: SessionId, event: SessionEvent) -> Disposition {
        if !self.inner.lock().is_live(id) {
            debug!(session = %id, "event from stale session ignored");
            return Disposition::Ignored;
        }
        match event {
            SessionEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate).await,
            SessionEvent::GatheringComplete => self.on_local_gathering_complete().await,
            SessionEvent::RemoteTrack { track, stream } => self.on_remote_track(track, stream),
            SessionEvent::TrackUnmuted { track_id } => self.on_track_unmuted(&track_id),
        }
    }

    /// Ends the call. Buffered candidates are discarded, the session is closed
    /// and steps still in flight for it give up when they resume.
    pub async fn hang_up(&self) {
        let retired = {
            let mut inner = self.inner.lock();
            let retired = inner.tear_down(true);
            self.phase_tx.send_replace(inner.phase);
            retired
        };
        if let Some(session) = retired {
            info!(session = %session.id(), "call hung up");
            session.peer().close().await;
        }
    }

    async fn offer_call(&self) -> Result<Disposition, CallError> {
        {
            let inner = self.inner.lock();
            if inner.phase.step(Trigger::StartCall) == Step::Drop {
                return Err(CallError::InvalidTransition {
                    phase: inner.phase,
                    trigger: Trigger::StartCall,
                });
            }
        }
        if !self.parts.signaling.is_open() {
            warn!("start_call ignored: signaling channel not open");
            return Ok(Disposition::Dropped(CallError::ChannelUnavailable));
        }

        let session = self.acquire_session().await?;
        let id = session.id();
        self.transition(id, Trigger::StartCall)?;

        let stream = self
            .check(id, self.parts.capture.acquire(&self.media).await)
            .await?;
        self.parts.render.show_local(&stream);
        self.check(id, session.peer().add_local_stream(&stream).await)
            .await?;
        let offer = self
            .check(
                id,
                session.peer().create_local_description(SdpKind::Offer).await,
            )
            .await?;
        self.send(id, SignalingMessage::Offer(offer)).await?;
        info!(session = %id, "offer sent");
        Ok(Disposition::Applied)
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<Disposition, CallError> {
        let offer = offer.expect(SdpKind::Offer)?;
        let session = self.acquire_session().await?;
        let id = session.id();
        self.transition(id, Trigger::Offer)?;

        self.check(id, session.peer().apply_remote_description(&offer).await)
            .await?;
        let stream = self
            .check(id, self.parts.capture.acquire(&self.media).await)
            .await?;
        self.parts.render.show_local(&stream);
        self.check(id, session.peer().add_local_stream(&stream).await)
            .await?;
        let answer = self
            .check(
                id,
                session.peer().create_local_description(SdpKind::Answer).await,
            )
            .await?;
        self.transition(id, Trigger::LocalAnswer)?;
        self.send(id, SignalingMessage::Answer(answer)).await?;
        let flushed = self.flush_pending(&session).await?;
        info!(session = %id, flushed, "answer sent");
        Ok(Disposition::Applied)
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<Disposition, CallError> {
        let answer = answer.expect(SdpKind::Answer)?;
        let session = {
            let inner = self.inner.lock();
            match (&inner.session, inner.phase.step(Trigger::Answer)) {
                (Some(session), Step::Enter(_)) => session.clone(),
                _ => {
                    return Err(CallError::InvalidTransition {
                        phase: inner.phase,
                        trigger: Trigger::Answer,
                    });
                }
            }
        };
        let id = session.id();
        self.transition(id, Trigger::Answer)?;

        self.check(id, session.peer().apply_remote_description(&answer).await)
            .await?;
        let flushed = self.flush_pending(&session).await?;
        info!(session = %id, flushed, "answer applied");
        Ok(Disposition::Applied)
    }

    async fn accept_candidate(&self, candidate: RemoteCandidate) -> Result<Disposition, CallError> {
        let session = {
            let mut inner = self.inner.lock();
            let apply = inner.phase.step(Trigger::Candidate) == Step::Apply && inner.remote_ready;
            match inner.session.clone() {
                Some(session) if apply => session,
                _ => {
                    inner.pending.enqueue(candidate);
                    debug!(
                        phase = %inner.phase,
                        queued = inner.pending.len(),
                        "remote candidate buffered"
                    );
                    return Ok(Disposition::Buffered);
                }
            }
        };
        if let Err(err) = session.peer().add_remote_candidate(&candidate).await {
            warn!(session = %session.id(), error = %err, "remote candidate rejected by transport");
        }
        Ok(Disposition::Applied)
    }

    /// Commits buffered candidates until the queue stays empty, then lets
    /// later candidates bypass it.
    async fn flush_pending(&self, session: &SessionHandle) -> Result<usize, CallError> {
        let mut committed = 0;
        loop {
            let mut batch = {
                let mut inner = self.inner.lock();
                if !inner.is_live(session.id()) {
                    return Err(CallError::SessionReplaced(session.id()));
                }
                if inner.pending.is_empty() {
                    inner.remote_ready = true;
                    break;
                }
                std::mem::take(&mut inner.pending)
            };
            committed += batch.drain_into(session.peer()).await;
        }
        Ok(committed)
    }

    async fn relay(&self, message: SignalingMessage) -> Disposition {
        let kind = message.wire_type();
        if !self.parts.signaling.is_open() {
            warn!(kind, "local candidate not relayed: signaling channel not open");
            return Disposition::Dropped(CallError::ChannelUnavailable);
        }
        match self.parts.signaling.send(&message).await {
            Ok(()) => Disposition::Applied,
            Err(err) => {
                warn!(kind, error = %err, "local candidate not relayed");
                Disposition::Dropped(err.into())
            }
        }
    }

    async fn send(&self, id: SessionId, message: SignalingMessage) -> Result<(), CallError> {
        let kind = message.wire_type();
        match self.parts.signaling.send(&message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(session = %id, kind, error = %err, "signaling send failed");
                Err(self.fail(id, err.into()).await)
            }
        }
    }

    /// Checks and moves the phase for `trigger` against session `id`.
    fn transition(&self, id: SessionId, trigger: Trigger) -> Result<NegotiationPhase, CallError> {
        let mut inner = self.inner.lock();
        if !inner.is_live(id) {
            return Err(CallError::SessionReplaced(id));
        }
        let from = inner.phase;
        match from.step(trigger) {
            Step::Enter(next) => {
                inner.phase = next;
                self.phase_tx.send_replace(next);
                debug!(session = %id, %trigger, %from, to = %next, "phase changed");
                Ok(next)
            }
            _ => {
                if from == NegotiationPhase::Offering && trigger == Trigger::Offer {
                    warn!(session = %id, "glare: competing offer dropped while offering");
                }
                Err(CallError::InvalidTransition {
                    phase: from,
                    trigger,
                })
            }
        }
    }

    /// Passes an awaited result on if session `id` is still live. A failure
    /// resets the call.
    async fn check<T, E>(&self, id: SessionId, result: Result<T, E>) -> Result<T, CallError>
    where
        E: Into<CallError>,
    {
        match result {
            Ok(value) => {
                if self.inner.lock().is_live(id) {
                    Ok(value)
                } else {
                    Err(CallError::SessionReplaced(id))
                }
            }
            Err(err) => Err(self.fail(id, err.into()).await),
        }
    }

    /// Resets to `Idle` and replaces session `id`, unless it was already
    /// replaced. Buffered candidates survive the reset.
    async fn fail(&self, id: SessionId, err: CallError) -> CallError {
        let retired = {
            let mut inner = self.inner.lock();
            if !inner.is_live(id) {
                return CallError::SessionReplaced(id);
            }
            let retired = inner.tear_down(false);
            self.phase_tx.send_replace(inner.phase);
            retired
        };
        warn!(session = %id, error = %err, "negotiation reset");
        if let Some(session) = retired {
            session.peer().close().await;
        }
        if let Err(recreate) = self.acquire_session().await {
            debug!(error = %recreate, "session recreation deferred");
        }
        err
    }

    /// Returns the live session, creating it for the current epoch if needed.
    async fn acquire_session(&self) -> Result<SessionHandle, CallError> {
        let id = {
            let inner = self.inner.lock();
            if let Some(session) = &inner.session {
                return Ok(session.clone());
            }
            inner.epoch
        };
        let events = SessionEvents::new(id, self.events_tx.clone());
        let peer = self.parts.peers.create(events).await?;
        let handle = SessionHandle::new(id, peer);

        let install = {
            let mut inner = self.inner.lock();
            if inner.epoch != id {
                Install::Superseded
            } else if let Some(existing) = &inner.session {
                Install::Existing(existing.clone())
            } else {
                inner.session = Some(handle.clone());
                Install::Installed
            }
        };
        match install {
            Install::Installed => {
                debug!(session = %id, "session created");
                Ok(handle)
            }
            Install::Existing(existing) => {
                handle.peer().close().await;
                Ok(existing)
            }
            Install::Superseded => {
                handle.peer().close().await;
                Err(CallError::SessionReplaced(id))
            }
        }
    }

    fn show_remote(&self, stream: Option<MediaStream>) -> Disposition {
        match stream {
            Some(stream) => {
                info!(stream = %stream.id, "remote stream live");
                self.parts.render.show_remote(&stream);
                Disposition::Applied
            }
            None => Disposition::Ignored,
        }
    }

    fn settle(
        &self,
        action: &str,
        result: Result<Disposition, CallError>,
    ) -> Result<Disposition, CallError> {
        match result {
            Err(err) if err.is_recovered_locally() => {
                warn!(action, phase = %self.phase(), error = %err, "trigger dropped");
                Ok(Disposition::Dropped(err))
            }
            other => other,
        }
    }
}
