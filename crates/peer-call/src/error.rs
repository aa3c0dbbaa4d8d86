use thiserror::Error;

use crate::media::CaptureError;
use crate::phase::{NegotiationPhase, Trigger};
use crate::session::{PeerError, SessionId};
use crate::signaling::ChannelError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("signaling channel unavailable")]
    ChannelUnavailable,
    #[error("media acquisition failed: {0}")]
    MediaAcquisitionFailed(String),
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("{trigger} rejected while {phase}")]
    InvalidTransition {
        phase: NegotiationPhase,
        trigger: Trigger,
    },
    #[error("session {0} was torn down before the step completed")]
    SessionReplaced(SessionId),
}

impl CallError {
    /// Errors that represent races or duplicate messages. They are logged and
    /// reported as a dropped trigger instead of being returned to the caller.
    pub fn is_recovered_locally(&self) -> bool {
        matches!(
            self,
            CallError::InvalidTransition { .. }
                | CallError::MalformedMessage(_)
                | CallError::SessionReplaced(_)
        )
    }
}

impl From<ChannelError> for CallError {
    fn from(_: ChannelError) -> Self {
        CallError::ChannelUnavailable
    }
}

impl From<CaptureError> for CallError {
    fn from(err: CaptureError) -> Self {
        CallError::MediaAcquisitionFailed(err.to_string())
    }
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        CallError::NegotiationFailed(err.to_string())
    }
}
