//! Two-party audio/video call negotiation.
//!
//! A [`NegotiationStateMachine`] drives one offer/answer exchange over a
//! [`SignalingChannel`], buffering remote connectivity candidates until the
//! remote description is applicable, and hands the negotiated session to a
//! [`PeerConnection`]. [`Call`] wires a machine to its collaborators and runs
//! the inbound and event pumps.

pub mod call;
pub mod candidates;
pub mod config;
pub mod error;
pub mod media;
pub mod message;
pub mod mock;
pub mod negotiation;
pub mod phase;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod telemetry;

pub use call::Call;
pub use candidates::{PendingCandidateQueue, RemoteCandidate};
pub use config::{CallConfig, CallConfigBuilder, ConfigError, IceServer};
pub use error::CallError;
pub use media::{
    CaptureError, DeviceCapture, MediaConstraints, MediaStream, MediaTrack, RenderSink, TrackKind,
};
pub use message::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
pub use negotiation::{CallParts, Disposition, NegotiationStateMachine};
pub use phase::{NegotiationPhase, Step, Trigger};
pub use rtc::{WebRtcPeer, WebRtcPeerFactory};
pub use session::{
    PeerConnection, PeerConnectionFactory, PeerError, SessionEvent, SessionEventStream,
    SessionEvents, SessionHandle, SessionId,
};
pub use signaling::{ChannelError, ChannelState, InboundFrames, SignalingChannel};
