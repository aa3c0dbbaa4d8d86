use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::SignalingMessage;

pub mod local;
pub mod websocket;

pub use local::LoopbackSignaling;
pub use websocket::WebSocketSignaling;

/// Raw inbound frames, in the order the channel delivered them.
pub type InboundFrames = mpsc::UnboundedReceiver<String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("signaling channel not open")]
    NotOpen,
    #[error("signaling channel closed")]
    Closed,
    #[error("failed to encode signaling message: {0}")]
    Encode(String),
    #[error("signaling transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Carries signaling messages to the remote party. Inbound frames are
/// delivered on the [`InboundFrames`] receiver created alongside the channel.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    fn state(&self) -> ChannelState;

    fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError>;
}

pub(crate) fn encode(message: &SignalingMessage) -> Result<String, ChannelError> {
    message
        .to_json()
        .map_err(|err| ChannelError::Encode(err.to_string()))
}
