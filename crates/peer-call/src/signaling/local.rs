use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{ChannelError, ChannelState, InboundFrames, SignalingChannel, encode};
use crate::message::SignalingMessage;

/// In-memory signaling for tests and same-process demos. Frames go through
/// the JSON codec exactly as they would on a socket.
#[derive(Debug)]
pub struct LoopbackSignaling {
    state: Arc<RwLock<ChannelState>>,
    outbound: mpsc::UnboundedSender<String>,
    sent: Mutex<Vec<SignalingMessage>>,
}

impl LoopbackSignaling {
    /// Two connected ends sharing one open/closed state. Each end is returned
    /// with the frames the other end sends to it.
    pub fn pair() -> (
        (Arc<Self>, InboundFrames),
        (Arc<Self>, InboundFrames),
    ) {
        let state = Arc::new(RwLock::new(ChannelState::Open));
        let (to_a, a_inbound) = mpsc::unbounded_channel();
        let (to_b, b_inbound) = mpsc::unbounded_channel();
        let a = Arc::new(Self::with_state(state.clone(), to_b));
        let b = Arc::new(Self::with_state(state, to_a));
        ((a, a_inbound), (b, b_inbound))
    }

    /// A single open end. The receiver yields what this end sends.
    pub fn detached() -> (Arc<Self>, InboundFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ChannelState::Open));
        (Arc::new(Self::with_state(state, tx)), rx)
    }

    fn with_state(
        state: Arc<RwLock<ChannelState>>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            state,
            outbound,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    pub fn close(&self) {
        self.set_state(ChannelState::Closed);
    }

    /// Every message successfully sent from this end.
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SignalingChannel for LoopbackSignaling {
    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Open => {}
            ChannelState::Connecting => return Err(ChannelError::NotOpen),
            ChannelState::Closed => return Err(ChannelError::Closed),
        }
        let frame = encode(message)?;
        self.outbound
            .send(frame)
            .map_err(|_| ChannelError::Closed)?;
        self.sent.lock().push(message.clone());
        Ok(())
    }
}
