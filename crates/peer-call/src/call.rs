use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{DeviceCapture, MediaConstraints, RenderSink};
use crate::negotiation::{CallParts, Disposition, NegotiationStateMachine};
use crate::phase::NegotiationPhase;
use crate::rtc::WebRtcPeerFactory;
use crate::session::SessionEventStream;
use crate::signaling::{InboundFrames, WebSocketSignaling};

/// A negotiation state machine with its inbound and event pumps running.
/// Dropping the call stops both pumps.
pub struct Call {
    id: Uuid,
    machine: Arc<NegotiationStateMachine>,
    tasks: Vec<JoinHandle<()>>,
}

impl Call {
    /// Starts pumping `inbound` frames and session events into a new
    /// machine. The first session is created before this returns.
    pub async fn connect(
        parts: CallParts,
        media: MediaConstraints,
        inbound: InboundFrames,
    ) -> Result<Self, CallError> {
        let id = Uuid::new_v4();
        let (machine, events) = NegotiationStateMachine::new(parts, media);
        let session = machine.prepare().await?;
        info!(call = %id, session = %session, "call ready");

        let inbound_task = tokio::spawn(pump_inbound(id, Arc::clone(&machine), inbound));
        let events_task = tokio::spawn(pump_events(id, Arc::clone(&machine), events));
        Ok(Self {
            id,
            machine,
            tasks: vec![inbound_task, events_task],
        })
    }

    /// Connects to the relay in `config` and negotiates over webrtc-rs.
    pub async fn dial(
        config: &CallConfig,
        capture: Arc<dyn DeviceCapture>,
        render: Arc<dyn RenderSink>,
    ) -> Result<Self, CallError> {
        let url = config
            .signaling_url
            .as_ref()
            .ok_or(CallError::ChannelUnavailable)?;
        let (signaling, inbound) = WebSocketSignaling::connect(url).await.map_err(|err| {
            warn!(url = %url, error = %err, "signaling connect failed");
            CallError::from(err)
        })?;
        let peers = Arc::new(WebRtcPeerFactory::new(config)?);
        let parts = CallParts {
            signaling,
            peers,
            capture,
            render,
        };
        Self::connect(parts, config.media, inbound).await
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn machine(&self) -> &Arc<NegotiationStateMachine> {
        &self.machine
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.machine.phase()
    }

    pub async fn start_call(&self) -> Result<Disposition, CallError> {
        self.machine.start_call().await
    }

    pub async fn hang_up(&self) {
        self.machine.hang_up().await;
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

async fn pump_inbound(
    call: Uuid,
    machine: Arc<NegotiationStateMachine>,
    mut inbound: InboundFrames,
) {
    while let Some(frame) = inbound.recv().await {
        if let Err(err) = machine.on_signaling_frame(&frame).await {
            warn!(call = %call, error = %err, "inbound signaling failed");
        }
    }
    debug!(call = %call, "signaling inbound closed");
}

async fn pump_events(
    call: Uuid,
    machine: Arc<NegotiationStateMachine>,
    mut events: SessionEventStream,
) {
    while let Some((session, event)) = events.recv().await {
        if let Disposition::Dropped(err) = machine.on_session_event(session, event).await {
            debug!(call = %call, session = %session, error = %err, "session event dropped");
        }
    }
}
