use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{ChannelError, ChannelState, InboundFrames, SignalingChannel, encode};
use crate::message::SignalingMessage;

/// Signaling over a WebSocket relay. Text and UTF-8 binary frames are
/// forwarded untouched to the inbound receiver.
pub struct WebSocketSignaling {
    url: Url,
    state: Arc<RwLock<ChannelState>>,
    send_tx: mpsc::UnboundedSender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketSignaling {
    pub async fn connect(url: &Url) -> Result<(Arc<Self>, InboundFrames), ChannelError> {
        let url = websocket_url(url)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Transport(format!("websocket connect failed: {err}")))?;
        info!(url = %url, "signaling websocket open");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let state = Arc::new(RwLock::new(ChannelState::Open));
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        let writer_state = Arc::clone(&state);
        let writer = tokio::spawn(async move {
            while let Some(text) = send_rx.recv().await {
                trace!(event = "ws_out", len = text.len());
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    warn!(error = %err, "signaling websocket write failed");
                    break;
                }
            }
            *writer_state.write() = ChannelState::Closed;
        });

        let reader_state = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("ignoring non-utf8 binary signaling frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!("signaling websocket closed: {err}");
                            }
                            _ => {
                                warn!("signaling websocket error: {err}");
                            }
                        }
                        break;
                    }
                };
                trace!(event = "ws_in", len = text.len());
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
            *reader_state.write() = ChannelState::Closed;
            debug!("signaling websocket reader stopped");
        });

        let channel = Arc::new(Self {
            url,
            state,
            send_tx,
            tasks: Mutex::new(vec![writer, reader]),
        });
        Ok((channel, inbound_rx))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn close(&self) {
        *self.state.write() = ChannelState::Closed;
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    async fn send(&self, message: &SignalingMessage) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = encode(message)?;
        self.send_tx.send(frame).map_err(|_| ChannelError::Closed)
    }
}

/// Maps `http(s)` relay addresses onto their `ws(s)` counterparts.
fn websocket_url(base: &Url) -> Result<Url, ChannelError> {
    let scheme = match base.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ChannelError::Transport(format!(
                "unsupported signaling scheme {other}"
            )));
        }
    };
    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| ChannelError::Transport("invalid websocket scheme".into()))?;
    ws.set_fragment(None);
    Ok(ws)
}
