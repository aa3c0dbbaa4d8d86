//! [`PeerConnection`] over webrtc-rs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::candidates::RemoteCandidate;
use crate::config::CallConfig;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::message::{IceCandidate, SdpKind, SessionDescription};
use crate::session::{PeerConnection, PeerConnectionFactory, PeerError, SessionEvents};

const REMOTE_PACKET_BUFFER: usize = 256;

fn build_api() -> Result<API, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> PeerError {
    PeerError::Setup(err.to_string())
}

/// Creates one [`WebRtcPeer`] per session, all sharing a codec setup.
pub struct WebRtcPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcPeerFactory {
    pub fn new(config: &CallConfig) -> Result<Self, PeerError> {
        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        Ok(Self {
            api: build_api()?,
            ice_servers,
        })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(to_setup_error)?,
        );
        Ok(WebRtcPeer::attach(pc, events))
    }
}

/// One webrtc-rs peer connection. Local media is written by the caller into
/// the tracks returned by [`WebRtcPeer::local_track`]; remote RTP is
/// available from [`WebRtcPeer::subscribe_remote`].
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    remote_tracks: Arc<Mutex<HashMap<String, broadcast::Sender<Packet>>>>,
}

impl WebRtcPeer {
    fn attach(pc: Arc<RTCPeerConnection>, events: SessionEvents) -> Arc<Self> {
        let session = events.session();

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => {
                            events.local_candidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            });
                        }
                        Err(err) => warn!(error = %err, "local candidate not serializable"),
                    },
                    None => {
                        events.gathering_complete();
                    }
                }
            })
        }));

        let remote_tracks: Arc<Mutex<HashMap<String, broadcast::Sender<Packet>>>> =
            Arc::default();
        let track_registry = Arc::clone(&remote_tracks);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let events = events.clone();
            let (packets, _) = broadcast::channel(REMOTE_PACKET_BUFFER);
            track_registry.lock().insert(track.id(), packets.clone());
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let media = MediaTrack::muted(track.id(), kind);
                let stream = MediaStream::new(track.stream_id()).with_track(media.clone());
                debug!(session = %events.session(), track = %media.id, "remote track added");
                events.remote_track(media, stream);
                tokio::spawn(read_remote(track, events, packets));
            })
        }));

        debug!(session = %session, "webrtc peer connection created");
        Arc::new(Self {
            pc,
            local_tracks: Mutex::new(HashMap::new()),
            remote_tracks,
        })
    }

    pub fn local_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().get(track_id).cloned()
    }

    /// RTP packets of remote track `track_id` from now on.
    pub fn subscribe_remote(&self, track_id: &str) -> Option<broadcast::Receiver<Packet>> {
        self.remote_tracks
            .lock()
            .get(track_id)
            .map(broadcast::Sender::subscribe)
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

/// Reports the track live on its first packet, then keeps fanning packets out
/// until the track ends.
async fn read_remote(
    track: Arc<TrackRemote>,
    events: SessionEvents,
    packets: broadcast::Sender<Packet>,
) {
    let mut live = false;
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if !live {
                    live = true;
                    events.track_unmuted(track.id());
                }
                trace!(track = %track.id(), len = packet.payload.len(), "remote rtp");
                let _ = packets.send(packet);
            }
            Err(err) => {
                debug!(track = %track.id(), error = %err, "remote track ended");
                break;
            }
        }
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerError> {
        for media in &stream.tracks {
            let track = Arc::new(TrackLocalStaticSample::new(
                codec_for(media.kind),
                media.id.clone(),
                stream.id.clone(),
            ));
            self.pc
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|err| PeerError::Track(err.to_string()))?;
            self.local_tracks.lock().insert(media.id.clone(), track);
        }
        Ok(())
    }

    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, PeerError> {
        let description = match kind {
            SdpKind::Offer => self.pc.create_offer(None).await,
            SdpKind::Answer => self.pc.create_answer(None).await,
        }
        .map_err(|err| PeerError::Description(err.to_string()))?;
        let sdp = description.sdp.clone();
        self.pc
            .set_local_description(description)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))?;
        Ok(SessionDescription { kind, sdp })
    }

    async fn apply_remote_description(
        &self,
        description: &SessionDescription,
    ) -> Result<(), PeerError> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|err| PeerError::Description(err.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|err| PeerError::Description(err.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: &RemoteCandidate) -> Result<(), PeerError> {
        let init = match candidate {
            RemoteCandidate::Candidate(candidate) => RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment.clone(),
            },
            RemoteCandidate::EndOfCandidates => RTCIceCandidateInit::default(),
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| PeerError::Candidate(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "peer connection close failed");
        }
    }
}
