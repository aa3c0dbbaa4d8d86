use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    /// A muted track has not produced media yet.
    pub muted: bool,
}

impl MediaTrack {
    pub fn live(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            muted: false,
        }
    }

    pub fn muted(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            muted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: MediaTrack) -> Self {
        self.tracks.push(track);
        self
    }
}

/// What to request from the capture devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture permission denied")]
    PermissionDenied,
    #[error("no {0:?} capture device")]
    NoDevice(TrackKind),
    #[error("capture failed: {0}")]
    Failed(String),
}

/// Local audio/video acquisition.
#[async_trait]
pub trait DeviceCapture: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStream, CaptureError>;
}

/// Display surface for the local preview and the remote party.
pub trait RenderSink: Send + Sync {
    fn show_local(&self, stream: &MediaStream);
    fn show_remote(&self, stream: &MediaStream);
}
