use thiserror::Error;
use url::Url;

use crate::media::MediaConstraints;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

const SIGNALING_URL_VAR: &str = "PEER_CALL_SIGNALING_URL";
const ICE_SERVERS_VAR: &str = "PEER_CALL_ICE_SERVERS";
const LOCALHOST_ONLY_VAR: &str = "PEER_CALL_LOCALHOST_ONLY";
const AUDIO_VAR: &str = "PEER_CALL_AUDIO";
const VIDEO_VAR: &str = "PEER_CALL_VIDEO";

const ICE_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid signaling url {url}: {source}")]
    InvalidSignalingUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid ice server url {0}")]
    InvalidIceServer(String),
    #[error("invalid value for {var}: {value}")]
    InvalidFlag { var: &'static str, value: String },
    #[error("at least one of audio or video must be requested")]
    NoMedia,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Configuration for one call endpoint
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Relay the signaling channel connects to
    pub signaling_url: Option<Url>,
    /// STUN/TURN servers for connectivity establishment
    pub ice_servers: Vec<IceServer>,
    /// Devices requested when the call starts or is answered
    pub media: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: None,
            ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)],
            media: MediaConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Localhost-only configuration (no STUN/TURN)
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> CallConfigBuilder {
        CallConfigBuilder::new()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the `PEER_CALL_*` variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = CallConfigBuilder::new();
        if let Some(url) = lookup(SIGNALING_URL_VAR).filter(|v| !v.trim().is_empty()) {
            builder = builder.signaling_url(url.trim());
        }
        if let Some(servers) = lookup(ICE_SERVERS_VAR) {
            for url in servers.split(',').map(str::trim).filter(|v| !v.is_empty()) {
                builder = builder.add_ice_server(vec![url.to_string()]);
            }
        }
        if let Some(value) = lookup(LOCALHOST_ONLY_VAR) {
            if parse_flag(LOCALHOST_ONLY_VAR, &value)? {
                builder = builder.localhost_only();
            }
        }
        if let Some(value) = lookup(AUDIO_VAR) {
            builder = builder.audio(parse_flag(AUDIO_VAR, &value)?);
        }
        if let Some(value) = lookup(VIDEO_VAR) {
            builder = builder.video(parse_flag(VIDEO_VAR, &value)?);
        }
        builder.build()
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}

/// Builder for call configuration
#[derive(Debug, Default)]
pub struct CallConfigBuilder {
    signaling_url: Option<String>,
    ice_servers: Vec<IceServer>,
    localhost_only: bool,
    audio: Option<bool>,
    video: Option<bool>,
}

impl CallConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = Some(url.into());
        self
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            username: None,
            credential: None,
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            username: Some(username),
            credential: Some(credential),
        });
        self
    }

    /// Drops every ICE server, including explicitly added ones.
    pub fn localhost_only(mut self) -> Self {
        self.localhost_only = true;
        self
    }

    pub fn audio(mut self, enabled: bool) -> Self {
        self.audio = Some(enabled);
        self
    }

    pub fn video(mut self, enabled: bool) -> Self {
        self.video = Some(enabled);
        self
    }

    pub fn build(self) -> Result<CallConfig, ConfigError> {
        let mut config = CallConfig::default();

        if let Some(raw) = self.signaling_url {
            let url = Url::parse(&raw)
                .map_err(|source| ConfigError::InvalidSignalingUrl { url: raw, source })?;
            config.signaling_url = Some(url);
        }

        for server in &self.ice_servers {
            if let Some(bad) = server
                .urls
                .iter()
                .find(|url| !ICE_SCHEMES.iter().any(|scheme| url.starts_with(scheme)))
            {
                return Err(ConfigError::InvalidIceServer(bad.clone()));
            }
        }
        if self.localhost_only {
            config.ice_servers.clear();
        } else if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers;
        }

        if let Some(audio) = self.audio {
            config.media.audio = audio;
        }
        if let Some(video) = self.video {
            config.media.video = video;
        }
        if !config.media.audio && !config.media.video {
            return Err(ConfigError::NoMedia);
        }

        Ok(config)
    }
}
