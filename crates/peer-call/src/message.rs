use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallError;
use crate::phase::Trigger;

const OFFER_TYPE: &str = "sdp-offer";
const ANSWER_TYPE: &str = "sdp-answer";
const CANDIDATE_TYPE: &str = "ice-candidate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

/// Opaque session description, in the browser `RTCSessionDescriptionInit`
/// shape. The `sdp` body is never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Passes the description on if it is of `kind`.
    pub fn expect(self, kind: SdpKind) -> Result<Self, CallError> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(CallError::MalformedMessage(format!(
                "{} frame carries an {} description",
                kind.as_str(),
                self.kind.as_str()
            )))
        }
    }
}

/// Opaque connectivity candidate in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    /// The sender has finished gathering candidates.
    EndOfCandidates,
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl SignalingMessage {
    pub fn wire_type(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => OFFER_TYPE,
            SignalingMessage::Answer(_) => ANSWER_TYPE,
            SignalingMessage::Candidate(_) | SignalingMessage::EndOfCandidates => CANDIDATE_TYPE,
        }
    }

    pub fn trigger(&self) -> Trigger {
        match self {
            SignalingMessage::Offer(_) => Trigger::Offer,
            SignalingMessage::Answer(_) => Trigger::Answer,
            SignalingMessage::Candidate(_) | SignalingMessage::EndOfCandidates => {
                Trigger::Candidate
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            SignalingMessage::Offer(description) | SignalingMessage::Answer(description) => {
                serde_json::to_value(description)?
            }
            SignalingMessage::Candidate(candidate) => serde_json::to_value(candidate)?,
            SignalingMessage::EndOfCandidates => Value::Null,
        };
        serde_json::to_string(&Frame {
            kind: self.wire_type().to_string(),
            data,
        })
    }

    /// Parses one inbound frame. Anything that is not one of the known
    /// variants with a well-formed payload is `MalformedMessage`.
    pub fn from_json(text: &str) -> Result<Self, CallError> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|err| CallError::MalformedMessage(format!("invalid frame: {err}")))?;
        match frame.kind.as_str() {
            OFFER_TYPE => description(frame.data, SdpKind::Offer).map(SignalingMessage::Offer),
            ANSWER_TYPE => description(frame.data, SdpKind::Answer).map(SignalingMessage::Answer),
            CANDIDATE_TYPE => candidate(frame.data),
            other => Err(CallError::MalformedMessage(format!(
                "unknown message type {other:?}"
            ))),
        }
    }
}

fn description(data: Value, expected: SdpKind) -> Result<SessionDescription, CallError> {
    let description: SessionDescription = serde_json::from_value(data).map_err(|err| {
        CallError::MalformedMessage(format!("invalid {} payload: {err}", expected.as_str()))
    })?;
    description.expect(expected)
}

fn candidate(data: Value) -> Result<SignalingMessage, CallError> {
    if data.is_null() {
        return Ok(SignalingMessage::EndOfCandidates);
    }
    let candidate: IceCandidate = serde_json::from_value(data)
        .map_err(|err| CallError::MalformedMessage(format!("invalid candidate payload: {err}")))?;
    // Browsers signal end-of-candidates with an empty candidate line.
    if candidate.candidate.is_empty() {
        return Ok(SignalingMessage::EndOfCandidates);
    }
    Ok(SignalingMessage::Candidate(candidate))
}
