//! Relay signaling message types
//!
//! These are the `params`/`result` payloads carried inside JSON-RPC
//! envelopes; the envelopes themselves live in `passage_core::rpc`.
//!
//! | direction | kind   | method    | params                         |
//! |-----------|--------|-----------|--------------------------------|
//! | out       | call   | `join`    | [`JoinParams`] → [`JoinResult`] |
//! | in        | notify | `offer`   | [`OfferParams`]                |
//! | in        | notify | `trickle` | [`TrickleParams`]              |
//! | out       | notify | `answer`  | [`AnswerParams`]               |

use serde::{Deserialize, Serialize};
use std::fmt;

pub const METHOD_JOIN: &str = "join";
pub const METHOD_OFFER: &str = "offer";
pub const METHOD_TRICKLE: &str = "trickle";
pub const METHOD_ANSWER: &str = "answer";

/// SDP type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP session description with its type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Which of the two peer sessions a message concerns
///
/// Serialized as the relay's numeric trickle target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SessionRole {
    /// Outbound session; keeps the room membership alive
    Publish,
    /// Inbound session carrying the remote participant's media
    Subscribe,
}

impl SessionRole {
    pub const ALL: [SessionRole; 2] = [SessionRole::Publish, SessionRole::Subscribe];

    pub fn index(self) -> usize {
        match self {
            SessionRole::Publish => 0,
            SessionRole::Subscribe => 1,
        }
    }
}

impl TryFrom<u8> for SessionRole {
    type Error = String;

    fn try_from(target: u8) -> Result<Self, Self::Error> {
        match target {
            0 => Ok(SessionRole::Publish),
            1 => Ok(SessionRole::Subscribe),
            other => Err(format!("unknown trickle target {}", other)),
        }
    }
}

impl From<SessionRole> for u8 {
    fn from(role: SessionRole) -> u8 {
        role.index() as u8
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Publish => write!(f, "publish"),
            SessionRole::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// A remote ICE candidate as delivered by `trickle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: u16,
    pub sdp_mid: String,
}

/// `join` call params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    /// Room id, `"{server_location}/{participant_id}"`
    pub sid: String,
    pub uid: String,
    pub offer: SessionDescription,
}

/// `join` call result: the relay's answer for the publish session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResult {
    pub sdp: String,
}

/// `offer` notify params: the relay's offer for the subscribe session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferParams {
    pub sdp: String,
}

/// `trickle` notify params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickleParams {
    pub target: SessionRole,
    pub candidate: IceCandidate,
}

/// `answer` notify params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerParams {
    pub sid: String,
    pub uid: String,
    pub desc: SessionDescription,
}
