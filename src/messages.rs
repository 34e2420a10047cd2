//! Wire messages exchanged between nodes.
//!
//! Every prepare/accept/learn exchange uses the same JSON envelope; the
//! `message` field of the body carries the response kind as a plain string
//! so peers written in other languages can interoperate. [`ReplyKind`]
//! decodes that string at the edge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::proposal::Proposal;

/// The envelope shared by prepare, accept, and learn messages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub turn_id: u64,
    #[serde(default, rename = "message_type")]
    pub kind: String,
    #[serde(default, rename = "message_body")]
    pub body: Body,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Reply kind on responses, free-form note on requests.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub proposal: Proposal,
    /// Non-empty iff the sender already knows the decided value for this turn.
    #[serde(default)]
    pub learnt: String,
}

impl Envelope {
    #[must_use]
    pub fn request(turn_id: u64, kind: &str, note: &str, proposal: Proposal) -> Self {
        Self {
            turn_id,
            kind: kind.to_owned(),
            body: Body {
                message: note.to_owned(),
                proposal,
                learnt: String::new(),
            },
        }
    }

    #[must_use]
    pub fn response(
        turn_id: u64,
        kind: &str,
        message: &str,
        proposal: Proposal,
        learnt: &str,
    ) -> Self {
        Self {
            turn_id,
            kind: kind.to_owned(),
            body: Body {
                message: message.to_owned(),
                proposal,
                learnt: learnt.to_owned(),
            },
        }
    }

    #[must_use]
    pub fn reply_kind(&self) -> ReplyKind {
        ReplyKind::from_wire(&self.body.message)
    }

    /// True iff the responder reported an already-decided value.
    #[must_use]
    pub fn has_learnt_value(&self) -> bool {
        !self.body.learnt.is_empty()
    }
}

/// Decoded response kind. The wire keeps the plain string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Promise,
    Retry,
    Accept,
    Decline,
    AlreadyLearnt,
    Other,
}

impl ReplyKind {
    #[must_use]
    pub fn from_wire(message: &str) -> Self {
        match message {
            "promise" => Self::Promise,
            "retry" => Self::Retry,
            "accept" => Self::Accept,
            "decline" => Self::Decline,
            "already learnt" => Self::AlreadyLearnt,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Promise => "promise",
            Self::Retry => "retry",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::AlreadyLearnt => "already learnt",
            Self::Other => "",
        }
    }
}

/// One row of the proposal table, as listed by the debug routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalWithTurn {
    pub turn_id: u64,
    pub proposal: Proposal,
}

/// One row of the learnt table, as listed by the read routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearntWithTurn {
    pub turn_id: u64,
    pub learnt: String,
}

/// Anti-entropy request: `last` is the highest locally learnt turn id.
///
/// `missing` is legacy: current senders leave it empty and rely on `last`,
/// but responders still honor a populated list from older peers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekRequest {
    #[serde(default)]
    pub missing: Vec<u64>,
    #[serde(default)]
    pub last: u64,
}

/// Anti-entropy response: decided values the requester has not seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekResponse {
    #[serde(default)]
    pub to_learn: BTreeMap<u64, String>,
}
