//! Wire codec for the replica protocol: tagged JSON messages exchanged with
//! the UDP simulator.
//!
//! Every message carries `{src, dst, leader, type}`; client-originated
//! messages additionally carry `MID`, which replicas must echo back
//! unchanged. Encoding is UTF-8 JSON, one datagram per message.

use serde::{Deserialize, Serialize};

/// Destination sentinel meaning "fan out to every other replica".
pub const BROADCAST: &str = "FFFF";

/// A single replicated log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub key: String,
    pub value: String,
}

/// Every message this replica can send or receive, tagged by its `type`
/// field. Field names match the wire contract exactly (including the
/// camelCase `candidateId` and the uppercase `MID`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "hello")]
    Hello {
        src: String,
        dst: String,
        leader: String,
    },
    #[serde(rename = "get")]
    Get {
        src: String,
        dst: String,
        leader: String,
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },
    #[serde(rename = "put")]
    Put {
        src: String,
        dst: String,
        leader: String,
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },
    /// Covers both the get-ok (`value: Some(_)`) and put-ok (`value: None`)
    /// shapes under the single `ok` tag.
    #[serde(rename = "ok")]
    Ok {
        src: String,
        dst: String,
        leader: String,
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        value: Option<String>,
    },
    #[serde(rename = "fail")]
    Fail {
        src: String,
        dst: String,
        leader: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "redirect")]
    Redirect {
        src: String,
        dst: String,
        leader: String,
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "vote_request")]
    VoteRequest {
        src: String,
        dst: String,
        leader: String,
        term: u64,
        #[serde(rename = "candidateId")]
        candidate_id: String,
        last_log_index: u64,
        last_log_term: u64,
    },
    #[serde(rename = "vote_response")]
    VoteResponse {
        src: String,
        dst: String,
        leader: String,
        term: u64,
        vote_granted: bool,
    },
    #[serde(rename = "append_request")]
    AppendRequest {
        src: String,
        dst: String,
        leader: String,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
        entries: Vec<Entry>,
        leader_commit_index: u64,
    },
    #[serde(rename = "append_response")]
    AppendResponse {
        src: String,
        dst: String,
        leader: String,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    },
}

impl Message {
    pub fn src(&self) -> &str {
        match self {
            Message::Hello { src, .. }
            | Message::Get { src, .. }
            | Message::Put { src, .. }
            | Message::Ok { src, .. }
            | Message::Fail { src, .. }
            | Message::Redirect { src, .. }
            | Message::VoteRequest { src, .. }
            | Message::VoteResponse { src, .. }
            | Message::AppendRequest { src, .. }
            | Message::AppendResponse { src, .. } => src,
        }
    }

    pub fn mid(&self) -> Option<&str> {
        match self {
            Message::Get { mid, .. }
            | Message::Put { mid, .. }
            | Message::Ok { mid, .. }
            | Message::Fail { mid, .. }
            | Message::Redirect { mid, .. } => Some(mid),
            _ => None,
        }
    }

    /// The term carried by consensus messages; `None` for client/hello
    /// messages, which don't carry one.
    pub fn term(&self) -> Option<u64> {
        match self {
            Message::VoteRequest { term, .. }
            | Message::VoteResponse { term, .. }
            | Message::AppendRequest { term, .. }
            | Message::AppendResponse { term, .. } => Some(*term),
            _ => None,
        }
    }
}

/// Errors that can occur while decoding a datagram. Always fatal at the call
/// site: a malformed or unrecognized message means the simulator and this
/// replica have diverged in some way the protocol can't recover from.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a single JSON datagram into a [`Message`].
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a [`Message`] as a UTF-8 JSON datagram body.
pub fn encode(message: &Message) -> Vec<u8> {
    // A `Message` only ever contains types serde_json can serialize, so this
    // can't fail in practice.
    serde_json::to_vec(message).expect("Message is always JSON-serializable")
}
