//! Client-to-server messages
//!
//! Each outbound frame carries exactly one of the payloads below under its
//! tag. Optional fields are omitted from the wire entirely rather than sent
//! as JSON nulls; an explicit erase uses the null sentinel string instead
//! (see [`super::codec::NULL_VALUE`]).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// A client frame: exactly one tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMessage {
    Hi(HiMessage),
    Acc(AccMessage),
    Login(LoginMessage),
    Sub(SubMessage),
    Leave(LeaveMessage),
    Pub(PubMessage),
    Get(GetMessage),
    Set(SetMessage),
    Del(DelMessage),
    Note(NoteMessage),
}

impl ClientMessage {
    /// The message id, if this message type carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            ClientMessage::Hi(m) => m.id.as_deref(),
            ClientMessage::Acc(m) => m.id.as_deref(),
            ClientMessage::Login(m) => m.id.as_deref(),
            ClientMessage::Sub(m) => m.id.as_deref(),
            ClientMessage::Leave(m) => m.id.as_deref(),
            ClientMessage::Pub(m) => m.id.as_deref(),
            ClientMessage::Get(m) => m.id.as_deref(),
            ClientMessage::Set(m) => m.id.as_deref(),
            ClientMessage::Del(m) => m.id.as_deref(),
            ClientMessage::Note(_) => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Handshake and Account
// ----------------------------------------------------------------------------

/// Handshake. Also reused to push a device-token change on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Create or update an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `"new"` to create, a uid to modify, absent for the current user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(
        default,
        with = "codec::opt_b64",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<Vec<u8>>,
    /// Authenticate this session with the new credentials on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<SetDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

/// Authenticate the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub scheme: String,
    #[serde(with = "codec::b64")]
    pub secret: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

// ----------------------------------------------------------------------------
// Topic Operations
// ----------------------------------------------------------------------------

/// Subscribe to a topic, optionally setting and querying metadata in one shot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<SetMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<GetQuery>,
}

/// Leave a topic; `unsub` additionally deletes the subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaveMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsub: Option<bool>,
}

/// Publish a data message to a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    /// Suppress the echo of this message back to this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noecho: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<HashMap<String, Value>>,
    pub content: Value,
}

/// Query topic metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(flatten)]
    pub query: GetQuery,
}

/// Update topic metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(flatten)]
    pub meta: SetMeta,
}

/// Delete messages, a topic, a subscription, a credential, a user, or the
/// current account, selected by `what`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delseq: Option<Vec<DelRange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred: Option<Credential>,
}

/// Fire-and-forget client-side notification. Never carries an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteMessage {
    pub topic: String,
    /// `"kp"` (typing), `"read"`, or `"recv"`.
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

// ----------------------------------------------------------------------------
// Metadata Sub-Structures
// ----------------------------------------------------------------------------

/// Selector for a `get` query or the `get` half of a subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetQuery {
    /// Space-separated list out of `desc sub data del cred tags`.
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<MetaGetDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<MetaGetSub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MetaGetData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub del: Option<MetaGetData>,
}

impl GetQuery {
    /// Query with a bare `what` selector.
    pub fn what<W: Into<String>>(what: W) -> Self {
        Self {
            what: what.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaGetDesc {
    /// If-modified-since cutoff.
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub ims: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaGetSub {
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub ims: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaGetData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Mutation half of `set`/`sub`/`acc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<SetDesc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<SetSub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred: Option<Credential>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetDesc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetSub {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A validated contact method (email, phone) or one being validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    pub meth: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Inclusive-exclusive range of message sequence ids for deletion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelRange {
    pub low: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hi: Option<i64>,
}

impl DelRange {
    /// Range covering a single message.
    pub fn single(seq: i64) -> Self {
        Self { low: seq, hi: None }
    }

    /// Range covering `[low, hi)`.
    pub fn span(low: i64, hi: i64) -> Self {
        Self { low, hi: Some(hi) }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
