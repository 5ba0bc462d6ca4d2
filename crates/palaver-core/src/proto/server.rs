//! Server-to-client messages
//!
//! The five inbound frame kinds: control replies, content messages, metadata
//! snapshots, presence events, and delivery receipts. Decoding enforces the
//! single-tag envelope rule; unknown fields inside payloads are ignored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::client::Credential;
use super::codec;

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// A server frame: exactly one tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessage {
    Ctrl(CtrlMessage),
    Data(DataMessage),
    Meta(MetaMessage),
    Pres(PresMessage),
    Info(InfoMessage),
}

impl ServerMessage {
    /// The echoed message id, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            ServerMessage::Ctrl(m) => m.id.as_deref(),
            ServerMessage::Data(m) => m.id.as_deref(),
            ServerMessage::Meta(m) => m.id.as_deref(),
            ServerMessage::Pres(_) | ServerMessage::Info(_) => None,
        }
    }

    /// The control payload, if this is a `ctrl` frame.
    pub fn as_ctrl(&self) -> Option<&CtrlMessage> {
        match self {
            ServerMessage::Ctrl(m) => Some(m),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Control
// ----------------------------------------------------------------------------

/// Reply to a client request, or a server-initiated signal.
///
/// Codes follow HTTP conventions: 2xx success, 3xx auxiliary, 4xx client
/// error, 5xx server error. The core itself synthesizes 503 on disconnect and
/// 504 on timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtrlMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub code: i32,
    #[serde(default)]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<DateTime<Utc>>,
}

impl CtrlMessage {
    /// String parameter by name.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }

    /// Integer parameter by name.
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.as_ref()?.get(key)?.as_i64()
    }

    /// Boolean parameter by name.
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.as_ref()?.get(key)?.as_bool()
    }

    /// True when the code is in the success band `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

// ----------------------------------------------------------------------------
// Data
// ----------------------------------------------------------------------------

/// A content message published to a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<HashMap<String, Value>>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<DateTime<Utc>>,
    pub seq: i64,
    #[serde(default)]
    pub content: Value,
}

// ----------------------------------------------------------------------------
// Meta
// ----------------------------------------------------------------------------

/// Topic metadata: description, subscriptions, tags, credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: String,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<Description>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Vec<Subscription>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred: Option<Vec<Credential>>,
}

/// Description half of a topic or user record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Description {
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub touched: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
}

/// One subscriber entry in a meta frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "codec::opt_rfc3339",
        skip_serializing_if = "Option::is_none"
    )]
    pub touched: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

// ----------------------------------------------------------------------------
// Presence and Receipts
// ----------------------------------------------------------------------------

/// Presence event on a topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresMessage {
    pub topic: String,
    /// Affected topic or user, from the receiving topic's point of view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// What changed: `on`, `off`, `msg`, `upd`, `gone`, ...
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
}

/// Delivery receipt or typing notification forwarded by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoMessage {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub what: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_param_accessors() {
        let ctrl: CtrlMessage = serde_json::from_str(
            r#"{"code":205,"text":"evicted","topic":"grpX","params":{"unsub":true,"count":12,"what":"data"}}"#,
        )
        .unwrap();
        assert_eq!(ctrl.param_bool("unsub"), Some(true));
        assert_eq!(ctrl.param_i64("count"), Some(12));
        assert_eq!(ctrl.param_str("what"), Some("data"));
        assert_eq!(ctrl.param_str("missing"), None);
        assert!(!ctrl.is_success());
    }

    #[test]
    fn meta_subscriptions_decode() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"meta":{"id":"4","topic":"me","sub":[
                {"user":"usrA","updated":"2023-01-02T03:04:05.006Z","public":{"fn":"Alice"}},
                {"topic":"grpX","touched":"2023-01-03T00:00:00.000Z"}]}}"#,
        )
        .unwrap();
        let meta = match msg {
            ServerMessage::Meta(m) => m,
            other => panic!("expected meta, got {:?}", other),
        };
        let subs = meta.sub.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].user.as_deref(), Some("usrA"));
        assert!(subs[0].updated.is_some());
        assert_eq!(subs[1].topic.as_deref(), Some("grpX"));
    }

    #[test]
    fn pres_and_info_carry_no_id() {
        let pres: ServerMessage =
            serde_json::from_str(r#"{"pres":{"topic":"me","src":"usrB","what":"on"}}"#).unwrap();
        assert!(pres.id().is_none());
        let info: ServerMessage =
            serde_json::from_str(r#"{"info":{"topic":"grpX","from":"usrB","what":"read","seq":3}}"#)
                .unwrap();
        assert!(info.id().is_none());
    }
}
