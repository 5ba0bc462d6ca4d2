//! Error types for the Palaver session core
//!
//! This module contains the unified error taxonomy used throughout the crate:
//! local state errors, transport errors mapped onto pending requests, wire
//! codec failures, and server-reported failures carried in `ctrl` frames.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Type
// ----------------------------------------------------------------------------

/// Errors produced by the session core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server reply did not carry what the operation required.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// The operation is not permitted in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session has no live connection to the server.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The operation requires an active subscription to the topic.
    #[error("not subscribed: {0}")]
    NotSubscribed(String),

    /// Local topic cache has not been loaded from the store yet.
    #[error("local cache not synchronized")]
    NotSynchronized,

    /// The server rejected the request with a `ctrl` error code.
    #[error("server response {code}: {text}")]
    ServerResponse {
        code: i32,
        text: String,
        what: Option<String>,
    },

    /// Failed to serialize an outbound client message.
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// Failed to parse an inbound server frame.
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),
}

// ----------------------------------------------------------------------------
// Convenience Constructors
// ----------------------------------------------------------------------------

impl ClientError {
    /// Create a not-connected error with a message
    pub fn not_connected<T: Into<String>>(message: T) -> Self {
        ClientError::NotConnected(message.into())
    }

    /// Create an invalid-state error with a message
    pub fn invalid_state<T: Into<String>>(message: T) -> Self {
        ClientError::InvalidState(message.into())
    }

    /// Create an invalid-argument error with a message
    pub fn invalid_argument<T: Into<String>>(message: T) -> Self {
        ClientError::InvalidArgument(message.into())
    }

    /// Create a server-response error from a `ctrl` frame's code and text
    pub fn server_response<T: Into<String>>(code: i32, text: T, what: Option<String>) -> Self {
        ClientError::ServerResponse {
            code,
            text: text.into(),
            what,
        }
    }

    /// The error synthesized when a pending request expires unanswered.
    pub fn timeout() -> Self {
        ClientError::ServerResponse {
            code: 504,
            text: "timeout".into(),
            what: None,
        }
    }

    /// Return the server code if this is a `ServerResponse` error.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            ClientError::ServerResponse { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ClientError>;
