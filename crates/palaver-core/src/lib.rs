//! Palaver Session Core
//!
//! This crate is the session layer of a client for a real-time chat service
//! speaking a JSON framed protocol over a persistent bidirectional websocket
//! channel. It owns the single server connection, multiplexes request/reply
//! pairs by message id, runs the handshake and login state machine, and
//! routes asynchronous server frames to waiting requesters, registered
//! listeners, and per-topic handlers.
//!
//! ## Architecture Overview
//!
//! The core is deliberately headless. Three collaborators are injected
//! behind traits and never implemented here:
//!
//! - **Transport** ([`Connection`]): the websocket channel itself, including
//!   reconnect scheduling and backoff. The transport pushes its lifecycle
//!   events into the session through `Session::transport_opened`,
//!   `transport_message`, `transport_closed` and `transport_error`.
//! - **Store** ([`Store`]): key-value persistence for the device token, own
//!   uid, topics and users. Optional; every call site tolerates its absence.
//! - **Topics** ([`TopicHandle`]): per-topic behavior such as message
//!   history and read markers. The session only routes frames to handles by
//!   topic name.
//!
//! ## Request Flow
//!
//! Outbound operations allocate an id, encode a [`ClientMessage`], hand the
//! frame to the transport, and register a pending reply. Inbound frames are
//! decoded into [`ServerMessage`]s; `ctrl` replies settle the pending future
//! with the matching id (2xx/3xx resolve, 4xx/5xx reject), while `data`,
//! `meta`, `pres` and `info` frames are routed to the owning topic in
//! arrival order. Requests the server never answers are expired with a
//! synthesized 504 by a background sweep; a dropped connection settles
//! everything with `NotConnected`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use palaver_core::{Session, SessionConfig};
//!
//! # async fn example(transport: Arc<dyn palaver_core::Connection>) -> palaver_core::Result<()> {
//! let config = SessionConfig::new("MyApp", "api-key", "chat.example.com");
//! let session = Session::new(config);
//! session.set_connection(transport);
//! session.set_auto_login_with_token("auth-token");
//! session.connect().await?;
//! // ... once the transport reports open, the session sends `hi` and the
//! // auto-login, then user operations can run:
//! session.subscribe("me", None, None).await?;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod futures;
pub mod idgen;
pub mod listener;
pub mod proto;
pub mod session;
pub mod store;
pub mod topic;
pub mod types;
pub mod users;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use auth::{LoginCredentials, SCHEME_BASIC, SCHEME_TOKEN};
pub use config::{SessionConfig, LIBRARY, URL_PROTOCOL_VERSION, WIRE_VERSION};
pub use connection::{ConnState, Connection};
pub use errors::{ClientError, Result};
pub use listener::SessionListener;
pub use proto::{is_null, ClientMessage, ServerMessage, NULL_VALUE};
pub use session::Session;
pub use store::Store;
pub use topic::{CachedTopic, TopicHandle};
pub use types::TopicKind;
pub use users::UserRecord;
