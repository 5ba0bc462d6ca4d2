//! Connection seam and session connection states
//!
//! The websocket transport itself lives outside this crate. The session
//! drives it through the [`Connection`] trait and receives its lifecycle
//! callbacks through `Session::transport_opened / transport_message /
//! transport_closed / transport_error`.

use async_trait::async_trait;

use crate::errors::Result;

// ----------------------------------------------------------------------------
// Transport Seam
// ----------------------------------------------------------------------------

/// Abstraction over the persistent bidirectional channel to the server.
///
/// Implementations own reconnect scheduling and backoff; the session only
/// distinguishes "connected", "waiting to reconnect" and "down".
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open the channel. With `reconnect_automatically` the transport keeps
    /// retrying after failures until told otherwise.
    fn connect(&self, reconnect_automatically: bool) -> Result<()>;

    /// Close the channel and cancel any scheduled reconnect.
    fn disconnect(&self);

    /// Write one frame. Frames are delivered in call order.
    async fn send(&self, frame: Vec<u8>) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// True when the transport is down but has a reconnect attempt scheduled.
    fn is_waiting_to_reconnect(&self) -> bool;

    /// True when the transport retries failed connections on its own.
    /// When this is off, a scheduled attempt never fires by itself.
    fn is_auto_reconnect_enabled(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Session Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of the session's server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No transport, or the transport reported closed.
    Disconnected,
    /// Transport connect requested, handshake not yet sent.
    Connecting,
    /// Transport open and handshake sent, session not authenticated.
    ConnectedUnauth,
    /// A login reply with a 2xx code has been received.
    ConnectedAuth,
}

impl ConnState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnState::ConnectedUnauth | ConnState::ConnectedAuth)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnState::ConnectedAuth)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnState::Disconnected => "Disconnected",
            ConnState::Connecting => "Connecting",
            ConnState::ConnectedUnauth => "ConnectedUnauth",
            ConnState::ConnectedAuth => "ConnectedAuth",
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(!ConnState::Disconnected.is_connected());
        assert!(!ConnState::Connecting.is_connected());
        assert!(ConnState::ConnectedUnauth.is_connected());
        assert!(ConnState::ConnectedAuth.is_connected());
        assert!(ConnState::ConnectedAuth.is_authenticated());
        assert!(!ConnState::ConnectedUnauth.is_authenticated());
    }
}
