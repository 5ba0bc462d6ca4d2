//! Session event listeners
//!
//! Observers implement [`SessionListener`] and register with the session;
//! every method has a no-op default so implementors override only what they
//! need. Delivery follows registration order; removing a listener prevents
//! any further deliveries to it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::errors::ClientError;
use crate::proto::{
    CtrlMessage, DataMessage, InfoMessage, MetaMessage, PresMessage, ServerMessage,
};

// ----------------------------------------------------------------------------
// Listener Trait
// ----------------------------------------------------------------------------

/// Observer of connection and message events.
#[allow(unused_variables)]
pub trait SessionListener: Send + Sync {
    /// Handshake completed; carries the `ctrl` code, text and params.
    fn on_connect(&self, code: i32, text: &str, params: Option<&Map<String, Value>>) {}

    /// Connection closed, locally or by the server.
    fn on_disconnect(&self, by_server: bool, code: u16, reason: &str) {}

    /// Login attempt settled, successfully or not.
    fn on_login(&self, code: i32, text: &str) {}

    /// Any decoded server message, before type-specific routing.
    fn on_message(&self, msg: &ServerMessage) {}

    /// The raw frame text, before decoding.
    fn on_raw_message(&self, raw: &str) {}

    fn on_ctrl_message(&self, ctrl: &CtrlMessage) {}

    fn on_data_message(&self, data: &DataMessage) {}

    fn on_info_message(&self, info: &InfoMessage) {}

    fn on_meta_message(&self, meta: &MetaMessage) {}

    fn on_pres_message(&self, pres: &PresMessage) {}

    /// Transport or decode failure not attributable to a single request.
    fn on_error(&self, err: &ClientError) {}
}

// ----------------------------------------------------------------------------
// Listener Set
// ----------------------------------------------------------------------------

/// Registration-ordered fan-out of session events.
///
/// The lock is held only to snapshot or edit the list; notifications run on
/// the snapshot, so a listener may add or remove listeners from inside a
/// callback.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Idempotent by identity; returns false if it was
    /// already registered.
    pub fn add(&self, listener: Arc<dyn SessionListener>) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener by identity; returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Invoke `f` on every registered listener, in registration order.
    pub(crate) fn notify<F: Fn(&dyn SessionListener)>(&self, f: F) {
        let snapshot: Vec<Arc<dyn SessionListener>> = self.listeners.lock().clone();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
