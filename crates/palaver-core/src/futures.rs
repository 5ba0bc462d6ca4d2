//! Pending-reply registry
//!
//! Maps in-flight message ids to settle-once reply slots. A background sweep
//! expires requests the server never answered; the sweep task holds only a
//! weak reference so it terminates when the registry is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::debug;

use crate::errors::{ClientError, Result};
use crate::proto::ServerMessage;

/// How often the expiry sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Age past which an unanswered request is rejected with 504.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiver half of a registered request.
pub type ReplyReceiver = oneshot::Receiver<Result<ServerMessage>>;

struct PendingReply {
    created: Instant,
    tx: oneshot::Sender<Result<ServerMessage>>,
}

/// Thread-safe map from message id to pending reply.
///
/// The lock is held only for map reads and writes; settle callbacks run with
/// the lock released so a settled waiter may immediately issue new requests.
pub struct FutureRegistry {
    pending: Mutex<HashMap<String, PendingReply>>,
    sweeper_started: AtomicBool,
    weak_self: Weak<FutureRegistry>,
}

impl FutureRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            pending: Mutex::new(HashMap::new()),
            sweeper_started: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    /// Register a pending reply under `id` and return its receiver.
    ///
    /// A given id maps to at most one pending reply; re-registering an id
    /// rejects the previous waiter.
    pub fn register<I: Into<String>>(&self, id: I) -> ReplyReceiver {
        self.start_sweeper();
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let displaced = self.pending.lock().insert(
            id.clone(),
            PendingReply {
                created: Instant::now(),
                tx,
            },
        );
        if let Some(old) = displaced {
            debug!(id = %id, "displacing stale pending reply");
            let _ = old
                .tx
                .send(Err(ClientError::invalid_state("message id reused")));
        }
        rx
    }

    /// Resolve the pending reply for `id` with a server message.
    /// Returns false when no reply is pending under that id.
    pub fn resolve(&self, id: &str, msg: ServerMessage) -> bool {
        match self.take(id) {
            Some(p) => {
                let _ = p.tx.send(Ok(msg));
                true
            }
            None => false,
        }
    }

    /// Reject the pending reply for `id` with an error.
    pub fn reject(&self, id: &str, err: ClientError) -> bool {
        match self.take(id) {
            Some(p) => {
                let _ = p.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Remove the pending reply for `id` without settling it. The waiter sees
    /// a closed channel.
    pub fn forget(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    /// Reject every pending reply, e.g. on disconnect or shutdown.
    pub fn purge_all<F: Fn() -> ClientError>(&self, make_err: F) {
        let drained: Vec<(String, PendingReply)> = self.pending.lock().drain().collect();
        for (id, p) in drained {
            debug!(id = %id, "rejecting pending reply");
            let _ = p.tx.send(Err(make_err()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take(&self, id: &str) -> Option<PendingReply> {
        self.pending.lock().remove(id)
    }

    /// Reject entries older than [`REPLY_TIMEOUT`]. Settling happens outside
    /// the map lock.
    fn sweep(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.created) > REPLY_TIMEOUT)
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                if let Some(p) = pending.remove(&id) {
                    expired.push((id, p));
                }
            }
        }
        for (id, p) in expired {
            debug!(id = %id, "request timed out");
            let _ = p.tx.send(Err(ClientError::timeout()));
        }
    }

    fn start_sweeper(&self) {
        if self.sweeper_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(registry) => registry.sweep(),
                    None => break,
                }
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
