//! Topic handles and the in-memory topic registry
//!
//! Per-topic behavior (history, subscriber sets, read markers) lives outside
//! the core; the session only needs the small capability set below to route
//! frames and maintain its cache. The registry owns the name → handle map,
//! cold-loads it from the store once, and tracks the newest `updated`
//! timestamp across durable topics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::proto::{DataMessage, Description, InfoMessage, MetaMessage, PresMessage};
use crate::store::Store;
use crate::types::TopicKind;

// ----------------------------------------------------------------------------
// Topic Handle
// ----------------------------------------------------------------------------

/// Capability set the session requires of a topic.
///
/// Route calls arrive on the dispatch thread in server order.
#[allow(unused_variables)]
pub trait TopicHandle: Send + Sync {
    fn name(&self) -> String;

    fn kind(&self) -> TopicKind {
        TopicKind::from_name(&self.name())
    }

    /// Timestamp of the last metadata update, if known.
    fn updated(&self) -> Option<DateTime<Utc>>;

    /// Timestamp of the last activity of any kind, if known.
    fn touched(&self) -> Option<DateTime<Utc>>;

    fn route_data(&self, data: &DataMessage) {}

    fn route_meta(&self, meta: &MetaMessage) {}

    fn route_pres(&self, pres: &PresMessage) {}

    fn route_info(&self, info: &InfoMessage) {}

    /// The session detached from this topic: an eviction, an unsubscribe, or
    /// a connection loss (code 503, reason `"disconnected"`).
    fn topic_left(&self, unsub: bool, code: i32, reason: &str) {}

    /// The server finished streaming requested messages.
    fn all_messages_received(&self, count: Option<i64>) {}

    /// The server finished streaming requested subscriptions.
    fn all_subs_received(&self) {}
}

// ----------------------------------------------------------------------------
// Cached Topic
// ----------------------------------------------------------------------------

/// Minimal handle the core creates when an unknown topic arrives in a meta
/// frame. Applications typically replace it with their own richer topic type.
pub struct CachedTopic {
    name: Mutex<String>,
    updated: Mutex<Option<DateTime<Utc>>>,
    touched: Mutex<Option<DateTime<Utc>>>,
    description: Mutex<Option<Description>>,
    last_seq: AtomicI64,
}

impl CachedTopic {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: Mutex::new(name.into()),
            updated: Mutex::new(None),
            touched: Mutex::new(None),
            description: Mutex::new(None),
            last_seq: AtomicI64::new(0),
        }
    }

    /// Build a handle from a meta frame. Requires a description; meta frames
    /// without one do not describe a topic well enough to cache.
    pub fn from_meta(meta: &MetaMessage) -> Option<Self> {
        let desc = meta.desc.as_ref()?;
        let topic = Self::new(meta.topic.clone());
        *topic.updated.lock() = desc.updated;
        *topic.touched.lock() = desc.touched.or(desc.updated);
        topic.last_seq.store(desc.seq.unwrap_or(0), Ordering::Release);
        *topic.description.lock() = Some(desc.clone());
        Some(topic)
    }

    /// Rename, e.g. when the server assigns the permanent name of a `new`
    /// topic. The registry must be rekeyed separately.
    pub fn set_name<N: Into<String>>(&self, name: N) {
        *self.name.lock() = name.into();
    }

    pub fn description(&self) -> Option<Description> {
        self.description.lock().clone()
    }

    pub fn last_seq(&self) -> i64 {
        self.last_seq.load(Ordering::Acquire)
    }
}

impl TopicHandle for CachedTopic {
    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn updated(&self) -> Option<DateTime<Utc>> {
        *self.updated.lock()
    }

    fn touched(&self) -> Option<DateTime<Utc>> {
        *self.touched.lock()
    }

    fn route_data(&self, data: &DataMessage) {
        if data.seq > self.last_seq.load(Ordering::Acquire) {
            self.last_seq.store(data.seq, Ordering::Release);
        }
        if let Some(ts) = data.ts {
            let mut touched = self.touched.lock();
            if touched.map_or(true, |t| ts > t) {
                *touched = Some(ts);
            }
        }
    }

    fn route_meta(&self, meta: &MetaMessage) {
        if let Some(desc) = &meta.desc {
            if let Some(up) = desc.updated {
                *self.updated.lock() = Some(up);
            }
            if let Some(ts) = desc.touched.or(desc.updated) {
                let mut touched = self.touched.lock();
                if touched.map_or(true, |t| ts > t) {
                    *touched = Some(ts);
                }
            }
            if let Some(seq) = desc.seq {
                self.last_seq.fetch_max(seq, Ordering::AcqRel);
            }
            *self.description.lock() = Some(desc.clone());
        }
    }

    fn topic_left(&self, unsub: bool, code: i32, reason: &str) {
        debug!(topic = %self.name(), unsub, code, reason, "left topic");
    }
}

// ----------------------------------------------------------------------------
// Topic Registry
// ----------------------------------------------------------------------------

/// Name → handle map with one-shot cold load and an update watermark.
#[derive(Default)]
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<dyn TopicHandle>>>,
    loaded: AtomicBool,
    updated_watermark: Mutex<Option<DateTime<Utc>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all topics from the store, once per registry lifetime. Returns
    /// true once topics are (or already were) loaded; false when the store
    /// is not ready yet.
    pub fn load_from_store(&self, store: &dyn Store) -> bool {
        if self.loaded.load(Ordering::Acquire) {
            return true;
        }
        if !store.is_ready() {
            return false;
        }
        if self.loaded.swap(true, Ordering::AcqRel) {
            return true;
        }
        let handles = store.topic_get_all();
        debug!(count = handles.len(), "cold-loading topics from store");
        let mut topics = self.topics.lock();
        for handle in handles {
            self.advance_watermark(handle.as_ref());
            topics.insert(handle.name(), handle);
        }
        true
    }

    /// True once the one-shot store load has happened.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn start_tracking(&self, handle: Arc<dyn TopicHandle>) {
        self.topics.lock().insert(handle.name(), handle);
    }

    pub fn stop_tracking(&self, name: &str) -> Option<Arc<dyn TopicHandle>> {
        self.topics.lock().remove(name)
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.topics.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TopicHandle>> {
        self.topics.lock().get(name).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn TopicHandle>> {
        self.topics.lock().values().cloned().collect()
    }

    /// Topics matching `predicate`, sorted by `touched` descending; topics
    /// without a touched timestamp sort last.
    pub fn get_filtered<F>(&self, predicate: F) -> Vec<Arc<dyn TopicHandle>>
    where
        F: Fn(&dyn TopicHandle) -> bool,
    {
        let mut matched: Vec<Arc<dyn TopicHandle>> = self
            .topics
            .lock()
            .values()
            .filter(|t| predicate(t.as_ref()))
            .cloned()
            .collect();
        matched.sort_by_key(|t| std::cmp::Reverse(t.touched().unwrap_or(DateTime::<Utc>::MIN_UTC)));
        matched
    }

    /// Rekey a renamed topic and persist it. Returns whether the old name was
    /// actually tracked.
    pub fn change_topic_name(
        &self,
        handle: &Arc<dyn TopicHandle>,
        old_name: &str,
        store: Option<&Arc<dyn Store>>,
    ) -> bool {
        let found = {
            let mut topics = self.topics.lock();
            let found = topics.remove(old_name).is_some();
            topics.insert(handle.name(), handle.clone());
            found
        };
        if let Some(store) = store {
            store.topic_update(handle.as_ref());
        }
        found
    }

    /// Construct and track a handle for an unknown topic referenced by a meta
    /// frame, when the frame carries enough to describe it.
    pub fn maybe_create_topic(
        &self,
        meta: &MetaMessage,
        store: Option<&Arc<dyn Store>>,
    ) -> Option<Arc<dyn TopicHandle>> {
        let topic = CachedTopic::from_meta(meta)?;
        let handle: Arc<dyn TopicHandle> = Arc::new(topic);
        debug!(topic = %handle.name(), kind = ?handle.kind(), "tracking topic from meta");
        self.start_tracking(handle.clone());
        if let Some(store) = store {
            store.topic_update(handle.as_ref());
        }
        Some(handle)
    }

    /// Newest `updated` seen across tracked durable topics.
    pub fn topics_updated(&self) -> Option<DateTime<Utc>> {
        *self.updated_watermark.lock()
    }

    /// Advance the watermark from a topic's `updated`. Self and search topics
    /// are excluded; their metadata changes on every login.
    pub fn advance_watermark(&self, topic: &dyn TopicHandle) {
        if topic.kind().is_ephemeral() {
            return;
        }
        if let Some(updated) = topic.updated() {
            let mut watermark = self.updated_watermark.lock();
            if watermark.map_or(true, |w| updated > w) {
                *watermark = Some(updated);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
