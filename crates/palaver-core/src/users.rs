//! User records and the in-memory user cache
//!
//! Users are learned from subscription entries and description payloads in
//! meta frames. The registry caches them by uid and writes through to the
//! store; lookups fall back to the store and re-cache on a miss.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::proto::{Description, Subscription};
use crate::store::Store;

// ----------------------------------------------------------------------------
// User Record
// ----------------------------------------------------------------------------

/// Cached view of another user.
#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub uid: String,
    pub public: Option<Value>,
    pub private: Option<Value>,
    pub updated: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new<U: Into<String>>(uid: U) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// Merge a description payload; newer fields win, absent fields keep the
    /// cached value.
    pub fn merge_description(&mut self, desc: &Description) {
        if desc.public.is_some() {
            self.public = desc.public.clone();
        }
        if desc.private.is_some() {
            self.private = desc.private.clone();
        }
        if let Some(updated) = desc.updated {
            if self.updated.map_or(true, |u| updated > u) {
                self.updated = Some(updated);
            }
        }
    }

    /// Merge a subscription entry for this user.
    pub fn merge_subscription(&mut self, sub: &Subscription) {
        if sub.public.is_some() {
            self.public = sub.public.clone();
        }
        if sub.private.is_some() {
            self.private = sub.private.clone();
        }
        if let Some(updated) = sub.updated {
            if self.updated.map_or(true, |u| updated > u) {
                self.updated = Some(updated);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// User Registry
// ----------------------------------------------------------------------------

/// Uid → record cache with store write-through.
#[derive(Default)]
pub struct UserRegistry {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a subscription entry into the cache; creates the record if the
    /// uid is new. Returns the merged record.
    pub fn update_from_subscription(
        &self,
        store: Option<&Arc<dyn Store>>,
        sub: &Subscription,
    ) -> Option<UserRecord> {
        let uid = sub.user.as_deref()?;
        let merged = {
            let mut users = self.users.lock();
            let record = users
                .entry(uid.to_string())
                .or_insert_with(|| UserRecord::new(uid));
            record.merge_subscription(sub);
            record.clone()
        };
        if let Some(store) = store {
            store.user_update(&merged);
        }
        Some(merged)
    }

    /// Merge a description payload into the cache for `uid`.
    pub fn update_from_description(
        &self,
        store: Option<&Arc<dyn Store>>,
        uid: &str,
        desc: &Description,
    ) -> UserRecord {
        let merged = {
            let mut users = self.users.lock();
            let record = users
                .entry(uid.to_string())
                .or_insert_with(|| UserRecord::new(uid));
            record.merge_description(desc);
            record.clone()
        };
        if let Some(store) = store {
            store.user_update(&merged);
        }
        merged
    }

    /// Cached record for `uid`, falling back to the store and re-caching on
    /// a miss.
    pub fn get(&self, store: Option<&Arc<dyn Store>>, uid: &str) -> Option<UserRecord> {
        if let Some(record) = self.users.lock().get(uid) {
            return Some(record.clone());
        }
        let record = store.and_then(|s| s.user_get(uid))?;
        self.users
            .lock()
            .insert(uid.to_string(), record.clone());
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }

    /// Drop every cached record, e.g. on logout.
    pub fn clear(&self) {
        self.users.lock().clear();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn merge_keeps_newer_timestamp_and_fills_fields() {
        let registry = UserRegistry::new();
        let first = Subscription {
            user: Some("usrA".into()),
            public: Some(json!({"fn": "Alice"})),
            updated: Some(day(3)),
            ..Default::default()
        };
        registry.update_from_subscription(None, &first);

        let stale = Subscription {
            user: Some("usrA".into()),
            private: Some(json!({"note": "friend"})),
            updated: Some(day(1)),
            ..Default::default()
        };
        let merged = registry.update_from_subscription(None, &stale).unwrap();
        assert_eq!(merged.public, Some(json!({"fn": "Alice"})));
        assert_eq!(merged.private, Some(json!({"note": "friend"})));
        assert_eq!(merged.updated, Some(day(3)));
    }

    #[test]
    fn subscription_without_uid_is_ignored() {
        let registry = UserRegistry::new();
        let sub = Subscription {
            topic: Some("grpA".into()),
            ..Default::default()
        };
        assert!(registry.update_from_subscription(None, &sub).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_misses_without_a_store() {
        let registry = UserRegistry::new();
        assert!(registry.get(None, "usrZ").is_none());
    }
}
