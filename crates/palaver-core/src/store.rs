//! Persistent store seam
//!
//! The session mirrors its durable state — own uid, device token, topics,
//! users, server clock adjustment — into an application-provided store. The
//! store may be a no-op; every call site tolerates its absence.

use std::sync::Arc;

use crate::topic::TopicHandle;
use crate::users::UserRecord;

/// Key-value-like persistence consumed by the session core.
pub trait Store: Send + Sync {
    /// False until the backing storage is usable; topic cold-load waits on it.
    fn is_ready(&self) -> bool;

    /// Uid of the last authenticated user, if remembered.
    fn my_uid(&self) -> Option<String>;

    /// Remember the authenticated uid, optionally with the credential
    /// methods the server still requires for validation.
    fn set_my_uid(&self, uid: &str, cred_methods: Option<Vec<String>>);

    fn device_token(&self) -> Option<String>;

    fn set_device_token(&self, token: Option<String>);

    /// Record the signed offset between server and local clocks.
    fn set_time_adjustment(&self, adjustment: chrono::Duration);

    /// All persisted topics, for cold-loading the registry.
    fn topic_get_all(&self) -> Vec<Arc<dyn TopicHandle>>;

    /// Persist one topic's current state.
    fn topic_update(&self, topic: &dyn TopicHandle);

    fn user_get(&self, uid: &str) -> Option<UserRecord>;

    fn user_update(&self, user: &UserRecord);

    /// Forget per-account state on logout.
    fn logout(&self);

    /// Drop everything belonging to `uid` after account deletion.
    fn delete_account(&self, uid: &str);
}
