//! End-to-end session flows against a mock transport.
//!
//! Each test drives the session through its public API and transport hooks:
//! operations run in a spawned task, the test inspects the frames captured by
//! the mock connection, injects server replies, and asserts on settled
//! results and observer callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use palaver_core::errors::{ClientError, Result};
use palaver_core::proto::{DataMessage, InfoMessage, MetaMessage, PresMessage};
use palaver_core::{
    Connection, Session, SessionConfig, SessionListener, Store, TopicHandle, UserRecord,
    NULL_VALUE,
};

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MockConnection {
    connected: AtomicBool,
    waiting: AtomicBool,
    auto_reconnect: AtomicBool,
    reject_sends: AtomicBool,
    sent: Mutex<Vec<Value>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn connect(&self, _reconnect_automatically: bool) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.waiting.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(ClientError::not_connected("mock send failure"));
        }
        let parsed: Value = serde_json::from_slice(&frame).expect("outbound frames are JSON");
        self.sent.lock().push(parsed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_waiting_to_reconnect(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    fn is_auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }
}

impl MockConnection {
    fn frames(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    fn frame_tags(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| {
                f.as_object()
                    .and_then(|o| o.keys().next().cloned())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Wait until at least `count` frames have been sent, return the last one.
    async fn wait_for_frames(&self, count: usize) -> Value {
        for _ in 0..400 {
            {
                let sent = self.sent.lock();
                if sent.len() >= count {
                    return sent[count - 1].clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} outbound frames, got {:?}",
            count,
            self.frame_tags()
        );
    }
}

// ----------------------------------------------------------------------------
// Recording Listener
// ----------------------------------------------------------------------------

#[derive(Default)]
struct RecordingListener {
    connects: Mutex<Vec<(i32, String)>>,
    disconnects: Mutex<Vec<(bool, u16, String)>>,
    logins: Mutex<Vec<(i32, String)>>,
    raw_frames: AtomicUsize,
    errors: AtomicUsize,
}

impl SessionListener for RecordingListener {
    fn on_connect(&self, code: i32, text: &str, _params: Option<&serde_json::Map<String, Value>>) {
        self.connects.lock().push((code, text.to_string()));
    }

    fn on_disconnect(&self, by_server: bool, code: u16, reason: &str) {
        self.disconnects
            .lock()
            .push((by_server, code, reason.to_string()));
    }

    fn on_login(&self, code: i32, text: &str) {
        self.logins.lock().push((code, text.to_string()));
    }

    fn on_raw_message(&self, _raw: &str) {
        self.raw_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _err: &ClientError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Recording Topic
// ----------------------------------------------------------------------------

struct RecordingTopic {
    name: String,
    updated: Option<DateTime<Utc>>,
    data_seqs: Mutex<Vec<i64>>,
    pres_events: Mutex<Vec<(String, Option<String>)>>,
    info_events: Mutex<Vec<String>>,
    left: Mutex<Vec<(bool, i32, String)>>,
    messages_complete: Mutex<Vec<Option<i64>>>,
    subs_complete: AtomicUsize,
}

impl RecordingTopic {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            updated: None,
            data_seqs: Mutex::new(Vec::new()),
            pres_events: Mutex::new(Vec::new()),
            info_events: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
            messages_complete: Mutex::new(Vec::new()),
            subs_complete: AtomicUsize::new(0),
        })
    }
}

impl TopicHandle for RecordingTopic {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    fn touched(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    fn route_data(&self, data: &DataMessage) {
        self.data_seqs.lock().push(data.seq);
    }

    fn route_meta(&self, _meta: &MetaMessage) {}

    fn route_pres(&self, pres: &PresMessage) {
        self.pres_events
            .lock()
            .push((pres.topic.clone(), pres.src.clone()));
    }

    fn route_info(&self, info: &InfoMessage) {
        self.info_events.lock().push(info.what.clone());
    }

    fn topic_left(&self, unsub: bool, code: i32, reason: &str) {
        self.left.lock().push((unsub, code, reason.to_string()));
    }

    fn all_messages_received(&self, count: Option<i64>) {
        self.messages_complete.lock().push(count);
    }

    fn all_subs_received(&self) {
        self.subs_complete.fetch_add(1, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemStore {
    my_uid: Mutex<Option<String>>,
    cred_methods: Mutex<Option<Vec<String>>>,
    device_token: Mutex<Option<String>>,
    adjustment: Mutex<Option<chrono::Duration>>,
    topics: Mutex<Vec<Arc<dyn TopicHandle>>>,
    users: Mutex<HashMap<String, UserRecord>>,
    logged_out: AtomicBool,
    deleted_account: Mutex<Option<String>>,
}

impl Store for MemStore {
    fn is_ready(&self) -> bool {
        true
    }

    fn my_uid(&self) -> Option<String> {
        self.my_uid.lock().clone()
    }

    fn set_my_uid(&self, uid: &str, cred_methods: Option<Vec<String>>) {
        *self.my_uid.lock() = Some(uid.to_string());
        *self.cred_methods.lock() = cred_methods;
    }

    fn device_token(&self) -> Option<String> {
        self.device_token.lock().clone()
    }

    fn set_device_token(&self, token: Option<String>) {
        *self.device_token.lock() = token;
    }

    fn set_time_adjustment(&self, adjustment: chrono::Duration) {
        *self.adjustment.lock() = Some(adjustment);
    }

    fn topic_get_all(&self) -> Vec<Arc<dyn TopicHandle>> {
        self.topics.lock().clone()
    }

    fn topic_update(&self, _topic: &dyn TopicHandle) {}

    fn user_get(&self, uid: &str) -> Option<UserRecord> {
        self.users.lock().get(uid).cloned()
    }

    fn user_update(&self, user: &UserRecord) {
        self.users.lock().insert(user.uid.clone(), user.clone());
    }

    fn logout(&self) {
        self.logged_out.store(true, Ordering::SeqCst);
    }

    fn delete_account(&self, uid: &str) {
        *self.deleted_account.lock() = Some(uid.to_string());
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn test_config() -> SessionConfig {
    SessionConfig::new("TestApp", "api-key", "localhost:6060")
        .with_locale("en")
        .with_os("linux")
}

struct Harness {
    session: Arc<Session>,
    conn: Arc<MockConnection>,
    listener: Arc<RecordingListener>,
}

fn harness_with(session: Arc<Session>) -> Harness {
    let conn = Arc::new(MockConnection::default());
    let listener = Arc::new(RecordingListener::default());
    session.set_connection(conn.clone());
    session.add_listener(listener.clone());
    Harness {
        session,
        conn,
        listener,
    }
}

fn harness() -> Harness {
    harness_with(Session::new(test_config()))
}

impl Harness {
    /// Open the transport and complete the `hi` handshake.
    async fn open(&self) {
        self.session.connect().await.unwrap();
        self.session.transport_opened(false);
        let hi = self.conn.wait_for_frames(1).await;
        let id = hi["hi"]["id"].as_str().unwrap().to_string();
        self.reply(&json!({"ctrl": {
            "id": id, "code": 201, "text": "Created",
            "params": {"ver": "0.20", "build": "abc"}
        }}));
        // Handshake runs in a spawned task; wait for it to record results.
        for _ in 0..200 {
            if self.session.server_version().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handshake never completed");
    }

    /// Open, then log in as `usrABC` with basic credentials.
    async fn open_and_login(&self) {
        self.open().await;
        let session = self.session.clone();
        let task =
            tokio::spawn(async move { session.login_basic("user", "pass").await });
        let login = self.conn.wait_for_frames(2).await;
        let id = login["login"]["id"].as_str().unwrap().to_string();
        self.reply(&json!({"ctrl": {
            "id": id, "code": 200, "text": "ok",
            "params": {"user": "usrABC", "token": "T"}
        }}));
        task.await.unwrap().unwrap();
    }

    fn reply(&self, frame: &Value) {
        self.session.transport_message(&frame.to_string());
    }
}

// ----------------------------------------------------------------------------
// Handshake and Login
// ----------------------------------------------------------------------------

#[tokio::test]
async fn handshake_records_server_facts_and_fires_on_connect() {
    let h = harness();
    h.open().await;

    assert_eq!(h.session.server_version().as_deref(), Some("0.20"));
    assert_eq!(h.session.server_build().as_deref(), Some("abc"));
    assert_eq!(
        h.listener.connects.lock().clone(),
        vec![(201, "Created".to_string())]
    );

    let hi = &h.conn.frames()[0];
    assert_eq!(hi["hi"]["ver"], json!("0.16"));
    assert_eq!(hi["hi"]["lang"], json!("en"));
    let ua = hi["hi"]["ua"].as_str().unwrap();
    assert!(ua.starts_with("TestApp (linux; en); palaver-core/"));
}

#[tokio::test]
async fn login_success_authenticates_the_session() {
    let h = harness();
    h.open_and_login().await;

    assert!(h.session.is_authenticated());
    assert_eq!(h.session.my_uid().as_deref(), Some("usrABC"));
    assert_eq!(h.session.auth_token().as_deref(), Some("T"));
    assert_eq!(
        h.listener.logins.lock().clone(),
        vec![(200, "ok".to_string())]
    );

    let login = &h.conn.frames()[1];
    assert_eq!(login["login"]["scheme"], json!("basic"));
    assert_eq!(login["login"]["secret"], json!("dXNlcjpwYXNz"));
}

#[tokio::test]
async fn login_failure_clears_auth_state() {
    let h = harness();
    h.open().await;

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.login_basic("user", "wrong").await });
    let login = h.conn.wait_for_frames(2).await;
    let id = login["login"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 401, "text": "authentication failed"}}));

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.server_code(), Some(401));
    assert!(!h.session.is_authenticated());
    assert!(h.session.auth_token().is_none());
    assert!(h.session.my_uid().is_none());
    assert_eq!(
        h.listener.logins.lock().clone(),
        vec![(401, "authentication failed".to_string())]
    );
}

#[tokio::test]
async fn second_login_while_first_is_pending_is_refused() {
    let h = harness();
    h.open().await;

    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.login_basic("user", "pass").await });
    let login = h.conn.wait_for_frames(2).await;

    let err = h.session.login_token("T").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));

    let id = login["login"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {
        "id": id, "code": 200, "text": "ok",
        "params": {"user": "usrABC", "token": "T"}
    }}));
    pending.await.unwrap().unwrap();
}

#[tokio::test]
async fn login_when_already_authenticated_is_synthetic() {
    let h = harness();
    h.open_and_login().await;
    let frames_before = h.conn.frames().len();

    let reply = h.session.login_basic("user", "pass").await.unwrap();
    let ctrl = reply.as_ctrl().unwrap();
    assert_eq!(ctrl.code, 200);
    // No extra frame went out.
    assert_eq!(h.conn.frames().len(), frames_before);
}

#[tokio::test]
async fn relogin_as_a_different_user_forces_logout() {
    let h = harness();
    h.open_and_login().await;

    // Connection drops and comes back; uid survives locally.
    h.session.transport_closed(true, 1001, "going away");
    h.session.transport_opened(true);
    let hi = h.conn.wait_for_frames(3).await;
    let id = hi["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 201, "text": "created"}}));

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.login_basic("other", "pass").await });
    let login = h.conn.wait_for_frames(4).await;
    let id = login["login"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {
        "id": id, "code": 200, "text": "ok",
        "params": {"user": "usrOTHER", "token": "T2"}
    }}));

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
    assert!(h.session.my_uid().is_none());
    assert!(!h.session.is_authenticated());
    assert!(h
        .listener
        .logins
        .lock()
        .contains(&(400, "UID mismatch".to_string())));
}

// ----------------------------------------------------------------------------
// Disconnect Semantics
// ----------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_settles_pending_requests_and_notifies_topics() {
    let h = harness();
    h.open().await;

    let topic = RecordingTopic::new("grpX");
    h.session.start_tracking(topic.clone());

    let session = h.session.clone();
    let pending = tokio::spawn(async move {
        session
            .get_meta("grpX", palaver_core::proto::GetQuery::what("desc"))
            .await
    });
    h.conn.wait_for_frames(2).await;

    h.session.disconnect().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::NotConnected(_)));
    assert_eq!(
        topic.left.lock().clone(),
        vec![(false, 503, "disconnected".to_string())]
    );
    assert_eq!(h.listener.disconnects.lock().len(), 1);
    assert!(h.session.server_version().is_none());
    assert!(!h.session.is_authenticated());

    // A second close is ignored.
    h.session.transport_closed(true, 1006, "abnormal");
    assert_eq!(h.listener.disconnects.lock().len(), 1);
}

#[tokio::test]
async fn requests_after_disconnect_fail_fast() {
    let h = harness();
    h.open().await;
    h.session.disconnect().await;

    let err = h.session.leave("grpX", false).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected(_)));
}

// ----------------------------------------------------------------------------
// Timeout
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_with_504() {
    let h = harness();
    h.open().await;

    let session = h.session.clone();
    let pending = tokio::spawn(async move { session.subscribe("grpX", None, None).await });
    h.conn.wait_for_frames(2).await;

    // No reply; the sweep must reject within 5 s age + one 3 s interval.
    let err = tokio::time::timeout(Duration::from_millis(8300), pending)
        .await
        .expect("sweep must fire within one interval past the deadline")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.server_code(), Some(504));
    assert!(matches!(
        err,
        ClientError::ServerResponse { what: None, .. }
    ));
}

// ----------------------------------------------------------------------------
// Reconnect and Auto-Login
// ----------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_replays_hello_then_login_in_order() {
    let h = harness();
    h.session.set_auto_login_with_token("T");

    h.session.connect().await.unwrap();
    h.session.transport_opened(false);
    let hi = h.conn.wait_for_frames(1).await;
    let id = hi["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 201, "text": "created"}}));

    let login = h.conn.wait_for_frames(2).await;
    assert_eq!(login["login"]["scheme"], json!("token"));
    assert_eq!(login["login"]["secret"], json!("VA==")); // base64("T")
    let id = login["login"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {
        "id": id, "code": 200, "text": "ok",
        "params": {"user": "usrABC", "token": "T"}
    }}));
    for _ in 0..200 {
        if h.session.is_authenticated() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.session.is_authenticated());

    // Drop the transport; on reopen the session must handshake and re-login
    // on its own, in that order, before anything else.
    h.session.transport_closed(true, 1006, "abnormal");
    assert!(!h.session.is_authenticated());
    h.session.transport_opened(true);

    let hi2 = h.conn.wait_for_frames(3).await;
    let id = hi2["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 201, "text": "created"}}));
    let login2 = h.conn.wait_for_frames(4).await;
    let id = login2["login"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {
        "id": id, "code": 200, "text": "ok",
        "params": {"user": "usrABC", "token": "T"}
    }}));

    assert_eq!(h.conn.frame_tags(), vec!["hi", "login", "hi", "login"]);
    for _ in 0..200 {
        if h.session.is_authenticated() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session did not re-authenticate");
}

#[tokio::test]
async fn reconnect_now_defers_to_a_scheduled_automatic_attempt() {
    let h = harness();
    h.open().await;

    // Transport drops and schedules its own retry.
    h.session.transport_closed(true, 1006, "abnormal");
    h.conn.connected.store(false, Ordering::SeqCst);
    h.conn.waiting.store(true, Ordering::SeqCst);
    h.conn.auto_reconnect.store(true, Ordering::SeqCst);

    // A background caller leaves the pending automatic attempt alone.
    h.session.reconnect_now(false, false).await.unwrap();
    assert!(!h.conn.is_connected());

    // An interactive caller forces the attempt immediately.
    h.session.reconnect_now(true, false).await.unwrap();
    assert!(h.conn.is_connected());
}

#[tokio::test]
async fn reconnect_now_connects_when_auto_reconnect_is_disabled() {
    let h = harness();
    h.open().await;

    // Transport drops with a stale scheduled attempt that will never fire
    // because automatic retries are off.
    h.session.transport_closed(true, 1006, "abnormal");
    h.conn.connected.store(false, Ordering::SeqCst);
    h.conn.waiting.store(true, Ordering::SeqCst);

    // Even a non-interactive caller gets an immediate attempt.
    h.session.reconnect_now(false, false).await.unwrap();
    assert!(h.conn.is_connected());
}

#[tokio::test]
async fn reconnect_now_with_reset_drops_and_reconnects() {
    let h = harness();
    h.open().await;
    assert!(h.conn.is_connected());

    // Without reset a live connection is left alone.
    h.session.reconnect_now(false, false).await.unwrap();
    assert_eq!(h.listener.disconnects.lock().len(), 0);

    h.session.reconnect_now(true, true).await.unwrap();
    assert!(h.conn.is_connected());
    assert_eq!(h.listener.disconnects.lock().len(), 1);
}

// ----------------------------------------------------------------------------
// Frame Routing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn eviction_notifies_the_topic() {
    let h = harness();
    h.open().await;
    let topic = RecordingTopic::new("grpX");
    h.session.start_tracking(topic.clone());

    h.reply(&json!({"ctrl": {
        "code": 205, "text": "evicted", "topic": "grpX", "params": {"unsub": true}
    }}));

    assert_eq!(
        topic.left.lock().clone(),
        vec![(true, 205, "evicted".to_string())]
    );
}

#[tokio::test]
async fn data_frames_route_in_arrival_order() {
    let h = harness();
    h.open().await;
    let topic = RecordingTopic::new("grpX");
    h.session.start_tracking(topic.clone());

    for seq in [4, 5, 6] {
        h.reply(&json!({"data": {
            "topic": "grpX", "from": "usrB", "seq": seq, "content": "hello"
        }}));
    }
    // An untracked topic's data is dropped without affecting grpX.
    h.reply(&json!({"data": {"topic": "grpOther", "seq": 1, "content": "x"}}));

    assert_eq!(topic.data_seqs.lock().clone(), vec![4, 5, 6]);
}

#[tokio::test]
async fn stream_completion_signals_route_by_what() {
    let h = harness();
    h.open().await;
    let topic = RecordingTopic::new("grpX");
    h.session.start_tracking(topic.clone());

    h.reply(&json!({"ctrl": {
        "code": 208, "text": "delivered", "topic": "grpX",
        "params": {"what": "data", "count": 12}
    }}));
    h.reply(&json!({"ctrl": {
        "code": 208, "text": "delivered", "topic": "grpX", "params": {"what": "sub"}
    }}));

    assert_eq!(topic.messages_complete.lock().clone(), vec![Some(12)]);
    assert_eq!(topic.subs_complete.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn presence_on_me_forwards_to_the_peer_topic() {
    let h = harness();
    h.open().await;
    let me = RecordingTopic::new("me");
    let peer = RecordingTopic::new("usrB");
    h.session.start_tracking(me.clone());
    h.session.start_tracking(peer.clone());

    h.reply(&json!({"pres": {"topic": "me", "src": "usrB", "what": "on"}}));

    assert_eq!(me.pres_events.lock().len(), 1);
    assert_eq!(peer.pres_events.lock().len(), 1);

    // Presence about a group topic stays on `me`.
    h.reply(&json!({"pres": {"topic": "me", "src": "grpX", "what": "msg"}}));
    assert_eq!(me.pres_events.lock().len(), 2);
    assert_eq!(peer.pres_events.lock().len(), 1);
}

#[tokio::test]
async fn info_routes_to_the_tracked_topic() {
    let h = harness();
    h.open().await;
    let topic = RecordingTopic::new("grpX");
    h.session.start_tracking(topic.clone());

    h.reply(&json!({"info": {"topic": "grpX", "from": "usrB", "what": "read", "seq": 9}}));
    assert_eq!(topic.info_events.lock().clone(), vec!["read".to_string()]);
}

#[tokio::test]
async fn meta_for_an_unknown_topic_creates_a_tracked_handle() {
    let h = harness();
    h.open().await;
    assert!(!h.session.is_topic_tracked("grpNew1"));

    h.reply(&json!({"meta": {
        "topic": "grpNew1",
        "desc": {"updated": "2023-06-05T00:00:00.000Z", "public": {"fn": "Fresh"}}
    }}));

    assert!(h.session.is_topic_tracked("grpNew1"));
    assert_eq!(
        h.session.topics_updated(),
        Some(Utc.with_ymd_and_hms(2023, 6, 5, 0, 0, 0).unwrap())
    );

    // Meta without a description cannot create a topic.
    h.reply(&json!({"meta": {"topic": "grpNope", "sub": []}}));
    assert!(!h.session.is_topic_tracked("grpNope"));
}

#[tokio::test]
async fn meta_subscriptions_populate_the_user_cache() {
    let h = harness();
    h.open().await;

    h.reply(&json!({"meta": {
        "topic": "grpX",
        "desc": {"updated": "2023-06-01T00:00:00.000Z"},
        "sub": [{"user": "usrA", "public": {"fn": "Alice"},
                 "updated": "2023-06-01T00:00:00.000Z"}]
    }}));

    let alice = h.session.get_user("usrA").expect("cached user");
    assert_eq!(alice.public, Some(json!({"fn": "Alice"})));
}

#[tokio::test]
async fn undecodable_frames_report_errors_not_futures() {
    let h = harness();
    h.open().await;

    let raw_before = h.listener.raw_frames.load(Ordering::SeqCst);
    h.session.transport_message("not json at all");
    h.session.transport_message(r#"{"ctrl":{"code":200,"text":"a"},"pres":{"topic":"me"}}"#);
    h.session.transport_message("   ");

    // Two bad frames reported; whitespace ignored entirely.
    assert_eq!(h.listener.errors.load(Ordering::SeqCst), 2);
    assert_eq!(h.listener.raw_frames.load(Ordering::SeqCst), raw_before + 2);
}

// ----------------------------------------------------------------------------
// Store Integration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn login_persists_uid_and_cold_loads_topics() {
    let store = Arc::new(MemStore::default());
    let seeded = RecordingTopic::new("grpStored");
    store.topics.lock().push(seeded);

    let h = harness_with(Session::with_store(test_config(), store.clone()));
    h.open_and_login().await;

    assert_eq!(store.my_uid.lock().as_deref(), Some("usrABC"));
    assert!(store.cred_methods.lock().is_none());
    assert!(h.session.is_topic_tracked("grpStored"));
}

#[tokio::test]
async fn server_timestamps_update_the_clock_offset() {
    let store = Arc::new(MemStore::default());
    let h = harness_with(Session::with_store(test_config(), store.clone()));
    h.open().await;

    let future_ts = Utc::now() + chrono::Duration::hours(1);
    h.reply(&json!({"ctrl": {
        "code": 200, "text": "ok",
        "ts": future_ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }}));

    let offset = h.session.time_adjustment();
    assert!(offset > chrono::Duration::minutes(59));
    assert!(store.adjustment.lock().is_some());
}

#[tokio::test]
async fn logout_clears_token_on_server_and_purges_local_state() {
    let store = Arc::new(MemStore::default());
    let h = harness_with(Session::with_store(test_config(), store.clone()));
    h.open_and_login().await;

    // Register a device token first so logout has something to erase.
    let session = h.session.clone();
    let task = tokio::spawn(async move { session.set_device_token(Some("tok1")).await });
    let frame = h.conn.wait_for_frames(3).await;
    assert_eq!(frame["hi"]["dev"], json!("tok1"));
    let id = frame["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 200, "text": "ok"}}));
    task.await.unwrap().unwrap();

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.logout().await });
    let frame = h.conn.wait_for_frames(4).await;
    assert_eq!(frame["hi"]["dev"], json!(NULL_VALUE));
    let id = frame["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 200, "text": "ok"}}));
    task.await.unwrap();

    assert!(h.session.my_uid().is_none());
    assert!(h.session.auth_token().is_none());
    assert!(!h.session.is_authenticated());
    assert!(store.logged_out.load(Ordering::SeqCst));
    assert!(store.device_token.lock().is_none());
}

#[tokio::test]
async fn resending_the_same_device_token_is_a_noop() {
    let h = harness();
    h.open().await;

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.set_device_token(Some("tok1")).await });
    let frame = h.conn.wait_for_frames(2).await;
    let id = frame["hi"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 200, "text": "ok"}}));
    task.await.unwrap().unwrap();

    let frames_before = h.conn.frames().len();
    h.session.set_device_token(Some("tok1")).await.unwrap();
    assert_eq!(h.conn.frames().len(), frames_before);
}

// ----------------------------------------------------------------------------
// Notes and Deletions
// ----------------------------------------------------------------------------

#[tokio::test]
async fn notes_are_fire_and_forget() {
    let h = harness();
    h.open().await;

    h.session.note_read("grpX", 5).await.unwrap();
    h.session.note_recv("grpX", 5).await.unwrap();
    h.session.note_key_press("grpX").await.unwrap();

    let frames = h.conn.frames();
    let notes: Vec<&Value> = frames.iter().filter(|f| f.get("note").is_some()).collect();
    assert_eq!(notes.len(), 3);
    for note in &notes {
        assert!(note["note"].get("id").is_none());
    }
    assert_eq!(notes[0]["note"]["what"], json!("read"));
    assert_eq!(notes[2]["note"]["what"], json!("kp"));
    assert!(notes[2]["note"].get("seq").is_none());
}

#[tokio::test]
async fn publish_sets_noecho() {
    let h = harness();
    h.open().await;

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.publish("grpX", json!("hello")).await });
    let frame = h.conn.wait_for_frames(2).await;
    assert_eq!(frame["pub"]["noecho"], json!(true));
    assert_eq!(frame["pub"]["content"], json!("hello"));
    let id = frame["pub"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 202, "text": "accepted", "params": {"seq": 7}}}));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn deleting_the_account_disconnects_and_purges() {
    let store = Arc::new(MemStore::default());
    let h = harness_with(Session::with_store(test_config(), store.clone()));
    h.open_and_login().await;

    let session = h.session.clone();
    let task = tokio::spawn(async move { session.del_current_user(true).await });
    let frame = h.conn.wait_for_frames(3).await;
    assert_eq!(frame["del"]["what"], json!("user"));
    assert_eq!(frame["del"]["hard"], json!(true));
    let id = frame["del"]["id"].as_str().unwrap().to_string();
    h.reply(&json!({"ctrl": {"id": id, "code": 200, "text": "ok"}}));
    task.await.unwrap().unwrap();

    assert!(!h.session.is_authenticated());
    assert!(h.session.my_uid().is_none());
    assert_eq!(store.deleted_account.lock().as_deref(), Some("usrABC"));
}
