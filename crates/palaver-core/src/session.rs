//! The session: connection owner and high-level protocol operations
//!
//! One `Session` per server endpoint. It owns the request/reply plumbing
//! (ids, pending-reply registry), the listener set, and the topic and user
//! caches; the websocket transport and the persistent store are injected
//! behind traits. All operations encode a client message, hand it to the
//! transport, and suspend the caller until the reply with the matching id
//! arrives, times out, or the connection drops.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use crate::auth::AuthState;
use crate::config::{SessionConfig, WIRE_VERSION};
use crate::connection::{ConnState, Connection};
use crate::errors::{ClientError, Result};
use crate::futures::FutureRegistry;
use crate::idgen::IdGenerator;
use crate::listener::{ListenerSet, SessionListener};
use crate::proto::{
    self, AccMessage, ClientMessage, Credential, CtrlMessage, DelMessage, DelRange, GetMessage,
    GetQuery, HiMessage, LeaveMessage, LoginMessage, NoteMessage, PubMessage, ServerMessage,
    SetDesc, SetMessage, SetMeta, SubMessage, NULL_VALUE,
};
use crate::store::Store;
use crate::topic::{TopicHandle, TopicRegistry};
use crate::users::{UserRecord, UserRegistry};

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Client session: one per server endpoint, long-lived.
pub struct Session {
    config: SessionConfig,
    store: Option<Arc<dyn Store>>,
    connection: Mutex<Option<Arc<dyn Connection>>>,

    state: Mutex<ConnState>,
    server_version: Mutex<Option<String>>,
    server_build: Mutex<Option<String>>,
    my_uid: Mutex<Option<String>>,
    auth_token: Mutex<Option<String>>,
    device_token: Mutex<Option<String>>,
    time_adjustment: Mutex<Duration>,

    pub(crate) futures: Arc<FutureRegistry>,
    pub(crate) listeners: ListenerSet,
    pub(crate) topics: TopicRegistry,
    pub(crate) users: UserRegistry,
    pub(crate) ids: IdGenerator,
    pub(crate) auth: AuthState,

    /// Serializes connect/disconnect/reconnect/device-token changes against
    /// each other.
    ops: tokio::sync::Mutex<()>,

    /// Self-reference for spawning session-owned tasks from `&self` hooks.
    weak_self: Weak<Session>,
}

impl Session {
    /// Create a session without persistence.
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Create a session backed by a persistent store. The device token and
    /// uid remembered by the store seed the session.
    pub fn with_store(config: SessionConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Self::build(config, Some(store))
    }

    fn build(config: SessionConfig, store: Option<Arc<dyn Store>>) -> Arc<Self> {
        let device_token = store.as_ref().and_then(|s| s.device_token());
        let my_uid = store.as_ref().and_then(|s| s.my_uid());
        Arc::new_cyclic(|weak| Self {
            config,
            store,
            connection: Mutex::new(None),
            state: Mutex::new(ConnState::Disconnected),
            server_version: Mutex::new(None),
            server_build: Mutex::new(None),
            my_uid: Mutex::new(my_uid),
            auth_token: Mutex::new(None),
            device_token: Mutex::new(device_token),
            time_adjustment: Mutex::new(Duration::zero()),
            futures: FutureRegistry::new(),
            listeners: ListenerSet::new(),
            topics: TopicRegistry::new(),
            users: UserRegistry::new(),
            ids: IdGenerator::new(),
            auth: AuthState::default(),
            ops: tokio::sync::Mutex::new(()),
            weak_self: weak.clone(),
        })
    }

    pub(crate) fn strong_self(&self) -> Option<Arc<Session>> {
        self.weak_self.upgrade()
    }

    /// Attach the transport this session drives.
    pub fn set_connection(&self, conn: Arc<dyn Connection>) {
        *self.connection.lock() = Some(conn);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| ClientError::invalid_state("no connection attached"))
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    pub fn conn_state(&self) -> ConnState {
        *self.state.lock()
    }

    /// True after a login reply with a 2xx code, until disconnect or logout.
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().is_authenticated()
    }

    pub fn my_uid(&self) -> Option<String> {
        self.my_uid.lock().clone()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.lock().clone()
    }

    pub fn device_token(&self) -> Option<String> {
        self.device_token.lock().clone()
    }

    pub fn server_version(&self) -> Option<String> {
        self.server_version.lock().clone()
    }

    pub fn server_build(&self) -> Option<String> {
        self.server_build.lock().clone()
    }

    /// Signed offset between the server clock and the local clock.
    pub fn time_adjustment(&self) -> Duration {
        *self.time_adjustment.lock()
    }

    /// Process-unique short string, e.g. for naming new topics.
    pub fn next_unique_string(&self) -> String {
        self.ids.next_unique()
    }

    pub(crate) fn set_my_uid_internal(&self, uid: Option<String>) {
        *self.my_uid.lock() = uid;
    }

    pub(crate) fn set_auth_token_internal(&self, token: Option<String>) {
        *self.auth_token.lock() = token;
    }

    pub(crate) fn set_conn_state(&self, state: ConnState) {
        *self.state.lock() = state;
    }

    pub(crate) fn state_mut(&self) -> parking_lot::MutexGuard<'_, ConnState> {
        self.state.lock()
    }

    /// Forget per-connection server facts; they are re-learned on the next
    /// handshake.
    pub(crate) fn reset_server_facts(&self) {
        *self.server_version.lock() = None;
        *self.server_build.lock() = None;
    }

    pub(crate) fn update_time_adjustment(&self, server_ts: DateTime<Utc>) {
        let offset = server_ts - Utc::now();
        *self.time_adjustment.lock() = offset;
        if let Some(store) = &self.store {
            store.set_time_adjustment(offset);
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register an event listener. Idempotent by identity.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> bool {
        self.listeners.add(listener)
    }

    /// Unregister an event listener; it receives no further events.
    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ------------------------------------------------------------------
    // Topic and user cache
    // ------------------------------------------------------------------

    pub fn get_topic(&self, name: &str) -> Option<Arc<dyn TopicHandle>> {
        self.topics.get(name)
    }

    pub fn is_topic_tracked(&self, name: &str) -> bool {
        self.topics.is_tracked(name)
    }

    /// Track an application-owned topic handle; frames for its name will be
    /// routed to it.
    pub fn start_tracking(&self, handle: Arc<dyn TopicHandle>) {
        self.topics.advance_watermark(handle.as_ref());
        self.topics.start_tracking(handle);
    }

    pub fn stop_tracking(&self, name: &str) -> Option<Arc<dyn TopicHandle>> {
        self.topics.stop_tracking(name)
    }

    pub fn get_topics(&self) -> Vec<Arc<dyn TopicHandle>> {
        self.topics.get_all()
    }

    /// Tracked topics matching `predicate`, most recently touched first.
    pub fn get_filtered_topics<F>(&self, predicate: F) -> Vec<Arc<dyn TopicHandle>>
    where
        F: Fn(&dyn TopicHandle) -> bool,
    {
        self.topics.get_filtered(predicate)
    }

    /// Newest metadata timestamp among tracked durable topics.
    pub fn topics_updated(&self) -> Option<DateTime<Utc>> {
        self.topics.topics_updated()
    }

    /// Rekey a topic after the server assigned its permanent name.
    pub fn change_topic_name(&self, handle: &Arc<dyn TopicHandle>, old_name: &str) -> bool {
        self.topics
            .change_topic_name(handle, old_name, self.store.as_ref())
    }

    pub fn get_user(&self, uid: &str) -> Option<UserRecord> {
        self.users.get(self.store.as_ref(), uid)
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Open the connection. A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.ops.lock().await;
        let conn = self.connection()?;
        if conn.is_connected() {
            return Ok(());
        }
        self.set_conn_state(ConnState::Connecting);
        conn.connect(false)
    }

    /// Close the connection and settle every pending request with
    /// `NotConnected`.
    pub async fn disconnect(&self) {
        let _guard = self.ops.lock().await;
        if let Some(conn) = self.connection.lock().clone() {
            conn.disconnect();
        }
        self.handle_disconnected(false, 1000, "disconnect requested");
    }

    /// Force a connection attempt.
    ///
    /// Down and not retrying: connect now. Down but waiting to reconnect:
    /// attempt immediately when the caller is interactive or the transport's
    /// auto-reconnect is disabled, otherwise let the transport's own schedule
    /// run. Connected: a no-op unless `reset`, which drops the link and
    /// reconnects.
    pub async fn reconnect_now(&self, interactively: bool, reset: bool) -> Result<()> {
        let _guard = self.ops.lock().await;
        let conn = self.connection()?;
        if !conn.is_connected() {
            if conn.is_waiting_to_reconnect()
                && !interactively
                && conn.is_auto_reconnect_enabled()
            {
                // A scheduled automatic attempt will fire on its own.
                return Ok(());
            }
            self.set_conn_state(ConnState::Connecting);
            return conn.connect(true);
        }
        if reset {
            conn.disconnect();
            self.handle_disconnected(false, 1000, "reconnect reset");
            self.set_conn_state(ConnState::Connecting);
            return conn.connect(true);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send plumbing
    // ------------------------------------------------------------------

    pub(crate) async fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        if !self.state.lock().is_connected() {
            return Err(ClientError::not_connected("no server connection"));
        }
        let conn = self.connection()?;
        let frame = proto::encode(msg)?;
        conn.send(frame).await
    }

    /// Send a request and suspend until its reply settles: matched by id,
    /// timed out, or failed by a disconnect.
    pub(crate) async fn send_with_reply(
        &self,
        id: String,
        msg: ClientMessage,
    ) -> Result<ServerMessage> {
        let rx = self.futures.register(id.clone());
        if let Err(err) = self.send_message(&msg).await {
            self.futures.forget(&id);
            return Err(err);
        }
        match rx.await {
            Ok(settled) => settled,
            Err(_) => Err(ClientError::not_connected("reply channel closed")),
        }
    }

    // ------------------------------------------------------------------
    // Handshake and authentication
    // ------------------------------------------------------------------

    /// Send the `hi` handshake and record the server version and build from
    /// the reply.
    pub async fn hello(&self) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Hi(HiMessage {
            id: Some(id.clone()),
            ver: Some(WIRE_VERSION.into()),
            ua: Some(self.config.user_agent()),
            dev: self.device_token.lock().clone(),
            lang: Some(self.config.locale.clone()),
        });
        let reply = self.send_with_reply(id, msg).await?;
        if let Some(ctrl) = reply.as_ctrl() {
            if let Some(ver) = ctrl.param_str("ver") {
                *self.server_version.lock() = Some(ver.to_string());
            }
            if let Some(build) = ctrl.param_str("build") {
                *self.server_build.lock() = Some(build.to_string());
            }
            info!(code = ctrl.code, server = ?self.server_version.lock().as_deref(), "handshake complete");
            self.listeners
                .notify(|l| l.on_connect(ctrl.code, &ctrl.text, ctrl.params.as_ref()));
        }
        Ok(reply)
    }

    /// Authenticate the session with an arbitrary scheme.
    ///
    /// Refused while another login is in flight; an already authenticated
    /// session gets a synthetic success without a round trip.
    pub async fn login(&self, scheme: &str, secret: Vec<u8>) -> Result<ServerMessage> {
        if self.auth.login_in_progress() {
            return Err(ClientError::invalid_state("Login in progress"));
        }
        if self.is_authenticated() {
            return Ok(ServerMessage::Ctrl(CtrlMessage {
                code: 200,
                text: "already authenticated".into(),
                ..Default::default()
            }));
        }
        self.auth.set_login_in_progress(true);
        let result = self.login_inner(scheme, secret).await;
        self.auth.set_login_in_progress(false);
        if let Err(err) = &result {
            if let ClientError::ServerResponse { code, text, .. } = err {
                if (400..500).contains(code) {
                    self.clear_auth_data();
                }
                let (code, text) = (*code, text.clone());
                self.listeners.notify(|l| l.on_login(code, &text));
            }
        }
        result
    }

    async fn login_inner(&self, scheme: &str, secret: Vec<u8>) -> Result<ServerMessage> {
        self.auth.store_credentials(scheme, &secret);
        let id = self.ids.next_id();
        let msg = ClientMessage::Login(LoginMessage {
            id: Some(id.clone()),
            scheme: scheme.to_string(),
            secret,
            cred: None,
        });
        let reply = self.send_with_reply(id, msg).await?;
        if let Some(ctrl) = reply.as_ctrl() {
            self.login_successful(ctrl).await?;
        }
        Ok(reply)
    }

    /// Login with `login:password` credentials.
    pub async fn login_basic(&self, login: &str, password: &str) -> Result<ServerMessage> {
        self.login(
            crate::auth::SCHEME_BASIC,
            format!("{}:{}", login, password).into_bytes(),
        )
        .await
    }

    /// Login with a previously issued auth token.
    pub async fn login_token(&self, token: &str) -> Result<ServerMessage> {
        self.login(crate::auth::SCHEME_TOKEN, token.as_bytes().to_vec())
            .await
    }

    /// Apply a successful (or auxiliary) login reply to session state.
    pub(crate) async fn login_successful(&self, ctrl: &CtrlMessage) -> Result<()> {
        let user = ctrl.param_str("user").map(str::to_string);

        if ctrl.is_success() {
            if let Some(user) = &user {
                let previous = self.my_uid.lock().clone();
                if let Some(previous) = previous {
                    if &previous != user {
                        // Someone logged into a different account on the same
                        // session. Drop everything tied to the old identity.
                        info!(previous = %previous, current = %user, "uid changed, forcing logout");
                        self.logout().await;
                        self.listeners.notify(|l| l.on_login(400, "UID mismatch"));
                        return Err(ClientError::invalid_state("UID mismatch"));
                    }
                }
                *self.my_uid.lock() = Some(user.clone());
            }
        }

        if let Some(token) = ctrl.param_str("token") {
            *self.auth_token.lock() = Some(token.to_string());
        }

        if ctrl.code < 300 {
            if let Some(store) = &self.store {
                if let Some(user) = &user {
                    store.set_my_uid(user, None);
                }
                self.topics.load_from_store(store.as_ref());
            }
        } else if let Some(methods) = cred_methods(ctrl) {
            // Account exists but still needs credential validation.
            if let (Some(store), Some(user)) = (&self.store, &user) {
                store.set_my_uid(user, Some(methods));
            }
        }

        if ctrl.is_success() {
            self.set_conn_state(ConnState::ConnectedAuth);
        } else if self.state.lock().is_connected() {
            self.set_conn_state(ConnState::ConnectedUnauth);
        }

        let (code, text) = (ctrl.code, ctrl.text.clone());
        self.listeners.notify(|l| l.on_login(code, &text));
        Ok(())
    }

    /// Create or update an account. With `login_now` a created account also
    /// authenticates this session.
    #[allow(clippy::too_many_arguments)]
    pub async fn account(
        &self,
        user: Option<&str>,
        scheme: &str,
        secret: Vec<u8>,
        login_now: bool,
        desc: Option<SetDesc>,
        cred: Option<Vec<Credential>>,
        tags: Option<Vec<String>>,
    ) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Acc(AccMessage {
            id: Some(id.clone()),
            user: user.map(str::to_string),
            scheme: Some(scheme.to_string()),
            secret: Some(secret.clone()),
            login: Some(login_now),
            tags,
            desc,
            cred,
        });
        if login_now {
            self.auth.store_credentials(scheme, &secret);
        }
        match self.send_with_reply(id, msg).await {
            Ok(reply) => {
                if login_now {
                    if let Some(ctrl) = reply.as_ctrl() {
                        self.login_successful(ctrl).await?;
                    }
                }
                Ok(reply)
            }
            Err(err) => {
                if let Some(code) = err.server_code() {
                    if (400..500).contains(&code) {
                        self.clear_auth_data();
                    }
                }
                Err(err)
            }
        }
    }

    /// Create a new account with `login:password` credentials.
    pub async fn create_account_basic(
        &self,
        login: &str,
        password: &str,
        login_now: bool,
        desc: Option<SetDesc>,
        cred: Option<Vec<Credential>>,
        tags: Option<Vec<String>>,
    ) -> Result<ServerMessage> {
        self.account(
            Some("new"),
            crate::auth::SCHEME_BASIC,
            format!("{}:{}", login, password).into_bytes(),
            login_now,
            desc,
            cred,
            tags,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Topic operations
    // ------------------------------------------------------------------

    /// Subscribe to a topic, optionally mutating and querying metadata in the
    /// same request.
    pub async fn subscribe(
        &self,
        topic: &str,
        set: Option<SetMeta>,
        get: Option<GetQuery>,
    ) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Sub(SubMessage {
            id: Some(id.clone()),
            topic: topic.to_string(),
            set,
            get,
        });
        self.send_with_reply(id, msg).await
    }

    /// Leave a topic; with `unsub` the subscription is deleted server-side.
    pub async fn leave(&self, topic: &str, unsub: bool) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Leave(LeaveMessage {
            id: Some(id.clone()),
            topic: topic.to_string(),
            unsub: if unsub { Some(true) } else { None },
        });
        self.send_with_reply(id, msg).await
    }

    /// Publish content to a topic. The echo back to this session is
    /// suppressed; the topic applies the message locally on success.
    pub async fn publish(&self, topic: &str, content: Value) -> Result<ServerMessage> {
        self.publish_with_head(topic, None, content).await
    }

    /// Publish with message headers (e.g. a mime hint or a reply-to ref).
    pub async fn publish_with_head(
        &self,
        topic: &str,
        head: Option<std::collections::HashMap<String, Value>>,
        content: Value,
    ) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Pub(PubMessage {
            id: Some(id.clone()),
            topic: topic.to_string(),
            noecho: Some(true),
            head,
            content,
        });
        self.send_with_reply(id, msg).await
    }

    /// Query topic metadata.
    pub async fn get_meta(&self, topic: &str, query: GetQuery) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Get(GetMessage {
            id: Some(id.clone()),
            topic: topic.to_string(),
            query,
        });
        self.send_with_reply(id, msg).await
    }

    /// Update topic metadata.
    pub async fn set_meta(&self, topic: &str, meta: SetMeta) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Set(SetMessage {
            id: Some(id.clone()),
            topic: topic.to_string(),
            meta,
        });
        self.send_with_reply(id, msg).await
    }

    // ------------------------------------------------------------------
    // Deletions
    // ------------------------------------------------------------------

    async fn send_del(&self, msg: DelMessage) -> Result<ServerMessage> {
        let id = self.ids.next_id();
        let msg = ClientMessage::Del(DelMessage {
            id: Some(id.clone()),
            ..msg
        });
        self.send_with_reply(id, msg).await
    }

    /// Delete one message by sequence id.
    pub async fn del_message(&self, topic: &str, seq: i64, hard: bool) -> Result<ServerMessage> {
        self.del_messages(topic, vec![DelRange::single(seq)], hard)
            .await
    }

    /// Delete the messages in `[from, to)`.
    pub async fn del_message_range(
        &self,
        topic: &str,
        from: i64,
        to: i64,
        hard: bool,
    ) -> Result<ServerMessage> {
        self.del_messages(topic, vec![DelRange::span(from, to)], hard)
            .await
    }

    /// Delete an explicit list of message ranges.
    pub async fn del_messages(
        &self,
        topic: &str,
        ranges: Vec<DelRange>,
        hard: bool,
    ) -> Result<ServerMessage> {
        self.send_del(DelMessage {
            topic: Some(topic.to_string()),
            what: "msg".into(),
            hard: if hard { Some(true) } else { None },
            delseq: Some(ranges),
            ..Default::default()
        })
        .await
    }

    /// Delete a topic outright.
    pub async fn del_topic(&self, topic: &str, hard: bool) -> Result<ServerMessage> {
        let reply = self
            .send_del(DelMessage {
                topic: Some(topic.to_string()),
                what: "topic".into(),
                hard: if hard { Some(true) } else { None },
                ..Default::default()
            })
            .await?;
        if let Some(handle) = self.topics.stop_tracking(topic) {
            handle.topic_left(true, 200, "deleted");
        }
        Ok(reply)
    }

    /// Delete another user's subscription to a topic.
    pub async fn del_subscription(&self, topic: &str, user: &str) -> Result<ServerMessage> {
        self.send_del(DelMessage {
            topic: Some(topic.to_string()),
            what: "sub".into(),
            user: Some(user.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Delete a validated credential (e.g. an email) from the account.
    pub async fn del_credential(&self, method: &str, value: &str) -> Result<ServerMessage> {
        self.send_del(DelMessage {
            what: "cred".into(),
            cred: Some(Credential {
                meth: method.to_string(),
                val: Some(value.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .await
    }

    /// Delete the current account on the server. On success the session
    /// disconnects and purges all local state belonging to the account.
    pub async fn del_current_user(&self, hard: bool) -> Result<ServerMessage> {
        let uid = self
            .my_uid()
            .ok_or_else(|| ClientError::invalid_state("not logged in"))?;
        let reply = self
            .send_del(DelMessage {
                what: "user".into(),
                hard: if hard { Some(true) } else { None },
                ..Default::default()
            })
            .await?;
        self.disconnect().await;
        self.reset_authentication();
        if let Some(store) = &self.store {
            store.delete_account(&uid);
        }
        Ok(reply)
    }

    // ------------------------------------------------------------------
    // Notes (fire-and-forget)
    // ------------------------------------------------------------------

    async fn send_note(&self, topic: &str, what: &str, seq: Option<i64>) -> Result<()> {
        let msg = ClientMessage::Note(NoteMessage {
            topic: topic.to_string(),
            what: what.to_string(),
            seq,
        });
        self.send_message(&msg).await
    }

    /// Report messages up to `seq` as read by the user.
    pub async fn note_read(&self, topic: &str, seq: i64) -> Result<()> {
        self.send_note(topic, "read", Some(seq)).await
    }

    /// Report messages up to `seq` as received by this client.
    pub async fn note_recv(&self, topic: &str, seq: i64) -> Result<()> {
        self.send_note(topic, "recv", Some(seq)).await
    }

    /// Report that the user is typing.
    pub async fn note_key_press(&self, topic: &str) -> Result<()> {
        self.send_note(topic, "kp", None).await
    }

    // ------------------------------------------------------------------
    // Device token
    // ------------------------------------------------------------------

    /// Register or replace the push-notification device token. Re-sending an
    /// unchanged token is a no-op; `None` erases it on the server using the
    /// null sentinel.
    pub async fn set_device_token(&self, token: Option<&str>) -> Result<()> {
        let _guard = self.ops.lock().await;
        let desired = token.map(str::to_string);
        if *self.device_token.lock() == desired {
            return Ok(());
        }
        let wire = desired.clone().unwrap_or_else(|| NULL_VALUE.to_string());
        *self.device_token.lock() = desired.clone();
        if let Some(store) = &self.store {
            store.set_device_token(desired);
        }
        if self.state.lock().is_connected() {
            let id = self.ids.next_id();
            let msg = ClientMessage::Hi(HiMessage {
                id: Some(id.clone()),
                dev: Some(wire),
                ..Default::default()
            });
            self.send_with_reply(id, msg).await?;
        }
        Ok(())
    }

    /// Erase the device token; used by logout.
    pub(crate) async fn clear_device_token(&self) -> Result<()> {
        self.set_device_token(None).await
    }
}

/// Extract the list of pending credential methods from a login reply, either
/// as bare strings or as credential objects with a `meth` field.
fn cred_methods(ctrl: &CtrlMessage) -> Option<Vec<String>> {
    let raw = ctrl.params.as_ref()?.get("cred")?.as_array()?;
    let methods: Vec<String> = raw
        .iter()
        .filter_map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .or_else(|| entry.get("meth")?.as_str().map(str::to_string))
        })
        .collect();
    if methods.is_empty() {
        None
    } else {
        Some(methods)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cred_methods_accepts_strings_and_objects() {
        let ctrl: CtrlMessage = serde_json::from_str(
            r#"{"code":300,"text":"validate credentials",
                "params":{"cred":["email",{"meth":"tel"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            cred_methods(&ctrl),
            Some(vec!["email".to_string(), "tel".to_string()])
        );

        let none: CtrlMessage =
            serde_json::from_str(r#"{"code":300,"text":"x","params":{"cred":[]}}"#).unwrap();
        assert_eq!(cred_methods(&none), None);
    }

    #[tokio::test]
    async fn requests_fail_fast_when_disconnected() {
        let session = Session::new(SessionConfig::new("app", "key", "example.com"));
        let err = session.hello().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected(_)));
        assert!(session.futures.is_empty());
    }

    #[tokio::test]
    async fn connect_without_transport_is_invalid_state() {
        let session = Session::new(SessionConfig::new("app", "key", "example.com"));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[test]
    fn fresh_session_defaults() {
        let session = Session::new(SessionConfig::new("app", "key", "example.com"));
        assert_eq!(session.conn_state(), ConnState::Disconnected);
        assert!(session.my_uid().is_none());
        assert!(session.server_version().is_none());
        assert_eq!(session.time_adjustment(), Duration::zero());
    }
}
