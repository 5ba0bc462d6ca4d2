//! Inbound frame dispatch and transport lifecycle hooks
//!
//! The transport pushes its events into the session through the hooks below.
//! Frames are processed in arrival order on the caller's task: decode, raw
//! and typed listener fan-out, pending-reply settlement, then routing into
//! the owning topic. Per-topic route calls therefore observe server order.

use tracing::{debug, error, info, warn};

use crate::connection::ConnState;
use crate::errors::ClientError;
use crate::proto::{
    self, CtrlMessage, DataMessage, InfoMessage, MetaMessage, PresMessage, ServerMessage,
};
use crate::session::Session;
use crate::types::TopicKind;

/// Code reported to topics when the connection drops under them.
const DISCONNECTED_CODE: i32 = 503;

impl Session {
    // ------------------------------------------------------------------
    // Transport hooks
    // ------------------------------------------------------------------

    /// The transport reports an open channel. Reseeds the message-id counter,
    /// sends the handshake, and chains the auto-login when armed.
    pub fn transport_opened(&self, reconnecting: bool) {
        debug!(reconnecting, "transport opened");
        self.ids.reseed();
        self.set_conn_state(ConnState::ConnectedUnauth);
        let Some(session) = self.strong_self() else {
            return;
        };
        tokio::spawn(async move {
            match session.hello().await {
                Ok(_) => session.maybe_auto_login().await,
                Err(err) => {
                    warn!(error = %err, "handshake failed");
                    session.listeners.notify(|l| l.on_error(&err));
                }
            }
        });
    }

    /// The transport delivered one text frame.
    pub fn transport_message(&self, raw: &str) {
        self.dispatch(raw);
    }

    /// The transport reports the channel closed.
    pub fn transport_closed(&self, by_server: bool, code: u16, reason: &str) {
        self.handle_disconnected(by_server, code, reason);
    }

    /// The transport reports a failure. Pending requests cannot complete.
    pub fn transport_error(&self, err: &ClientError) {
        warn!(error = %err, "transport error");
        self.futures
            .purge_all(|| ClientError::not_connected(err.to_string()));
        self.listeners.notify(|l| l.on_error(err));
    }

    /// Enter the disconnected state: settle every pending request, reset
    /// per-connection server facts, tell every tracked topic, and notify
    /// listeners. Idempotent; repeated closes are ignored.
    pub(crate) fn handle_disconnected(&self, by_server: bool, code: u16, reason: &str) {
        {
            let mut state = self.state_mut();
            if *state == ConnState::Disconnected {
                return;
            }
            *state = ConnState::Disconnected;
        }
        info!(by_server, code, reason, "connection closed");

        self.futures
            .purge_all(|| ClientError::not_connected("connection closed"));
        self.reset_server_facts();
        self.auth.set_login_in_progress(false);

        for topic in self.topics.get_all() {
            topic.topic_left(false, DISCONNECTED_CODE, "disconnected");
        }
        self.listeners
            .notify(|l| l.on_disconnect(by_server, code, reason));
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Classify and route one raw frame. Empty frames are ignored.
    pub fn dispatch(&self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        self.listeners.notify(|l| l.on_raw_message(raw));

        let msg = match proto::decode(raw) {
            Ok(msg) => msg,
            Err(err) => {
                // Not attributable to any single request; report broadly.
                error!(error = %err, "failed to decode server frame");
                self.listeners.notify(|l| l.on_error(&err));
                return;
            }
        };
        self.listeners.notify(|l| l.on_message(&msg));

        match &msg {
            ServerMessage::Ctrl(ctrl) => self.handle_ctrl(&msg, ctrl),
            ServerMessage::Meta(meta) => self.handle_meta(&msg, meta),
            ServerMessage::Data(data) => self.handle_data(&msg, data),
            ServerMessage::Pres(pres) => self.handle_pres(pres),
            ServerMessage::Info(info) => self.handle_info(info),
        }
    }

    fn handle_ctrl(&self, msg: &ServerMessage, ctrl: &CtrlMessage) {
        self.listeners.notify(|l| l.on_ctrl_message(ctrl));

        if let Some(ts) = ctrl.ts {
            self.update_time_adjustment(ts);
        }

        if let Some(id) = &ctrl.id {
            if (200..400).contains(&ctrl.code) {
                self.futures.resolve(id, msg.clone());
            } else {
                self.futures.reject(
                    id,
                    ClientError::server_response(
                        ctrl.code,
                        ctrl.text.clone(),
                        ctrl.param_str("what").map(str::to_string),
                    ),
                );
            }
        }

        // Eviction and stream-completion signals are orthogonal to the reply
        // code and to each other.
        if ctrl.code == 205 && ctrl.text == "evicted" {
            if let Some(topic) = ctrl.topic.as_deref().and_then(|name| self.topics.get(name)) {
                topic.topic_left(
                    ctrl.param_bool("unsub").unwrap_or(false),
                    ctrl.code,
                    &ctrl.text,
                );
            }
        }
        if let (Some(what), Some(name)) = (ctrl.param_str("what"), ctrl.topic.as_deref()) {
            if let Some(topic) = self.topics.get(name) {
                match what {
                    "data" => topic.all_messages_received(ctrl.param_i64("count")),
                    "sub" => topic.all_subs_received(),
                    other => debug!(what = other, topic = name, "unhandled ctrl signal"),
                }
            }
        }
    }

    fn handle_meta(&self, msg: &ServerMessage, meta: &MetaMessage) {
        let topic = match self.topics.get(&meta.topic) {
            Some(topic) => Some(topic),
            None => self.topics.maybe_create_topic(meta, self.store()),
        };
        if let Some(topic) = &topic {
            topic.route_meta(meta);
            self.topics.advance_watermark(topic.as_ref());
        } else {
            debug!(topic = %meta.topic, "meta for unknown topic without description");
        }

        if let Some(subs) = &meta.sub {
            for sub in subs {
                self.users.update_from_subscription(self.store(), sub);
            }
        }

        self.listeners.notify(|l| l.on_meta_message(meta));
        if let Some(id) = &meta.id {
            self.futures.resolve(id, msg.clone());
        }
    }

    fn handle_data(&self, msg: &ServerMessage, data: &DataMessage) {
        if let Some(topic) = self.topics.get(&data.topic) {
            topic.route_data(data);
        }
        self.listeners.notify(|l| l.on_data_message(data));
        if let Some(id) = &data.id {
            self.futures.resolve(id, msg.clone());
        }
    }

    fn handle_pres(&self, pres: &PresMessage) {
        if let Some(topic) = self.topics.get(&pres.topic) {
            topic.route_pres(pres);
        }
        // Presence about a peer arrives on `me`; forward it to the peer topic
        // as well so an open conversation sees it immediately.
        if pres.topic == "me" {
            if let Some(src) = pres.src.as_deref() {
                if TopicKind::from_name(src) == TopicKind::P2p {
                    if let Some(peer) = self.topics.get(src) {
                        peer.route_pres(pres);
                    }
                }
            }
        }
        self.listeners.notify(|l| l.on_pres_message(pres));
    }

    fn handle_info(&self, info: &InfoMessage) {
        if let Some(topic) = self.topics.get(&info.topic) {
            topic.route_info(info);
        }
        self.listeners.notify(|l| l.on_info_message(info));
    }
}
