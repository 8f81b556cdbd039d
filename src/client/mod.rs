//! Request/response correlator and incoming-frame router (C3 in
//! `SPEC_FULL.md`).
//!
//! [`GroupClient`] owns the pending-request table, the registered
//! [`EventHandler`], and an optional [`CursorStore`] reference. Outbound calls
//! go through [`GroupClient::send_request`], which registers a pending entry
//! before handing the serialized frame to the caller-supplied [`Transport`]
//! and suspends on a oneshot channel under a deadline. Inbound frames go
//! through [`GroupClient::handle_incoming`], which applies the fixed
//! precedence order from `SPEC_FULL.md` §4.3: matched response (plus any
//! piggybacked notification), notification, single push, batch push.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::core::error::{ClientError, ClientResult};
use crate::core::model::{GroupMessage, GroupMessageBatch, GroupNotify, GroupRequest, GroupResponse};
use crate::cursor::CursorStore;
use crate::dispatch::{self, EventHandler};

/// The bidirectional message transport this crate is layered over, specified
/// only by interface (`SPEC_FULL.md` §1 "out of scope"). `send` may fail
/// (e.g. the underlying socket is down); the client surfaces that as a
/// [`ClientError::SendFailed`] to the caller of `send_request`.
pub trait Transport: Send + Sync {
    fn send(&self, target_id: &str, payload: String) -> ClientResult<()>;
}

/// Outcome delivered through a pending request's oneshot channel.
enum Completion {
    Response(GroupResponse),
    Cancelled,
}

struct Pending {
    sink: oneshot::Sender<Completion>,
}

/// Raw shape of any inbound frame, tolerant of missing fields
/// (`SPEC_FULL.md` §4.3 "Parsing helpers tolerate missing fields").
#[derive(Debug, Clone, Deserialize, Default)]
struct IncomingFrame {
    #[serde(default)]
    action: String,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: i64,
}

impl IncomingFrame {
    fn as_response(&self) -> GroupResponse {
        GroupResponse {
            action: self.action.clone(),
            request_id: self.request_id.clone(),
            code: self.code,
            group_id: self.group_id.clone(),
            error: self.error.clone(),
            data: self.data.clone(),
        }
    }

    fn as_notify(&self) -> GroupNotify {
        GroupNotify {
            group_id: self.group_id.clone(),
            event: self.event.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// The transport correlator/router. Single-use lifecycle: `new` → any number
/// of `send_request`/`handle_incoming` calls → `close`.
pub struct GroupClient {
    agent_id: String,
    transport: Arc<dyn Transport>,
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
    cursor_store: RwLock<Option<Arc<CursorStore>>>,
    pending: DashMap<String, Pending>,
    seq: AtomicU64,
    default_timeout_ms: u64,
    closed: AtomicBool,
    completed_count: AtomicU64,
    timeout_count: AtomicU64,
    cancelled_count: AtomicU64,
}

impl GroupClient {
    pub fn new(agent_id: impl Into<String>, transport: Arc<dyn Transport>, default_timeout_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            transport,
            handler: RwLock::new(None),
            cursor_store: RwLock::new(None),
            pending: DashMap::new(),
            seq: AtomicU64::new(0),
            default_timeout_ms,
            closed: AtomicBool::new(false),
            completed_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            cancelled_count: AtomicU64::new(0),
        }
    }

    /// Registers the event handler that receives notifications and pushes.
    /// Replaces any previously registered handler.
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Registers the cursor store `ack_messages`/`ack_events` write to and
    /// that `close()` flushes.
    pub fn set_cursor_store(&self, store: Arc<CursorStore>) {
        *self.cursor_store.write() = Some(store);
    }

    pub fn cursor_store(&self) -> Option<Arc<CursorStore>> {
        self.cursor_store.read().clone()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a response. Monitoring-only
    /// (`SPEC_FULL.md` §7A "correlation/timeout metrics").
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }

    pub fn cancelled_count(&self) -> u64 {
        self.cancelled_count.load(Ordering::Relaxed)
    }

    /// Issues one request and awaits its correlated response.
    ///
    /// Registers the pending entry *before* invoking `transport.send` so a
    /// response racing the send call can never be missed (`SPEC_FULL.md`
    /// §4.3 step 4). Exactly one of: response, cancellation (`close()` ran),
    /// or timeout is returned; the pending entry is always gone by the time
    /// this returns.
    pub async fn send_request(
        &self,
        target: &str,
        group_id: Option<&str>,
        action: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> ClientResult<GroupResponse> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let request_id = self.next_request_id();
        let request = GroupRequest {
            action: action.to_string(),
            request_id: request_id.clone(),
            group_id: group_id.map(str::to_string),
            params,
        };
        let payload = serde_json::to_string(&request)
            .map_err(|err| ClientError::decode(format!("failed to encode request: {err}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), Pending { sink: tx });

        if let Err(err) = self.transport.send(target, payload) {
            self.pending.remove(&request_id);
            return Err(ClientError::send_failed(action, err.to_string()));
        }

        let effective_timeout = timeout.unwrap_or_else(|| Duration::from_millis(self.default_timeout_ms));
        let group_id_owned = group_id.unwrap_or_default().to_string();

        match tokio::time::timeout(effective_timeout, rx).await {
            Ok(Ok(Completion::Response(resp))) => Ok(resp),
            Ok(Ok(Completion::Cancelled)) => Err(ClientError::cancelled(action, group_id_owned)),
            Ok(Err(_closed_sender)) => {
                self.pending.remove(&request_id);
                Err(ClientError::internal(format!(
                    "response channel dropped without a completion for action '{action}'"
                )))
            }
            Err(_elapsed) => {
                self.pending.remove(&request_id);
                self.timeout_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(action, request_id = %request_id, "request timed out");
                Err(ClientError::timeout(action, group_id_owned))
            }
        }
    }

    /// Routes one inbound frame per the precedence order in `SPEC_FULL.md`
    /// §4.3. Never suspends; handler callbacks invoked from here run
    /// synchronously and are panic-guarded (`crate::dispatch::dispatch_notify`).
    pub fn handle_incoming(&self, payload: &str) {
        let frame: IncomingFrame = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode incoming frame, dropping");
                return;
            }
        };

        if !frame.request_id.is_empty() {
            if let Some((_, pending)) = self.pending.remove(&frame.request_id) {
                let resp = frame.as_response();
                let _ = pending.sink.send(Completion::Response(resp));
                self.completed_count.fetch_add(1, Ordering::Relaxed);
                if !frame.event.is_empty() {
                    self.dispatch_notify(&frame.as_notify());
                }
                return;
            }
            tracing::warn!(request_id = %frame.request_id, "orphan response: no matching pending request");
            // Falls through: an orphan response may still carry an `event`
            // (`SPEC_FULL.md` §4.3 step 2, §9 open question).
        }

        if !frame.event.is_empty() {
            self.dispatch_notify(&frame.as_notify());
            return;
        }

        match frame.action.as_str() {
            "message_push" if !frame.data.is_null() => self.handle_message_push(&frame),
            "message_batch_push" if !frame.data.is_null() => self.handle_message_batch_push(&frame),
            other => tracing::warn!(action = %other, "unhandled incoming frame"),
        }
    }

    /// Cancels every outstanding request, then closes the cursor store.
    /// Idempotent: a second call is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sink.send(Completion::Cancelled);
                self.cancelled_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(store) = self.cursor_store() {
            store.close();
        }
    }

    fn next_request_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let epoch_ms = chrono::Utc::now().timestamp_millis();
        format!("{}-{}-{}", self.agent_id, epoch_ms, seq)
    }

    fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.read().clone()
    }

    fn dispatch_notify(&self, notify: &GroupNotify) {
        match self.handler() {
            Some(handler) => {
                dispatch::dispatch_notify(handler.as_ref(), notify);
            }
            None => tracing::warn!(group_id = %notify.group_id, event = %notify.event, "no handler registered, dropping notification"),
        }
    }

    fn handle_message_push(&self, frame: &IncomingFrame) {
        let msg: GroupMessage = match serde_json::from_value(frame.data.clone()) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode message_push payload, dropping");
                return;
            }
        };
        let Some(handler) = self.handler() else {
            tracing::warn!(group_id = %frame.group_id, "no handler registered for message_push");
            return;
        };

        // Route through the synthetic `group_message` notification only: its
        // `dispatch_notify` arm calls `on_group_message` for us, so calling it
        // here too would deliver the same message twice (`SPEC_FULL.md` §9
        // open question, resolved as "dispatch both paths", not "call
        // `on_group_message` twice").
        let notify = GroupNotify {
            group_id: frame.group_id.clone(),
            event: dispatch::notify_events::GROUP_MESSAGE.to_string(),
            data: serde_json::to_value(&msg).unwrap_or(Value::Null),
            timestamp: frame.timestamp,
        };
        dispatch::dispatch_notify(handler.as_ref(), &notify);
    }

    fn handle_message_batch_push(&self, frame: &IncomingFrame) {
        let batch: GroupMessageBatch = match serde_json::from_value(frame.data.clone()) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode message_batch_push payload, dropping");
                return;
            }
        };
        let Some(handler) = self.handler() else {
            tracing::warn!(group_id = %frame.group_id, "no handler registered for message_batch_push");
            return;
        };
        handler.on_group_message_batch(&frame.group_id, batch);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingTransport {
        sent: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn last_request_id(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            let (_, payload) = sent.last()?;
            let value: Value = serde_json::from_str(payload).ok()?;
            value.get("request_id")?.as_str().map(str::to_string)
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, target_id: &str, payload: String) -> ClientResult<()> {
            self.sent.lock().unwrap().push((target_id.to_string(), payload));
            Ok(())
        }
    }

    struct SilentTransport;
    impl Transport for SilentTransport {
        fn send(&self, _target_id: &str, _payload: String) -> ClientResult<()> {
            Ok(())
        }
    }

    struct FailingTransport;
    impl Transport for FailingTransport {
        fn send(&self, _target_id: &str, _payload: String) -> ClientResult<()> {
            Err(ClientError::internal("socket down"))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        new_messages: Mutex<Vec<String>>,
        group_messages: Mutex<Vec<i64>>,
        batches: Mutex<Vec<usize>>,
    }

    impl EventHandler for RecordingHandler {
        fn on_new_message(&self, group_id: &str, _latest_msg_id: i64, _sender: &str, _preview: &str) {
            self.new_messages.lock().push(group_id.to_string());
        }

        fn on_group_message(&self, _group_id: &str, msg: GroupMessage) {
            self.group_messages.lock().push(msg.msg_id);
        }

        fn on_group_message_batch(&self, _group_id: &str, batch: GroupMessageBatch) {
            self.batches.lock().push(batch.messages.len());
        }
    }

    #[tokio::test]
    async fn happy_path_request_response() {
        let transport = RecordingTransport::new();
        let client = Arc::new(GroupClient::new("a.example", transport.clone(), 30_000));

        let client_for_incoming = client.clone();
        let call = tokio::spawn(async move { client_for_incoming.send_request("t.example", None, "heartbeat", None, None).await });

        // Wait until the request lands, then synthesize the server's reply.
        let request_id = loop {
            if let Some(id) = transport.last_request_id() {
                break id;
            }
            tokio::task::yield_now().await;
        };
        let frame = json!({"action": "heartbeat", "request_id": request_id, "code": 0, "group_id": "", "data": null}).to_string();
        client.handle_incoming(&frame);

        let resp = call.await.unwrap().unwrap();
        assert!(resp.is_success());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn timeout_when_no_response_arrives() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 50);
        let err = client
            .send_request("t.example", None, "heartbeat", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.timeout_count(), 1);
    }

    #[tokio::test]
    async fn close_cancels_outstanding_requests() {
        let client = Arc::new(GroupClient::new("a.example", Arc::new(SilentTransport), 5_000));
        let for_task = client.clone();
        let call = tokio::spawn(async move { for_task.send_request("t.example", None, "heartbeat", None, None).await });

        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        client.close();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.cancelled_count(), 1);
    }

    #[tokio::test]
    async fn send_request_after_close_fails_immediately() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 5_000);
        client.close();
        let err = client
            .send_request("t.example", None, "heartbeat", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn send_failure_deregisters_pending_request() {
        let client = GroupClient::new("a.example", Arc::new(FailingTransport), 5_000);
        let err = client
            .send_request("t.example", None, "heartbeat", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::SendFailed { .. }));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn router_precedence_resolves_pending_and_dispatches_notification() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), StdDuration::from_secs(5).as_millis() as u64);
        let handler = Arc::new(RecordingHandler::default());
        client.set_handler(handler.clone());

        let (tx, rx) = oneshot::channel();
        client.pending.insert("R1".to_string(), Pending { sink: tx });

        let frame = json!({
            "action": "x",
            "request_id": "R1",
            "code": 0,
            "event": "new_message",
            "group_id": "g",
            "data": {"latest_msg_id": 7, "sender": "s", "preview": "hi"}
        })
        .to_string();
        client.handle_incoming(&frame);

        match rx.await.unwrap() {
            Completion::Response(resp) => assert!(resp.is_success()),
            Completion::Cancelled => panic!("expected a response, not a cancellation"),
        }
        assert_eq!(handler.new_messages.lock().as_slice(), ["g".to_string()]);
    }

    #[tokio::test]
    async fn message_push_invokes_handler_and_synthesizes_notification() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 5_000);
        let handler = Arc::new(RecordingHandler::default());
        client.set_handler(handler.clone());

        let frame = json!({
            "action": "message_push",
            "group_id": "g1",
            "data": {"msg_id": 9, "sender": "s", "content": "hi", "content_type": "text", "timestamp": 1}
        })
        .to_string();
        client.handle_incoming(&frame);

        assert_eq!(handler.group_messages.lock().as_slice(), [9]);
    }

    #[tokio::test]
    async fn message_batch_push_invokes_handler() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 5_000);
        let handler = Arc::new(RecordingHandler::default());
        client.set_handler(handler.clone());

        let frame = json!({
            "action": "message_batch_push",
            "group_id": "g1",
            "data": {
                "messages": [
                    {"msg_id": 1, "sender": "s", "content": "a", "content_type": "text", "timestamp": 1},
                    {"msg_id": 2, "sender": "s", "content": "b", "content_type": "text", "timestamp": 2}
                ],
                "start_msg_id": 1,
                "latest_msg_id": 2,
                "count": 2
            }
        })
        .to_string();
        client.handle_incoming(&frame);

        assert_eq!(handler.batches.lock().as_slice(), [2]);
    }

    #[tokio::test]
    async fn orphan_response_falls_through_to_notification() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 5_000);
        let handler = Arc::new(RecordingHandler::default());
        client.set_handler(handler.clone());

        let frame = json!({
            "action": "x",
            "request_id": "no-such-id",
            "event": "new_message",
            "group_id": "g",
            "data": {"latest_msg_id": 1, "sender": "s", "preview": "hi"}
        })
        .to_string();
        client.handle_incoming(&frame);

        assert_eq!(handler.new_messages.lock().as_slice(), ["g".to_string()]);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_panicking() {
        let client = GroupClient::new("a.example", Arc::new(SilentTransport), 5_000);
        client.handle_incoming("not json");
        assert_eq!(client.pending_count(), 0);
    }
}
