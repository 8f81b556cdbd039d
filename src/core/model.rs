//! Wire envelope and domain types shared by every other module.
//!
//! These are pure data types: the request/response/notification envelope that
//! crosses the external transport, the message/event records that make up a
//! group's history, and the cursor pair that tracks how far a client has read.
//! No type here knows how to send, persist, or dispatch itself — see
//! [`crate::client`], [`crate::cursor`], [`crate::message_store`] and
//! [`crate::dispatch`] for that.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request envelope, built by [`crate::client::GroupClient::send_request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRequest {
    pub action: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Terminal response for one outstanding request. `code == 0` is success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

impl GroupResponse {
    /// `true` iff `code == 0`.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Server-initiated async state-change notification. Never carries a `request_id`
/// that this client issued, though the wire frame it rides on might (see
/// invariant 6 in `SPEC_FULL.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupNotify {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
}

/// A single group message, totally ordered per group by `msg_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMessage {
    #[serde(default)]
    pub msg_id: i64,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A single group event, totally ordered per group by `event_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEvent {
    #[serde(default)]
    pub event_id: i64,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A server-pushed page of messages, as delivered by a `message_batch_push` frame
/// or returned from `pull_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupMessageBatch {
    #[serde(default)]
    pub messages: Vec<GroupMessage>,
    #[serde(default)]
    pub start_msg_id: i64,
    #[serde(default)]
    pub latest_msg_id: i64,
    #[serde(default)]
    pub count: usize,
}

/// Position pair for the message stream of one group: `current` is the last
/// acknowledged id, `latest` the server's highest known id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MsgCursor {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub latest: i64,
    #[serde(default)]
    pub unread_count: i64,
}

/// Same shape as [`MsgCursor`] for the event stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EventCursor {
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub latest: i64,
    #[serde(default)]
    pub unread_count: i64,
}

/// The pair of cursors returned by `get_cursor`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CursorState {
    pub msg_cursor: MsgCursor,
    pub event_cursor: EventCursor,
}

/// Per-group index entry maintained by [`crate::message_store::MessageStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    pub target_id: String,
    #[serde(default)]
    pub last_msg_id: i64,
    #[serde(default)]
    pub last_event_id: i64,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub event_count: usize,
    #[serde(default)]
    pub last_message_at: i64,
    #[serde(default)]
    pub joined_at: i64,
}

impl GroupRecord {
    pub fn new(group_id: impl Into<String>, target_id: impl Into<String>, now: i64) -> Self {
        Self {
            group_id: group_id.into(),
            group_name: String::new(),
            target_id: target_id.into(),
            last_msg_id: 0,
            last_event_id: 0,
            message_count: 0,
            event_count: 0,
            last_message_at: 0,
            joined_at: now,
        }
    }
}
