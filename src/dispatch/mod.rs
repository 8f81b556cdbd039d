//! Event dispatch (C4 in `SPEC_FULL.md`).
//!
//! Two capability-set traits — [`EventHandler`] for the wire-level
//! notification/push surface, [`EventProcessor`] for structured group events —
//! plus the two free functions that switch on a closed set of event-name
//! constants and invoke the matching default-no-op method. Unknown events are
//! reported as "not handled" rather than raising; a handler method that
//! panics is caught at this boundary so one misbehaving callback can't take
//! down the router (`SPEC_FULL.md` §7A).

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

use crate::core::model::{GroupEvent, GroupMessage, GroupMessageBatch, GroupNotify};

/// Notification event name constants (`SPEC_FULL.md` §6).
pub mod notify_events {
    pub const NEW_MESSAGE: &str = "new_message";
    pub const NEW_EVENT: &str = "new_event";
    pub const GROUP_INVITE: &str = "group_invite";
    pub const JOIN_APPROVED: &str = "join_approved";
    pub const JOIN_REJECTED: &str = "join_rejected";
    pub const JOIN_REQUEST_RECEIVED: &str = "join_request_received";
    pub const GROUP_MESSAGE: &str = "group_message";
    pub const GROUP_EVENT: &str = "group_event";
}

/// Structured group-event name constants (`SPEC_FULL.md` §6).
pub mod structured_events {
    pub const MEMBER_JOINED: &str = "member_joined";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const MEMBER_LEFT: &str = "member_left";
    pub const MEMBER_BANNED: &str = "member_banned";
    pub const MEMBER_UNBANNED: &str = "member_unbanned";
    pub const ANNOUNCEMENT_UPDATED: &str = "announcement_updated";
    pub const RULES_UPDATED: &str = "rules_updated";
    pub const META_UPDATED: &str = "meta_updated";
    pub const GROUP_DISSOLVED: &str = "group_dissolved";
    pub const MASTER_TRANSFERRED: &str = "master_transferred";
    pub const GROUP_SUSPENDED: &str = "group_suspended";
    pub const GROUP_RESUMED: &str = "group_resumed";
    pub const JOIN_REQUIREMENTS_UPDATED: &str = "join_requirements_updated";
    pub const INVITE_CODE_CREATED: &str = "invite_code_created";
    pub const INVITE_CODE_REVOKED: &str = "invite_code_revoked";
}

/// Capability set for wire-level notifications and pushes. Every method has a
/// no-op default, so an implementor overrides only what it listens for.
pub trait EventHandler: Send + Sync {
    fn on_new_message(&self, _group_id: &str, _latest_msg_id: i64, _sender: &str, _preview: &str) {}
    fn on_new_event(&self, _group_id: &str, _latest_event_id: i64, _event_type: &str) {}
    fn on_group_invite(&self, _group_id: &str, _inviter: &str, _message: &str) {}
    fn on_join_approved(&self, _group_id: &str) {}
    fn on_join_rejected(&self, _group_id: &str, _reason: &str) {}
    fn on_join_request_received(&self, _group_id: &str, _applicant: &str, _message: &str) {}
    /// Optional: only called from the `message_push` path and the synthetic
    /// `group_message` notification it also emits (`SPEC_FULL.md` §4.3 step 4).
    fn on_group_message(&self, _group_id: &str, _msg: GroupMessage) {}
    fn on_group_message_batch(&self, _group_id: &str, _batch: GroupMessageBatch) {}
    fn on_group_event(&self, _group_id: &str, _event: GroupEvent) {}
}

/// Capability set for structured group events, as surfaced through
/// `dispatch_event` (e.g. from sync-log replay or a dedicated event channel).
pub trait EventProcessor: Send + Sync {
    fn on_member_joined(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_member_removed(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_member_left(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_member_banned(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_member_unbanned(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_announcement_updated(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_rules_updated(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_meta_updated(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_group_dissolved(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_master_transferred(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_group_suspended(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_group_resumed(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_join_requirements_updated(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_invite_code_created(&self, _group_id: &str, _event: &GroupEvent) {}
    fn on_invite_code_revoked(&self, _group_id: &str, _event: &GroupEvent) {}
}

/// Dispatches a [`GroupNotify`] to the matching [`EventHandler`] method.
/// Returns `false` (without raising) for an event name outside the closed
/// enumeration in `notify_events`.
pub fn dispatch_notify(handler: &dyn EventHandler, notify: &GroupNotify) -> bool {
    let data = &notify.data;
    let gid = notify.group_id.as_str();
    match notify.event.as_str() {
        notify_events::NEW_MESSAGE => {
            let latest_msg_id = get_i64(data, "latest_msg_id");
            let sender = get_str(data, "sender");
            let preview = get_str(data, "preview");
            guard("on_new_message", || {
                handler.on_new_message(gid, latest_msg_id, &sender, &preview)
            });
            true
        }
        notify_events::NEW_EVENT => {
            let latest_event_id = get_i64(data, "latest_event_id");
            let event_type = get_str(data, "event_type");
            guard("on_new_event", || {
                handler.on_new_event(gid, latest_event_id, &event_type)
            });
            true
        }
        notify_events::GROUP_INVITE => {
            let inviter = get_str(data, "inviter");
            let message = get_str(data, "message");
            guard("on_group_invite", || {
                handler.on_group_invite(gid, &inviter, &message)
            });
            true
        }
        notify_events::JOIN_APPROVED => {
            guard("on_join_approved", || handler.on_join_approved(gid));
            true
        }
        notify_events::JOIN_REJECTED => {
            let reason = get_str(data, "reason");
            guard("on_join_rejected", || handler.on_join_rejected(gid, &reason));
            true
        }
        notify_events::JOIN_REQUEST_RECEIVED => {
            let applicant = get_str(data, "applicant");
            let message = get_str(data, "message");
            guard("on_join_request_received", || {
                handler.on_join_request_received(gid, &applicant, &message)
            });
            true
        }
        notify_events::GROUP_MESSAGE => {
            let msg: GroupMessage = serde_json::from_value(data.clone()).unwrap_or_default();
            guard("on_group_message", || handler.on_group_message(gid, msg.clone()));
            true
        }
        notify_events::GROUP_EVENT => {
            let event: GroupEvent = serde_json::from_value(data.clone()).unwrap_or_default();
            guard("on_group_event", || handler.on_group_event(gid, event.clone()));
            true
        }
        other => {
            tracing::debug!(event = %other, group_id = %gid, "notification event not handled");
            false
        }
    }
}

/// Parses `payload` as JSON and dispatches it to the matching
/// [`EventProcessor`] method. `event` is read from the payload's `"event"`
/// field, falling back to `msg_type` when absent (`SPEC_FULL.md` §4.4).
/// Returns `false` if the payload can't be parsed or the event is unknown.
pub fn dispatch_event(processor: &dyn EventProcessor, msg_type: &str, payload: &str) -> bool {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decode structured event payload");
            return false;
        }
    };

    let group_id = get_str(&value, "group_id");
    let event_name = {
        let explicit = get_str(&value, "event");
        if explicit.is_empty() {
            msg_type.to_string()
        } else {
            explicit
        }
    };
    let event: GroupEvent = serde_json::from_value(value).unwrap_or_default();
    let gid = group_id.as_str();

    macro_rules! dispatch_arm {
        ($method:ident) => {{
            guard(stringify!($method), || processor.$method(gid, &event));
            true
        }};
    }

    match event_name.as_str() {
        structured_events::MEMBER_JOINED => dispatch_arm!(on_member_joined),
        structured_events::MEMBER_REMOVED => dispatch_arm!(on_member_removed),
        structured_events::MEMBER_LEFT => dispatch_arm!(on_member_left),
        structured_events::MEMBER_BANNED => dispatch_arm!(on_member_banned),
        structured_events::MEMBER_UNBANNED => dispatch_arm!(on_member_unbanned),
        structured_events::ANNOUNCEMENT_UPDATED => dispatch_arm!(on_announcement_updated),
        structured_events::RULES_UPDATED => dispatch_arm!(on_rules_updated),
        structured_events::META_UPDATED => dispatch_arm!(on_meta_updated),
        structured_events::GROUP_DISSOLVED => dispatch_arm!(on_group_dissolved),
        structured_events::MASTER_TRANSFERRED => dispatch_arm!(on_master_transferred),
        structured_events::GROUP_SUSPENDED => dispatch_arm!(on_group_suspended),
        structured_events::GROUP_RESUMED => dispatch_arm!(on_group_resumed),
        structured_events::JOIN_REQUIREMENTS_UPDATED => dispatch_arm!(on_join_requirements_updated),
        structured_events::INVITE_CODE_CREATED => dispatch_arm!(on_invite_code_created),
        structured_events::INVITE_CODE_REVOKED => dispatch_arm!(on_invite_code_revoked),
        other => {
            tracing::debug!(event = %other, group_id = %gid, "structured event not handled");
            false
        }
    }
}

fn get_str(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn get_i64(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Runs `f`, catching and logging a panic rather than letting it unwind into
/// the router (`SPEC_FULL.md` §7, error kind 7 "handler failure").
fn guard<F: FnOnce()>(label: &str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::warn!(handler = %label, reason = %panic_message(&payload), "event handler panicked; continuing");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingHandler {
        new_message: Mutex<Vec<(String, i64, String, String)>>,
        group_messages: Mutex<Vec<(String, i64)>>,
    }

    impl EventHandler for RecordingHandler {
        fn on_new_message(&self, group_id: &str, latest_msg_id: i64, sender: &str, preview: &str) {
            self.new_message.lock().push((
                group_id.to_string(),
                latest_msg_id,
                sender.to_string(),
                preview.to_string(),
            ));
        }

        fn on_group_message(&self, group_id: &str, msg: GroupMessage) {
            self.group_messages.lock().push((group_id.to_string(), msg.msg_id));
        }
    }

    #[test]
    fn new_message_extracts_fields_with_defaults() {
        let handler = RecordingHandler::default();
        let notify = GroupNotify {
            group_id: "g1".into(),
            event: notify_events::NEW_MESSAGE.into(),
            data: json!({"latest_msg_id": 7, "sender": "s", "preview": "hi"}),
            timestamp: 0,
        };
        assert!(dispatch_notify(&handler, &notify));
        assert_eq!(
            handler.new_message.lock().as_slice(),
            [("g1".to_string(), 7, "s".to_string(), "hi".to_string())]
        );
    }

    #[test]
    fn unknown_event_returns_false() {
        let handler = RecordingHandler::default();
        let notify = GroupNotify {
            group_id: "g1".into(),
            event: "something_else".into(),
            data: Value::Null,
            timestamp: 0,
        };
        assert!(!dispatch_notify(&handler, &notify));
    }

    #[test]
    fn group_message_notify_reaches_on_group_message() {
        let handler = RecordingHandler::default();
        let notify = GroupNotify {
            group_id: "g1".into(),
            event: notify_events::GROUP_MESSAGE.into(),
            data: json!({"msg_id": 3, "sender": "s", "content": "hi", "content_type": "text", "timestamp": 1}),
            timestamp: 1,
        };
        assert!(dispatch_notify(&handler, &notify));
        assert_eq!(handler.group_messages.lock().as_slice(), [("g1".to_string(), 3)]);
    }

    #[derive(Default)]
    struct RecordingProcessor {
        joined: Mutex<Vec<String>>,
    }

    impl EventProcessor for RecordingProcessor {
        fn on_member_joined(&self, group_id: &str, event: &GroupEvent) {
            self.joined.lock().push(format!("{group_id}:{}", event.actor));
        }
    }

    #[test]
    fn dispatch_event_falls_back_to_msg_type() {
        let processor = RecordingProcessor::default();
        let payload = json!({"group_id": "g1", "actor": "a1"}).to_string();
        assert!(dispatch_event(&processor, "member_joined", &payload));
        assert_eq!(processor.joined.lock().as_slice(), ["g1:a1".to_string()]);
    }

    #[test]
    fn dispatch_event_prefers_explicit_event_field() {
        let processor = RecordingProcessor::default();
        let payload = json!({"group_id": "g1", "event": "member_joined", "actor": "a2"}).to_string();
        assert!(dispatch_event(&processor, "raw_frame", &payload));
        assert_eq!(processor.joined.lock().as_slice(), ["g1:a2".to_string()]);
    }

    #[test]
    fn malformed_payload_returns_false() {
        let processor = RecordingProcessor::default();
        assert!(!dispatch_event(&processor, "member_joined", "not json"));
    }

    struct PanickingHandler;
    impl EventHandler for PanickingHandler {
        fn on_join_approved(&self, _group_id: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn handler_panic_is_caught_and_reported_as_handled() {
        let handler = PanickingHandler;
        let notify = GroupNotify {
            group_id: "g1".into(),
            event: notify_events::JOIN_APPROVED.into(),
            data: Value::Null,
            timestamp: 0,
        };
        assert!(dispatch_notify(&handler, &notify));
    }
}
