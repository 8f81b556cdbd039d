//! Typed operation layer over ~50 protocol actions (C5 in `SPEC_FULL.md`).
//!
//! Every method follows the same skeleton: build params, call
//! [`crate::client::GroupClient::send_request`], fail with [`GroupError`] on
//! a non-zero response code, extract typed fields from `resp.data` with
//! defaults. The two operations that are more than a thin wrapper —
//! [`GroupOps::sync_group`] (the reconciliation loop) and
//! [`parse_group_url`]/[`GroupOps::join_by_url`] (group-URL join) — get their
//! own sections below.

pub mod error;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::GroupClient;
use crate::core::config::SyncConfig;
use crate::core::model::{CursorState, GroupEvent, GroupMessage};
use error::{GroupError, OpsError};

/// Result of [`GroupOps::pull_messages`].
#[derive(Debug, Clone, Default)]
pub struct PullMessagesResult {
    pub messages: Vec<GroupMessage>,
    pub has_more: bool,
    pub latest_msg_id: i64,
}

/// Result of [`GroupOps::pull_events`].
#[derive(Debug, Clone, Default)]
pub struct PullEventsResult {
    pub events: Vec<GroupEvent>,
    pub has_more: bool,
    pub latest_event_id: i64,
}

/// Outcome of [`GroupOps::request_join`] / [`GroupOps::join_by_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    pub status: String,
}

impl JoinResult {
    pub fn is_joined(&self) -> bool {
        self.status == "joined"
    }
}

/// Result of [`parse_group_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGroupUrl {
    pub target_aid: String,
    pub group_id: String,
}

/// Sink for [`GroupOps::sync_group`]'s delivered pages. Default no-op bodies,
/// consistent with the handler traits in [`crate::dispatch`].
pub trait SyncHandler: Send + Sync {
    fn on_messages(&self, _group_id: &str, _messages: &[GroupMessage]) {}
    fn on_events(&self, _group_id: &str, _events: &[GroupEvent]) {}
}

/// Typed facade over the group-protocol action surface, layered on one
/// [`GroupClient`].
pub struct GroupOps {
    client: Arc<GroupClient>,
    sync: SyncConfig,
}

impl GroupOps {
    pub fn new(client: Arc<GroupClient>, sync: SyncConfig) -> Self {
        Self { client, sync }
    }

    pub fn client(&self) -> &Arc<GroupClient> {
        &self.client
    }

    async fn call(
        &self,
        target: &str,
        group_id: Option<&str>,
        action: &str,
        params: Option<Value>,
    ) -> Result<Value, OpsError> {
        let resp = self
            .client
            .send_request(target, group_id, action, params, None)
            .await?;
        if resp.code != 0 {
            let error = (!resp.error.is_empty()).then(|| resp.error.clone());
            let group_id = (!resp.group_id.is_empty()).then(|| resp.group_id.clone());
            return Err(OpsError::Protocol(GroupError::new(action, resp.code, error, group_id)));
        }
        Ok(resp.data)
    }

    async fn call_unit(
        &self,
        target: &str,
        group_id: Option<&str>,
        action: &str,
        params: Option<Value>,
    ) -> Result<(), OpsError> {
        self.call(target, group_id, action, params).await?;
        Ok(())
    }

    // ---- Lifecycle ---------------------------------------------------

    pub async fn register_online(&self, target: &str) -> Result<(), OpsError> {
        self.call_unit(target, None, "register_online", None).await
    }

    pub async fn unregister_online(&self, target: &str) -> Result<(), OpsError> {
        self.call_unit(target, None, "unregister_online", None).await
    }

    pub async fn heartbeat(&self, target: &str) -> Result<(), OpsError> {
        self.call_unit(target, None, "heartbeat", None).await
    }

    // ---- Messages ------------------------------------------------------

    pub async fn create_group(&self, target: &str, group_id: &str, name: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "create_group", Some(json!({"name": name})))
            .await
    }

    pub async fn add_member(&self, target: &str, group_id: &str, agent_id: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "add_member",
            Some(json!({"agent_id": agent_id})),
        )
        .await
    }

    pub async fn send_message(
        &self,
        target: &str,
        group_id: &str,
        content: &str,
        content_type: &str,
    ) -> Result<GroupMessage, OpsError> {
        let data = self
            .call(
                target,
                Some(group_id),
                "send_message",
                Some(json!({"content": content, "content_type": content_type})),
            )
            .await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    /// Two wire modes per `SPEC_FULL.md` §4.5: an explicit cursor
    /// (`after_msg_id > 0`) or auto mode, where an empty params object lets
    /// the server infer the starting point from its own cursor.
    pub async fn pull_messages(
        &self,
        target: &str,
        group_id: &str,
        after_msg_id: i64,
        limit: i64,
    ) -> Result<PullMessagesResult, OpsError> {
        let params = pull_params("after_msg_id", after_msg_id, limit);
        let data = self.call(target, Some(group_id), "pull_messages", params).await?;
        Ok(PullMessagesResult {
            messages: data
                .get("messages")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            has_more: get_bool(&data, "has_more"),
            latest_msg_id: get_i64(&data, "latest_msg_id"),
        })
    }

    /// Only operation (besides `ack_events`) that writes to the cursor store
    /// (`SPEC_FULL.md` §4.5 "Cursor-advancing acks").
    pub async fn ack_messages(&self, target: &str, group_id: &str, msg_id: i64) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "ack_messages",
            Some(json!({"msg_id": msg_id})),
        )
        .await?;
        if let Some(store) = self.client.cursor_store() {
            store.save_msg_cursor(group_id, msg_id);
        }
        Ok(())
    }

    pub async fn pull_events(
        &self,
        target: &str,
        group_id: &str,
        after_event_id: i64,
        limit: i64,
    ) -> Result<PullEventsResult, OpsError> {
        let params = pull_params("after_event_id", after_event_id, limit);
        let data = self.call(target, Some(group_id), "pull_events", params).await?;
        Ok(PullEventsResult {
            events: data
                .get("events")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            has_more: get_bool(&data, "has_more"),
            latest_event_id: get_i64(&data, "latest_event_id"),
        })
    }

    pub async fn ack_events(&self, target: &str, group_id: &str, event_id: i64) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "ack_events",
            Some(json!({"event_id": event_id})),
        )
        .await?;
        if let Some(store) = self.client.cursor_store() {
            store.save_event_cursor(group_id, event_id);
        }
        Ok(())
    }

    pub async fn get_cursor(&self, target: &str, group_id: &str) -> Result<CursorState, OpsError> {
        let data = self.call(target, Some(group_id), "get_cursor", None).await?;
        Ok(serde_json::from_value(data).unwrap_or_default())
    }

    // ---- Management -----------------------------------------------------

    pub async fn remove_member(&self, target: &str, group_id: &str, agent_id: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "remove_member",
            Some(json!({"agent_id": agent_id})),
        )
        .await
    }

    pub async fn leave_group(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "leave_group", None).await
    }

    pub async fn dissolve_group(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "dissolve_group", None).await
    }

    pub async fn ban_agent(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "ban_agent",
            Some(json!({"agent_id": agent_id, "reason": reason})),
        )
        .await
    }

    pub async fn unban_agent(&self, target: &str, group_id: &str, agent_id: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "unban_agent",
            Some(json!({"agent_id": agent_id})),
        )
        .await
    }

    pub async fn get_banlist(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_banlist", None).await
    }

    /// Response carries `status ∈ {"joined", "pending"}` depending on group
    /// visibility (`SPEC_FULL.md` §4.5 "Group-URL join").
    pub async fn request_join(
        &self,
        target: &str,
        group_id: &str,
        message: Option<&str>,
    ) -> Result<JoinResult, OpsError> {
        let data = self
            .call(
                target,
                Some(group_id),
                "request_join",
                Some(json!({"message": message})),
            )
            .await?;
        let status = data.get("status").and_then(Value::as_str).unwrap_or("pending").to_string();
        Ok(JoinResult { status })
    }

    pub async fn review_join_request(
        &self,
        target: &str,
        group_id: &str,
        applicant: &str,
        approve: bool,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "review_join_request",
            Some(json!({"applicant": applicant, "approve": approve})),
        )
        .await
    }

    pub async fn batch_review_join_requests(
        &self,
        target: &str,
        group_id: &str,
        applicants: &[String],
        approve: bool,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "batch_review_join_requests",
            Some(json!({"applicants": applicants, "approve": approve})),
        )
        .await
    }

    pub async fn get_pending_requests(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_pending_requests", None).await
    }

    // ---- Group state ------------------------------------------------------

    pub async fn get_group_info(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_group_info", None).await
    }

    pub async fn update_group_meta(&self, target: &str, group_id: &str, meta: Value) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "update_group_meta", Some(meta)).await
    }

    pub async fn get_members(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_members", None).await
    }

    pub async fn get_admins(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_admins", None).await
    }

    pub async fn get_rules(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_rules", None).await
    }

    pub async fn update_rules(&self, target: &str, group_id: &str, rules: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "update_rules", Some(json!({"rules": rules})))
            .await
    }

    pub async fn get_announcement(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_announcement", None).await
    }

    pub async fn update_announcement(
        &self,
        target: &str,
        group_id: &str,
        announcement: &str,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "update_announcement",
            Some(json!({"announcement": announcement})),
        )
        .await
    }

    pub async fn get_join_requirements(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_join_requirements", None).await
    }

    pub async fn update_join_requirements(
        &self,
        target: &str,
        group_id: &str,
        requirements: Value,
    ) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "update_join_requirements", Some(requirements))
            .await
    }

    pub async fn suspend_group(
        &self,
        target: &str,
        group_id: &str,
        reason: Option<&str>,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "suspend_group",
            Some(json!({"reason": reason})),
        )
        .await
    }

    pub async fn resume_group(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "resume_group", None).await
    }

    pub async fn transfer_master(&self, target: &str, group_id: &str, new_master: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "transfer_master",
            Some(json!({"new_master": new_master})),
        )
        .await
    }

    pub async fn get_master(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_master", None).await
    }

    // ---- Invite codes ----------------------------------------------------

    pub async fn create_invite_code(
        &self,
        target: &str,
        group_id: &str,
        expires_in_secs: Option<i64>,
    ) -> Result<Value, OpsError> {
        self.call(
            target,
            Some(group_id),
            "create_invite_code",
            Some(json!({"expires_in_secs": expires_in_secs})),
        )
        .await
    }

    pub async fn use_invite_code(&self, target: &str, group_id: &str, code: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "use_invite_code",
            Some(json!({"code": code})),
        )
        .await
    }

    pub async fn list_invite_codes(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "list_invite_codes", None).await
    }

    pub async fn revoke_invite_code(&self, target: &str, group_id: &str, code: &str) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "revoke_invite_code",
            Some(json!({"code": code})),
        )
        .await
    }

    // ---- Broadcast control -------------------------------------------------

    pub async fn acquire_broadcast_lock(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "acquire_broadcast_lock", None).await
    }

    pub async fn release_broadcast_lock(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "release_broadcast_lock", None).await
    }

    pub async fn check_broadcast_permission(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "check_broadcast_permission", None).await
    }

    // ---- Duty --------------------------------------------------------------

    pub async fn update_duty_config(&self, target: &str, group_id: &str, config: Value) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "update_duty_config", Some(config))
            .await
    }

    pub async fn set_fixed_agents(&self, target: &str, group_id: &str, agents: &[String]) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "set_fixed_agents",
            Some(json!({"agents": agents})),
        )
        .await
    }

    pub async fn get_duty_status(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_duty_status", None).await
    }

    pub async fn refresh_member_types(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "refresh_member_types", None).await
    }

    // ---- Sync/discovery ------------------------------------------------------

    pub async fn get_sync_status(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_sync_status", None).await
    }

    pub async fn get_sync_log(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_sync_log", None).await
    }

    pub async fn get_checksum(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_checksum", None).await
    }

    pub async fn get_message_checksum(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_message_checksum", None).await
    }

    pub async fn get_public_info(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_public_info", None).await
    }

    pub async fn search_groups(&self, target: &str, query: &str) -> Result<Value, OpsError> {
        self.call(target, None, "search_groups", Some(json!({"query": query}))).await
    }

    pub async fn generate_digest(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "generate_digest", None).await
    }

    pub async fn get_digest(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_digest", None).await
    }

    // ---- Membership index ---------------------------------------------------

    pub async fn list_my_groups(&self, target: &str) -> Result<Value, OpsError> {
        self.call(target, None, "list_my_groups", None).await
    }

    pub async fn unregister_membership(&self, target: &str, group_id: &str) -> Result<(), OpsError> {
        self.call_unit(target, Some(group_id), "unregister_membership", None).await
    }

    pub async fn change_member_role(
        &self,
        target: &str,
        group_id: &str,
        agent_id: &str,
        role: &str,
    ) -> Result<(), OpsError> {
        self.call_unit(
            target,
            Some(group_id),
            "change_member_role",
            Some(json!({"agent_id": agent_id, "role": role})),
        )
        .await
    }

    pub async fn get_file(&self, target: &str, group_id: &str, file_id: &str) -> Result<Value, OpsError> {
        self.call(
            target,
            Some(group_id),
            "get_file",
            Some(json!({"file_id": file_id})),
        )
        .await
    }

    pub async fn get_summary(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_summary", None).await
    }

    pub async fn get_metrics(&self, target: &str, group_id: &str) -> Result<Value, OpsError> {
        self.call(target, Some(group_id), "get_metrics", None).await
    }

    // ---- Group-URL join --------------------------------------------------

    /// `invite_code` present ⇒ `use_invite_code`, always `"joined"`. Absent ⇒
    /// `request_join`, whose response carries `status`.
    pub async fn join_by_url(
        &self,
        url: &str,
        invite_code: Option<&str>,
        message: Option<&str>,
    ) -> Result<JoinResult, OpsError> {
        let parsed = parse_group_url(url)?;
        if let Some(code) = invite_code {
            self.use_invite_code(&parsed.target_aid, &parsed.group_id, code).await?;
            return Ok(JoinResult {
                status: "joined".to_string(),
            });
        }
        self.request_join(&parsed.target_aid, &parsed.group_id, message).await
    }

    // ---- sync_group reconciliation loop -----------------------------------

    /// Reconciles local and server cursors, then drains the message and
    /// event streams page by page, acking as it goes (`SPEC_FULL.md` §4.5).
    pub async fn sync_group(
        &self,
        target: &str,
        group_id: &str,
        handler: &dyn SyncHandler,
    ) -> Result<(), OpsError> {
        let mut cursor = self.get_cursor(target, group_id).await?;

        if let Some(store) = self.client.cursor_store() {
            let (local_msg, local_event) = store.load_cursor(group_id);
            cursor.msg_cursor.current = cursor.msg_cursor.current.max(local_msg);
            cursor.event_cursor.current = cursor.event_cursor.current.max(local_event);
        }

        self.sync_messages(target, group_id, cursor.msg_cursor.current, handler).await?;
        self.sync_events(target, group_id, cursor.event_cursor.current, handler).await?;
        Ok(())
    }

    async fn sync_messages(
        &self,
        target: &str,
        group_id: &str,
        start_after: i64,
        handler: &dyn SyncHandler,
    ) -> Result<(), OpsError> {
        let mut after = start_after;
        let mut empty_pages: u32 = 0;
        loop {
            let page = self.pull_messages(target, group_id, after, self.sync.page_size).await?;
            if page.messages.is_empty() {
                empty_pages += 1;
                if !page.has_more {
                    break;
                }
                if empty_pages >= self.sync.max_empty_sync_pages {
                    tracing::warn!(
                        group_id,
                        empty_pages,
                        "sync_group: aborting message phase after repeated empty pages"
                    );
                    break;
                }
                continue;
            }
            empty_pages = 0;
            handler.on_messages(group_id, &page.messages);
            if let Some(last) = page.messages.last() {
                after = last.msg_id;
                self.ack_messages(target, group_id, after).await?;
            }
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }

    async fn sync_events(
        &self,
        target: &str,
        group_id: &str,
        start_after: i64,
        handler: &dyn SyncHandler,
    ) -> Result<(), OpsError> {
        let mut after = start_after;
        let mut empty_pages: u32 = 0;
        loop {
            let page = self.pull_events(target, group_id, after, self.sync.page_size).await?;
            if page.events.is_empty() {
                empty_pages += 1;
                if !page.has_more {
                    break;
                }
                if empty_pages >= self.sync.max_empty_sync_pages {
                    tracing::warn!(
                        group_id,
                        empty_pages,
                        "sync_group: aborting event phase after repeated empty pages"
                    );
                    break;
                }
                continue;
            }
            empty_pages = 0;
            handler.on_events(group_id, &page.events);
            if let Some(last) = page.events.last() {
                after = last.event_id;
                self.ack_events(target, group_id, after).await?;
            }
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }
}

/// Wire params for `pull_messages`/`pull_events`'s three modes
/// (`SPEC_FULL.md` §4.5): explicit cursor, auto (empty params), or
/// limit-only. `after_key` is `"after_msg_id"` or `"after_event_id"`.
fn pull_params(after_key: &str, after_id: i64, limit: i64) -> Option<Value> {
    let mut params = serde_json::Map::new();
    if after_id > 0 {
        params.insert(after_key.to_string(), json!(after_id));
        if limit > 0 {
            params.insert("limit".to_string(), json!(limit));
        }
    } else if limit > 0 {
        params.insert("limit".to_string(), json!(limit));
    }
    if params.is_empty() {
        None
    } else {
        Some(Value::Object(params))
    }
}

fn get_bool(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn get_i64(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Parses a group URL of the form `{scheme}://{host}/{group_id}[?query][#frag]`
/// (`SPEC_FULL.md` §4.5 "Group-URL join", §6). Fails if host or the
/// post-strip path is empty.
pub fn parse_group_url(url: &str) -> Result<ParsedGroupUrl, crate::core::error::ClientError> {
    use crate::core::error::ClientError;

    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (host, raw_path) = match rest.split_once('/') {
        Some((host, path)) => (host, path),
        None => (rest, ""),
    };
    let path = raw_path.split(['?', '#']).next().unwrap_or("");
    let path = path.trim_end_matches('/');

    if host.is_empty() || path.is_empty() {
        return Err(ClientError::internal(format!("invalid group url: '{url}'")));
    }

    Ok(ParsedGroupUrl {
        target_aid: host.to_string(),
        group_id: path.to_string(),
    })
}
