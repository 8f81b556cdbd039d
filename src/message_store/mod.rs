//! Per-group message/event log store (C2 in `SPEC_FULL.md`).
//!
//! Maintains, per group, a [`GroupRecord`] index entry plus an
//! insertion-ordered, deduplicated, retention-bounded message log and event
//! log. Persistence (when `persist_messages` is enabled) writes an index
//! document and one append-style log file per group; switching the owning
//! identity flushes and clears in-memory state first.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::model::{GroupEvent, GroupMessage, GroupRecord};

/// Optional filter applied by [`MessageStore::get_messages`] /
/// [`MessageStore::get_events`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeQuery {
    pub after_id: Option<i64>,
    pub before_id: Option<i64>,
    pub limit: Option<usize>,
}

struct GroupState {
    record: GroupRecord,
    messages: Vec<GroupMessage>,
    events: Vec<GroupEvent>,
}

struct Inner {
    owner: Option<String>,
    groups: HashMap<String, GroupState>,
}

/// Append-only per-group message and event store with dedup and retention.
pub struct MessageStore {
    persist_root: Option<PathBuf>,
    max_messages_per_group: usize,
    max_events_per_group: usize,
    inner: Mutex<Inner>,
}

impl MessageStore {
    /// `persist_root = None` keeps everything in memory. When `Some`, the
    /// directory holds `index.json` plus `<group_id>.messages.log` /
    /// `<group_id>.events.log` files.
    pub fn new(
        persist_root: Option<PathBuf>,
        max_messages_per_group: usize,
        max_events_per_group: usize,
    ) -> Self {
        Self {
            persist_root,
            max_messages_per_group,
            max_events_per_group,
            inner: Mutex::new(Inner {
                owner: None,
                groups: HashMap::new(),
            }),
        }
    }

    /// Rebind to a new owner identity, flushing the previous owner's state
    /// first and clearing in-memory state before loading the new owner's
    /// index (if persistence is enabled).
    pub fn load(&self, owner: impl Into<String>) {
        let owner = owner.into();
        {
            let inner = self.inner.lock();
            if inner.owner.is_some() {
                drop(inner);
                self.flush();
            }
        }
        let mut inner = self.inner.lock();
        inner.groups.clear();
        inner.owner = Some(owner.clone());
        drop(inner);

        if let Some(root) = &self.persist_root {
            let dir = root.join(&owner);
            if let Some(records) = load_index(&dir) {
                let mut inner = self.inner.lock();
                for record in records {
                    let messages = load_log::<GroupMessage>(&dir, &record.group_id, "messages")
                        .unwrap_or_default();
                    let events = load_log::<GroupEvent>(&dir, &record.group_id, "events")
                        .unwrap_or_default();
                    inner.groups.insert(
                        record.group_id.clone(),
                        GroupState {
                            record,
                            messages,
                            events,
                        },
                    );
                }
            }
        }
    }

    /// Idempotent: returns the existing record if `group_id` is already
    /// known, otherwise creates one.
    pub fn get_or_create_group(
        &self,
        group_id: &str,
        target_id: &str,
        name: Option<&str>,
        now: i64,
    ) -> GroupRecord {
        let mut inner = self.inner.lock();
        let state = inner.groups.entry(group_id.to_string()).or_insert_with(|| {
            let mut record = GroupRecord::new(group_id, target_id, now);
            if let Some(name) = name {
                record.group_name = name.to_string();
            }
            GroupState {
                record,
                messages: Vec::new(),
                events: Vec::new(),
            }
        });
        state.record.clone()
    }

    /// Appends a single message, deduping and capping retention.
    pub fn add_message(&self, group_id: &str, msg: GroupMessage, now: i64) {
        self.add_messages(group_id, vec![msg], now);
    }

    /// Appends messages in order, skipping any whose `msg_id` is not strictly
    /// greater than the current `last_msg_id` for the group. Replaying an
    /// already-seen batch is therefore idempotent (`SPEC_FULL.md` §8).
    pub fn add_messages(&self, group_id: &str, msgs: Vec<GroupMessage>, now: i64) {
        let mut inner = self.inner.lock();
        let cap = self.max_messages_per_group;
        let state = inner
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupState {
                record: GroupRecord::new(group_id, "", now),
                messages: Vec::new(),
                events: Vec::new(),
            });

        for msg in msgs {
            if msg.msg_id <= state.record.last_msg_id {
                continue;
            }
            state.record.last_msg_id = msg.msg_id;
            let ts = if msg.timestamp != 0 { msg.timestamp } else { now };
            state.record.last_message_at = state.record.last_message_at.max(ts);
            state.messages.push(msg);
        }
        if state.messages.len() > cap {
            let excess = state.messages.len() - cap;
            state.messages.drain(0..excess);
        }
        state.record.message_count = state.messages.len();
    }

    /// Filtered, order-preserving view over a group's message log.
    pub fn get_messages(&self, group_id: &str, query: RangeQuery) -> Vec<GroupMessage> {
        let inner = self.inner.lock();
        let Some(state) = inner.groups.get(group_id) else {
            return Vec::new();
        };
        filter_and_limit(&state.messages, query, |m| m.msg_id)
    }

    /// Same contract as [`MessageStore::add_messages`] for events.
    pub fn add_event(&self, group_id: &str, event: GroupEvent, now: i64) {
        self.add_events(group_id, vec![event], now);
    }

    pub fn add_events(&self, group_id: &str, events: Vec<GroupEvent>, now: i64) {
        let mut inner = self.inner.lock();
        let cap = self.max_events_per_group;
        let state = inner
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupState {
                record: GroupRecord::new(group_id, "", now),
                messages: Vec::new(),
                events: Vec::new(),
            });

        for event in events {
            if event.event_id <= state.record.last_event_id {
                continue;
            }
            state.record.last_event_id = event.event_id;
            state.events.push(event);
        }
        if state.events.len() > cap {
            let excess = state.events.len() - cap;
            state.events.drain(0..excess);
        }
        state.record.event_count = state.events.len();
    }

    pub fn get_events(&self, group_id: &str, query: RangeQuery) -> Vec<GroupEvent> {
        let inner = self.inner.lock();
        let Some(state) = inner.groups.get(group_id) else {
            return Vec::new();
        };
        filter_and_limit(&state.events, query, |e| e.event_id)
    }

    /// Removes in-memory state and any persistent artifacts for `group_id`.
    pub fn delete_group(&self, group_id: &str) {
        let owner = {
            let mut inner = self.inner.lock();
            inner.groups.remove(group_id);
            inner.owner.clone()
        };
        if let (Some(root), Some(owner)) = (&self.persist_root, owner) {
            let dir = root.join(owner);
            let _ = fs::remove_file(dir.join(format!("{group_id}.messages.log")));
            let _ = fs::remove_file(dir.join(format!("{group_id}.events.log")));
        }
    }

    /// Writes the index and every group's logs, if persistence is enabled.
    pub fn flush(&self) {
        let Some(root) = &self.persist_root else {
            return;
        };
        let inner = self.inner.lock();
        let Some(owner) = &inner.owner else {
            return;
        };
        let dir = root.join(owner);
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %err, "message store flush: failed to create directory");
            return;
        }

        let records: Vec<&GroupRecord> = inner.groups.values().map(|s| &s.record).collect();
        if let Err(err) = write_json(&dir.join("index.json"), &records) {
            tracing::warn!(error = %err, "message store flush: failed to write index");
        }
        for (group_id, state) in &inner.groups {
            if let Err(err) = write_log(&dir, group_id, "messages", &state.messages) {
                tracing::warn!(group_id = %group_id, error = %err, "failed to write message log");
            }
            if let Err(err) = write_log(&dir, group_id, "events", &state.events) {
                tracing::warn!(group_id = %group_id, error = %err, "failed to write event log");
            }
        }
    }

    /// Flushes and drops all in-memory state.
    pub fn close(&self) {
        self.flush();
        let mut inner = self.inner.lock();
        inner.groups.clear();
        inner.owner = None;
    }
}

fn filter_and_limit<T: Clone>(items: &[T], query: RangeQuery, id_of: impl Fn(&T) -> i64) -> Vec<T> {
    let mut filtered: Vec<T> = items
        .iter()
        .filter(|item| {
            let id = id_of(item);
            query.after_id.is_none_or(|after| id > after)
                && query.before_id.is_none_or(|before| id < before)
        })
        .cloned()
        .collect();
    if let Some(limit) = query.limit {
        if filtered.len() > limit {
            let start = filtered.len() - limit;
            filtered = filtered.split_off(start);
        }
    }
    filtered
}

fn load_index(dir: &Path) -> Option<Vec<GroupRecord>> {
    let bytes = fs::read(dir.join("index.json")).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn load_log<T: serde::de::DeserializeOwned>(dir: &Path, group_id: &str, kind: &str) -> Option<Vec<T>> {
    let text = fs::read_to_string(dir.join(format!("{group_id}.{kind}.log"))).ok()?;
    Some(
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect(),
    )
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    fs::write(path, bytes)
}

fn write_log<T: serde::Serialize>(
    dir: &Path,
    group_id: &str,
    kind: &str,
    items: &[T],
) -> std::io::Result<()> {
    let path = dir.join(format!("{group_id}.{kind}.log"));
    let mut file = fs::File::create(path)?;
    for item in items {
        let line = serde_json::to_string(item).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")?;
    }
    Ok(())
}
