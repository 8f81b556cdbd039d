//! Per-group cursor persistence (C1 in `SPEC_FULL.md`).
//!
//! A [`CursorStore`] holds the monotonic `(msg_cursor, event_cursor)` pair for
//! every group a client has touched. An empty `cursor_file_path` selects pure
//! in-memory mode; a non-empty path enables a structured JSON document as the
//! durable backing. Either way the store is advisory: a write failure is
//! logged, never propagated, because the server's own cursor bookkeeping is
//! the ultimate source of truth (`sync_group` reconciles on every run).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct StoredCursor {
    #[serde(default)]
    msg_cursor: i64,
    #[serde(default)]
    event_cursor: i64,
}

/// Monotonic per-group `(msg, event)` cursor store with optional durable
/// backing on a single JSON file.
///
/// # Examples
///
/// ```
/// use group_client_core::cursor::CursorStore;
///
/// let store = CursorStore::in_memory();
/// store.save_msg_cursor("g1", 10);
/// store.save_msg_cursor("g1", 5); // no-op, not an advance
/// assert_eq!(store.load_cursor("g1"), (10, 0));
/// ```
pub struct CursorStore {
    path: Option<PathBuf>,
    state: Mutex<Inner>,
}

struct Inner {
    cursors: HashMap<String, StoredCursor>,
    dirty: bool,
}

impl CursorStore {
    /// Pure in-memory store; `flush`/`close` are no-ops beyond clearing state.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Inner {
                cursors: HashMap::new(),
                dirty: false,
            }),
        }
    }

    /// File-backed store. An empty `path` is equivalent to [`CursorStore::in_memory`].
    /// The file is read eagerly; a missing or corrupt file is treated as empty
    /// state (see `SPEC_FULL.md` §9 "Durable cursor format").
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Self::in_memory();
        }
        let cursors = load_from_disk(&path).unwrap_or_default();
        Self {
            path: Some(path),
            state: Mutex::new(Inner {
                cursors,
                dirty: false,
            }),
        }
    }

    /// Construct from the `cursor_file_path` config knob (empty ⇒ in-memory).
    pub fn from_config_path(cursor_file_path: &str) -> Self {
        Self::open(cursor_file_path)
    }

    /// Advance the message cursor for `group_id` to `value` if it is greater
    /// than the stored value; otherwise a no-op.
    pub fn save_msg_cursor(&self, group_id: &str, value: i64) {
        let mut state = self.state.lock();
        let entry = state.cursors.entry(group_id.to_string()).or_default();
        if value > entry.msg_cursor {
            entry.msg_cursor = value;
            state.dirty = true;
        }
    }

    /// Advance the event cursor for `group_id` to `value` if it is greater
    /// than the stored value; otherwise a no-op.
    pub fn save_event_cursor(&self, group_id: &str, value: i64) {
        let mut state = self.state.lock();
        let entry = state.cursors.entry(group_id.to_string()).or_default();
        if value > entry.event_cursor {
            entry.event_cursor = value;
            state.dirty = true;
        }
    }

    /// Returns `(msg_cursor, event_cursor)`, or `(0, 0)` if unknown.
    pub fn load_cursor(&self, group_id: &str) -> (i64, i64) {
        let state = self.state.lock();
        match state.cursors.get(group_id) {
            Some(c) => (c.msg_cursor, c.event_cursor),
            None => (0, 0),
        }
    }

    /// Clears the entry for `group_id`, marking the store dirty.
    pub fn remove_cursor(&self, group_id: &str) {
        let mut state = self.state.lock();
        if state.cursors.remove(group_id).is_some() {
            state.dirty = true;
        }
    }

    /// Persists current state to disk if a path is configured and the store
    /// is dirty. Write failures are logged and swallowed.
    pub fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let mut state = self.state.lock();
        if !state.dirty {
            return;
        }
        match serde_json::to_vec_pretty(&state.cursors) {
            Ok(bytes) => match write_atomic(path, &bytes) {
                Ok(()) => state.dirty = false,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "cursor store flush failed");
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "cursor store serialization failed");
            }
        }
    }

    /// Flushes then releases resources. Idempotent — calling `close` twice is
    /// harmless, it simply flushes (a no-op the second time since the dirty
    /// flag is already clear) and returns.
    pub fn close(&self) {
        self.flush();
    }
}

fn load_from_disk(path: &PathBuf) -> Option<HashMap<String, StoredCursor>> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(map) => Some(map),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cursor file corrupt, resetting to empty");
            None
        }
    }
}

fn write_atomic(path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
