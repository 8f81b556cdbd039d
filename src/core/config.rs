//! Configuration surface for the client core.
//!
//! All knobs have sensible defaults and serialize with `serde`, so a host
//! application can load them from its own config file. See `SPEC_FULL.md` §6
//! and §7A for the rationale behind each default.

use serde::{Deserialize, Serialize};

/// Default deadline applied to `send_request` when no explicit timeout is given.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Empty string selects pure in-memory cursor storage.
pub const DEFAULT_CURSOR_FILE_PATH: &str = "";

/// Message/event log persistence is off by default.
pub const DEFAULT_PERSIST_MESSAGES: bool = false;

/// Retention cap for stored messages per group.
pub const DEFAULT_MAX_MESSAGES_PER_GROUP: usize = 5_000;

/// Retention cap for stored events per group.
pub const DEFAULT_MAX_EVENTS_PER_GROUP: usize = 2_000;

/// Page size used by `sync_group`'s pull loop.
pub const DEFAULT_SYNC_PAGE_SIZE: i64 = 50;

/// Number of consecutive empty-yet-`has_more` pages `sync_group` tolerates
/// before aborting that phase (see `SPEC_FULL.md` §7A).
pub const DEFAULT_MAX_EMPTY_SYNC_PAGES: u32 = 3;

/// Top-level configuration for [`crate::client::GroupClient`] and
/// [`crate::message_store::MessageStore`].
///
/// # Examples
///
/// ```
/// use group_client_core::core::config::ClientConfig;
///
/// let config = ClientConfig::default();
/// assert_eq!(config.default_timeout_ms, 30_000);
/// assert!(!config.persist_messages);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub default_timeout_ms: u64,
    pub cursor_file_path: String,
    pub persist_messages: bool,
    pub max_messages_per_group: usize,
    pub max_events_per_group: usize,
    pub sync_page_size: i64,
    pub max_empty_sync_pages: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            cursor_file_path: DEFAULT_CURSOR_FILE_PATH.to_string(),
            persist_messages: DEFAULT_PERSIST_MESSAGES,
            max_messages_per_group: DEFAULT_MAX_MESSAGES_PER_GROUP,
            max_events_per_group: DEFAULT_MAX_EVENTS_PER_GROUP,
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            max_empty_sync_pages: DEFAULT_MAX_EMPTY_SYNC_PAGES,
        }
    }
}

/// The slice of [`ClientConfig`] that `ops::GroupOps::sync_group` needs,
/// broken out so callers that only drive the sync loop don't have to thread
/// the whole client configuration through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    pub page_size: i64,
    pub max_empty_sync_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_SYNC_PAGE_SIZE,
            max_empty_sync_pages: DEFAULT_MAX_EMPTY_SYNC_PAGES,
        }
    }
}

impl From<&ClientConfig> for SyncConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            page_size: config.sync_page_size,
            max_empty_sync_pages: config.max_empty_sync_pages,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClientConfig::default();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.cursor_file_path, "");
        assert_eq!(config.max_messages_per_group, 5_000);
        assert_eq!(config.max_events_per_group, 2_000);
        assert_eq!(config.sync_page_size, 50);
    }

    #[test]
    fn round_trips_through_json() {
        let config = ClientConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn sync_config_derives_from_client_config() {
        let mut config = ClientConfig::default();
        config.sync_page_size = 25;
        config.max_empty_sync_pages = 7;
        let sync: SyncConfig = (&config).into();
        assert_eq!(sync.page_size, 25);
        assert_eq!(sync.max_empty_sync_pages, 7);
    }
}
