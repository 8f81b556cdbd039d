//! Protocol- and operation-level error types (C5 in `SPEC_FULL.md`).
//!
//! [`GroupError`] is the single shape every action wrapper raises on a
//! non-zero response `code`: one struct, not a closed enum, because the wire
//! protocol's failure space is an open-ended integer code rather than a fixed
//! set of Rust variants. [`OpsError`] is the result type of every method on
//! [`crate::ops::GroupOps`], wrapping both protocol failures and the
//! lower-level [`crate::core::error::ClientError`] that `send_request` can
//! also surface (timeout, cancellation, closed client, transport failure).

use thiserror::Error;

use crate::core::error::ClientError;

/// Protocol-level failure: the server answered with a non-zero `code`.
///
/// # Examples
///
/// ```
/// use group_client_core::ops::error::GroupError;
///
/// let err = GroupError::new("join_group", 1005, None, Some("g1".to_string()));
/// assert_eq!(err.message(), "join_group failed: code=1005 error=already a member");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupError {
    pub action: String,
    pub code: i64,
    pub error: Option<String>,
    pub group_id: Option<String>,
}

impl GroupError {
    pub fn new(
        action: impl Into<String>,
        code: i64,
        error: Option<String>,
        group_id: Option<String>,
    ) -> Self {
        Self {
            action: action.into(),
            code,
            error,
            group_id,
        }
    }

    /// `"{action} failed: code={code} error={text}"` where `text` is the
    /// server-supplied `error` if non-empty, else the canonical code table
    /// (`SPEC_FULL.md` §4.5 "Error semantics").
    pub fn message(&self) -> String {
        format!(
            "{} failed: code={} error={}",
            self.action,
            self.code,
            self.display_text()
        )
    }

    fn display_text(&self) -> &str {
        match self.error.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => canonical_text(self.code),
        }
    }
}

impl std::fmt::Display for GroupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GroupError {}

/// English canonical code table (`SPEC_FULL.md` §4.5, §9 "localization is not
/// a protocol concern").
fn canonical_text(code: i64) -> &'static str {
    match code {
        0 => "success",
        1001 => "group not found",
        1002 => "no permission",
        1003 => "group dissolved",
        1004 => "group suspended",
        1005 => "already a member",
        1006 => "not a member",
        1007 => "banned",
        1008 => "member limit reached",
        1009 => "invalid params",
        1010 => "rate limited",
        1011 => "invalid invite code",
        1012 => "request already exists",
        1013 => "broadcast conflict",
        1020 => "duty not enabled",
        1021 => "not a duty agent",
        1024 => "agent descriptor not found",
        1025 => "agent descriptor invalid",
        1099 => "action not implemented",
        _ => "unknown error",
    }
}

/// Result error type for every [`crate::ops::GroupOps`] method.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Transport(#[from] ClientError),
    #[error(transparent)]
    Protocol(#[from] GroupError),
}
