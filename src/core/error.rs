//! Client-level error taxonomy.
//!
//! [`ClientError`] covers everything that can go wrong *transporting* a
//! request: the client being closed, the transport's `send` throwing, a
//! deadline elapsing, or `close()` cancelling an outstanding request. It does
//! not cover protocol-level failures (non-zero response `code`) — those are
//! [`crate::ops::error::GroupError`], surfaced only at the operation layer.
//!
//! # Examples
//!
//! ```
//! use group_client_core::core::error::ClientError;
//!
//! let err = ClientError::timeout("heartbeat", "g1");
//! assert!(err.to_string().contains("timeout"));
//! ```

use thiserror::Error;

/// Errors produced by [`crate::client::GroupClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// `send_request` was called after `close()`.
    #[error("client is closed")]
    Closed,

    /// The transport's `send` function raised before the request could be
    /// registered as in flight, or immediately after registration.
    #[error("send failed for action '{action}': {reason}")]
    SendFailed {
        action: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The deadline elapsed before a response arrived.
    #[error("request timeout for action '{action}' (group={group_id})")]
    Timeout { action: String, group_id: String },

    /// `close()` cancelled this request while it was still outstanding.
    #[error("request cancelled for action '{action}' (group={group_id})")]
    Cancelled { action: String, group_id: String },

    /// The inbound or outbound frame could not be parsed as JSON.
    #[error("failed to decode frame: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal state; indicates a bug rather than a protocol or
    /// transport condition.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

/// Result alias used throughout the correlator/router.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn send_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            action: action.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn send_failed_with_source(
        action: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SendFailed {
            action: action.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timeout(action: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::Timeout {
            action: action.into(),
            group_id: group_id.into(),
        }
    }

    pub fn cancelled(action: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::Cancelled {
            action: action.into(),
            group_id: group_id.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}
