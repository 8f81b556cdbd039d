//! # group-client-core
//!
//! Client-side transport correlator, incoming-frame router, cursor/message
//! stores, event dispatcher, and ~50-action operation facade for
//! group-protocol messaging. The crate transports JSON requests/notifications
//! over an externally-supplied bidirectional transport (see
//! [`client::Transport`]); it does not implement the transport, identity, or
//! server side itself.
//!
//! ## Architecture
//!
//! Five components, leaves first:
//!
//! ```text
//! ops/        (C5) — typed ~50-action facade, sync_group reconciliation loop
//!   │
//!   ├──► client/    (C3) — request/response correlator, incoming-frame router
//!   │      │
//!   │      └──► dispatch/  (C4) — EventHandler/EventProcessor dispatch
//!   │
//!   ├──► cursor/       (C1) — monotonic per-group (msg, event) cursor store
//!   └──► message_store/ (C2) — per-group message/event log store
//!
//! core/  — wire/domain types, config, error taxonomy (imported by everything)
//! ```
//!
//! A typical application wires these together roughly as:
//!
//! ```no_run
//! use std::sync::Arc;
//! use group_client_core::client::{GroupClient, Transport};
//! use group_client_core::core::error::ClientResult;
//! use group_client_core::cursor::CursorStore;
//! use group_client_core::ops::GroupOps;
//!
//! struct MyTransport;
//! impl Transport for MyTransport {
//!     fn send(&self, _target_id: &str, _payload: String) -> ClientResult<()> {
//!         Ok(()) // hand the payload to the real websocket-like channel
//!     }
//! }
//!
//! # async fn run() {
//! let client = Arc::new(GroupClient::new("agent.example", Arc::new(MyTransport), 30_000));
//! client.set_cursor_store(Arc::new(CursorStore::in_memory()));
//! let ops = GroupOps::new(client.clone(), Default::default());
//!
//! // External transport delivers inbound frames via client.handle_incoming(payload).
//! let _ = ops.heartbeat("target.example").await;
//! # }
//! ```
//!
//! ## Module documentation
//!
//! - [core] — wire envelope and domain types, config, error taxonomy
//! - [cursor] — C1, per-group cursor persistence
//! - [message_store] — C2, per-group message/event log store
//! - [client] — C3, request/response correlator and incoming-frame router
//! - [dispatch] — C4, notification/event dispatch
//! - [ops] — C5, the typed operation facade and `sync_group`

#![forbid(unsafe_code)]

pub mod client;
pub mod core;
pub mod cursor;
pub mod dispatch;
pub mod message_store;
pub mod ops;

pub use client::GroupClient;
pub use core::config::{ClientConfig, SyncConfig};
pub use core::error::{ClientError, ClientResult};
pub use cursor::CursorStore;
pub use dispatch::{EventHandler, EventProcessor};
pub use message_store::MessageStore;
pub use ops::error::{GroupError, OpsError};
pub use ops::GroupOps;
