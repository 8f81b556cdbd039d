//! Core data types and abstractions shared by every other module.
//!
//! Nothing in `core` depends on `cursor`, `message_store`, `client`,
//! `dispatch`, or `ops` — they all depend on it.

pub mod config;
pub mod error;
pub mod model;

pub use error::{ClientError, ClientResult};
pub use model::{
    CursorState, EventCursor, GroupEvent, GroupMessage, GroupMessageBatch, GroupNotify,
    GroupRecord, GroupRequest, GroupResponse, MsgCursor,
};
