//! Shared wire definitions for the tasklist live-update client.
//!
//! REST bodies and live-channel frames are both JSON. Entity shapes live in
//! [`entity`]; the inbound live-message sum type and its identity derivation
//! live in [`live`].

pub mod entity;
pub mod live;
pub mod notification;

pub use entity::{
    Comment, CommentId, ListAssignment, ListId, StatusId, Task, TaskAssignment, TaskId, TaskList,
    TaskStatus, UserId, normalize_avatar,
};
pub use live::{Inbound, LiveMessage, MessageIdentity, ParseError, TaskPayload};
pub use notification::{Creator, Notification};
