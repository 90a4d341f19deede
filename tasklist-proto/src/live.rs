//! Inbound live-channel messages.
//!
//! Every frame is a JSON object. Frames carrying an `action` string are
//! broadcasts about tasks or comments; frames without one are personal
//! assignment notifications. [`Inbound::parse`] turns a raw frame into the
//! [`LiveMessage`] sum type at the boundary so nothing downstream touches
//! untyped JSON.

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::entity::{
    Comment, CommentId, ListAssignment, ListId, StatusId, TaskAssignment, TaskId, UserId,
};
use crate::notification::Notification;

/// Errors produced while turning a raw frame into a [`LiveMessage`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame is not valid JSON or a payload has the wrong shape.
    #[error("malformed live message: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("live message is not a JSON object")]
    NotAnObject,

    /// The `action` field is present but not a string.
    #[error("live message action is not a string: {0}")]
    InvalidAction(String),

    /// A recognised action arrived without the field holding its payload.
    #[error("`{action}` message is missing its `{field}` field")]
    MissingPayload {
        /// The action as received.
        action: String,
        /// The field that should have carried the payload.
        field: &'static str,
    },
}

/// Task fields carried by `todo_*` / `status_updated` broadcasts.
///
/// Every field is optional: an update only overwrites what it carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskPayload {
    #[serde(alias = "id")]
    pub id: Option<TaskId>,
    pub task_name: Option<String>,
    pub task_description: Option<String>,
    pub status_id: Option<StatusId>,
    #[serde(alias = "statusName")]
    pub status_name: Option<String>,
    pub user_id: Option<UserId>,
    pub todo_list_id: Option<ListId>,
    pub created_at: Option<String>,
    pub todo_assignments: Option<Vec<TaskAssignment>>,
    pub todo_list_assignments: Option<Vec<ListAssignment>>,
    pub comments: Option<Vec<Comment>>,
}

/// Reference to a deleted task; the backend sends it lower-cased.
#[derive(Debug, Deserialize)]
struct DeletedTask {
    #[serde(alias = "Id")]
    id: Option<TaskId>,
}

/// A parsed live-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMessage {
    /// A task was created.
    TaskCreated(TaskPayload),
    /// Some task fields changed.
    TaskUpdated(TaskPayload),
    /// Only the status of a task changed.
    StatusChanged(TaskPayload),
    /// A task was deleted.
    TaskDeleted {
        /// The deleted task, when the backend included it.
        task_id: Option<TaskId>,
    },
    /// A comment was posted.
    CommentCreated(Comment),
    /// A comment was edited.
    CommentUpdated(Comment),
    /// A comment was removed.
    CommentDeleted {
        /// The removed comment.
        comment_id: CommentId,
    },
    /// A task was assigned to one recipient.
    Assignment(Notification),
    /// An action this client does not know about.
    Unrecognized {
        /// The `data.Id` of the frame, if any.
        entity_id: Option<i64>,
    },
}

impl LiveMessage {
    /// Short name of the message kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => "task_created",
            Self::TaskUpdated(_) => "task_updated",
            Self::StatusChanged(_) => "status_changed",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::CommentCreated(_) => "comment_created",
            Self::CommentUpdated(_) => "comment_updated",
            Self::CommentDeleted { .. } => "comment_deleted",
            Self::Assignment(_) => "assignment",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Identifier of the entity the message is about, when it names one.
    #[must_use]
    pub fn entity_id(&self) -> Option<i64> {
        match self {
            Self::TaskCreated(p) | Self::TaskUpdated(p) | Self::StatusChanged(p) => {
                p.id.map(TaskId::get)
            }
            Self::TaskDeleted { task_id } => task_id.map(TaskId::get),
            Self::CommentCreated(c) | Self::CommentUpdated(c) => Some(c.id.get()),
            Self::CommentDeleted { comment_id } => Some(comment_id.get()),
            Self::Assignment(n) => Some(n.task_id.get()),
            Self::Unrecognized { entity_id } => *entity_id,
        }
    }

    /// The id that goes into a broadcast's identity.
    ///
    /// Comment frames carry no `data.Id`, so their identity falls back to
    /// the arrival time and every edit of one comment is applied.
    fn identity_key(&self) -> Option<i64> {
        match self {
            Self::CommentCreated(_)
            | Self::CommentUpdated(_)
            | Self::CommentDeleted { .. } => None,
            other => other.entity_id(),
        }
    }
}

/// Best-effort identity of a message, used for duplicate suppression.
///
/// Two distinct events can share an identity (same action and entity, or
/// same task and assignment timestamp); there is no server sequence number
/// to do better.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageIdentity(String);

impl MessageIdentity {
    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed frame together with the action string it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// The raw `action`, or `None` for personal notifications.
    pub action: Option<String>,
    /// The typed message.
    pub message: LiveMessage,
}

impl Inbound {
    /// Parses a raw live-channel frame.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the frame is not a JSON object, the action
    /// is not a string, or a recognised action's payload is missing or
    /// malformed. Unknown actions are not an error.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let Value::Object(mut obj) = serde_json::from_str::<Value>(raw)? else {
            return Err(ParseError::NotAnObject);
        };

        match obj.remove("action") {
            Some(Value::String(action)) if !action.is_empty() => {
                let message = parse_broadcast(&action, obj)?;
                Ok(Self {
                    action: Some(action),
                    message,
                })
            }
            None | Some(Value::Null) | Some(Value::String(_)) => {
                let notification: Notification = serde_json::from_value(Value::Object(obj))?;
                Ok(Self {
                    action: None,
                    message: LiveMessage::Assignment(notification),
                })
            }
            Some(other) => Err(ParseError::InvalidAction(other.to_string())),
        }
    }

    /// Derives the identity of this message, using the wall clock as the
    /// fallback for broadcasts that name no entity.
    #[must_use]
    pub fn identity(&self) -> MessageIdentity {
        self.identity_at(chrono::Utc::now().timestamp_millis())
    }

    /// Derives the identity of this message with an explicit fallback
    /// timestamp (epoch milliseconds).
    #[must_use]
    pub fn identity_at(&self, now_ms: i64) -> MessageIdentity {
        if let LiveMessage::Assignment(n) = &self.message {
            return MessageIdentity(format!(
                "notification-{}-{}",
                n.task_id, n.assignment.assigned_at
            ));
        }
        let action = self
            .action
            .as_deref()
            .unwrap_or_else(|| self.message.kind());
        let entity = self.message.identity_key().unwrap_or(now_ms);
        MessageIdentity(format!("{action}-{entity}"))
    }
}

/// Maps a broadcast action onto its typed message.
fn parse_broadcast(action: &str, mut obj: Map<String, Value>) -> Result<LiveMessage, ParseError> {
    let message = match action {
        "todo_created" | "task_created" => {
            LiveMessage::TaskCreated(take_payload(action, &mut obj, "data")?)
        }
        "todo_updated" | "task_updated" => {
            LiveMessage::TaskUpdated(take_payload(action, &mut obj, "data")?)
        }
        "status_updated" | "status_changed" => {
            LiveMessage::StatusChanged(take_payload(action, &mut obj, "data")?)
        }
        "todo_deleted" | "task_deleted" => {
            let deleted: DeletedTask = take_payload(action, &mut obj, "data")?;
            LiveMessage::TaskDeleted {
                task_id: deleted.id,
            }
        }
        "create" | "comment_created" => {
            LiveMessage::CommentCreated(take_payload(action, &mut obj, "comment")?)
        }
        "update" | "comment_updated" => {
            LiveMessage::CommentUpdated(take_payload(action, &mut obj, "comment")?)
        }
        "delete" | "comment_deleted" => LiveMessage::CommentDeleted {
            comment_id: take_payload(action, &mut obj, "commentId")?,
        },
        _ => LiveMessage::Unrecognized {
            entity_id: obj
                .get("data")
                .and_then(|d| d.get("Id"))
                .and_then(Value::as_i64),
        },
    };
    Ok(message)
}

fn take_payload<T: DeserializeOwned>(
    action: &str,
    obj: &mut Map<String, Value>,
    field: &'static str,
) -> Result<T, ParseError> {
    match obj.remove(field) {
        None | Some(Value::Null) => Err(ParseError::MissingPayload {
            action: action.to_string(),
            field,
        }),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}
