//! Entity shapes returned by the task-list backend.
//!
//! The REST API speaks camelCase while live-channel payloads speak
//! PascalCase, so every field that can arrive through both carries a serde
//! alias for the other casing. Identifiers are always server-issued.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Media-type prefix used when the backend hands out bare base64 avatars.
const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a server-issued identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`TaskList`].
    ListId
);
id_type!(
    /// Identifier of a [`Task`].
    TaskId
);
id_type!(
    /// Identifier of a [`Comment`].
    CommentId
);
id_type!(
    /// Identifier of a user account.
    UserId
);
id_type!(
    /// Identifier of a task status (e.g. "Pending", "Done").
    StatusId
);

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A user's membership on a whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAssignment {
    #[serde(rename = "userId", alias = "UserId")]
    pub user_id: UserId,
    #[serde(rename = "canEdit", alias = "CanEdit", default)]
    pub can_edit: bool,
    #[serde(rename = "assignedAt", alias = "AssignedAt", default)]
    pub assigned_at: String,
}

/// A user's assignment on a single task, with display data denormalised in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    #[serde(rename = "userId", alias = "UserId")]
    pub user_id: UserId,
    #[serde(
        rename = "userName",
        alias = "UserName",
        default,
        deserialize_with = "null_as_default"
    )]
    pub display_name: String,
    #[serde(
        rename = "avatarUrl",
        alias = "AvatarUrl",
        default,
        deserialize_with = "null_as_default"
    )]
    pub avatar: String,
    #[serde(rename = "canEdit", alias = "CanEdit", default)]
    pub can_edit: bool,
    #[serde(
        rename = "assignedAt",
        alias = "AssignedAt",
        default,
        deserialize_with = "null_as_default"
    )]
    pub assigned_at: String,
}

/// A comment attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(alias = "Id")]
    pub id: CommentId,
    #[serde(alias = "Text", default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(rename = "todoId", alias = "TodoId")]
    pub task_id: TaskId,
    #[serde(rename = "userId", alias = "UserId", default)]
    pub author_id: UserId,
    #[serde(
        rename = "userName",
        alias = "UserName",
        default,
        deserialize_with = "null_as_default"
    )]
    pub author_name: String,
    #[serde(
        rename = "avatarUrl",
        alias = "AvatarUrl",
        default,
        deserialize_with = "null_as_default"
    )]
    pub avatar: String,
    #[serde(
        rename = "createdAt",
        alias = "CreatedAt",
        default,
        deserialize_with = "null_as_default"
    )]
    pub created_at: String,
}

/// A task as cached by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "taskName", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(
        rename = "taskDescription",
        default,
        deserialize_with = "null_as_default"
    )]
    pub description: String,
    #[serde(rename = "statusId", default)]
    pub status_id: StatusId,
    #[serde(rename = "statusName", default, deserialize_with = "null_as_default")]
    pub status_name: String,
    #[serde(rename = "todoListId", default)]
    pub list_id: ListId,
    #[serde(rename = "userId", default)]
    pub creator_id: UserId,
    #[serde(rename = "createdAt", default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(
        rename = "todoAssignments",
        alias = "assignments",
        default,
        deserialize_with = "null_as_default"
    )]
    pub assignments: Vec<TaskAssignment>,
    #[serde(
        rename = "todoListAssignments",
        default,
        deserialize_with = "null_as_default"
    )]
    pub list_assignments: Vec<ListAssignment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<Comment>,
}

impl Task {
    /// Returns `true` if `user` owns the task or holds an editable assignment on it.
    #[must_use]
    pub fn can_edit(&self, user: UserId) -> bool {
        self.creator_id == user
            || self
                .assignments
                .iter()
                .any(|a| a.user_id == user && a.can_edit)
    }
}

/// A named list of tasks with its own sharing permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: ListId,
    #[serde(rename = "listName", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "userId", default)]
    pub owner_id: UserId,
    #[serde(rename = "createdAt", default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(rename = "todos", default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assignments: Vec<ListAssignment>,
}

impl TaskList {
    /// Adds or replaces the assignment for `assignment.user_id`.
    ///
    /// A list holds at most one assignment per user.
    pub fn assign(&mut self, assignment: ListAssignment) {
        if let Some(existing) = self
            .assignments
            .iter_mut()
            .find(|a| a.user_id == assignment.user_id)
        {
            *existing = assignment;
        } else {
            self.assignments.push(assignment);
        }
    }

    /// Drops any assignment sharing a user with an earlier one.
    ///
    /// Server payloads are trusted for everything else, but the one-per-user
    /// rule is restored here so lookups by user stay unambiguous.
    pub fn dedup_assignments(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.assignments.retain(|a| seen.insert(a.user_id));
    }
}

/// A status a task can be moved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(alias = "Id")]
    pub id: StatusId,
    #[serde(
        rename = "statusName",
        alias = "StatusName",
        default,
        deserialize_with = "null_as_default"
    )]
    pub name: String,
}

/// Normalises an avatar reference into something an image element can load.
///
/// `data:` URLs pass through, bare base64 (JPEG payloads start with `/9j/`)
/// gets a JPEG data-URL prefix, anything else (a plain URL) is kept as is.
#[must_use]
pub fn normalize_avatar(raw: &str) -> String {
    if raw.is_empty() || raw.starts_with("data:image") {
        return raw.to_string();
    }
    let looks_base64 = raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='));
    if raw.starts_with("/9j/") || looks_base64 {
        format!("{JPEG_DATA_URL_PREFIX}{raw}")
    } else {
        raw.to_string()
    }
}
