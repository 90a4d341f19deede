//! Personal assignment notifications.
//!
//! A notification is pushed to exactly one recipient when a task is
//! assigned to them. It carries a snapshot of the task rather than a
//! reference, because the recipient may not have the owning list loaded.

use serde::{Deserialize, Serialize};

use crate::entity::{ListId, StatusId, TaskAssignment, TaskId, UserId};

/// The user who created the assigned task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Creator {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// "Task X was assigned to you", as delivered on the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "TodoId")]
    pub task_id: TaskId,
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub status_id: StatusId,
    #[serde(default)]
    pub status_name: String,
    #[serde(rename = "TodoListId", default)]
    pub list_id: ListId,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub creator: Creator,
    pub assignment: TaskAssignment,
}

impl Notification {
    /// The user this notification is addressed to.
    #[must_use]
    pub const fn recipient(&self) -> UserId {
        self.assignment.user_id
    }
}
