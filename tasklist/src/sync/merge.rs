//! Field-level merge rules for live payloads.
//!
//! A broadcast only carries the fields the server chose to send. Present
//! fields overwrite the cached value, absent ones leave it alone.

use tasklist_proto::{
    Comment, ListId, StatusId, Task, TaskAssignment, TaskPayload, UserId, normalize_avatar,
};

/// Status assumed for a created task whose payload names none.
pub const DEFAULT_STATUS_ID: StatusId = StatusId::new(1);

/// Status label paired with [`DEFAULT_STATUS_ID`].
pub const DEFAULT_STATUS_NAME: &str = "Pending";

/// Author label for comments whose author name was not sent.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Builds a full task from a creation payload.
///
/// Returns `None` when the payload carries no task id.
#[must_use]
pub fn task_from_payload(payload: &TaskPayload) -> Option<Task> {
    let id = payload.id?;
    Some(Task {
        id,
        name: payload.task_name.clone().unwrap_or_default(),
        description: payload.task_description.clone().unwrap_or_default(),
        status_id: payload.status_id.unwrap_or(DEFAULT_STATUS_ID),
        status_name: payload
            .status_name
            .clone()
            .unwrap_or_else(|| DEFAULT_STATUS_NAME.to_string()),
        list_id: payload.todo_list_id.unwrap_or(ListId::new(0)),
        creator_id: payload.user_id.unwrap_or(UserId::new(0)),
        created_at: payload
            .created_at
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        assignments: payload
            .todo_assignments
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(normalize_assignment)
            .collect(),
        list_assignments: payload.todo_list_assignments.clone().unwrap_or_default(),
        comments: payload
            .comments
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(normalize_comment)
            .collect(),
    })
}

/// Overwrites the fields of `task` that `payload` carries.
///
/// Returns `true` if anything changed.
pub fn merge_task(task: &mut Task, payload: &TaskPayload) -> bool {
    let before = task.clone();
    if let Some(name) = &payload.task_name {
        task.name.clone_from(name);
    }
    if let Some(description) = &payload.task_description {
        task.description.clone_from(description);
    }
    merge_status(task, payload);
    if let Some(list) = payload.todo_list_id {
        task.list_id = list;
    }
    if let Some(creator) = payload.user_id {
        task.creator_id = creator;
    }
    if let Some(created_at) = &payload.created_at {
        task.created_at.clone_from(created_at);
    }
    if let Some(assignments) = &payload.todo_assignments {
        task.assignments = assignments.iter().cloned().map(normalize_assignment).collect();
    }
    if let Some(list_assignments) = &payload.todo_list_assignments {
        task.list_assignments.clone_from(list_assignments);
    }
    if let Some(comments) = &payload.comments {
        task.comments = comments.iter().cloned().map(normalize_comment).collect();
    }
    *task != before
}

/// Overwrites only the status fields of `task`.
///
/// Returns `true` if anything changed.
pub fn merge_status(task: &mut Task, payload: &TaskPayload) -> bool {
    let mut changed = false;
    if let Some(status) = payload.status_id
        && task.status_id != status
    {
        task.status_id = status;
        changed = true;
    }
    if let Some(name) = &payload.status_name
        && task.status_name != *name
    {
        task.status_name.clone_from(name);
        changed = true;
    }
    changed
}

/// Fills in display defaults on a comment received from the server.
#[must_use]
pub fn normalize_comment(mut comment: Comment) -> Comment {
    if comment.author_name.is_empty() {
        comment.author_name = UNKNOWN_AUTHOR.to_string();
    }
    comment.avatar = normalize_avatar(&comment.avatar);
    comment
}

fn normalize_assignment(mut assignment: TaskAssignment) -> TaskAssignment {
    assignment.avatar = normalize_avatar(&assignment.avatar);
    assignment
}

/// Appends `comment` unless a comment with its id is already present.
pub fn insert_comment(comments: &mut Vec<Comment>, comment: &Comment) -> bool {
    if comments.iter().any(|c| c.id == comment.id) {
        return false;
    }
    comments.push(comment.clone());
    true
}

/// Replaces the comment with the same id, appending it if absent.
pub fn replace_comment(comments: &mut Vec<Comment>, comment: &Comment) -> bool {
    match comments.iter_mut().find(|c| c.id == comment.id) {
        Some(existing) if existing == comment => false,
        Some(existing) => {
            existing.clone_from(comment);
            true
        }
        None => {
            comments.push(comment.clone());
            true
        }
    }
}
