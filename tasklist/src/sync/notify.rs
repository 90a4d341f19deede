//! Queue of unread assignment notifications.

use std::collections::{HashSet, VecDeque};

use tasklist_proto::{Notification, TaskId};

/// Visible notifications, newest first, plus the tasks dismissed this session.
///
/// A dismissed task never re-enters the queue, even if the backend redelivers
/// the assignment under an identity the dispatcher has not seen.
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    visible: VecDeque<Notification>,
    dismissed: HashSet<TaskId>,
}

impl NotificationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `notification` unless its task was dismissed.
    ///
    /// A task is queued at most once: a newer assignment for a queued task
    /// replaces the old entry and moves to the front. Returns `true` if the
    /// queue changed.
    pub fn offer(&mut self, notification: Notification) -> bool {
        let task = notification.task_id;
        if self.dismissed.contains(&task) {
            tracing::debug!(task_id = %task, "notification for dismissed task ignored");
            return false;
        }
        if let Some(pos) = self.visible.iter().position(|n| n.task_id == task) {
            if self.visible[pos] == notification {
                return false;
            }
            self.visible.remove(pos);
            tracing::debug!(task_id = %task, "queued notification superseded");
        }
        self.visible.push_front(notification);
        true
    }

    /// Removes the notification for `task` and remembers the dismissal.
    ///
    /// Returns `true` if a visible notification was removed.
    pub fn dismiss(&mut self, task: TaskId) -> bool {
        self.dismissed.insert(task);
        let before = self.visible.len();
        self.visible.retain(|n| n.task_id != task);
        before != self.visible.len()
    }

    /// Dismisses every visible notification, returning their task ids.
    pub fn dismiss_all(&mut self) -> Vec<TaskId> {
        let tasks: Vec<TaskId> = self.visible.drain(..).map(|n| n.task_id).collect();
        self.dismissed.extend(tasks.iter().copied());
        tasks
    }

    /// Whether `task` was dismissed during this session.
    #[must_use]
    pub fn is_dismissed(&self, task: TaskId) -> bool {
        self.dismissed.contains(&task)
    }

    /// Visible notifications, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.visible.iter()
    }

    /// The visible notification for `task`, if any.
    #[must_use]
    pub fn get(&self, task: TaskId) -> Option<&Notification> {
        self.visible.iter().find(|n| n.task_id == task)
    }

    /// Number of visible notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether nothing is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}
