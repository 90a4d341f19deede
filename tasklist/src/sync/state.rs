//! Local entity cache and the reconciler operations that mutate it.

use tasklist_proto::{
    Comment, CommentId, ListId, Notification, StatusId, Task, TaskId, TaskList, TaskPayload,
    UserId,
};

use super::merge;
use super::notify::NotificationQueue;

/// Whether an operation changed observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// Something visible changed.
    Applied,
    /// The operation was a no-op.
    Unchanged,
}

impl Outcome {
    /// Maps a "did it change" flag onto an outcome.
    pub const fn from_changed(changed: bool) -> Self {
        if changed { Self::Applied } else { Self::Unchanged }
    }

    /// Whether state changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Everything the client has cached for one session.
///
/// `tasks` is the collection for the selected list; `lists` may additionally
/// embed tasks (with their comments) from the initial list fetch.
#[derive(Debug, Clone)]
pub struct LocalState {
    user: UserId,
    lists: Vec<TaskList>,
    selected: Option<ListId>,
    tasks: Vec<Task>,
    notifications: NotificationQueue,
}

impl LocalState {
    /// Creates an empty cache for the session user `user`.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            lists: Vec::new(),
            selected: None,
            tasks: Vec::new(),
            notifications: NotificationQueue::new(),
        }
    }

    /// The session user notifications are filtered for.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// Cached lists, in server order.
    #[must_use]
    pub fn lists(&self) -> &[TaskList] {
        &self.lists
    }

    /// Looks up a cached list.
    #[must_use]
    pub fn list(&self, id: ListId) -> Option<&TaskList> {
        self.lists.iter().find(|l| l.id == id)
    }

    /// The currently selected list id.
    #[must_use]
    pub const fn selected_list(&self) -> Option<ListId> {
        self.selected
    }

    /// Tasks of the selected list, newest first.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Looks up a task of the selected list.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// The notification queue.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    fn is_selected(&self, list: Option<ListId>) -> bool {
        list.is_some() && list == self.selected
    }

    // ---- broadcasts -------------------------------------------------------

    /// Prepends a created task if it belongs to the selected list.
    pub fn task_created(&mut self, payload: &TaskPayload) -> Outcome {
        let Some(task) = merge::task_from_payload(payload) else {
            tracing::warn!("task_created payload has no task id, ignoring");
            return Outcome::Unchanged;
        };
        if !self.is_selected(payload.todo_list_id) {
            tracing::debug!(task_id = %task.id, "created task belongs to another list");
            return Outcome::Unchanged;
        }
        self.prepend(task);
        Outcome::Applied
    }

    /// Merges an update into a cached task of the selected list.
    pub fn task_updated(&mut self, payload: &TaskPayload) -> Outcome {
        self.merge_into_selected(payload, "task_updated", merge::merge_task)
    }

    /// Merges only the status of a cached task of the selected list.
    pub fn status_changed(&mut self, payload: &TaskPayload) -> Outcome {
        self.merge_into_selected(payload, "status_changed", merge::merge_status)
    }

    fn merge_into_selected(
        &mut self,
        payload: &TaskPayload,
        kind: &'static str,
        apply: fn(&mut Task, &TaskPayload) -> bool,
    ) -> Outcome {
        let Some(id) = payload.id else {
            tracing::warn!(kind, "payload has no task id, ignoring");
            return Outcome::Unchanged;
        };
        if !self.is_selected(payload.todo_list_id) {
            return Outcome::Unchanged;
        }
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => Outcome::from_changed(apply(task, payload)),
            None => {
                tracing::debug!(kind, task_id = %id, "task not cached, ignoring");
                Outcome::Unchanged
            }
        }
    }

    /// Removes a task everywhere it is cached, regardless of selection.
    pub fn task_deleted(&mut self, id: Option<TaskId>) -> Outcome {
        let Some(id) = id else {
            tracing::warn!("task_deleted payload has no task id, ignoring");
            return Outcome::Unchanged;
        };
        let mut removed = remove_task(&mut self.tasks, id);
        for list in &mut self.lists {
            removed |= remove_task(&mut list.tasks, id);
        }
        Outcome::from_changed(removed)
    }

    /// Appends a new comment to its owning task, wherever that task is cached.
    pub fn comment_created(&mut self, comment: Comment) -> Outcome {
        let comment = merge::normalize_comment(comment);
        self.with_owning_tasks(&comment, merge::insert_comment)
    }

    /// Replaces (or appends) a comment on its owning task.
    pub fn comment_updated(&mut self, comment: Comment) -> Outcome {
        let comment = merge::normalize_comment(comment);
        self.with_owning_tasks(&comment, merge::replace_comment)
    }

    fn with_owning_tasks(
        &mut self,
        comment: &Comment,
        apply: fn(&mut Vec<Comment>, &Comment) -> bool,
    ) -> Outcome {
        let owner = comment.task_id;
        let mut found = false;
        let mut changed = false;
        let embedded = self.lists.iter_mut().flat_map(|l| l.tasks.iter_mut());
        for task in self.tasks.iter_mut().chain(embedded) {
            if task.id == owner {
                found = true;
                changed |= apply(&mut task.comments, comment);
            }
        }
        if !found {
            tracing::debug!(
                task_id = %owner,
                comment_id = %comment.id,
                "comment for uncached task dropped"
            );
        }
        Outcome::from_changed(changed)
    }

    /// Removes a comment from every cached task.
    pub fn comment_deleted(&mut self, id: CommentId) -> Outcome {
        let mut removed = false;
        let embedded = self.lists.iter_mut().flat_map(|l| l.tasks.iter_mut());
        for task in self.tasks.iter_mut().chain(embedded) {
            let before = task.comments.len();
            task.comments.retain(|c| c.id != id);
            removed |= task.comments.len() != before;
        }
        Outcome::from_changed(removed)
    }

    /// Queues a personal notification addressed to the session user.
    pub fn notification(&mut self, notification: Notification) -> Outcome {
        let recipient = notification.recipient();
        if recipient != self.user {
            tracing::debug!(%recipient, "notification for another user ignored");
            return Outcome::Unchanged;
        }
        Outcome::from_changed(self.notifications.offer(notification))
    }

    /// Dismisses the notification for `task`.
    pub fn dismiss_notification(&mut self, task: TaskId) -> Outcome {
        Outcome::from_changed(self.notifications.dismiss(task))
    }

    /// Dismisses every visible notification, returning their task ids.
    pub fn dismiss_all_notifications(&mut self) -> Vec<TaskId> {
        self.notifications.dismiss_all()
    }

    // ---- local operations -------------------------------------------------

    /// Replaces the cached lists wholesale (initial load).
    ///
    /// Keeps the selection if the selected list still exists.
    pub fn replace_lists(&mut self, lists: Vec<TaskList>) -> Outcome {
        let lists: Vec<TaskList> = lists
            .into_iter()
            .map(|mut l| {
                l.dedup_assignments();
                l
            })
            .collect();
        if lists == self.lists {
            return Outcome::Unchanged;
        }
        self.lists = lists;
        if let Some(selected) = self.selected
            && self.list(selected).is_none()
        {
            self.selected = None;
            self.tasks.clear();
        }
        Outcome::Applied
    }

    /// Adds a list, or replaces the cached list with the same id.
    pub fn upsert_list(&mut self, mut list: TaskList) -> Outcome {
        list.dedup_assignments();
        match self.lists.iter_mut().find(|l| l.id == list.id) {
            Some(existing) if *existing == list => Outcome::Unchanged,
            Some(existing) => {
                *existing = list;
                Outcome::Applied
            }
            None => {
                self.lists.push(list);
                Outcome::Applied
            }
        }
    }

    /// Removes a list. Removing the selected list moves the selection to
    /// the first remaining list and clears the task collection.
    pub fn remove_list(&mut self, id: ListId) -> Outcome {
        let before = self.lists.len();
        self.lists.retain(|l| l.id != id);
        if self.lists.len() == before {
            return Outcome::Unchanged;
        }
        if self.selected == Some(id) {
            self.selected = self.lists.first().map(|l| l.id);
            self.tasks.clear();
        }
        Outcome::Applied
    }

    /// Selects a list and installs its freshly fetched tasks.
    ///
    /// Re-selecting the current list is a no-op.
    pub fn select_list(&mut self, id: ListId, tasks: Vec<Task>) -> Outcome {
        if self.selected == Some(id) {
            return Outcome::Unchanged;
        }
        self.selected = Some(id);
        self.tasks = tasks;
        Outcome::Applied
    }

    /// Replaces the task collection of the selected list (manual reload).
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) -> Outcome {
        if self.tasks == tasks {
            return Outcome::Unchanged;
        }
        self.tasks = tasks;
        Outcome::Applied
    }

    /// Prepends a task created locally, replacing any entry with its id.
    pub fn add_task(&mut self, task: Task) -> Outcome {
        if self.selected != Some(task.list_id) {
            return Outcome::Unchanged;
        }
        self.prepend(task);
        Outcome::Applied
    }

    /// Mirrors a local status edit into every cached copy of the task.
    pub fn set_status(&mut self, id: TaskId, status: StatusId, name: &str) -> Outcome {
        let mut changed = false;
        let embedded = self.lists.iter_mut().flat_map(|l| l.tasks.iter_mut());
        for task in self.tasks.iter_mut().chain(embedded) {
            if task.id == id && (task.status_id != status || task.status_name != name) {
                task.status_id = status;
                task.status_name = name.to_string();
                changed = true;
            }
        }
        Outcome::from_changed(changed)
    }

    fn prepend(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.insert(0, task);
    }
}

fn remove_task(tasks: &mut Vec<Task>, id: TaskId) -> bool {
    let before = tasks.len();
    tasks.retain(|t| t.id != id);
    tasks.len() != before
}
