use uuid::Uuid;

use crate::feed::FeedEvent;
use crate::routes::tasks::dto::UpdateTask;
use crate::routes::tasks::model::{TaskFilter, TaskResponse};

/// Local, newest-first copy of the tasks a user can see.
///
/// Feed delivery may duplicate, reorder or race with the response of the
/// request that caused it, so every mutation here is idempotent: inserting
/// a known id replaces the entry, updating or deleting an unknown id does
/// nothing, and a version with an older `updated_at` than the cached one
/// is dropped.
#[derive(Debug, Default, Clone)]
pub struct TaskCache {
    tasks: Vec<TaskResponse>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[TaskResponse] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&TaskResponse> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn matching(&self, filter: &TaskFilter) -> Vec<TaskResponse> {
        self.tasks
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn replace_all(&mut self, snapshot: Vec<TaskResponse>) {
        self.tasks = snapshot;
    }

    /// Inserts or replaces `task`. Returns false when the cached entry is
    /// newer.
    pub fn upsert(&mut self, task: TaskResponse) -> bool {
        match self.position(task.id) {
            Some(i) => self.replace_at(i, task),
            None => {
                self.tasks.insert(0, task);
                true
            }
        }
    }

    /// Replaces a known task unless the cached entry is newer; unknown ids
    /// are ignored.
    pub fn replace(&mut self, task: TaskResponse) -> bool {
        match self.position(task.id) {
            Some(i) => self.replace_at(i, task),
            None => false,
        }
    }

    fn replace_at(&mut self, i: usize, task: TaskResponse) -> bool {
        if task.updated_at < self.tasks[i].updated_at {
            return false;
        }
        self.tasks[i] = task;
        true
    }

    pub fn remove(&mut self, id: Uuid) -> Option<(usize, TaskResponse)> {
        self.position(id).map(|i| (i, self.tasks.remove(i)))
    }

    /// Puts a previously removed task back where it was.
    pub fn restore(&mut self, index: usize, task: TaskResponse) {
        if self.position(task.id).is_some() {
            return;
        }
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, task);
    }

    /// Applies a partial edit locally and returns the prior version for
    /// rollback. `completed` follows `status`. `updated_at` is left alone,
    /// so the server's answer and any feed event for it still win.
    pub fn patch(&mut self, id: Uuid, changes: &UpdateTask) -> Option<TaskResponse> {
        let i = self.position(id)?;
        let previous = self.tasks[i].clone();
        let task = &mut self.tasks[i];

        if let Some(title) = &changes.title {
            task.title = title.clone();
        }
        if let Some(description) = &changes.description {
            task.description = Some(description.clone());
        }
        if let Some(assignee) = changes.assigned_to {
            if task.assigned_to != Some(assignee) {
                task.assigned_to = Some(assignee);
                task.assigned_to_name = None;
            }
        }
        if let Some(status) = changes.status {
            task.status = status;
            task.completed = status.is_completed();
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(category) = &changes.category {
            task.category = Some(category.clone());
        }
        Some(previous)
    }

    /// Returns true when the cache changed.
    pub fn apply(&mut self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Insert { task } => self.upsert(task),
            FeedEvent::Update { task } => self.replace(task),
            FeedEvent::Delete { id } => self.remove(id).is_some(),
            FeedEvent::Resync => false,
        }
    }
}
