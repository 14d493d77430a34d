use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// A task row joined with the usernames of its creator and assignee.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub created_by: Uuid,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_name: Option<String>,
    pub assigned_to_name: Option<String>,
}

/// Wire view of a task. `completed` is derived from `status` and is never
/// stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub assigned_to_name: Option<String>,
    pub created_by: Uuid,
    pub created_by_name: Option<String>,
    pub status: TaskStatus,
    pub completed: bool,
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskResponse {
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.created_by == user_id || self.assigned_to == Some(user_id)
    }
}

/// Narrows a task list. Absent fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskResponse) -> bool {
        self.status.map_or(true, |s| s == task.status)
            && self.priority.map_or(true, |p| p == task.priority)
    }
}

impl From<Task> for TaskResponse {
    fn from(t: Task) -> Self {
        Self {
            id: t.id,
            title: t.title,
            description: t.description,
            assigned_to: t.assigned_to,
            assigned_to_name: t.assigned_to_name,
            created_by: t.created_by,
            created_by_name: t.created_by_name,
            completed: t.status.is_completed(),
            status: t.status,
            priority: t.priority,
            due_date: t.due_date,
            category: t.category,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}
