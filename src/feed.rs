//! Change feed: task mutations broadcast in-process, filtered per viewer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::routes::tasks::model::TaskResponse;

/// A committed mutation, as published by the task handlers.
#[derive(Debug, Clone)]
pub enum TaskChange {
    Inserted(TaskResponse),
    Updated {
        task: TaskResponse,
        previous_assignee: Option<Uuid>,
    },
    Deleted(TaskResponse),
}

/// What a single subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Insert { task: TaskResponse },
    Update { task: TaskResponse },
    Delete { id: Uuid },
    /// The subscriber missed events and must refetch its snapshot.
    Resync,
}

impl FeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Resync => "resync",
        }
    }
}

impl TaskChange {
    /// Maps the change onto the event `viewer` should see, if any. An update
    /// that moves a task into or out of the viewer's scope is reported as an
    /// insert or a delete.
    pub fn for_viewer(&self, viewer: Uuid) -> Option<FeedEvent> {
        match self {
            Self::Inserted(task) => task
                .is_visible_to(viewer)
                .then(|| FeedEvent::Insert { task: task.clone() }),
            Self::Deleted(task) => task
                .is_visible_to(viewer)
                .then_some(FeedEvent::Delete { id: task.id }),
            Self::Updated {
                task,
                previous_assignee,
            } => {
                let was = task.created_by == viewer || *previous_assignee == Some(viewer);
                let now = task.is_visible_to(viewer);
                match (was, now) {
                    (true, true) => Some(FeedEvent::Update { task: task.clone() }),
                    (false, true) => Some(FeedEvent::Insert { task: task.clone() }),
                    (true, false) => Some(FeedEvent::Delete { id: task.id }),
                    (false, false) => None,
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<TaskChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, change: TaskChange) {
        // An error only means nobody is listening.
        let receivers = self.sender.send(change).unwrap_or(0);
        tracing::debug!(receivers, "task change published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskChange> {
        self.sender.subscribe()
    }
}
