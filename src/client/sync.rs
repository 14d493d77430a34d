use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::feed::FeedEvent;
use crate::routes::tasks::dto::{CreateTask, UpdateTask};
use crate::routes::tasks::model::{TaskFilter, TaskResponse, TaskStatus};
use super::api::ApiClient;
use super::cache::TaskCache;
use super::{ClientError, ClientResult};

/// Keeps a [`TaskCache`] reconciled with the server.
///
/// Mutations are applied to the cache before the request is sent and
/// rolled back if it fails; the failure text is kept in
/// [`TaskSync::last_error`]. Feed events are applied as they arrive.
/// Dropping the value ends the feed subscription.
pub struct TaskSync {
    api: ApiClient,
    token: String,
    cache: Arc<Mutex<TaskCache>>,
    last_error: Arc<Mutex<Option<String>>>,
    feed_task: Option<JoinHandle<()>>,
}

impl TaskSync {
    /// A synchronizer with an empty cache and no feed attached.
    pub fn new(api: ApiClient, token: impl Into<String>) -> Self {
        Self {
            api,
            token: token.into(),
            cache: Arc::new(Mutex::new(TaskCache::new())),
            last_error: Arc::new(Mutex::new(None)),
            feed_task: None,
        }
    }

    /// Subscribes to the feed, loads the snapshot, then follows the feed.
    /// Subscribing first means nothing between the two is lost; anything
    /// seen twice is absorbed by the cache.
    pub async fn connect(api: ApiClient, token: impl Into<String>) -> ClientResult<Self> {
        let mut sync = Self::new(api, token);
        let events = sync.api.subscribe(&sync.token).await?;
        sync.refresh().await?;
        sync.follow(events);
        Ok(sync)
    }

    /// Spawns the task applying `events`, replacing any previous one.
    pub fn follow<S>(&mut self, events: S)
    where
        S: Stream<Item = ClientResult<FeedEvent>> + Send + 'static,
    {
        self.unsubscribe();

        let api = self.api.clone();
        let token = self.token.clone();
        let cache = Arc::clone(&self.cache);
        let last_error = Arc::clone(&self.last_error);

        self.feed_task = Some(tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(item) = events.next().await {
                match item {
                    Ok(FeedEvent::Resync) => match api.list_tasks(&token).await {
                        Ok(snapshot) => cache.lock().await.replace_all(snapshot),
                        Err(e) => {
                            tracing::warn!(error = %e, "resync failed");
                            *last_error.lock().await = Some(e.to_string());
                        }
                    },
                    Ok(event) => {
                        let name = event.name();
                        let changed = cache.lock().await.apply(event);
                        tracing::debug!(event = name, changed, "feed event applied");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "feed error");
                        *last_error.lock().await = Some(e.to_string());
                    }
                }
            }
            tracing::info!("change feed ended");
            *last_error.lock().await = Some(ClientError::FeedClosed.to_string());
        }));
    }

    /// Stops applying feed events. Also happens on drop.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.feed_task.take() {
            handle.abort();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.feed_task.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Replaces the cache with a fresh snapshot from the server.
    pub async fn refresh(&self) -> ClientResult<()> {
        match self.api.list_tasks(&self.token).await {
            Ok(snapshot) => {
                self.cache.lock().await.replace_all(snapshot);
                Ok(())
            }
            Err(e) => self.fail(e).await,
        }
    }

    pub async fn tasks(&self) -> Vec<TaskResponse> {
        self.cache.lock().await.tasks().to_vec()
    }

    /// The cached tasks passing `filter`, newest first.
    pub async fn tasks_matching(&self, filter: &TaskFilter) -> Vec<TaskResponse> {
        self.cache.lock().await.matching(filter)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    async fn fail<T>(&self, error: ClientError) -> ClientResult<T> {
        *self.last_error.lock().await = Some(error.to_string());
        Err(error)
    }

    async fn clear_error(&self) {
        *self.last_error.lock().await = None;
    }

    pub async fn create(&self, task: CreateTask) -> ClientResult<TaskResponse> {
        match self.api.create_task(&self.token, &task).await {
            Ok(created) => {
                self.cache.lock().await.upsert(created.task.clone());
                self.clear_error().await;
                Ok(created.task)
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Both the server's answer and the rollback lose to a newer version
    /// that reached the cache through the feed while the request was out.
    pub async fn update(&self, id: Uuid, changes: UpdateTask) -> ClientResult<TaskResponse> {
        let previous = self.cache.lock().await.patch(id, &changes);

        match self.api.update_task(&self.token, id, &changes).await {
            Ok(task) => {
                self.cache.lock().await.replace(task.clone());
                self.clear_error().await;
                Ok(task)
            }
            Err(e) => {
                if let Some(previous) = previous {
                    self.cache.lock().await.replace(previous);
                }
                self.fail(e).await
            }
        }
    }

    pub async fn complete(&self, id: Uuid) -> ClientResult<TaskResponse> {
        self.update(id, UpdateTask::status(TaskStatus::Completed)).await
    }

    pub async fn delete(&self, id: Uuid) -> ClientResult<()> {
        let removed = self.cache.lock().await.remove(id);

        match self.api.delete_task(&self.token, id).await {
            Ok(()) => {
                self.clear_error().await;
                Ok(())
            }
            Err(e) => {
                if let Some((index, task)) = removed {
                    self.cache.lock().await.restore(index, task);
                }
                self.fail(e).await
            }
        }
    }
}

impl Drop for TaskSync {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
