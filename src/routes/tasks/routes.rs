use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use sqlx::SqliteConnection;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::feed::{FeedEvent, TaskChange};
use crate::routes::extract::{JsonBody, PathParam, QueryParams};
use crate::routes::middleware_auth::AuthUser;
use crate::routes::users::queries as users;
use crate::state::AppState;
use super::dto::{CreateTask, CreatedTask, UpdateTask};
use super::model::{TaskFilter, TaskResponse, TaskStatus};
use super::queries;

fn task_not_found() -> AppError {
    AppError::not_found("task not found")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn ensure_assignee_exists(conn: &mut SqliteConnection, assignee: Option<Uuid>) -> AppResult<()> {
    if let Some(id) = assignee {
        if !users::exists(&mut *conn, id).await? {
            return Err(AppError::validation("assigned user does not exist"));
        }
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(body): JsonBody<CreateTask>,
) -> AppResult<(StatusCode, Json<CreatedTask>)> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("task title is required"));
    }
    let body = CreateTask {
        title: title.to_string(),
        category: non_blank(body.category),
        ..body
    };

    let mut tx = db::begin_write(&state.db).await?;
    ensure_assignee_exists(&mut tx, body.assigned_to).await?;
    let id = queries::create_task(&mut *tx, user.id(), &body).await?;
    let task: TaskResponse = queries::get_visible(&mut *tx, user.id(), id)
        .await?
        .ok_or_else(task_not_found)?
        .into();
    tx.commit().await?;

    tracing::info!(task_id = %id, created_by = %user.id(), "task created");
    state.feed.publish(TaskChange::Inserted(task.clone()));

    Ok((StatusCode::CREATED, Json(CreatedTask { task_id: id, task })))
}

/// `?status=` and `?priority=` narrow the list.
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(filter): QueryParams<TaskFilter>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let tasks = queries::list_visible(&state.db, user.id(), &filter).await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    queries::get_visible(&state.db, user.id(), id)
        .await?
        .map(|t| Json(t.into()))
        .ok_or_else(task_not_found)
}

/// Applies `changes` in one transaction and publishes the result.
async fn apply_update(state: &AppState, user_id: Uuid, id: Uuid, changes: UpdateTask) -> AppResult<TaskResponse> {
    if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::validation("task title cannot be empty"));
    }
    let changes = UpdateTask {
        title: changes.title.map(|t| t.trim().to_string()),
        category: non_blank(changes.category),
        ..changes
    };

    let mut tx = db::begin_write(&state.db).await?;
    let previous = queries::get_visible(&mut *tx, user_id, id)
        .await?
        .ok_or_else(task_not_found)?;
    ensure_assignee_exists(&mut tx, changes.assigned_to).await?;

    if !queries::update_task(&mut *tx, user_id, id, &changes).await? {
        return Err(task_not_found());
    }
    // Re-read through the creator, since the caller may have just
    // reassigned the task away from themselves.
    let task: TaskResponse = queries::get_visible(&mut *tx, previous.created_by, id)
        .await?
        .ok_or_else(task_not_found)?
        .into();
    tx.commit().await?;

    tracing::info!(task_id = %id, status = ?task.status, "task updated");
    state.feed.publish(TaskChange::Updated {
        task: task.clone(),
        previous_assignee: previous.assigned_to,
    });
    Ok(task)
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<Uuid>,
    JsonBody(body): JsonBody<UpdateTask>,
) -> AppResult<Json<TaskResponse>> {
    apply_update(&state, user.id(), id, body).await.map(Json)
}

pub async fn complete(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<TaskResponse>> {
    apply_update(&state, user.id(), id, UpdateTask::status(TaskStatus::Completed))
        .await
        .map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let mut tx = db::begin_write(&state.db).await?;
    let existing: TaskResponse = queries::get_visible(&mut *tx, user.id(), id)
        .await?
        .ok_or_else(task_not_found)?
        .into();
    if !queries::delete_task(&mut *tx, user.id(), id).await? {
        return Err(task_not_found());
    }
    tx.commit().await?;

    tracing::info!(task_id = %id, "task deleted");
    state.feed.publish(TaskChange::Deleted(existing));

    Ok(Json(serde_json::json!({"deleted": true})))
}

/// Server-sent events for every change the caller is allowed to see.
pub async fn events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let viewer = user.id();
    let rx = state.feed.subscribe();
    tracing::debug!(user_id = %viewer, "feed subscriber attached");

    let stream = futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            let event = match rx.recv().await {
                Ok(change) => match change.for_viewer(viewer) {
                    Some(event) => event,
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %viewer, skipped, "feed subscriber lagged");
                    FeedEvent::Resync
                }
                Err(RecvError::Closed) => return None,
            };
            let sse = Event::default().event(event.name()).json_data(&event);
            return Some((sse, rx));
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
