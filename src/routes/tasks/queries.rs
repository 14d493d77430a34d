use chrono::Utc;
use sqlx::{Result, SqliteExecutor};
use uuid::Uuid;

use super::dto::{CreateTask, UpdateTask};
use super::model::{Task, TaskFilter, TaskStatus};

const SELECT_TASK: &str = r#"
    SELECT t.id, t.title, t.description, t.assigned_to, t.created_by, t.status,
           t.priority, t.due_date, t.category, t.created_at, t.updated_at,
           u.username AS created_by_name, a.username AS assigned_to_name
    FROM tasks t
    LEFT JOIN users u ON t.created_by = u.id
    LEFT JOIN users a ON t.assigned_to = a.id
"#;

/// Inserts a pending task. `task` is stored as given; the handler trims it.
pub async fn create_task(
    db: impl SqliteExecutor<'_>,
    created_by: Uuid,
    task: &CreateTask,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO tasks (id, title, description, assigned_to, created_by, status,
                           priority, due_date, category, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
        "#,
    )
    .bind(id)
    .bind(&task.title)
    .bind(task.description.as_deref())
    .bind(task.assigned_to)
    .bind(created_by)
    .bind(TaskStatus::Pending)
    .bind(task.priority.unwrap_or_default())
    .bind(task.due_date)
    .bind(task.category.as_deref())
    .bind(now)
    .execute(db)
    .await?;

    Ok(id)
}

/// Tasks the user created or is assigned to, newest first.
pub async fn list_visible(
    db: impl SqliteExecutor<'_>,
    user_id: Uuid,
    filter: &TaskFilter,
) -> Result<Vec<Task>> {
    let query = format!(
        r#"{SELECT_TASK}
        WHERE (t.created_by = ?1 OR t.assigned_to = ?1)
          AND (?2 IS NULL OR t.status = ?2)
          AND (?3 IS NULL OR t.priority = ?3)
        ORDER BY t.created_at DESC"#
    );

    sqlx::query_as::<_, Task>(&query)
        .bind(user_id)
        .bind(filter.status)
        .bind(filter.priority)
        .fetch_all(db)
        .await
}

pub async fn get_visible(
    db: impl SqliteExecutor<'_>,
    user_id: Uuid,
    id: Uuid,
) -> Result<Option<Task>> {
    let query = format!("{SELECT_TASK} WHERE t.id = ?1 AND (t.created_by = ?2 OR t.assigned_to = ?2)");

    sqlx::query_as::<_, Task>(&query)
        .bind(id)
        .bind(user_id)
        .fetch_optional(db)
        .await
}

/// Coalescing update: `None` fields keep their stored value. Always bumps
/// `updated_at`. Returns false when no visible row matched.
pub async fn update_task(
    db: impl SqliteExecutor<'_>,
    user_id: Uuid,
    id: Uuid,
    changes: &UpdateTask,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET
            title = COALESCE(?1, title),
            description = COALESCE(?2, description),
            assigned_to = COALESCE(?3, assigned_to),
            status = COALESCE(?4, status),
            priority = COALESCE(?5, priority),
            due_date = COALESCE(?6, due_date),
            category = COALESCE(?7, category),
            updated_at = ?8
        WHERE id = ?9 AND (created_by = ?10 OR assigned_to = ?10)
        "#,
    )
    .bind(changes.title.as_deref())
    .bind(changes.description.as_deref())
    .bind(changes.assigned_to)
    .bind(changes.status)
    .bind(changes.priority)
    .bind(changes.due_date)
    .bind(changes.category.as_deref())
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_task(db: impl SqliteExecutor<'_>, user_id: Uuid, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM tasks
        WHERE id = ?1 AND (created_by = ?2 OR assigned_to = ?2)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}
