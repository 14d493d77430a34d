use chrono::Utc;
use sqlx::{Result, SqliteExecutor};
use uuid::Uuid;

use super::{User, UserProfile, UserSummary};

pub async fn insert_user(
    db: impl SqliteExecutor<'_>,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(id)
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(Utc::now())
    .execute(db)
    .await?;

    Ok(id)
}

pub async fn find_by_email(db: impl SqliteExecutor<'_>, email: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE email = ?1
        "#,
    )
    .bind(email)
    .fetch_optional(db)
    .await
}

pub async fn find_profile(db: impl SqliteExecutor<'_>, id: Uuid) -> Result<Option<UserProfile>> {
    sqlx::query_as::<_, UserProfile>(
        r#"
        SELECT id, username, email, created_at
        FROM users
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn exists(db: impl SqliteExecutor<'_>, id: Uuid) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?1")
        .bind(id)
        .fetch_one(db)
        .await?;

    Ok(found > 0)
}

pub async fn list_users(db: impl SqliteExecutor<'_>) -> Result<Vec<UserSummary>> {
    sqlx::query_as::<_, UserSummary>(
        r#"
        SELECT id, username, email
        FROM users
        ORDER BY username
        "#,
    )
    .fetch_all(db)
    .await
}
