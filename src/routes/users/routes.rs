use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::routes::middleware_auth::AuthUser;
use crate::state::AppState;
use super::{queries, UserSummary};

/// List every user, for assignment pickers.
pub async fn list(
    State(state): State<AppState>,
    _user: AuthUser,
) -> AppResult<Json<Vec<UserSummary>>> {
    let users = queries::list_users(&state.db).await?;
    Ok(Json(users))
}
