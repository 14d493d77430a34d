use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::routes::extract::JsonBody;
use crate::routes::middleware_auth::AuthUser;
use crate::routes::users::{queries, UserProfile, UserSummary};
use crate::session::{check_credentials, hash_password, INVALID_CREDENTIALS};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserSummary,
}

impl RegistrationRequest {
    fn validate(&self) -> AppResult<()> {
        let fields = [&self.username, &self.email, &self.password, &self.confirm_password];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(AppError::validation("all fields are required"));
        }
        if self.password != self.confirm_password {
            return Err(AppError::validation("passwords do not match"));
        }
        Ok(())
    }
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegistrationRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    payload.validate()?;

    let password_hash = hash_password(&payload.password)?;
    let username = payload.username.trim();
    let email = payload.email.trim();

    match queries::insert_user(&state.db, username, email, &password_hash).await {
        Ok(user_id) => {
            tracing::info!(%user_id, username, "user registered");
            Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
        }
        Err(e)
            if e
                .as_database_error()
                .is_some_and(|db_error| db_error.is_unique_violation()) =>
        {
            Err(AppError::Conflict("username or email already exists".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("email and password are required"));
    }

    let user = queries::find_by_email(&state.db, payload.email.trim()).await?;
    let valid = check_credentials(
        &payload.password,
        user.as_ref().map(|user| user.password_hash.as_str()),
    );
    let user = user
        .filter(|_| valid)
        .ok_or_else(|| AppError::auth(INVALID_CREDENTIALS))?;

    let token = state.sessions.issue(user.id, &user.username, &user.email)?;
    tracing::info!(user_id = %user.id, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        user: UserSummary::from(&user),
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<UserProfile>> {
    queries::find_profile(&state.db, user.id())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("user not found"))
}
