use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod auth;
pub mod extract;
pub mod health;
pub mod middleware_auth;
pub mod tasks;
pub mod users;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    let task_router = Router::new()
        .route("/", post(tasks::routes::create).get(tasks::routes::list))
        .route("/events", get(tasks::routes::events))
        .route(
            "/{id}",
            get(tasks::routes::get)
                .put(tasks::routes::update)
                .delete(tasks::routes::delete),
        )
        .route("/{id}/complete", patch(tasks::routes::complete));

    let protected = Router::new()
        .route("/auth/profile", get(auth::profile))
        .route("/users", get(users::routes::list))
        .nest("/tasks", task_router)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::require_auth,
        ));

    let api = Router::new()
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::feed::ChangeFeed;
    use crate::session::SessionIssuer;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use rstest::rstest;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";

    async fn test_app() -> Router {
        let pool = db::connect_in_memory().await.unwrap();
        let state = AppState::new(
            pool,
            SessionIssuer::new(SECRET, Duration::hours(24)),
            ChangeFeed::new(16),
        );
        routes(state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn register(app: &Router, username: &str, email: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": username,
                "email": email,
                "password": "secret1",
                "confirmPassword": "secret1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["userId"].as_str().unwrap().to_string()
    }

    async fn login(app: &Router, email: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": email, "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn task_lifecycle() {
        let app = test_app().await;
        let alice_id = register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, created) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"title": "Write spec"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["task"]["status"], "pending");
        assert_eq!(created["task"]["completed"], false);
        assert_eq!(created["task"]["created_by"], alice_id.as_str());
        assert_eq!(created["task"]["created_by_name"], "alice");
        let task_uri = format!("/api/tasks/{}", created["taskId"].as_str().unwrap());

        let (status, updated) = send(
            &app,
            "PUT",
            &task_uri,
            Some(&token),
            Some(json!({"status": "in_progress"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "in_progress");
        assert_eq!(updated["title"], "Write spec");

        let complete_uri = format!("{task_uri}/complete");
        for _ in 0..2 {
            let (status, done) = send(&app, "PATCH", &complete_uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(done["status"], "completed");
            assert_eq!(done["completed"], true);
        }

        let (status, _) = send(&app, "DELETE", &task_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", &task_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "task not found");

        let (status, _) = send(&app, "DELETE", &task_uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;

        for (username, email) in [("alice", "other@x.com"), ("other", "a@x.com")] {
            let (status, _) = send(
                &app,
                "POST",
                "/api/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": email,
                    "password": "secret1",
                    "confirmPassword": "secret1",
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;

        let (wrong_status, wrong_password) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "a@x.com", "password": "nope"})),
        )
        .await;
        let (unknown_status, unknown_email) = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ghost@x.com", "password": "secret1"})),
        )
        .await;

        assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_email);
        assert_eq!(wrong_password["error"], "invalid email or password");
    }

    #[rstest]
    #[case::missing(None)]
    #[case::garbage(Some("garbage".to_string()))]
    #[case::wrong_secret(Some(
        SessionIssuer::new("other-secret", Duration::hours(1))
            .issue(uuid::Uuid::new_v4(), "x", "x@x.com")
            .unwrap()
    ))]
    #[case::expired(Some(
        SessionIssuer::new(SECRET, Duration::hours(1))
            .issue_at(uuid::Uuid::new_v4(), "x", "x@x.com", Utc::now() - Duration::hours(2))
            .unwrap()
    ))]
    #[tokio::test]
    async fn protected_routes_require_valid_token(#[case] token: Option<String>) {
        let app = test_app().await;
        for uri in ["/api/tasks", "/api/users", "/api/auth/profile"] {
            let (status, _) = send(&app, "GET", uri, token.as_deref(), None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn outsiders_cannot_see_or_touch_tasks() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;
        let bob_id = register(&app, "bob", "b@x.com").await;
        register(&app, "carol", "c@x.com").await;
        let alice = login(&app, "a@x.com").await;
        let bob = login(&app, "b@x.com").await;
        let carol = login(&app, "c@x.com").await;

        let (_, created) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&alice),
            Some(json!({"title": "Review", "assigned_to": bob_id})),
        )
        .await;
        let task_uri = format!("/api/tasks/{}", created["taskId"].as_str().unwrap());

        let (_, bob_list) = send(&app, "GET", "/api/tasks", Some(&bob), None).await;
        assert_eq!(bob_list.as_array().unwrap().len(), 1);
        assert_eq!(bob_list[0]["assigned_to_name"], "bob");

        let (_, carol_list) = send(&app, "GET", "/api/tasks", Some(&carol), None).await;
        assert!(carol_list.as_array().unwrap().is_empty());

        for method in ["GET", "DELETE"] {
            let (status, _) = send(&app, method, &task_uri, Some(&carol), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        let (status, _) = send(
            &app,
            "PUT",
            &task_uri,
            Some(&carol),
            Some(json!({"title": "hijacked"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_task_input_is_rejected() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"title": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"title": "ok", "assigned_to": uuid::Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "assigned user does not exist");
    }

    #[tokio::test]
    async fn profile_and_users_are_listed_without_hashes() {
        let app = test_app().await;
        let alice_id = register(&app, "alice", "a@x.com").await;
        register(&app, "bob", "b@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, profile) = send(&app, "GET", "/api/auth/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["id"], alice_id.as_str());
        assert_eq!(profile["username"], "alice");

        let (_, users) = send(&app, "GET", "/api/users", Some(&token), None).await;
        let users = users.as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.get("password_hash").is_none()));
    }

    #[rstest]
    #[case::missing_title("POST", "/api/tasks", json!({"description": "x"}))]
    #[case::wrong_body_type("POST", "/api/tasks", json!("not an object"))]
    #[case::bad_task_id("PUT", "/api/tasks/not-a-uuid", json!({"title": "x"}))]
    #[case::bad_priority("POST", "/api/tasks", json!({"title": "x", "priority": "urgent"}))]
    #[case::bad_due_date("POST", "/api/tasks", json!({"title": "x", "due_date": "soon"}))]
    #[case::bad_login_body("POST", "/api/auth/login", json!({"email": 5}))]
    #[tokio::test]
    async fn malformed_requests_get_json_400s(
        #[case] method: &str,
        #[case] uri: &str,
        #[case] body: Value,
    ) {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, body) = send(&app, method, uri, Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()), "{body}");
    }

    #[tokio::test]
    async fn missing_title_reads_as_required() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"description": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "task title is required");

        let (status, _) = send(&app, "GET", "/api/tasks?status=someday", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn details_round_trip_and_list_filters() {
        let app = test_app().await;
        register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let (status, created) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({
                "title": "Taxes",
                "priority": "high",
                "due_date": "2025-03-14",
                "category": "  home ",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["task"]["priority"], "high");
        assert_eq!(created["task"]["due_date"], "2025-03-14");
        assert_eq!(created["task"]["category"], "home");

        let (_, plain) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"title": "Dishes", "category": "   "})),
        )
        .await;
        assert_eq!(plain["task"]["priority"], "medium");
        assert_eq!(plain["task"]["category"], Value::Null);

        let (_, high) = send(&app, "GET", "/api/tasks?priority=high", Some(&token), None).await;
        assert_eq!(high.as_array().unwrap().len(), 1);
        assert_eq!(high[0]["title"], "Taxes");

        let (_, done) = send(&app, "GET", "/api/tasks?status=completed", Some(&token), None).await;
        assert!(done.as_array().unwrap().is_empty());

        let uri = format!("/api/tasks/{}", plain["taskId"].as_str().unwrap());
        let (_, updated) = send(
            &app,
            "PUT",
            &uri,
            Some(&token),
            Some(json!({"priority": "low"})),
        )
        .await;
        assert_eq!(updated["priority"], "low");
        assert_eq!(updated["title"], "Dishes");

        let (_, low_pending) = send(
            &app,
            "GET",
            "/api/tasks?status=pending&priority=low",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(low_pending.as_array().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_on_a_file_database_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
        let pool = db::connect(&url).await.unwrap();
        let app = routes(AppState::new(
            pool,
            SessionIssuer::new(SECRET, Duration::hours(24)),
            ChangeFeed::new(16),
        ));
        register(&app, "alice", "a@x.com").await;
        let token = login(&app, "a@x.com").await;

        let mut uris = Vec::new();
        for i in 0..5 {
            let (_, created) = send(
                &app,
                "POST",
                "/api/tasks",
                Some(&token),
                Some(json!({"title": format!("task {i}")})),
            )
            .await;
            uris.push(format!("/api/tasks/{}", created["taskId"].as_str().unwrap()));
        }

        let mut handles = Vec::new();
        for round in 0..20 {
            for uri in &uris {
                let (app, token, uri) = (app.clone(), token.clone(), uri.clone());
                handles.push(tokio::spawn(async move {
                    let body = json!({"title": format!("round {round}")});
                    send(&app, "PUT", &uri, Some(&token), Some(body)).await.0
                }));
            }
            let (app, token) = (app.clone(), token.clone());
            handles.push(tokio::spawn(async move {
                let body = json!({"title": format!("extra {round}")});
                send(&app, "POST", "/api/tasks", Some(&token), Some(body)).await.0
            }));
        }

        for handle in handles {
            let status = handle.await.unwrap();
            assert!(status.is_success(), "{status}");
        }

        let (_, tasks) = send(&app, "GET", "/api/tasks", Some(&token), None).await;
        assert_eq!(tasks.as_array().unwrap().len(), 25);
    }
}
