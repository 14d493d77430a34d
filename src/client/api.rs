use std::collections::VecDeque;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{header::ACCEPT, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::feed::FeedEvent;
use crate::routes::auth::{LoginRequest, LoginResponse, RegisterResponse, RegistrationRequest};
use crate::routes::health::HealthData;
use crate::routes::tasks::dto::{CreateTask, CreatedTask, UpdateTask};
use crate::routes::tasks::model::{TaskFilter, TaskResponse};
use crate::routes::users::{UserProfile, UserSummary};
use super::sse::{SseDecoder, SseFrame};
use super::{ClientError, ClientResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NO_QUERY: &[(&str, &str)] = &[];

/// Bounded exponential backoff, used for idempotent reads only.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// HTTP client for the tracker API. Holds no credentials: every
/// authenticated call takes the bearer token as an argument.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|body| body.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Api { status, message });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_once<T: DeserializeOwned>(request: RequestBuilder) -> ClientResult<T> {
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;
        Self::decode(response).await
    }

    async fn read<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> ClientResult<T> {
        self.read_query(path, token, NO_QUERY).await
    }

    /// GET with retries on transport failures and 5xx responses.
    async fn read_query<T, Q>(&self, path: &str, token: Option<&str>, query: &Q) -> ClientResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.url(path);
        let mut attempt = 1;

        loop {
            let mut request = self.http.get(&url).query(query);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            match Self::send_once(request).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(%url, attempt, error = %e, ?delay, "read failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    pub async fn health(&self) -> ClientResult<HealthData> {
        self.read("/health", None).await
    }

    pub async fn register(&self, request: &RegistrationRequest) -> ClientResult<RegisterResponse> {
        Self::send_once(self.http.post(self.url("/auth/register")).json(request)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<LoginResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        Self::send_once(self.http.post(self.url("/auth/login")).json(&body)).await
    }

    pub async fn profile(&self, token: &str) -> ClientResult<UserProfile> {
        self.read("/auth/profile", Some(token)).await
    }

    pub async fn users(&self, token: &str) -> ClientResult<Vec<UserSummary>> {
        self.read("/users", Some(token)).await
    }

    pub async fn list_tasks(&self, token: &str) -> ClientResult<Vec<TaskResponse>> {
        self.read("/tasks", Some(token)).await
    }

    pub async fn list_tasks_matching(
        &self,
        token: &str,
        filter: &TaskFilter,
    ) -> ClientResult<Vec<TaskResponse>> {
        self.read_query("/tasks", Some(token), filter).await
    }

    pub async fn get_task(&self, token: &str, id: Uuid) -> ClientResult<TaskResponse> {
        self.read(&format!("/tasks/{id}"), Some(token)).await
    }

    pub async fn create_task(&self, token: &str, task: &CreateTask) -> ClientResult<CreatedTask> {
        let request = self.http.post(self.url("/tasks")).bearer_auth(token).json(task);
        Self::send_once(request).await
    }

    pub async fn update_task(
        &self,
        token: &str,
        id: Uuid,
        changes: &UpdateTask,
    ) -> ClientResult<TaskResponse> {
        let request = self
            .http
            .put(self.url(&format!("/tasks/{id}")))
            .bearer_auth(token)
            .json(changes);
        Self::send_once(request).await
    }

    pub async fn complete_task(&self, token: &str, id: Uuid) -> ClientResult<TaskResponse> {
        let request = self
            .http
            .patch(self.url(&format!("/tasks/{id}/complete")))
            .bearer_auth(token);
        Self::send_once(request).await
    }

    pub async fn delete_task(&self, token: &str, id: Uuid) -> ClientResult<()> {
        let request = self
            .http
            .delete(self.url(&format!("/tasks/{id}")))
            .bearer_auth(token);
        Self::send_once::<serde_json::Value>(request).await.map(|_| ())
    }

    /// Opens the change feed. Resolves once the server has registered the
    /// subscription, so no change made after this returns is missed.
    pub async fn subscribe(
        &self,
        token: &str,
    ) -> ClientResult<impl Stream<Item = ClientResult<FeedEvent>> + Send + 'static> {
        let response = self
            .http
            .get(self.url("/tasks/events"))
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::decode::<serde_json::Value>(response)
                .await
                .err()
                .unwrap_or(ClientError::FeedClosed));
        }

        let bytes = Box::pin(response.bytes_stream());
        let state = (bytes, SseDecoder::new(), VecDeque::<SseFrame>::new());

        Ok(futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    let event = serde_json::from_str::<FeedEvent>(&frame.data).map_err(ClientError::from);
                    return Some((event, (bytes, decoder, pending)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, pending))),
                    None => return None,
                }
            }
        }))
    }
}
