use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthData {
    pub status: String,
}

pub async fn health() -> Json<HealthData> {
    Json(HealthData {
        status: "ok".to_string(),
    })
}
