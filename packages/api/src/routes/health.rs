use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::{Router, routing::get};
use mien_serving::ModelFormat;
use serde::{Deserialize, Serialize};

pub const BANNER: &str = "✅ Mien Fabric Classifier API is running!";

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model_format: ModelFormat,
    pub input_shape: Vec<usize>,
    pub labels: Vec<String>,
}

#[tracing::instrument(name = "GET /")]
pub async fn home() -> &'static str {
    BANNER
}

#[tracing::instrument(name = "GET /health", skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model = state.classifier.model();
    Json(HealthResponse {
        status: "ok".to_string(),
        model_format: model.format(),
        input_shape: model.input_shape().to_vec(),
        labels: state
            .classifier
            .catalog()
            .labels()
            .iter()
            .map(str::to_string)
            .collect(),
    })
}
