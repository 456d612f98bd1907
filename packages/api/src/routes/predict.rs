use super::{classify, record};
use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::{Router, routing::post};
use mien_serving::{PredictionResult, RawInput};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(predict))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PredictRequest {
    pub input: Vec<serde_json::Value>,
}

#[tracing::instrument(name = "POST /predict", skip(state, payload))]
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        let err = ApiError::from(rejection);
        record("predict", err.outcome());
        err
    })?;

    let result = classify(&state, "predict", RawInput::Values(request.input)).await?;
    Ok(Json(result))
}
