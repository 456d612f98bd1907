use crate::error::ApiError;
use crate::state::AppState;
use mien_serving::{PredictionResult, RawInput};

pub mod health;
pub mod predict;
pub mod web;

/// Counter of served predictions by route and outcome
pub const PREDICTIONS_TOTAL: &str = "mien_predictions_total";

/// Runs one prediction on the blocking pool and records its outcome
pub(crate) async fn classify(
    state: &AppState,
    route: &'static str,
    input: RawInput,
) -> Result<PredictionResult, ApiError> {
    let classifier = state.classifier.clone();
    let result = tokio::task::spawn_blocking(move || classifier.predict(input))
        .await
        .map_err(ApiError::from)
        .and_then(|r| r.map_err(ApiError::from));

    match &result {
        Ok(_) => record(route, "ok"),
        Err(e) => record(route, e.outcome()),
    }
    result
}

pub(crate) fn record(route: &'static str, outcome: &'static str) {
    metrics::counter!(PREDICTIONS_TOTAL, "route" => route, "outcome" => outcome).increment(1);
}
