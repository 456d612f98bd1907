use crate::error::ServingResult;
use crate::model::ModelHandle;
use crate::tensor::{Distribution, InputTensor};
use std::time::Instant;

/// Histogram of forward pass durations
pub const INFERENCE_DURATION_SECONDS: &str = "mien_inference_duration_seconds";

/// Runs one forward pass on `handle`. Blocks the calling thread.
pub fn run(handle: &dyn ModelHandle, tensor: &InputTensor) -> ServingResult<Distribution> {
    let started = Instant::now();
    let result = handle.infer(tensor);
    let elapsed = started.elapsed();

    metrics::histogram!(
        INFERENCE_DURATION_SECONDS,
        "format" => handle.format().as_str(),
        "outcome" => if result.is_ok() { "ok" } else { "error" }
    )
    .record(elapsed.as_secs_f64());

    match &result {
        Ok(distribution) => tracing::debug!(
            format = %handle.format(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            classes = distribution.len(),
            "inference finished"
        ),
        Err(e) => tracing::debug!(
            format = %handle.format(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            error = %e,
            "inference failed"
        ),
    }

    result
}
