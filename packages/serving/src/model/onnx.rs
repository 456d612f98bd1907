use super::{ModelFormat, ModelHandle, declared_output_width, resolve_input_shape};
use crate::error::{ServingError, ServingResult};
use crate::preprocess::InputSpec;
use crate::tensor::{Distribution, InputTensor};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

/// Full-precision graph executed by ONNX Runtime
pub struct OnnxModel {
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    input_shape: Vec<usize>,
    output_width: Option<usize>,
}

impl OnnxModel {
    pub fn load(path: &Path, spec: Option<InputSpec>) -> ServingResult<Self> {
        let session = Session::builder()
            .map_err(|e| load_error(path, "builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(path, "optimization", e))?
            .commit_from_file(path)
            .map_err(|e| load_error(path, "commit", e))?;

        if session.inputs.len() != 1 {
            return Err(ServingError::load(format!(
                "expected a single model input, found {}",
                session.inputs.len()
            )));
        }

        let declared_input: Option<Vec<i64>> = session.inputs[0]
            .input_type
            .tensor_shape()
            .map(|s| s.iter().copied().collect());
        let declared_output: Option<Vec<i64>> = session
            .outputs
            .first()
            .and_then(|o| o.output_type.tensor_shape())
            .map(|s| s.iter().copied().collect());

        let input_shape = resolve_input_shape(declared_input.as_deref(), spec)?;
        let output_width = declared_output_width(declared_output.as_deref());

        tracing::debug!(
            input = %session.inputs[0].name,
            declared_input = ?declared_input,
            declared_output = ?declared_output,
            "ONNX session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_shape,
            output_width,
        })
    }
}

fn load_error(path: &Path, stage: &str, err: impl std::fmt::Display) -> ServingError {
    ServingError::load(format!(
        "failed to load ONNX model '{}' ({stage}): {err}",
        path.display()
    ))
}

impl ModelHandle for OnnxModel {
    fn format(&self) -> ModelFormat {
        ModelFormat::Full
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }

    fn infer(&self, tensor: &InputTensor) -> ServingResult<Distribution> {
        tensor.ensure_shape(&self.input_shape)?;

        let input = Tensor::from_array(tensor.to_owned_array())
            .map_err(|e| ServingError::inference(format!("failed to build input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ServingError::inference("ONNX session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ServingError::inference(format!("forward pass failed: {e}")))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| ServingError::inference("model produced no outputs"))?;
        let scores = value
            .try_extract_array::<f32>()
            .map_err(|e| ServingError::inference(format!("output is not f32: {e}")))?;

        let shape = scores.shape().to_vec();
        Distribution::from_output(&shape, scores.iter().copied().collect())
    }
}
