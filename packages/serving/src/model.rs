/// # Model Handles
/// Loading and inference for full-precision and compiled artifacts
use crate::error::{ServingError, ServingResult};
use crate::preprocess::InputSpec;
use crate::tensor::{Distribution, InputTensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// ONNX Runtime backend for full-precision graphs
#[cfg(feature = "onnx")]
pub mod onnx;
/// tract backend for compiled TFLite flatbuffers
#[cfg(feature = "tflite")]
pub mod tflite;

/// Artifact format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Complete trained graph (ONNX)
    Full,
    /// Pre-optimized, quantized representation (TFLite)
    Compiled,
}

impl ModelFormat {
    /// Guesses the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()?
            .to_string_lossy()
            .to_ascii_lowercase()
            .as_str()
        {
            "onnx" => Some(ModelFormat::Full),
            "tflite" => Some(ModelFormat::Compiled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Full => "full",
            ModelFormat::Compiled => "compiled",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = ServingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "onnx" => Ok(ModelFormat::Full),
            "compiled" | "quantized" | "tflite" => Ok(ModelFormat::Compiled),
            other => Err(ServingError::config(format!(
                "unknown model format '{other}', expected 'full' or 'compiled'"
            ))),
        }
    }
}

/// A loaded classifier artifact.
///
/// Implementations are loaded once and shared across all request tasks, so
/// `infer` takes `&self` and must be safe to call from several threads.
pub trait ModelHandle: Send + Sync {
    fn format(&self) -> ModelFormat;

    /// Full batched input shape, e.g. `[1, 4]` or `[1, 224, 224, 3]`
    fn input_shape(&self) -> &[usize];

    /// Number of scores per inference, when the artifact declares it
    fn output_width(&self) -> Option<usize>;

    /// Runs one forward pass. Blocks for its duration.
    fn infer(&self, tensor: &InputTensor) -> ServingResult<Distribution>;
}

/// HDF5 signature of Keras `.h5` checkpoints
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

/// Loads the artifact at `path` with the backend matching `format`.
///
/// `spec` pins the input shape; when `None` it is read from the artifact.
#[cfg(any(feature = "onnx", feature = "tflite"))]
pub fn load(
    path: &Path,
    format: ModelFormat,
    spec: Option<InputSpec>,
) -> ServingResult<Arc<dyn ModelHandle>> {
    ensure_loadable(path)?;

    tracing::info!(path = %path.display(), %format, "loading model");

    let handle: Arc<dyn ModelHandle> = match format {
        #[cfg(feature = "onnx")]
        ModelFormat::Full => Arc::new(onnx::OnnxModel::load(path, spec)?),
        #[cfg(feature = "tflite")]
        ModelFormat::Compiled => Arc::new(tflite::CompiledModel::load(path, spec)?.allocate()?),
        #[allow(unreachable_patterns)]
        other => return Err(not_compiled_in(other)),
    };

    tracing::info!(
        input_shape = ?handle.input_shape(),
        output_width = ?handle.output_width(),
        "model loaded"
    );
    Ok(handle)
}

#[cfg(not(any(feature = "onnx", feature = "tflite")))]
pub fn load(
    path: &Path,
    format: ModelFormat,
    _spec: Option<InputSpec>,
) -> ServingResult<Arc<dyn ModelHandle>> {
    ensure_loadable(path)?;
    Err(not_compiled_in(format))
}

fn not_compiled_in(format: ModelFormat) -> ServingError {
    ServingError::load(format!(
        "support for '{format}' models is not compiled in"
    ))
}

/// Rejects missing files and Keras checkpoints before a backend sees them
fn ensure_loadable(path: &Path) -> ServingResult<()> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        ServingError::load_with_source(
            format!("model file '{}' does not exist or is unreadable", path.display()),
            e,
        )
    })?;

    let mut head = [0u8; 8];
    let read = std::io::Read::read(&mut file, &mut head).map_err(|e| {
        ServingError::load_with_source(format!("failed to read '{}'", path.display()), e)
    })?;
    if head[..read] == *HDF5_MAGIC {
        return Err(ServingError::load(format!(
            "'{}' is a Keras HDF5 checkpoint; set MODEL_URL to the ONNX or TFLite export",
            path.display()
        )));
    }
    Ok(())
}

/// Reconciles the shape declared by an artifact with the configured spec.
///
/// Negative dims in `declared` are dynamic; a dynamic leading dim is the batch
/// and is pinned to 1.
#[cfg(any(feature = "onnx", feature = "tflite"))]
pub(crate) fn resolve_input_shape(
    declared: Option<&[i64]>,
    spec: Option<InputSpec>,
) -> ServingResult<Vec<usize>> {
    match (declared, spec) {
        (Some(dims), Some(spec)) => {
            let expected = spec.tensor_shape();
            let compatible = dims.len() == expected.len()
                && dims
                    .iter()
                    .zip(&expected)
                    .all(|(d, e)| *d < 0 || *d as usize == *e);
            if !compatible {
                return Err(ServingError::load(format!(
                    "model declares input {dims:?} but the configured input is {spec} ({expected:?})"
                )));
            }
            Ok(expected)
        }
        (None, Some(spec)) => Ok(spec.tensor_shape()),
        (Some(dims), None) => {
            let mut shape = Vec::with_capacity(dims.len());
            for (i, d) in dims.iter().enumerate() {
                match (*d, i) {
                    (d, _) if d > 0 => shape.push(d as usize),
                    (_, 0) => shape.push(1),
                    _ => {
                        return Err(ServingError::load(format!(
                            "model input {dims:?} has dynamic dimensions; configure MODEL_INPUT"
                        )));
                    }
                }
            }
            InputSpec::from_tensor_shape(&shape).map_err(|e| ServingError::load(e.to_string()))?;
            Ok(shape)
        }
        (None, None) => Err(ServingError::load(
            "model does not declare its input shape; configure MODEL_INPUT",
        )),
    }
}

/// Last dim of a declared output shape, if static
#[cfg(any(feature = "onnx", feature = "tflite"))]
pub(crate) fn declared_output_width(dims: Option<&[i64]>) -> Option<usize> {
    dims.and_then(|d| d.last())
        .filter(|w| **w > 0)
        .map(|w| *w as usize)
}
