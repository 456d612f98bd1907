use super::{ModelFormat, ModelHandle, declared_output_width, resolve_input_shape};
use crate::error::{ServingError, ServingResult};
use crate::preprocess::{InputSpec, PIXEL_SCALE};
use crate::tensor::{Distribution, InputTensor};
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;
use tract_tflite::prelude::*;

type Plan = TypedRunnableModel<TypedModel>;

/// A parsed TFLite flatbuffer whose execution plan has not been built yet
pub struct CompiledModel {
    model: TypedModel,
    input_type: DatumType,
    input_shape: Vec<usize>,
}

impl CompiledModel {
    pub fn load(path: &Path, spec: Option<InputSpec>) -> ServingResult<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            ServingError::load_with_source(
                format!("failed to read compiled model '{}'", path.display()),
                e,
            )
        })?;
        if raw.is_empty() {
            return Err(ServingError::load(format!(
                "model file '{}' is empty",
                path.display()
            )));
        }

        let bytes = find_tflite_slice(&raw)
            .ok_or_else(|| ServingError::load("could not locate TFLite buffer (TFL3 id)"))?;

        let model = tract_tflite::tflite()
            .model_for_read(&mut Cursor::new(bytes))
            .map_err(|e| ServingError::load(format!("TFLite parse error: {e}")))?;

        let inlets = model
            .input_outlets()
            .map_err(|e| ServingError::load(e.to_string()))?;
        if inlets.len() != 1 {
            return Err(ServingError::load(format!(
                "expected a single model input, found {}",
                inlets.len()
            )));
        }
        let fact = model
            .outlet_fact(inlets[0])
            .map_err(|e| ServingError::load(e.to_string()))?;

        let input_type = fact.datum_type;
        if !matches!(input_type.unquantized(), DatumType::F32 | DatumType::U8) {
            return Err(ServingError::load(format!(
                "unsupported input dtype: {input_type:?} (only F32 and U8 are supported)"
            )));
        }

        let declared: Option<Vec<i64>> = fact
            .shape
            .as_concrete()
            .map(|dims| dims.iter().map(|d| *d as i64).collect());
        let input_shape = resolve_input_shape(declared.as_deref(), spec)?;

        tracing::debug!(?input_type, declared = ?declared, "TFLite graph parsed");

        Ok(Self {
            model,
            input_type,
            input_shape,
        })
    }

    /// Pins the input fact, optimizes the graph and builds the execution plan
    pub fn allocate(self) -> ServingResult<AllocatedModel> {
        let fact = TypedFact::dt_shape(
            self.input_type,
            self.input_shape.iter().copied().collect::<TVec<usize>>(),
        );
        let optimized = self
            .model
            .with_input_fact(0, fact)
            .and_then(|m| m.into_optimized())
            .map_err(|e| ServingError::load(format!("failed to optimize TFLite graph: {e}")))?;

        let declared_output: Option<Vec<i64>> = optimized
            .output_outlets()
            .ok()
            .and_then(|outlets| outlets.first().copied())
            .and_then(|outlet| optimized.outlet_fact(outlet).ok())
            .and_then(|fact| fact.shape.as_concrete().map(|d| d.to_vec()))
            .map(|dims| dims.into_iter().map(|d| d as i64).collect());

        let plan = optimized
            .into_runnable()
            .map_err(|e| ServingError::load(format!("failed to allocate TFLite plan: {e}")))?;

        Ok(AllocatedModel {
            plan: Mutex::new(plan),
            input_type: self.input_type,
            input_shape: self.input_shape,
            output_width: declared_output_width(declared_output.as_deref()),
        })
    }
}

/// Compiled model with its execution plan allocated, ready to serve
pub struct AllocatedModel {
    /// One forward pass at a time through the plan's slots
    plan: Mutex<Plan>,
    input_type: DatumType,
    input_shape: Vec<usize>,
    output_width: Option<usize>,
}

impl AllocatedModel {
    fn input_value(&self, tensor: &InputTensor) -> TractResult<Tensor> {
        let values = tensor.to_vec();
        if self.input_type.unquantized() != DatumType::U8 {
            return Tensor::from_shape::<f32>(&self.input_shape, &values);
        }

        let (zero_point, scale) = input_quantization(self.input_type);
        let quantized = quantize(&values, zero_point, scale);
        let mut input = Tensor::from_shape::<u8>(&self.input_shape, &quantized)?;
        if self.input_type.is_quantized() {
            // SAFETY: QU8 shares the u8 storage layout
            unsafe { input.set_datum_type(self.input_type) };
        }
        Ok(input)
    }
}

/// Zero point and scale mapping `[0, 1]` pixel values onto a u8 input.
///
/// Plain u8 inputs take raw pixel bytes.
fn input_quantization(input_type: DatumType) -> (i32, f32) {
    if input_type.is_quantized() {
        input_type.zp_scale()
    } else {
        (0, 1.0 / PIXEL_SCALE)
    }
}

/// `round(v / scale) + zero_point`, saturated to the u8 range
fn quantize(values: &[f32], zero_point: i32, scale: f32) -> Vec<u8> {
    values
        .iter()
        .map(|v| ((v / scale).round() + zero_point as f32).clamp(0.0, 255.0) as u8)
        .collect()
}

impl ModelHandle for AllocatedModel {
    fn format(&self) -> ModelFormat {
        ModelFormat::Compiled
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }

    fn infer(&self, tensor: &InputTensor) -> ServingResult<Distribution> {
        tensor.ensure_shape(&self.input_shape)?;

        let input = self
            .input_value(tensor)
            .map_err(|e| ServingError::inference(format!("failed to build input tensor: {e}")))?;

        let plan = self
            .plan
            .lock()
            .map_err(|_| ServingError::inference("TFLite plan lock poisoned"))?;
        let outputs = plan
            .run(tvec!(input.into()))
            .map_err(|e| ServingError::inference(format!("failed to run TFLite model: {e}")))?;

        let first = outputs
            .first()
            .ok_or_else(|| ServingError::inference("model produced no outputs"))?;
        let scores = first
            .cast_to::<f32>()
            .map_err(|e| ServingError::inference(format!("output is not numeric: {e}")))?;
        let values = scores
            .as_slice::<f32>()
            .map_err(|e| ServingError::inference(e.to_string()))?
            .to_vec();

        Distribution::from_output(scores.shape(), values)
    }
}

/// Skips any container prefix in front of the flatbuffer
fn find_tflite_slice(buf: &[u8]) -> Option<&[u8]> {
    if buf.len() < 8 {
        return None;
    }
    (0..=buf.len() - 8)
        .find(|&i| &buf[i + 4..i + 8] == b"TFL3")
        .map(|i| &buf[i..])
}
