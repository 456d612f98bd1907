//! Raw request input to model tensors

use crate::error::{ServingError, ServingResult};
use crate::tensor::InputTensor;
use bytes::Bytes;
use image::imageops::FilterType;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Divisor mapping byte channel values onto `[0, 1]`
pub const PIXEL_SCALE: f32 = 255.0;

/// Token separator for delimited feature strings
pub const FEATURE_DELIMITER: char = ',';

/// Shape of the tensor a model consumes, without the batch dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSpec {
    /// Flat feature row `(1, width)`
    Features { width: usize },
    /// NHWC image batch `(1, height, width, channels)`
    Image { height: u32, width: u32, channels: u8 },
}

impl InputSpec {
    pub fn tensor_shape(&self) -> Vec<usize> {
        match *self {
            InputSpec::Features { width } => vec![1, width],
            InputSpec::Image {
                height,
                width,
                channels,
            } => vec![1, height as usize, width as usize, channels as usize],
        }
    }

    /// Reads a spec back from a full batched shape, `(1, k)` or `(1, H, W, C)`
    pub fn from_tensor_shape(shape: &[usize]) -> ServingResult<Self> {
        let spec = match shape {
            [1, width] => InputSpec::Features { width: *width },
            [1, height, width, channels] => InputSpec::Image {
                height: u32::try_from(*height)
                    .map_err(|_| ServingError::config(format!("image height {height} too large")))?,
                width: u32::try_from(*width)
                    .map_err(|_| ServingError::config(format!("image width {width} too large")))?,
                channels: u8::try_from(*channels)
                    .map_err(|_| ServingError::UnsupportedChannels(u8::MAX))?,
            },
            other => {
                return Err(ServingError::config(format!(
                    "unsupported model input shape {other:?}, expected (1, k) or (1, H, W, C)"
                )));
            }
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> ServingResult<()> {
        match *self {
            InputSpec::Features { width } if width == 0 => {
                Err(ServingError::config("feature width must be positive"))
            }
            InputSpec::Image { height, width, .. } if height == 0 || width == 0 => {
                Err(ServingError::config("image resolution must be positive"))
            }
            InputSpec::Image { channels, .. } if !matches!(channels, 1 | 3 | 4) => {
                Err(ServingError::UnsupportedChannels(channels))
            }
            _ => Ok(()),
        }
    }

    /// Input modality in words, for error messages
    pub fn modality(&self) -> &'static str {
        match self {
            InputSpec::Features { .. } => "feature vector",
            InputSpec::Image { .. } => "image",
        }
    }
}

impl fmt::Display for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSpec::Features { width } => write!(f, "features:{width}"),
            InputSpec::Image {
                height,
                width,
                channels,
            } => write!(f, "image:{height}x{width}x{channels}"),
        }
    }
}

impl FromStr for InputSpec {
    type Err = ServingError;

    /// Parses `features:<k>` or `image:<H>x<W>[x<C>]` (channels default to 3)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServingError::config(format!("invalid input spec '{s}'"));
        let (kind, dims) = s.trim().split_once(':').ok_or_else(invalid)?;

        let spec = match kind.trim().to_ascii_lowercase().as_str() {
            "features" | "vector" => InputSpec::Features {
                width: dims.trim().parse().map_err(|_| invalid())?,
            },
            "image" => {
                let parts: Vec<&str> = dims.trim().split('x').collect();
                let (height, width, channels) = match parts.as_slice() {
                    [h, w] => (*h, *w, "3"),
                    [h, w, c] => (*h, *w, *c),
                    _ => return Err(invalid()),
                };
                InputSpec::Image {
                    height: height.parse().map_err(|_| invalid())?,
                    width: width.parse().map_err(|_| invalid())?,
                    channels: channels.parse().map_err(|_| invalid())?,
                }
            }
            _ => return Err(invalid()),
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Request payload before normalization
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Structured numeric array, e.g. the `input` field of a JSON body
    Values(Vec<serde_json::Value>),
    /// Delimited numeric string, e.g. `"1.0,2.5,3"`
    Delimited(String),
    /// Encoded image file
    Image(Bytes),
}

impl RawInput {
    pub fn modality(&self) -> &'static str {
        match self {
            RawInput::Values(_) | RawInput::Delimited(_) => "feature vector",
            RawInput::Image(_) => "image",
        }
    }
}

/// Converts raw input into the exact tensor a model expects
#[derive(Debug, Clone)]
pub struct Preprocessor {
    spec: InputSpec,
}

impl Preprocessor {
    pub fn new(spec: InputSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &InputSpec {
        &self.spec
    }

    pub fn prepare(&self, input: RawInput) -> ServingResult<InputTensor> {
        match (&self.spec, input) {
            (InputSpec::Features { width }, RawInput::Values(values)) => {
                features_tensor(parse_values(&values)?, *width)
            }
            (InputSpec::Features { width }, RawInput::Delimited(text)) => {
                features_tensor(parse_delimited(&text)?, *width)
            }
            (
                InputSpec::Image {
                    height,
                    width,
                    channels,
                },
                RawInput::Image(bytes),
            ) => image_tensor(&bytes, *height, *width, *channels),
            (spec, input) => Err(ServingError::InputKindMismatch {
                expected: spec.modality(),
                actual: input.modality(),
            }),
        }
    }
}

fn parse_token(position: usize, token: &str) -> ServingResult<f32> {
    let malformed = || ServingError::MalformedToken {
        position,
        token: token.to_string(),
    };
    let value: f64 = token.parse().map_err(|_| malformed())?;
    let value = value as f32;
    if !value.is_finite() {
        return Err(malformed());
    }
    Ok(value)
}

/// Splits on [`FEATURE_DELIMITER`]; a blank string yields no features.
pub fn parse_delimited(text: &str) -> ServingResult<Vec<f32>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(FEATURE_DELIMITER)
        .enumerate()
        .map(|(position, token)| parse_token(position, token.trim()))
        .collect()
}

pub fn parse_values(values: &[serde_json::Value]) -> ServingResult<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(position, value)| {
            let number = value.as_f64().ok_or_else(|| ServingError::MalformedToken {
                position,
                token: value.to_string(),
            })?;
            let number = number as f32;
            if !number.is_finite() {
                return Err(ServingError::MalformedToken {
                    position,
                    token: value.to_string(),
                });
            }
            Ok(number)
        })
        .collect()
}

fn features_tensor(features: Vec<f32>, width: usize) -> ServingResult<InputTensor> {
    let tensor = InputTensor::from_features(features);
    tensor.ensure_shape(&[1, width])?;
    Ok(tensor)
}

fn image_tensor(bytes: &[u8], height: u32, width: u32, channels: u8) -> ServingResult<InputTensor> {
    if bytes.is_empty() {
        return Err(ServingError::Decode("image upload is empty".to_string()));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| ServingError::Decode(format!("failed to decode image: {e}")))?;

    let source_channels = img.color().channel_count();
    if !(1..=4).contains(&source_channels) {
        return Err(ServingError::UnsupportedChannels(source_channels));
    }

    let resized = if img.width() == width && img.height() == height {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let raw = match channels {
        1 => resized.to_luma8().into_raw(),
        3 => resized.to_rgb8().into_raw(),
        4 => resized.to_rgba8().into_raw(),
        other => return Err(ServingError::UnsupportedChannels(other)),
    };
    let data: Vec<f32> = raw.iter().map(|v| f32::from(*v) / PIXEL_SCALE).collect();

    let shape = [1, height as usize, width as usize, channels as usize];
    let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| ServingError::Decode(format!("decoded pixels do not fill {shape:?}: {e}")))?;
    Ok(InputTensor::from_array(array))
}
