use crate::error::{ServingError, ServingResult};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis};
use serde::Serialize;

/// Fixed-shape `f32` tensor handed to a model.
///
/// Always carries a leading batch dimension of 1.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: ArrayD<f32>,
}

impl InputTensor {
    /// Single-row feature tensor of shape `(1, k)`
    pub fn from_features(features: Vec<f32>) -> Self {
        let data = Array1::from_vec(features).insert_axis(Axis(0)).into_dyn();
        Self { data }
    }

    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    pub fn to_owned_array(&self) -> ArrayD<f32> {
        self.data.clone()
    }

    /// Row-major copy of the values
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Rejects the tensor unless its shape equals `expected` exactly.
    pub fn ensure_shape(&self, expected: &[usize]) -> ServingResult<()> {
        if self.shape() == expected {
            Ok(())
        } else {
            Err(ServingError::Shape {
                expected: expected.to_vec(),
                actual: self.shape().to_vec(),
            })
        }
    }
}

/// Raw per-class scores produced by one inference call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution(Vec<f32>);

impl Distribution {
    /// Builds a distribution, rejecting empty or non-finite score vectors.
    pub fn new(scores: Vec<f32>) -> ServingResult<Self> {
        if scores.is_empty() {
            return Err(ServingError::inference("model produced an empty output"));
        }
        if let Some(pos) = scores.iter().position(|v| !v.is_finite()) {
            return Err(ServingError::inference(format!(
                "model produced a non-finite score at index {pos}"
            )));
        }
        Ok(Self(scores))
    }

    /// Builds a distribution from a model output of shape `(N)` or `(1, N)`.
    pub fn from_output(shape: &[usize], scores: Vec<f32>) -> ServingResult<Self> {
        let rows: usize = match shape {
            [] | [_] => 1,
            [leading @ .., _] => leading.iter().product(),
        };
        if rows != 1 {
            return Err(ServingError::inference(format!(
                "expected a single output row, model returned shape {shape:?}"
            )));
        }
        Self::new(scores)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn scores(&self) -> &[f32] {
        &self.0
    }

    /// Index of the first maximum, with its score
    pub fn argmax(&self) -> (usize, f32) {
        let mut best_idx = 0usize;
        let mut best_score = self.0[0];
        for (i, v) in self.0.iter().enumerate().skip(1) {
            if *v > best_score {
                best_idx = i;
                best_score = *v;
            }
        }
        (best_idx, best_score)
    }
}
