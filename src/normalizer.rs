//! Per-feature normalization statistics.
//!
//! Statistics are fitted once, from a bounded sample of states, before
//! training starts, never re-estimated online. Every worker and the
//! evaluator share the identical frozen transform.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{QuenchError, Result};

/// Floor for a feature's standard deviation; a degenerate (single-valued)
/// feature is clamped here instead of dividing by zero.
pub const MIN_STDDEV: f32 = 1e-6;

/// Frozen per-feature mean and standard deviation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub mean: Array1<f32>,
    pub stddev: Array1<f32>,
}

impl NormalizationParams {
    /// Identity transform: mean 0, stddev 1 for every feature.
    pub fn identity(dim: usize) -> Self {
        NormalizationParams {
            mean: Array1::zeros(dim),
            stddev: Array1::ones(dim),
        }
    }

    /// Fit mean and standard deviation per feature over a sample of states.
    ///
    /// `cols_to_norm` limits the fit to the named columns; the rest keep the
    /// identity transform. `None` normalizes every column. An empty sample is
    /// an error; a zero-variance column gets its stddev clamped to
    /// [`MIN_STDDEV`] so applying the transform stays finite.
    pub fn fit(sample: ArrayView2<f32>, cols_to_norm: Option<&[usize]>) -> Result<Self> {
        let (rows, dim) = sample.dim();
        if rows == 0 || dim == 0 {
            return Err(QuenchError::InsufficientData(
                "normalization sample is empty".to_string(),
            ));
        }
        if let Some(cols) = cols_to_norm {
            if let Some(&bad) = cols.iter().find(|&&c| c >= dim) {
                return Err(QuenchError::config_validation(
                    "norm_params.cols_to_norm",
                    &format!("column {} is out of range for {} features", bad, dim),
                ));
            }
        }

        let mut params = Self::identity(dim);
        let normalize_all = cols_to_norm.is_none();
        for col in 0..dim {
            if !normalize_all && !cols_to_norm.unwrap_or(&[]).contains(&col) {
                continue;
            }
            let column = sample.index_axis(Axis(1), col);
            let mean = column.sum() / rows as f32;
            let variance = column.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / rows as f32;
            params.mean[col] = mean;
            params.stddev[col] = variance.sqrt().max(MIN_STDDEV);
        }
        Ok(params)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / stddev` element-wise; deterministic and side-effect free.
    pub fn apply(&self, state: ArrayView1<f32>) -> Result<Array1<f32>> {
        if state.len() != self.mean.len() {
            return Err(QuenchError::shape_mismatch(
                format!("state width {}", self.mean.len()),
                format!("state width {}", state.len()),
            ));
        }
        Ok((&state - &self.mean) / &self.stddev)
    }
}
