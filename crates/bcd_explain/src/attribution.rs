//! Class activation maps.

use burn::prelude::*;

use crate::error::{ExplainError, Result};

/// Attribution over the spatial grid of a feature layer.
#[derive(Debug, Clone)]
pub struct AttributionMap<B: Backend> {
    /// `(N, 1, H, W)` attribution values.
    pub values: Tensor<B, 4>,
}

impl<B: Backend> AttributionMap<B> {
    /// Wrap raw attribution values.
    pub fn new(values: Tensor<B, 4>) -> Self {
        Self { values }
    }

    /// Shape of the map.
    pub fn shape(&self) -> [usize; 4] {
        self.values.dims()
    }

    /// Divide by the maximum so values fall in `[0, 1]`.
    ///
    /// A map whose maximum is not positive, or that holds non-finite values,
    /// becomes all zeros instead of NaN.
    pub fn normalize_by_max(&self) -> Self {
        let host: Vec<f32> = self.values.to_data().to_vec().unwrap_or_default();
        let finite = !host.is_empty() && host.iter().all(|v| v.is_finite());
        let max = host.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let values = if finite && max > 0.0 {
            self.values.clone() / max
        } else {
            self.values.zeros_like()
        };
        Self { values }
    }

    /// The first map of the batch as a [`Heatmap`].
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Tensor`] for an empty batch or unreadable data.
    pub fn to_heatmap(&self) -> Result<Heatmap> {
        let [n, c, h, w] = self.shape();
        if n == 0 || c != 1 {
            return Err(ExplainError::Tensor(format!(
                "expected a (N, 1, H, W) map, got {:?}",
                self.shape()
            )));
        }
        let values: Vec<f32> = self
            .values
            .clone()
            .slice([0..1, 0..1, 0..h, 0..w])
            .into_data()
            .to_vec()
            .map_err(|e| ExplainError::Tensor(format!("{e:?}")))?;
        Heatmap::new(w, h, values)
    }
}

/// Grad-CAM from an activation and its gradient, both `(N, C, H, W)`.
///
/// Channel weights are the spatially averaged gradients; the map is the
/// rectified weighted channel sum, shape `(N, 1, H, W)`.
pub fn grad_cam<B: Backend>(activations: Tensor<B, 4>, gradients: Tensor<B, 4>) -> AttributionMap<B> {
    let weights = gradients.mean_dim(3).mean_dim(2);
    let cam = (activations * weights).sum_dim(1);
    AttributionMap::new(cam.clamp_min(0.0))
}

/// A single-channel map on a small grid, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl Heatmap {
    /// Wrap row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::Tensor`] if the length does not match.
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != width * height || values.is_empty() {
            return Err(ExplainError::Tensor(format!(
                "{} values for a {width}x{height} heatmap",
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Grid width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at row `y`, column `x`.
    pub fn get(&self, y: usize, x: usize) -> f32 {
        self.values[y * self.width + x]
    }

    /// Bilinear resize with pixel-center alignment and clamped borders.
    pub fn resize(&self, width: usize, height: usize) -> Vec<f32> {
        let xs = axis_weights(self.width, width);
        let ys = axis_weights(self.height, height);
        let mut out = Vec::with_capacity(width * height);
        for &(y0, y1, fy) in &ys {
            for &(x0, x1, fx) in &xs {
                let top = self.get(y0, x0) * (1.0 - fx) + self.get(y0, x1) * fx;
                let bottom = self.get(y1, x0) * (1.0 - fx) + self.get(y1, x1) * fx;
                out.push(top * (1.0 - fy) + bottom * fy);
            }
        }
        out
    }
}

/// Source indices and blend factor for each destination coordinate.
fn axis_weights(src: usize, dst: usize) -> Vec<(usize, usize, f32)> {
    let scale = src as f32 / dst as f32;
    (0..dst)
        .map(|d| {
            let pos = (d as f32 + 0.5) * scale - 0.5;
            let mut i = pos.floor();
            let mut f = pos - i;
            if i < 0.0 {
                i = 0.0;
                f = 0.0;
            }
            let i = i as usize;
            if i >= src - 1 {
                (src - 1, src - 1, 0.0)
            } else {
                (i, i + 1, f)
            }
        })
        .collect()
}
