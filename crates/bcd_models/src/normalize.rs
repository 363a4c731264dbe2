//! Caffe-style input normalization.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::graph::GraphError;

/// ImageNet channel means in BGR order.
pub const IMAGENET_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

/// Reorders channels RGB → BGR and subtracts per-channel means.
///
/// No scaling is applied, so inputs stay in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaffeNormalize {
    /// Means subtracted from the B, G and R channels.
    pub mean_bgr: [f32; 3],
}

impl Default for CaffeNormalize {
    fn default() -> Self {
        Self {
            mean_bgr: IMAGENET_MEAN_BGR,
        }
    }
}

impl CaffeNormalize {
    /// Normalize a `(N, 3, H, W)` RGB batch.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Shape`] if the input does not have 3 channels.
    pub fn apply<B: Backend>(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>, GraphError> {
        let [n, c, h, w] = x.dims();
        if c != 3 {
            return Err(GraphError::Shape {
                node: "preprocess_input".to_string(),
                detail: format!("expected 3 channels, got {c}"),
            });
        }
        let device = x.device();
        let channel = |i: usize| x.clone().slice([0..n, i..i + 1, 0..h, 0..w]);
        let bgr = Tensor::cat(vec![channel(2), channel(1), channel(0)], 1);
        let mean = Tensor::<B, 1>::from_floats(self.mean_bgr, &device).reshape([1, 3, 1, 1]);
        Ok(bgr - mean)
    }
}
