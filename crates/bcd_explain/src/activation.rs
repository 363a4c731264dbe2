//! Activation and gradient capture.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use bcd_models::{Activation, Graph, GraphError};

use crate::error::{ExplainError, Result};

/// Activation of one layer together with the gradient of a scalar score with
/// respect to it.
#[derive(Debug, Clone)]
pub struct GradientCapture<B: Backend> {
    layer: String,
    activation: Tensor<B, 4>,
    gradient: Tensor<B, 4>,
}

impl<B: Backend> GradientCapture<B> {
    /// Name of the captured layer.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// `(N, C, H, W)` activation.
    pub fn activation(&self) -> &Tensor<B, 4> {
        &self.activation
    }

    /// Gradient, same shape as the activation.
    pub fn gradient(&self) -> &Tensor<B, 4> {
        &self.gradient
    }

    /// Split into `(activation, gradient)`.
    pub fn into_parts(self) -> (Tensor<B, 4>, Tensor<B, 4>) {
        (self.activation, self.gradient)
    }
}

/// Run `graph` on `input` and differentiate the maximum of its output with
/// respect to the activation of `layer`.
///
/// The activation is detached and re-marked as a gradient leaf, so the
/// backward pass stops there and nothing upstream accumulates gradients.
///
/// # Errors
///
/// Returns [`ExplainError::UnknownLayer`] if `layer` is not in `graph`,
/// [`ExplainError::Tensor`] if it is not spatial, and
/// [`ExplainError::MissingGradient`] if the score does not depend on it.
pub fn capture_max_gradient<B: AutodiffBackend>(
    graph: &Graph<B>,
    input: Tensor<B, 4>,
    layer: &str,
) -> Result<GradientCapture<B::InnerBackend>> {
    let (leaf, output) = graph
        .forward_tapped(Activation::Spatial(input), layer)
        .map_err(|e| match e {
            GraphError::UnknownNode(_) => ExplainError::UnknownLayer(layer.to_string()),
            other => ExplainError::Tensor(other.to_string()),
        })?;

    let leaf = leaf.into_spatial().ok_or_else(|| {
        ExplainError::Tensor(format!("layer {layer} does not produce feature maps"))
    })?;

    let score = match output {
        Activation::Spatial(t) => t.max(),
        Activation::Flat(t) => t.max(),
    };
    let grads = score.backward();
    let gradient = leaf
        .grad(&grads)
        .ok_or_else(|| ExplainError::MissingGradient(layer.to_string()))?;

    Ok(GradientCapture {
        layer: layer.to_string(),
        activation: leaf.inner(),
        gradient,
    })
}
