//! Explanation errors.

use bcd_core::BcdError;

/// Result type for explanation operations.
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Failures while computing or rendering an explanation.
#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    /// The requested layer is not part of the graph.
    #[error("Unknown target layer: {0}")]
    UnknownLayer(String),

    /// Backward pass produced no gradient for the tapped layer.
    #[error("No gradient reached layer {0}")]
    MissingGradient(String),

    /// Tensor had an unexpected shape or could not be read.
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Superpixel segmentation failed.
    #[error("Segmentation failed: {0}")]
    Segmentation(String),

    /// The surrogate model could not be fitted.
    #[error("Surrogate fit failed: {0}")]
    Solver(String),

    /// Image encoding failed.
    #[error("Failed to encode explanation image: {0}")]
    Encode(String),

    /// Invalid explainer configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ExplainError> for BcdError {
    fn from(err: ExplainError) -> Self {
        BcdError::computation(err.to_string())
    }
}
