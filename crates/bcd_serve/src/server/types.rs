//! JSON request and response bodies.

use bcd_core::{ClassLabel, PredictionResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `GET /`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Human-readable status line.
    pub message: String,
    /// Whether predictions can be served.
    pub model_ready: bool,
}

/// Percentages with two decimals, e.g. `"87.31"`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Probabilities {
    /// Benign probability.
    pub benign: String,
    /// Malignant probability.
    pub malignant: String,
    /// Normal probability.
    pub normal: String,
}

/// Body of `POST /predict`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Id to pass to `/explain`.
    pub session_id: Uuid,
    /// Predicted class.
    pub label: ClassLabel,
    /// Probability of `label`, as a percentage.
    pub confidence: String,
    /// Per-class percentages.
    pub probabilities: Probabilities,
}

/// Body of `GET /explain/{session_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExplainResponse {
    /// Session the images belong to.
    pub session_id: Uuid,
    /// Encoded Grad-CAM overlay.
    pub gradcam_image_base64: String,
    /// Encoded LIME image.
    pub lime_image_base64: String,
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub detail: String,
}

fn percent(p: f32) -> String {
    format!("{:.2}", p * 100.0)
}

impl PredictResponse {
    /// Format a prediction for the wire.
    pub fn new(session_id: Uuid, prediction: &PredictionResult) -> Self {
        Self {
            session_id,
            label: prediction.label,
            confidence: percent(prediction.confidence),
            probabilities: Probabilities {
                benign: percent(prediction.probability(ClassLabel::Benign)),
                malignant: percent(prediction.probability(ClassLabel::Malignant)),
                normal: percent(prediction.probability(ClassLabel::Normal)),
            },
        }
    }
}
