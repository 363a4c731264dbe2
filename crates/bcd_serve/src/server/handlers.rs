//! Request handlers.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bcd_core::backend::InferenceBackend;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::types::{ExplainResponse, PredictResponse, StatusResponse};
use crate::service::InferenceService;

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Inference backend for every request.
    pub service: Arc<InferenceService<InferenceBackend>>,
}

/// `GET /`: service name and model status.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let model_ready = state.service.is_ready();
    let status = if model_ready { "Active" } else { "Failed to Load" };
    Json(StatusResponse {
        message: format!("BCD model API - ResNet-50. Status: {status}"),
        model_ready,
    })
}

/// `POST /predict`: classify the uploaded image and open a session.
pub async fn predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    state.service.classifier()?;

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            image = Some(bytes);
        }
    }
    let bytes = image.ok_or_else(|| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Missing multipart field `{IMAGE_FIELD}`"),
        )
    })?;
    info!(bytes = bytes.len(), "Received prediction request");

    let service = state.service.clone();
    let session = tokio::task::spawn_blocking(move || service.predict_bytes(&bytes))
        .await
        .map_err(|e| ApiError::internal(format!("Prediction task failed: {e}")))??;

    Ok(Json(PredictResponse::new(session.id, &session.prediction)))
}

/// `GET /explain/{session_id}`: Grad-CAM and LIME images, base64-encoded.
pub async fn explain(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ExplainResponse>, ApiError> {
    info!(%session_id, "Received explanation request");

    let service = state.service.clone();
    let explanations = tokio::task::spawn_blocking(move || service.explain(&session_id))
        .await
        .map_err(|e| ApiError::internal(format!("Explanation task failed: {e}")))??;

    Ok(Json(ExplainResponse {
        session_id: explanations.session_id,
        gradcam_image_base64: STANDARD.encode(&explanations.saliency.bytes),
        lime_image_base64: STANDARD.encode(&explanations.surrogate.bytes),
    }))
}
