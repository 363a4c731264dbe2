//! axum router and server entry point.

pub mod error;
pub mod handlers;
pub mod types;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use bcd_core::backend::{InferenceBackend, NdArrayDevice};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::ServeConfig,
    error::{Result, ServeError},
    service::InferenceService,
};
use handlers::AppState;

/// Build the API router.
///
/// Routes:
///
/// - `GET /`: model status
/// - `POST /predict`: multipart upload (field `image`), returns a session id
/// - `GET /explain/{session_id}`: Grad-CAM and LIME images for that session
pub fn router(service: Arc<InferenceService<InferenceBackend>>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/predict", post(handlers::predict))
        .route("/explain/:session_id", get(handlers::explain))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

/// Load the model, bind the configured address and serve until shutdown.
pub async fn run(config: ServeConfig) -> Result<()> {
    let device = NdArrayDevice::default();
    let service = tokio::task::spawn_blocking({
        let config = config.clone();
        move || InferenceService::<InferenceBackend>::from_config(&config, &device)
    })
    .await
    .map_err(|e| ServeError::internal(format!("startup task failed: {e}")))??;

    if service.is_ready() {
        info!("Model ready");
    }
    let app = router(Arc::new(service), config.server.max_upload_bytes);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
