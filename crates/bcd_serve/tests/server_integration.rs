use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bcd_core::backend::InferenceBackend;
use bcd_explain::{QuickshiftConfig, SurrogateConfig};
use bcd_models::{Classifier, ClassifierConfig};
use bcd_serve::{server, InferenceService, ServeConfig};
use image::{GrayImage, Luma};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "bcd-test-boundary";

fn test_config() -> ServeConfig {
    let mut config = ServeConfig::default();
    config.model.architecture = ClassifierConfig::tiny();
    config.surrogate = SurrogateConfig {
        num_samples: 8,
        batch_size: 4,
        quickshift: QuickshiftConfig {
            kernel_size: 2.0,
            ..Default::default()
        },
        ..Default::default()
    };
    config
}

fn ready_app() -> Router {
    let config = test_config();
    let classifier =
        Classifier::new(config.model.architecture.clone(), &Default::default()).unwrap();
    let service = InferenceService::<InferenceBackend>::with_classifier(classifier, &config).unwrap();
    server::router(Arc::new(service), config.server.max_upload_bytes)
}

fn unavailable_app() -> Router {
    let config = test_config();
    let service =
        InferenceService::<InferenceBackend>::from_config(&config, &Default::default()).unwrap();
    server::router(Arc::new(service), config.server.max_upload_bytes)
}

fn png_bytes() -> Vec<u8> {
    let img = GrayImage::from_fn(160, 120, |x, y| {
        let dx = x as i32 - 80;
        let dy = y as i32 - 60;
        Luma([if dx * dx + dy * dy < 900 { 40 } else { 180 }])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_request(field: &str, payload: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"scan.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_status_reports_model_state() {
    let response = ready_app().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["model_ready"], true);
    assert!(body["message"].as_str().unwrap().ends_with("Active"));

    let response = unavailable_app().oneshot(get("/")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["model_ready"], false);
    assert!(body["message"].as_str().unwrap().ends_with("Failed to Load"));
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let response = unavailable_app()
        .oneshot(multipart_request("image", &png_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().contains("initialize"));
}

#[tokio::test]
async fn test_predict_then_explain() {
    let app = ready_app();

    let response = app
        .clone()
        .oneshot(multipart_request("image", &png_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let label = body["label"].as_str().unwrap();
    assert!(["benign", "malignant", "normal"].contains(&label));
    let percents: Vec<f64> = ["benign", "malignant", "normal"]
        .iter()
        .map(|k| body["probabilities"][k].as_str().unwrap().parse().unwrap())
        .collect();
    let total: f64 = percents.iter().sum();
    assert!((total - 100.0).abs() < 0.05);
    assert_eq!(
        body["confidence"].as_str().unwrap(),
        body["probabilities"][label].as_str().unwrap()
    );

    let session_id = body["session_id"].as_str().unwrap().to_string();
    let response = app
        .oneshot(get(&format!("/explain/{session_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["session_id"], session_id.as_str());

    for key in ["gradcam_image_base64", "lime_image_base64"] {
        let bytes = STANDARD.decode(body[key].as_str().unwrap()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (224, 224));
    }
}

#[tokio::test]
async fn test_explain_unknown_session_is_bad_request() {
    let response = ready_app()
        .oneshot(get(&format!("/explain/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().contains("/predict"));
}

#[tokio::test]
async fn test_explain_malformed_session_id() {
    let response = ready_app()
        .oneshot(get("/explain/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_missing_image_field() {
    let response = ready_app()
        .oneshot(multipart_request("file", &png_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_predict_undecodable_image() {
    let response = ready_app()
        .oneshot(multipart_request("image", b"definitely not a png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().starts_with("Input error"));
}
