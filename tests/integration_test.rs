use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use ndarray::Array3;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mri_seg_rs::mocks::{synthetic_knee, write_nifti, write_npy, MockClassificationModel, MockSegmentationModel};
use mri_seg_rs::{server, Config, MriService};

const BOUNDARY: &str = "mri-seg-test-boundary";

fn test_config(upload_dir: &Path) -> Config {
    let upload_dir = upload_dir.to_string_lossy().into_owned();
    Config::parse_from([
        "mri-seg-rs",
        "--segmentation-model",
        "unet.onnx",
        "--roi-size",
        "16",
        "--render-size",
        "64",
        "--upload-dir",
        upload_dir.as_str(),
    ])
}

fn app(upload_dir: &Path, with_classifier: bool) -> axum::Router {
    let service = MriService::new(
        MockSegmentationModel::new(6),
        with_classifier.then_some(MockClassificationModel),
        test_config(upload_dir),
    );
    server::router(Arc::new(service))
}

fn multipart_request(uri: &str, field: &str, file_name: &str, contents: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    write!(
        body,
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        BOUNDARY, field, file_name
    )
    .unwrap();
    body.extend_from_slice(contents);
    write!(body, "\r\n--{}--\r\n", BOUNDARY).unwrap();

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> Value {
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn nifti_bytes(dir: &Path) -> Vec<u8> {
    let path = dir.join("fixture.nii");
    write_nifti(&path, synthetic_knee((20, 24, 16)).view(), [1.0, 0.8, 1.5]).unwrap();
    std::fs::read(path).unwrap()
}

fn assert_png_data_uri(value: &Value) {
    let uri = value.as_str().expect("image is a string");
    let encoded = uri
        .strip_prefix("data:image/png;base64,")
        .expect("data URI prefix");
    let bytes = STANDARD.decode(encoded).expect("valid base64");
    let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png).expect("valid PNG");
    assert!(image.width() > 0 && image.height() > 0);
}

#[tokio::test]
async fn test_segment_returns_three_png_slices() {
    let temp_dir = TempDir::new().unwrap();
    let fixtures = TempDir::new().unwrap();
    let upload_dir = temp_dir.path().join("uploads");

    let request = multipart_request("/segment", "file", "knee.nii", &nifti_bytes(fixtures.path()));
    let json = send(app(&upload_dir, false), request).await;

    assert_eq!(json["status"], "success");
    assert_eq!(json["classes"], serde_json::json!([0, 1, 2, 3, 4, 5]));

    let images = json["images"].as_object().expect("images object");
    assert_eq!(images.len(), 3);
    for key in ["axial", "coronal", "sagittal"] {
        assert_png_data_uri(&images[key]);
    }

    // scratch files are gone once the response is out
    assert_eq!(std::fs::read_dir(&upload_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_segment_accepts_gzip_nifti() {
    let temp_dir = TempDir::new().unwrap();
    let fixtures = TempDir::new().unwrap();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&nifti_bytes(fixtures.path())).unwrap();
    let compressed = encoder.finish().unwrap();

    let request = multipart_request("/segment", "file", "knee.nii.gz", &compressed);
    let json = send(app(temp_dir.path(), false), request).await;

    assert_eq!(json["status"], "success");
}

#[tokio::test]
async fn test_classify_depth_40_array() {
    let temp_dir = TempDir::new().unwrap();
    let fixtures = TempDir::new().unwrap();
    let path = fixtures.path().join("exam.npy");
    let array = Array3::from_shape_fn((40, 16, 16), |(d, h, w)| (d * 7 + h * 3 + w) as f32);
    write_npy(&path, array.view()).unwrap();

    let request = multipart_request("/classify", "file", "exam.npy", &std::fs::read(&path).unwrap());
    let json = send(app(temp_dir.path(), true), request).await;

    assert_eq!(json["status"], "success");
    let prediction = json["prediction"].as_str().unwrap();
    assert!(["Normal", "Abnormal"].contains(&prediction));
    let probability = json["probability_abnormal"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&probability));
}

#[tokio::test]
async fn test_corrupt_uploads_yield_error_payload() {
    let temp_dir = TempDir::new().unwrap();
    let garbage = b"this is not a medical image".repeat(20);

    for uri in ["/segment", "/classify"] {
        let request = multipart_request(uri, "file", "broken.bin", &garbage);
        let json = send(app(temp_dir.path(), true), request).await;

        assert_eq!(json["status"], "error", "{}", uri);
        assert!(!json["message"].as_str().unwrap().is_empty());
        assert!(json.get("images").is_none());
    }
}

#[tokio::test]
async fn test_missing_file_field() {
    let temp_dir = TempDir::new().unwrap();
    let request = multipart_request("/segment", "scan", "knee.nii", b"data");
    let json = send(app(temp_dir.path(), false), request).await;

    assert_eq!(json["status"], "error");
    assert!(json["message"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn test_non_multipart_body_yields_error_payload() {
    let temp_dir = TempDir::new().unwrap();

    for (uri, content_type) in [
        ("/segment", "application/json"),
        ("/classify", "multipart/form-data"),
    ] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from("{}"))
            .unwrap();
        let json = send(app(temp_dir.path(), true), request).await;

        assert_eq!(json["status"], "error", "{}", uri);
        assert!(json["message"].as_str().unwrap().starts_with("Upload error"));
    }
}

#[tokio::test]
async fn test_classify_without_model() {
    let temp_dir = TempDir::new().unwrap();
    let request = multipart_request("/classify", "file", "exam.npy", b"data");
    let json = send(app(temp_dir.path(), false), request).await;

    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_health() {
    let temp_dir = TempDir::new().unwrap();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let json = send(app(temp_dir.path(), true), request).await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["classification_enabled"], true);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let temp_dir = TempDir::new().unwrap();
    let request = Request::builder()
        .uri("/health")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app(temp_dir.path(), false).oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
