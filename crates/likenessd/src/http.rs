use crate::engine::{EngineError, EngineHandle};
use crate::upload::validate_upload;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use likeness_core::{CompareError, FaceCrop, RawImage, Side};
use serde::Serialize;
use std::io::Cursor;
use tower_http::cors::{AllowOrigin, CorsLayer};

const PROCESS_FAILED: &str = "Failed to process images";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/api/compare", post(compare))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }

    fn models_not_loaded() -> Self {
        Self::internal("Models not loaded")
    }

    fn multipart(err: MultipartError) -> Self {
        Self { status: err.status(), message: err.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        if err.models_unavailable() {
            tracing::warn!(error = %err, "comparison refused");
            return Self::models_not_loaded();
        }
        if let EngineError::Failed(failed) = &err {
            match &failed.error {
                CompareError::NoFaceDetected { side } => {
                    return Self::bad_request(format!("No face detected in {side} image"));
                }
                CompareError::MalformedImage { .. } => return Self::bad_request(PROCESS_FAILED),
                _ => {}
            }
        }
        tracing::error!(error = %err, "comparison failed");
        Self::internal(PROCESS_FAILED)
    }
}

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub is_same_person: bool,
    pub confidence: f64,
    pub processed_before_image: String,
    pub processed_after_image: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_type: Option<String>,
    pub scaler_type: Option<String>,
}

struct Upload {
    filename: String,
    bytes: Bytes,
}

fn title(side: Side) -> &'static str {
    match side {
        Side::Before => "Before",
        Side::After => "After",
    }
}

/// `POST /api/compare` with multipart fields `before_image` and `after_image`.
pub async fn compare(State(state): State<AppState>, multipart: Multipart) -> Result<Json<CompareResponse>, ApiError> {
    if !state.engine.status().model_loaded {
        return Err(ApiError::models_not_loaded());
    }

    let (before, after) = read_uploads(multipart).await?;
    let (Some(before), Some(after)) = (before, after) else {
        return Err(ApiError::bad_request("Both before and after images are required"));
    };
    if before.filename.is_empty() || after.filename.is_empty() {
        return Err(ApiError::bad_request("No selected files"));
    }
    for (side, upload) in [(Side::Before, &before), (Side::After, &after)] {
        validate_upload(&upload.filename, upload.bytes.len(), state.max_upload_bytes)
            .map_err(|e| ApiError::bad_request(format!("{} image: {e}", title(side))))?;
    }

    let (before_image, after_image) = decode_pair(before.bytes, after.bytes).await?;
    tracing::debug!(
        before = ?(before_image.width(), before_image.height()),
        after = ?(after_image.width(), after_image.height()),
        "images decoded"
    );

    let comparison = state.engine.compare(before_image, after_image).await?;
    let encode = |crop: &FaceCrop| {
        encode_crop(crop).map_err(|e| {
            tracing::error!(error = %e, "failed to encode face crop");
            ApiError::internal(PROCESS_FAILED)
        })
    };

    Ok(Json(CompareResponse {
        is_same_person: comparison.decision.same_person,
        confidence: comparison.decision.confidence,
        processed_before_image: encode(&comparison.before)?,
        processed_after_image: encode(&comparison.after)?,
    }))
}

/// `GET /api/health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.engine.status();
    Json(HealthResponse {
        status: "healthy",
        model_loaded: status.model_loaded,
        model_type: status.model_type.clone(),
        scaler_type: status.scaler_type.clone(),
    })
}

async fn read_uploads(mut multipart: Multipart) -> Result<(Option<Upload>, Option<Upload>), ApiError> {
    let mut before = None;
    let mut after = None;
    while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        // A part without a filename is a plain form value, not a file.
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let slot = match name.as_str() {
            "before_image" => &mut before,
            "after_image" => &mut after,
            _ => continue,
        };
        let bytes = field.bytes().await.map_err(ApiError::multipart)?;
        *slot = Some(Upload { filename, bytes });
    }
    Ok((before, after))
}

async fn decode_pair(before: Bytes, after: Bytes) -> Result<(RawImage, RawImage), ApiError> {
    let decoded = tokio::task::spawn_blocking(move || {
        let before = RawImage::decode(&before).map_err(|e| CompareError::malformed(Side::Before, e))?;
        let after = RawImage::decode(&after).map_err(|e| CompareError::malformed(Side::After, e))?;
        Ok::<_, CompareError>((before, after))
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "decode task failed");
        ApiError::internal(PROCESS_FAILED)
    })?;

    decoded.map_err(|e| {
        tracing::warn!(error = %e, "rejecting undecodable upload");
        ApiError::bad_request(PROCESS_FAILED)
    })
}

/// Face crop as a base64 JPEG, three channels.
pub fn encode_crop(crop: &FaceCrop) -> Result<String, image::ImageError> {
    let rgb = DynamicImage::ImageLuma8(crop.as_gray().clone()).to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::test_engine;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use image::{Rgb, RgbImage};

    const BOUNDARY: &str = "likeness-test-boundary";

    fn state(engine: EngineHandle) -> AppState {
        AppState { engine, max_upload_bytes: 15 * 1024 * 1024 }
    }

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 48, Rgb(rgb));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn multipart_request(parts: &[(&str, Option<&str>, Vec<u8>)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            let filename = filename.map(|f| format!("; filename=\"{f}\"")).unwrap_or_default();
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"{filename}\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/compare")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn call_compare(state: AppState, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let multipart = Multipart::from_request(req, &state).await.unwrap();
        let response = compare(State(state), multipart).await.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_compare_same_image() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[
            ("before_image", Some("a.png"), gray.clone()),
            ("after_image", Some("b.PNG"), gray),
        ]);
        let (status, body) = call_compare(state(test_engine()), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_same_person"], true);
        assert!(body["confidence"].as_f64().unwrap() > 0.5);
        for key in ["processed_before_image", "processed_after_image"] {
            let jpeg = STANDARD.decode(body[key].as_str().unwrap()).unwrap();
            let crop = image::load_from_memory(&jpeg).unwrap();
            assert_eq!((crop.width(), crop.height()), (128, 128));
        }
    }

    #[tokio::test]
    async fn test_missing_part() {
        let req = multipart_request(&[("before_image", Some("a.png"), png([128, 128, 128]))]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Both before and after images are required");
    }

    #[tokio::test]
    async fn test_empty_filename() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[("before_image", Some(""), gray.clone()), ("after_image", Some("b.png"), gray)]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No selected files");
    }

    #[tokio::test]
    async fn test_part_without_filename_is_not_a_file() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[("before_image", None, gray.clone()), ("after_image", Some("b.png"), gray)]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Both before and after images are required");
    }

    #[tokio::test]
    async fn test_rejected_extension_names_side() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[
            ("before_image", Some("a.png"), gray.clone()),
            ("after_image", Some("b.gif"), gray),
        ]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "After image: Invalid file format. Only JPG, JPEG, PNG, and WEBP formats are allowed."
        );
    }

    #[tokio::test]
    async fn test_oversized_upload() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[
            ("before_image", Some("a.png"), gray.clone()),
            ("after_image", Some("b.png"), gray),
        ]);
        let small = AppState { engine: test_engine(), max_upload_bytes: 16 };
        let (status, body) = call_compare(small, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Before image: File size exceeds"));
    }

    #[tokio::test]
    async fn test_undecodable_upload() {
        let req = multipart_request(&[
            ("before_image", Some("a.png"), png([128, 128, 128])),
            ("after_image", Some("b.jpg"), b"not an image".to_vec()),
        ]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], PROCESS_FAILED);
    }

    #[tokio::test]
    async fn test_no_face_names_side() {
        let req = multipart_request(&[
            ("before_image", Some("a.png"), png([128, 128, 128])),
            ("after_image", Some("b.png"), png([0, 0, 0])),
        ]);
        let (status, body) = call_compare(state(test_engine()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No face detected in after image");
    }

    #[tokio::test]
    async fn test_models_not_loaded() {
        let gray = png([128, 128, 128]);
        let req = multipart_request(&[
            ("before_image", Some("a.png"), gray.clone()),
            ("after_image", Some("b.png"), gray),
        ]);
        let (status, body) = call_compare(state(EngineHandle::unavailable("no detector")), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Models not loaded");
    }

    #[tokio::test]
    async fn test_health_reports_models() {
        let Json(loaded) = health(State(state(test_engine()))).await;
        assert_eq!(loaded.status, "healthy");
        assert!(loaded.model_loaded);
        assert_eq!(loaded.model_type.as_deref(), Some("logistic_regression"));

        let Json(missing) = health(State(state(EngineHandle::unavailable("no detector")))).await;
        assert_eq!(missing.status, "healthy");
        assert!(!missing.model_loaded);
        assert!(missing.model_type.is_none());
    }
}
