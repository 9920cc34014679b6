use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::image_store::{ImageRecord, ImageStore};
use crate::s3_gateway::ObjectStorage;
use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ImageStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub presigned_url_expiry: Duration,
}

/// Response to an original upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    /// Presigned URL of the stored original
    pub url: String,
}

/// Response to a mask upload
#[derive(Debug, Serialize)]
pub struct MaskUploadResponse {
    pub id: String,
    /// Presigned URL of the stored mask
    pub mask_url: String,
}

/// Image lookup response
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub id: String,
    pub original_url: String,
    /// Null until a mask has been uploaded
    pub mask_url: Option<String>,
}

/// File part pulled out of a multipart upload
#[derive(Debug)]
struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    bytes: Bytes,
}

/// Name used when the upload carries no usable filename
const FALLBACK_FILENAME: &str = "blob";

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ready", get(readiness_check))
        .route("/api/upload", post(upload_image))
        .route("/api/upload/:image_id/mask", post(upload_mask))
        .route("/api/images/:image_id", get(get_image))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    // Wildcards are not allowed together with credentials, so `*` echoes the caller's origin
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring unparsable CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Mask Drawing App API" }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": format!("{:#}", e)
            })),
        ),
    }
}

/// Store a new original and create its record
#[instrument(skip(state, multipart))]
async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let file = read_file_field(multipart).await?;
    let image_id = Uuid::new_v4().to_string();
    let key = original_key(&file.filename);

    state.storage.put(&key, file.bytes, file.content_type).await?;

    let record = ImageRecord::new(image_id.as_str(), key.as_str());
    if let Err(e) = state.store.insert(&record).await {
        warn!(image_id = %image_id, key = %key, "Stored original has no image record");
        return Err(e.into());
    }

    let url = state
        .storage
        .sign_read_url(&key, state.presigned_url_expiry)
        .await?;

    metrics::counter!("mask_canvas.originals.uploaded").increment(1);
    info!(image_id = %image_id, key = %key, "Original uploaded");

    Ok(Json(UploadResponse { id: image_id, url }))
}

/// Store a mask for an existing image
#[instrument(skip(state, multipart))]
async fn upload_mask(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<MaskUploadResponse>, ApiError> {
    let mut record = state
        .store
        .find_by_id(&image_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let file = read_file_field(multipart).await?;
    let key = mask_key(&image_id, &file.filename);

    state.storage.put(&key, file.bytes, file.content_type).await?;

    record.set_mask_key(key.as_str());
    if let Err(e) = state.store.update(&record).await {
        warn!(image_id = %image_id, key = %key, "Stored mask is not referenced by its image record");
        return Err(e.into());
    }

    let mask_url = state
        .storage
        .sign_read_url(&key, state.presigned_url_expiry)
        .await?;

    metrics::counter!("mask_canvas.masks.uploaded").increment(1);
    info!(image_id = %image_id, key = %key, "Mask uploaded");

    Ok(Json(MaskUploadResponse {
        id: image_id,
        mask_url,
    }))
}

/// Fresh URLs for an image and its mask
#[instrument(skip(state))]
async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let record = state
        .store
        .find_by_id(&image_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let original_url = state
        .storage
        .sign_read_url(&record.original_key, state.presigned_url_expiry)
        .await?;

    let mask_url = match record.mask_key {
        Some(ref key) => Some(
            state
                .storage
                .sign_read_url(key, state.presigned_url_expiry)
                .await?,
        ),
        None => None,
    };

    Ok(Json(ImageResponse {
        id: record.id,
        original_url,
        mask_url,
    }))
}

/// Pull the `file` part out of a multipart body
async fn read_file_field(mut multipart: Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = sanitize_filename(field.file_name());
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;

        return Ok(UploadedFile {
            filename,
            content_type,
            bytes,
        });
    }

    Err(ApiError::Internal("missing file field".to_string()))
}

/// Last path segment of a client-supplied filename
fn sanitize_filename(name: Option<&str>) -> String {
    let base = name
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .map(str::trim)
        .unwrap_or_default();

    match base {
        "" | "." | ".." => FALLBACK_FILENAME.to_string(),
        other => other.to_string(),
    }
}

fn original_key(filename: &str) -> String {
    format!("originals/{}", filename)
}

fn mask_key(image_id: &str, filename: &str) -> String {
    format!("masks/{}/{}", image_id, filename)
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting mask canvas API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
