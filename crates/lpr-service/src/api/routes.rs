use super::ApiError;
use crate::pipeline::worker::MJPEG_CONTENT_TYPE;
use crate::state::LprServiceState;
use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use common::plates::{PlateListResponse, PlateSearchRequest};
use common::sources::{SourceDescriptor, SourceUpdateResponse};
use common::validation::validate_plate;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

const DEFAULT_PLATE_LIMIT: u32 = 50;
const MAX_PLATE_LIMIT: u32 = 1000;

/// Annotated MJPEG stream; one worker per connection
pub async fn video_feed(State(state): State<LprServiceState>) -> impl IntoResponse {
    let frames = ReceiverStream::new(state.spawn_feed()).map(Ok::<_, Infallible>);
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
}

pub async fn get_latest_plate(State(state): State<LprServiceState>) -> impl IntoResponse {
    Json(state.latest_plate().await)
}

pub async fn get_source(State(state): State<LprServiceState>) -> impl IntoResponse {
    Json(state.current_source().await)
}

pub async fn configure_source(
    State(state): State<LprServiceState>,
    Json(descriptor): Json<SourceDescriptor>,
) -> Result<Json<SourceUpdateResponse>, ApiError> {
    let generation = state
        .configure_source(descriptor.clone())
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Json(SourceUpdateResponse {
        source: descriptor,
        generation,
    }))
}

/// Multipart upload; the `file` field becomes the active source
pub async fn upload_source(
    State(state): State<LprServiceState>,
    mut multipart: Multipart,
) -> Result<Json<SourceUpdateResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("uploaded file has no name"))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {}", e)))?;
        if data.is_empty() {
            return Err(ApiError::bad_request("uploaded file is empty"));
        }

        let response = state
            .install_upload(&file_name, &data)
            .await
            .map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
        return Ok(Json(response));
    }

    Err(ApiError::bad_request("multipart field 'file' is required"))
}

#[derive(Debug, Deserialize)]
pub struct PlatesQuery {
    pub limit: Option<u32>,
}

pub async fn list_plates(
    State(state): State<LprServiceState>,
    Query(query): Query<PlatesQuery>,
) -> Result<Json<PlateListResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PLATE_LIMIT)
        .clamp(1, MAX_PLATE_LIMIT);
    let plates = state.recent_plates(limit).await?;
    Ok(Json(PlateListResponse { plates }))
}

/// Driver registered for a plate
pub async fn search(
    State(state): State<LprServiceState>,
    Json(request): Json<PlateSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let plate = request.plate_output.trim();
    if plate.is_empty() {
        return Err(ApiError::bad_request("License plate is required."));
    }
    validate_plate(plate).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let directory = state
        .directory()
        .ok_or_else(|| ApiError::unavailable("Driver directory is not configured."))?;

    match directory.lookup(plate).await {
        Ok(Some(identity)) => Ok(Json(identity)),
        Ok(None) => Err(ApiError::not_found("No results found for the given plate.")),
        Err(e) => {
            tracing::error!(plate = %plate, error = %format!("{:#}", e), "driver lookup failed");
            Err(ApiError::internal("Database connection failed."))
        }
    }
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lpr-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<LprServiceState>) -> impl IntoResponse {
    match state.readiness().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!(error = %e, "plate store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
