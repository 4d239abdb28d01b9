pub mod error;
pub mod routes;

use crate::state::LprServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Largest accepted upload (images and short clips)
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Build the API router
pub fn router(state: LprServiceState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Feed and latest plate
        .route("/video_feed", get(routes::video_feed))
        .route("/get_latest_plate", get(routes::get_latest_plate))
        // Source management
        .route(
            "/v1/source",
            get(routes::get_source).post(routes::configure_source),
        )
        .route(
            "/v1/source/upload",
            post(routes::upload_source).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Sightings and driver lookup
        .route("/v1/plates", get(routes::list_plates))
        .route("/search", post(routes::search))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
