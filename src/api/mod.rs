//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod state;

pub use routes::ApiError;

use self::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted CSV upload.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
/// Room for multipart boundaries and part headers around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
