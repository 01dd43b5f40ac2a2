//! HTTP router setup.

use crate::chain::ForwarderChain;
use crate::handlers;
use crate::middleware::inject_request_id;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request bodies above this are refused before parsing.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Create the application router.
pub fn create<C: ForwarderChain + ?Sized + 'static>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<C>))
        .route("/ready", get(handlers::ready::<C>))
        .route("/metrics", get(handlers::metrics::<C>))
        .route("/relay", post(handlers::relay::<C>))
        .route("/relay/{handle}", get(handlers::relay_status::<C>))
        .route("/relay/{handle}/retry", post(handlers::retry::<C>))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
