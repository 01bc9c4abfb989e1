// Presentation layer - HTTP surface for the dashboard renderer
pub mod app_state;
pub mod handlers;

use app_state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use handlers::{
    get_dashboard, health_check, refresh_now, select_measurement, set_auto_refresh,
    stream_dashboard,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboard", get(get_dashboard))
        .route("/dashboard/events", get(stream_dashboard))
        .route("/selection", put(select_measurement))
        .route("/auto-refresh", put(set_auto_refresh))
        .route("/refresh", post(refresh_now))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
