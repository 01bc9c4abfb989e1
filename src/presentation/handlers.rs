// HTTP request handlers
use crate::application::dashboard_service::{DashboardCommand, DashboardView};
use crate::domain::measurement::MeasurementKind;
use crate::presentation::app_state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct SelectionRequest {
    pub measurement: MeasurementKind,
}

#[derive(Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: bool,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Current dashboard view
pub async fn get_dashboard(State(state): State<Arc<AppState>>) -> Json<DashboardView> {
    Json(state.view.borrow().clone())
}

/// Push every new dashboard view as a server-sent event
pub async fn stream_dashboard(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.view.clone();
    let stream = async_stream::stream! {
        loop {
            let view = rx.borrow_and_update().clone();
            match Event::default().json_data(&view) {
                Ok(event) => yield Ok::<_, Infallible>(event),
                Err(e) => tracing::warn!("Failed to encode dashboard event: {}", e),
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn select_measurement(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectionRequest>,
) -> StatusCode {
    send(&state, DashboardCommand::SelectMeasurement(request.measurement)).await
}

pub async fn set_auto_refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutoRefreshRequest>,
) -> StatusCode {
    send(&state, DashboardCommand::SetAutoRefresh(request.enabled)).await
}

pub async fn refresh_now(State(state): State<Arc<AppState>>) -> StatusCode {
    send(&state, DashboardCommand::RefreshNow).await
}

async fn send(state: &AppState, command: DashboardCommand) -> StatusCode {
    match state.commands.send(command).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!("Dashboard dispatcher is gone, dropping {:?}", e.0);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
