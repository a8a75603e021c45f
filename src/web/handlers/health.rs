//! Health check HTTP handler

use axum::{extract::State, response::Response};

use crate::web::{
    AppState,
    responses::{HealthResponse, ok},
};

/// Liveness probe
pub async fn health_check(State(state): State<AppState>) -> Response {
    ok(HealthResponse::healthy(state.start_time.elapsed().as_secs()))
}
