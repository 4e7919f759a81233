//! Axum Handlers for the REST API
//!
//! Read-only views over the live relay sessions, documented with `utoipa`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    models::{ErrorResponse, HealthResponse, SessionInfo},
    state::AppState,
};

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        live_sessions: state.sessions.len().await,
    })
}

/// List the sessions currently connected, oldest first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Live sessions", body = [SessionInfo])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list().await)
}

/// Get one live session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session found", body = SessionInfo),
        (status = 404, description = "No live session with this id", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))
}
