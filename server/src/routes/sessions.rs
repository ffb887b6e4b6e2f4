//! Read-only HTTP access to live session logs.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use canvas::stroke::Stroke;

use crate::services::session::{self, SessionSummary};
use crate::state::{AppState, SessionId};

/// `GET /api/sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(session::session_summaries(&state).await)
}

/// `GET /api/sessions/{id}/strokes`. 404 once the session has been evicted.
pub async fn session_strokes(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Vec<Stroke>>, StatusCode> {
    session::session_strokes(&state, session_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
