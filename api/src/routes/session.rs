//! Session bootstrap endpoint

use crate::models::SessionInit;
use crate::ApiState;
use axum::extract::State;
use axum::Json;
use formflow_core::SessionStore;
use std::sync::Arc;

/// Open a session and hand the client its id plus CSRF token. The client
/// echoes both back via `X-Session-Id` and `X-CSRF-Token` headers.
pub async fn create_session(State(state): State<Arc<ApiState>>) -> Json<SessionInit> {
    let store = state.open_session();
    let session_id = store.id();
    let csrf_token = state.controller.csrf_token(&session_id);
    tracing::debug!(%session_id, "REST session opened");
    Json(SessionInit {
        session_id,
        csrf_token,
    })
}
