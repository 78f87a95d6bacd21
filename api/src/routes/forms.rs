//! Form validation and send endpoints

use crate::models::{ErrorBody, FormPayload, SendResponse, ValidateResponse};
use crate::ApiState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use formflow_core::template::RequestMeta;
use formflow_core::{
    FieldValue, FlowError, FlowOutcome, FlowRequest, MemorySessionStore, PageRole, SessionStore,
};
use std::collections::HashMap;
use std::sync::Arc;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/:slug/validate", post(validate))
        .route("/:slug/send", post(send))
}

/// Resolve the caller's session and check its CSRF token
fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<Arc<MemorySessionStore>, Response> {
    let reject = |message: &str| {
        Err((StatusCode::FORBIDDEN, Json(ErrorBody::new(message))).into_response())
    };

    let Some(session_id) = headers.get("x-session-id").and_then(|v| v.to_str().ok()) else {
        return reject("missing session id");
    };
    let Some(store) = state.session(session_id) else {
        return reject("unknown session");
    };
    let Some(token) = headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) else {
        return reject("missing csrf token");
    };
    if !state.controller.verify_csrf(token, &store.id()) {
        return reject("invalid csrf token");
    }
    Ok(store)
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
        ..RequestMeta::default()
    }
}

fn to_submitted(fields: &HashMap<String, String>) -> formflow_core::form::SubmittedData {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), FieldValue::text(v)))
        .collect()
}

/// Validate a payload without touching the page flow
pub async fn validate(
    State(state): State<Arc<ApiState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<FormPayload>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let data = to_submitted(&payload.fields);
    let meta = request_meta(&headers);
    match state.controller.validate_payload(&slug, &data, &meta).await {
        Ok(errors) => {
            let valid = errors.is_empty();
            Json(ValidateResponse {
                valid,
                errors: if valid { None } else { Some(errors) },
                data: payload.fields,
            })
            .into_response()
        }
        Err(FlowError::FormNotFound(_)) => {
            tracing::debug!(%slug, "validate against unknown form");
            (StatusCode::NOT_FOUND, Json(ErrorBody::new("form not found"))).into_response()
        }
    }
}

/// Run the send path through the page-flow state machine
pub async fn send(
    State(state): State<Arc<ApiState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<FormPayload>,
) -> Response {
    let store = match authorize(&state, &headers) {
        Ok(store) => store,
        Err(resp) => return resp,
    };

    let req = FlowRequest {
        page_id: payload.page_id.clone(),
        post: Some(to_submitted(&payload.fields)),
        referer: headers
            .get("referer")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        meta: request_meta(&headers),
    };

    let outcome = state
        .controller
        .handle(store.clone() as Arc<dyn SessionStore>, &req)
        .await;

    let response = match outcome {
        FlowOutcome::NotBound => {
            return (StatusCode::NOT_FOUND, Json(ErrorBody::new("page not bound"))).into_response();
        }
        FlowOutcome::Redirect {
            page: PageRole::Complete,
            ..
        } => SendResponse {
            is_sent: true,
            data: payload.fields,
            errors: None,
            redirect_url: state.url_for(&slug, PageRole::Complete),
        },
        FlowOutcome::Redirect { page, .. } => {
            let errors = state
                .controller
                .session(store as Arc<dyn SessionStore>, &slug)
                .take_errors();
            SendResponse {
                is_sent: false,
                data: payload.fields,
                errors: if errors.is_empty() { None } else { Some(errors) },
                redirect_url: state.url_for(&slug, page),
            }
        }
        FlowOutcome::Render(_) => SendResponse {
            is_sent: false,
            data: payload.fields,
            errors: None,
            redirect_url: None,
        },
    };

    Json(response).into_response()
}
