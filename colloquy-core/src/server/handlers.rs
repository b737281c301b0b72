use axum::{
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Response, StatusCode, header},
    response::{IntoResponse, Json},
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use super::{AppState, ChainInput, InvokeRequest, InvokeResponse, RunMetadata};
use crate::error::ColloquyError;

/// JSON error body with a status code
#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ColloquyError> for ApiError {
    fn from(err: ColloquyError) -> Self {
        let status = match &err {
            ColloquyError::Generation(_) => StatusCode::BAD_GATEWAY,
            ColloquyError::Template(_) | ColloquyError::TrimPolicy(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "Chain request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn validate(request: &InvokeRequest) -> Result<(), ApiError> {
    if let ChainInput::Chat(input) = &request.input
        && input.messages.is_empty()
    {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "input.messages must not be empty",
        ));
    }
    Ok(())
}

pub(super) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "model": state.model,
        "sessions": state.store().len(),
    }))
}

pub(super) async fn handle_invoke(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let Json(request) = body?;
    validate(&request)?;

    let run_id = Uuid::new_v4();
    tracing::debug!(%run_id, session_id = ?request.session_id(), "Invoking chain");

    let output = state.run(request).await?;
    Ok(Json(InvokeResponse {
        output,
        metadata: RunMetadata { run_id },
    }))
}

pub(super) async fn handle_stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Response<Body>, ApiError> {
    let Json(request) = body?;
    validate(&request)?;

    let run_id = Uuid::new_v4();
    tracing::debug!(%run_id, session_id = ?request.session_id(), "Streaming chain");

    let events = async_stream::stream! {
        yield Ok::<_, Infallible>(sse_event("metadata", &json!({ "run_id": run_id })));

        let mut fragments = state.stream(request);
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => yield Ok(sse_event("data", &json!(text))),
                Err(e) => {
                    tracing::warn!(%run_id, error = %e, "Chain stream failed");
                    yield Ok(sse_event("error", &json!({ "error": e.to_string() })));
                    return;
                }
            }
        }
        yield Ok("event: end\n\n".to_string());
    };

    let mut response = Response::new(Body::from_stream(events));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

fn sse_event(event: &str, data: &serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}
