//! HTTP surface: streaming and non-streaming chat, ping, thread inspection.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use serde_json::{json, Value};

use super::orchestrator::{ChatRequest, StreamOrchestrator};
use crate::error::ParleyError;

pub const CHAT_STREAM_PATH: &str = "/api/chat/stream";
pub const CHAT_PATH: &str = "/api/chat";
pub const PING_PATH: &str = "/api/ping";
pub const THREAD_MESSAGES_PATH: &str = "/api/threads/{id}/messages";

/// Name reported by the ping endpoint.
pub const SERVICE_NAME: &str = "parley";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: StreamOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: StreamOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Error response with a JSON `{ "error": ... }` body.
#[derive(Debug)]
pub struct ApiError(pub ParleyError);

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self.0 {
            ParleyError::Validation(msg) | ParleyError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ParleyError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("{msg} not found")),
            other => {
                tracing::error!(error = %other, category = ?other.category(), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };
        (code, Json(json!({ "error": msg }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CHAT_STREAM_PATH, post(chat_stream))
        .route(CHAT_PATH, post(chat))
        .route(PING_PATH, get(ping).post(ping_echo))
        .route(THREAD_MESSAGES_PATH, get(thread_messages))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), ParleyError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Wrap a byte stream as an event-stream response.
pub fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    (headers, Body::from_stream(stream)).into_response()
}

async fn chat_stream(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::parse(&body)?;
    let handle = state.orchestrator.stream(request).await?;
    tracing::debug!(thread_id = %handle.thread_id, "stream opened");
    Ok(sse_response(handle.into_body().map(Ok::<_, Infallible>)))
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::parse(&body)?;
    let reply = state.orchestrator.complete(request).await?;
    Ok(Json(reply).into_response())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn ping() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "now": now_iso(),
    }))
}

async fn ping_echo(body: Bytes) -> Json<Value> {
    let received: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "received": received,
        "now": now_iso(),
    }))
}

async fn thread_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let store = state.orchestrator.store();
    if store.find_thread(&id).await?.is_none() {
        return Err(ParleyError::NotFound(format!("thread {id}")).into());
    }
    let messages = store.list_messages(&id).await?;
    Ok(Json(json!({ "threadId": id, "messages": messages })).into_response())
}
