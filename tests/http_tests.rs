//! Router tests driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use parley::engine::{AgentAnswer, EngineEvent};
use parley::server::{router, AppState};
use parley::store::MemoryStore;

fn app(engine: ScriptedEngine, model: ScriptedModel) -> axum::Router {
    let orch = orchestrator(Arc::new(MemoryStore::new()), engine, model, true);
    router(AppState::new(orch))
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn stream_endpoint_returns_event_stream() {
    let app = app(ScriptedEngine::tokens(&["Hel", "lo"]), ScriptedModel::default());

    let resp = app
        .oneshot(post("/api/chat/stream", r#"{"message":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream; charset=utf-8");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let frames = parse_frames(&bytes);
    assert_eq!(events(&frames), vec!["token", "token", "done"]);
    assert_eq!(token_text(&frames), "Hello");
    assert!(frames[2].thread_id().is_some());
}

#[tokio::test]
async fn stream_endpoint_rejects_missing_message() {
    for body in [r#"{}"#, r#"{"message":""}"#, r#"{"message":7}"#, "nope"] {
        let app = app(ScriptedEngine::tokens(&["x"]), ScriptedModel::default());
        let resp = app.oneshot(post("/api/chat/stream", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(body_json(resp.into_body()).await, json!({ "error": "message is required" }));
    }
}

#[tokio::test]
async fn chat_endpoint_returns_answer_and_steps() {
    let engine = ScriptedEngine::new().with_answer(AgentAnswer {
        output: "It is noon".into(),
        steps: vec![],
    });
    let app = app(engine, ScriptedModel::default());

    let resp = app
        .oneshot(post("/api/chat", r#"{"message":"what time is it?"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["output"], "It is noon");
    assert_eq!(body["steps"], json!([]));
    assert!(body["threadId"].as_str().is_some());
}

#[tokio::test]
async fn chat_endpoint_engine_failure_is_500() {
    let app = app(ScriptedEngine::failing("down"), ScriptedModel::default());

    let resp = app.oneshot(post("/api/chat", r#"{"message":"hi"}"#)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("down"));
}

#[tokio::test]
async fn ping_reports_service_and_echoes_json() {
    let app = app(ScriptedEngine::new(), ScriptedModel::default());

    let resp = app.clone().oneshot(get("/api/ping")).await.unwrap();
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "parley");
    assert!(chrono::DateTime::parse_from_rfc3339(body["now"].as_str().unwrap()).is_ok());

    let resp = app
        .clone()
        .oneshot(post("/api/ping", r#"{"hello":"world"}"#))
        .await
        .unwrap();
    assert_eq!(body_json(resp.into_body()).await["received"], json!({ "hello": "world" }));

    let resp = app.oneshot(post("/api/ping", "not json")).await.unwrap();
    assert_eq!(body_json(resp.into_body()).await["received"], json!({}));
}

#[tokio::test]
async fn thread_messages_lists_stored_turns() {
    let engine = ScriptedEngine::tokens(&["pong"]).event(EngineEvent::ChainEnd {
        output: json!({ "output": "pong" }),
    });
    let app = app(engine, ScriptedModel::default());

    let resp = app
        .clone()
        .oneshot(post("/api/chat/stream", r#"{"message":"ping"}"#))
        .await
        .unwrap();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let thread_id = parse_frames(&bytes).last().unwrap().thread_id().unwrap();

    let resp = app
        .clone()
        .oneshot(get(&format!("/api/threads/{thread_id}/messages")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["threadId"], json!(thread_id));
    let contents: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["ping", "pong"]);

    let resp = app.oneshot(get("/api/threads/missing/messages")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
