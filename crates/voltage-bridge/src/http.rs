//! HTTP frontend: a single `axum::Router` with one route, `POST /send`.
//!
//! The distilled spec describes a Python stdlib `http.server`-based
//! surface; the idiomatic-Rust replacement for "a tiny JSON HTTP endpoint"
//! is an `axum::Router`, not a hand-rolled listener.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use bridge_dispatch::{Dispatcher, OutboundQueue};
use serde_json::{json, Value};

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<OutboundQueue>,
}

pub fn router(dispatcher: Arc<Dispatcher>, queue: Arc<OutboundQueue>) -> Router {
    let state = AppState { dispatcher, queue };
    Router::new()
        .route("/send", post(send_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn send_handler(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let cmd_text = body
        .get("cmd")
        .or_else(|| body.get("command"))
        .and_then(Value::as_str);

    let Some(cmd_text) = cmd_text else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing cmd"}))).into_response();
    };

    let id = match state.queue.enqueue(cmd_text, now_unix()) {
        Ok(id) => id,
        Err(err) => {
            tracing::error!(error = %err, "failed to enqueue command");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to enqueue command"})),
            )
                .into_response();
        }
    };

    let tokens: Vec<String> = cmd_text.split_whitespace().map(str::to_string).collect();
    let outcome = state.dispatcher.submit(tokens).await;

    if outcome.rc == 0 {
        if let Err(err) = state.queue.mark_sent(id, now_unix()) {
            tracing::warn!(error = %err, id, "failed to mark queue row sent");
        }
        (
            StatusCode::OK,
            Json(json!({"ok": true, "id": id, "rc": outcome.rc, "stdout": outcome.stdout})),
        )
            .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "id": id, "rc": outcome.rc, "stderr": outcome.stderr})),
        )
            .into_response()
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
