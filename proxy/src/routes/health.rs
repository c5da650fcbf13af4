use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    strategy: String,
    backends: Vec<BackendHealth>,
}

#[derive(Serialize)]
struct BackendHealth {
    name: String,
    queue_length: usize,
    /// Usage is only tracked by the model affinity strategy; always null
    /// under shortest queue.
    last_model: Option<String>,
    last_seen: Option<DateTime<Utc>>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    let registry = dispatcher.registry();
    let backends = registry
        .all()
        .into_iter()
        .map(|backend| {
            let usage = registry.usage(&backend.name).unwrap_or_default();
            BackendHealth {
                queue_length: dispatcher.queue_length(&backend.name),
                name: backend.name.clone(),
                last_model: usage.last_model,
                last_seen: usage.last_seen,
            }
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        strategy: dispatcher.strategy().to_string(),
        backends,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let mut body = format!(
        "# HELP ollama_proxy_up Whether the service is up\n\
         # TYPE ollama_proxy_up gauge\n\
         ollama_proxy_up 1\n\
         # HELP ollama_proxy_info Service information\n\
         # TYPE ollama_proxy_info gauge\n\
         ollama_proxy_info{{version=\"{}\"}} 1\n\
         # HELP ollama_proxy_queue_length Reserved slots per backend\n\
         # TYPE ollama_proxy_queue_length gauge\n",
        version
    );
    for name in state.dispatcher.registry().names() {
        body.push_str(&format!(
            "ollama_proxy_queue_length{{backend=\"{}\"}} {}\n",
            name,
            state.dispatcher.queue_length(&name)
        ));
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}
