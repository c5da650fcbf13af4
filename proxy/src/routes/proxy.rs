//! Forwarding of client requests to backends.
//!
//! Inference requests are admitted through the dispatcher and hold their
//! backend slot until the response body has been streamed back. Everything
//! else goes straight to the least loaded backend.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    Router,
};

use ollama_proxy_scheduler::{Backend, ScheduleFilter};

use crate::access_log::{AccessEvent, AccessLog};
use crate::error::ProxyError;
use crate::upstream::{response_headers, Completion, ReleasingStream};
use crate::AppState;

/// Paths whose requests go through admission control.
pub const SCHEDULED_PATHS: [&str; 3] = ["/api/generate", "/api/chat", "/v1/chat/completions"];

pub fn is_scheduled(method: &Method, path: &str) -> bool {
    method == Method::POST && SCHEDULED_PATHS.contains(&path)
}

async fn proxy(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let mut access = AccessLog::new(connect_info.map(|ConnectInfo(addr)| addr.ip()));

    match state.auth.authenticate(&headers) {
        Ok(user) => access.authorize(&user.name),
        Err(e) => {
            tracing::warn!("Rejected request to {}: {}", uri.path(), e);
            access.log(AccessEvent::Rejected, None, -1, Some(&e.to_string()));
            return Err(e.into());
        }
    }

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();

    if is_scheduled(&method, uri.path()) {
        scheduled(state, access, method, &path_and_query, headers, body).await
    } else {
        unscheduled(state, access, method, &path_and_query, headers, body).await
    }
}

async fn scheduled(
    state: Arc<AppState>,
    access: AccessLog,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let filter: ScheduleFilter = match serde_json::from_slice(&body) {
        Ok(filter) => filter,
        Err(e) => {
            access.log(AccessEvent::RequestError, None, -1, Some(&e.to_string()));
            return Err(ProxyError::BadRequest(e.to_string()));
        }
    };

    let dispatcher = &state.dispatcher;
    let reservation = match dispatcher.schedule(&filter).await {
        Ok(reservation) => reservation,
        Err(e) => {
            tracing::info!("Could not schedule request: {}", e);
            access.log(AccessEvent::ScheduleError, None, -1, Some(&e.to_string()));
            return Err(e.into());
        }
    };

    let backend = reservation.backend().clone();
    access.log(
        AccessEvent::GenRequest,
        Some(&backend.name),
        dispatcher.queue_length(&backend.name) as i64,
        None,
    );

    let upstream = match state
        .upstream
        .forward(&backend, method, path_and_query, &headers, body)
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!("{}", e);
            if let Err(release_err) = reservation.release(false) {
                tracing::error!(
                    "Slot accounting error on backend {}: {}",
                    backend.name,
                    release_err
                );
            }
            access.log(
                AccessEvent::GenError,
                Some(&backend.name),
                dispatcher.queue_length(&backend.name) as i64,
                Some(&e.to_string()),
            );
            return Err(e.into());
        }
    };

    let status = upstream.status();
    let headers = response_headers(upstream.headers());
    let stream = ReleasingStream::new(
        upstream.bytes_stream(),
        Completion {
            reservation,
            ok: status.is_success(),
            access,
            dispatcher: dispatcher.clone(),
        },
    );

    Ok(build_response(status, headers, Body::from_stream(stream)))
}

async fn unscheduled(
    state: Arc<AppState>,
    access: AccessLog,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let backend: Arc<Backend> = state.dispatcher.least_loaded().ok_or(ProxyError::NoBackends)?;
    let queued = state.dispatcher.queue_length(&backend.name) as i64;
    access.log(AccessEvent::ProxyRequest, Some(&backend.name), queued, None);

    let upstream = state
        .upstream
        .forward(&backend, method, path_and_query, &headers, body)
        .await
        .map_err(|e| {
            access.log(AccessEvent::GenError, Some(&backend.name), queued, Some(&e.to_string()));
            e
        })?;

    let status = upstream.status();
    let headers = response_headers(upstream.headers());
    Ok(build_response(status, headers, Body::from_stream(upstream.bytes_stream())))
}

fn build_response(status: axum::http::StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(proxy).with_state(state)
}
