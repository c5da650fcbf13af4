use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, Method};
use reqwest::Client;

use ollama_proxy_scheduler::Backend;

use crate::config::UpstreamConfig;

/// Response headers not copied back to the client; the body is re-framed.
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONTENT_ENCODING,
    header::CONNECTION,
];

/// Request headers not forwarded to backends.
const STRIPPED_REQUEST_HEADERS: [HeaderName; 6] = [
    header::HOST,
    header::AUTHORIZATION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::ACCEPT_ENCODING,
];

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Backend {backend} timed out: {message}")]
    Timeout { backend: String, message: String },
    #[error("Request to backend {backend} failed: {message}")]
    RequestFailed { backend: String, message: String },
}

impl UpstreamError {
    fn from_reqwest(backend: &Backend, err: reqwest::Error) -> Self {
        let backend = backend.name.clone();
        let message = err.to_string();
        if err.is_timeout() {
            Self::Timeout { backend, message }
        } else {
            Self::RequestFailed { backend, message }
        }
    }
}

/// Client forwarding requests to backend servers.
pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            http_client: Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .read_timeout(Duration::from_secs(config.read_timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Forward a request unchanged to `backend`.
    ///
    /// Returns once the response headers arrive; the body is left unread so
    /// it can be streamed.
    pub async fn forward(
        &self,
        backend: &Backend,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = backend_url(backend, path_and_query);
        tracing::debug!("Forwarding {} {} (backend: {})", method, url, backend.name);

        self.http_client
            .request(method, &url)
            .headers(request_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(backend, e))
    }
}

fn backend_url(backend: &Backend, path_and_query: &str) -> String {
    format!("{}{}", backend.url.trim_end_matches('/'), path_and_query)
}

fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &STRIPPED_REQUEST_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}

/// Backend response headers to send back to the client.
pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in &STRIPPED_RESPONSE_HEADERS {
        filtered.remove(name);
    }
    filtered
}
