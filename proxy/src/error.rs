//! Error type returned by request handlers.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use ollama_proxy_scheduler::DispatchError;

use crate::auth::AuthError;
use crate::upstream::UpstreamError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("No backends configured")]
    NoBackends,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Dispatch(DispatchError::NoBackendAvailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::Dispatch(DispatchError::AdmissionTimeout(_)) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::Dispatch(DispatchError::Scheduler(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(UpstreamError::Timeout { .. }) => StatusCode::REQUEST_TIMEOUT,
            ProxyError::Upstream(UpstreamError::RequestFailed { .. }) => StatusCode::BAD_GATEWAY,
            ProxyError::NoBackends => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Unauthorized(_) => "unauthorized",
            ProxyError::BadRequest(_) => "invalid_request",
            ProxyError::Dispatch(DispatchError::NoBackendAvailable(_)) => "no_backend_available",
            ProxyError::Dispatch(DispatchError::AdmissionTimeout(_)) => "admission_timeout",
            ProxyError::Dispatch(DispatchError::Scheduler(_)) => "internal_error",
            ProxyError::Upstream(UpstreamError::Timeout { .. }) => "backend_timeout",
            ProxyError::Upstream(UpstreamError::RequestFailed { .. }) => "backend_error",
            ProxyError::NoBackends => "no_backend_available",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        }));

        let mut response = (status, body).into_response();
        if let ProxyError::Dispatch(DispatchError::AdmissionTimeout(waited)) = &self {
            let secs = waited.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::Dispatch(DispatchError::NoBackendAvailable(None)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::Dispatch(DispatchError::AdmissionTimeout(Duration::from_secs(1))).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ProxyError::Unauthorized(AuthError::MissingHeader).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::Upstream(UpstreamError::Timeout {
                backend: "a".to_string(),
                message: "slow".to_string(),
            })
            .status(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_retry_after_header() {
        let timeout = DispatchError::AdmissionTimeout(Duration::from_millis(2500));
        let response = ProxyError::Dispatch(timeout).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");

        let timeout = DispatchError::AdmissionTimeout(Duration::from_millis(200));
        let response = ProxyError::Dispatch(timeout).into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn test_no_retry_after_on_other_errors() {
        let response = ProxyError::BadRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
