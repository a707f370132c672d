//! HTTP error responses in the OpenAI error shape.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use llm::ApiError;
use runtime::Error;

/// An error returned before a response body starts.
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    body: ApiError,
}

impl ApiFailure {
    /// A failure with an explicit status
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiError::new(kind, message),
        }
    }
}

impl From<Error> for ApiFailure {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Error::CapabilityUnsupported { .. } | Error::Cancelled => StatusCode::BAD_REQUEST,
            Error::Backend { .. } | Error::Judge(_) => StatusCode::BAD_GATEWAY,
            Error::Persistence(_) | Error::BridgeStarted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "invalid_request_error", rejection.body_text())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!("request failed: {}", self.body.error.message);
        }
        (self.status, Json(self.body)).into_response()
    }
}
