//! # Gateway Error Types
//!
//! `DispatchError` is the taxonomy from spec §7, mapped to the client
//! envelope `{"error":{"message","type","code","reference_id","timestamp"}}`.
//! Every variant carries enough to pick the right HTTP status and `type`
//! string; the `reference_id` (request id) and timestamp are attached at
//! the `IntoResponse` boundary, not stored on the error itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use voidgate_sdk::{ClientError, ProviderError};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("authentication error: {message}")]
    Auth { message: String },

    #[error("content policy violation: {message}")]
    ContentPolicyViolation { message: String },

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("model access denied: {model}")]
    PlanAccessDenied { model: String },

    #[error("operation not supported: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("upstream server error: {message}")]
    UpstreamServerError { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Wraps a [`DispatchError`] with the request id it should carry as
/// `reference_id` (spec §7). Handlers attach this once they have an
/// `ApiRequest` id; errors raised before that point surface a fresh id.
pub struct WithReferenceId {
    pub error: DispatchError,
    pub reference_id: String,
}

impl DispatchError {
    pub fn with_reference_id(self, reference_id: impl Into<String>) -> WithReferenceId {
        WithReferenceId {
            error: self,
            reference_id: reference_id.into(),
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            DispatchError::Validation { .. } => StatusCode::BAD_REQUEST,
            DispatchError::Auth { .. } => StatusCode::UNAUTHORIZED,
            DispatchError::ContentPolicyViolation { .. } => StatusCode::BAD_REQUEST,
            DispatchError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            DispatchError::PlanAccessDenied { .. } => StatusCode::FORBIDDEN,
            DispatchError::UnsupportedOperation { .. } => StatusCode::BAD_REQUEST,
            DispatchError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::UpstreamServerError { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Network { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Provider(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            DispatchError::Validation { .. } => "invalid_request",
            DispatchError::Auth { .. } => "invalid_key",
            DispatchError::ContentPolicyViolation { .. } => "content_policy",
            DispatchError::InsufficientCredits => "insufficient_credits",
            DispatchError::PlanAccessDenied { .. } => "model_access_denied",
            DispatchError::UnsupportedOperation { .. } => "unsupported",
            DispatchError::RateLimit => "too_many_requests",
            DispatchError::UpstreamTimeout | DispatchError::UpstreamServerError { .. } | DispatchError::Network { .. } => {
                "upstream_error"
            }
            DispatchError::Internal { .. } => "request_failed",
            DispatchError::Provider(_) => "upstream_error",
            DispatchError::Client(_) => "request_failed",
        }
    }

    /// Whether the dispatcher's retry loop should try another sub-provider
    /// rather than surfacing this to the client (spec §7 "Retry?" column).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::UnsupportedOperation { .. }
                | DispatchError::UpstreamTimeout
                | DispatchError::UpstreamServerError { .. }
                | DispatchError::Network { .. }
                | DispatchError::Provider(_)
        )
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        self.with_reference_id(uuid::Uuid::new_v4().to_string()).into_response()
    }
}

impl IntoResponse for WithReferenceId {
    fn into_response(self) -> Response {
        let status = self.error.http_status();
        let error_type = self.error.error_type();
        let message = self.error.to_string();
        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "reference_id": self.reference_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));
        (status, body).into_response()
    }
}
