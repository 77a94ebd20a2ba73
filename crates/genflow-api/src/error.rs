//! API error types and HTTP response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use genflow_providers::ProviderError;
use genflow_reconciler::ReconcilerError;
use serde::Serialize;
use thiserror::Error;

use crate::services::SubmitError;

pub type ApiResult<T> = Result<T, ApiError>;

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Upstream provider error: {0}")]
    UpstreamProvider(String),

    #[error("Service not configured: {0}")]
    NotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamProvider(_) => StatusCode::BAD_GATEWAY,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_error",
            Self::RateLimited => "rate_limited",
            Self::UpstreamProvider(_) => "upstream_error",
            Self::NotConfigured(_) => "not_configured",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// JSON error body returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay out of production responses.
        let detail = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                if std::env::var("ENVIRONMENT").as_deref() == Ok("production") {
                    "Internal server error".to_string()
                } else {
                    msg.clone()
                }
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            detail,
            code: Some(self.error_code().to_string()),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(msg) => Self::Validation(msg),
            SubmitError::Configuration(msg) => Self::NotConfigured(msg),
            SubmitError::Rejected { status, message } => {
                Self::UpstreamProvider(format!("provider rejected request ({status}): {message}"))
            }
            SubmitError::Unavailable(msg) => Self::UpstreamProvider(msg),
            SubmitError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<ReconcilerError> for ApiError {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::JobNotFound(reference) => Self::NotFound(format!("job {reference}")),
            ReconcilerError::Provider(p) => match p {
                ProviderError::Validation(msg) | ProviderError::InvalidResponse(msg) => {
                    Self::BadRequest(msg)
                }
                ProviderError::Configuration(msg) => Self::NotConfigured(msg),
                ProviderError::UnsupportedKind(kind) => {
                    Self::NotFound(format!("no provider for {kind}"))
                }
                ProviderError::Upstream { status, message } => {
                    Self::UpstreamProvider(format!("provider returned {status}: {message}"))
                }
                ProviderError::Network(e) => Self::UpstreamProvider(e.to_string()),
                ProviderError::Registry(e) => Self::Internal(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_variants() {
        assert_eq!(
            ApiError::unauthorized("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::UpstreamProvider("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::NotConfigured("no key".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn submit_errors_map_to_status_classes() {
        let e: ApiError = SubmitError::Validation("missing prompt".into()).into();
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);

        let e: ApiError = SubmitError::Configuration("no api key".into()).into();
        assert_eq!(e.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let e: ApiError = SubmitError::Rejected {
            status: 403,
            message: "blocked".into(),
        }
        .into();
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);

        let e: ApiError = SubmitError::Unavailable("timeout".into()).into();
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn reconciler_not_found_maps_to_404() {
        let e: ApiError = ReconcilerError::JobNotFound("job-123".into()).into();
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
        assert!(e.to_string().contains("job-123"));
    }
}
