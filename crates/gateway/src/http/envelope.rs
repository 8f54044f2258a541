use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kai_analysis::AnalysisError;
use kai_contracts::envelope::{ErrorEnvelope, ErrorKind, SuccessEnvelope};
use serde::Serialize;

pub(super) const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

pub(super) fn success_response<T: Serialize>(
    data: T,
    message: &str,
    status: StatusCode,
) -> Response {
    (
        status,
        Json(SuccessEnvelope::new(data, message, status.as_u16())),
    )
        .into_response()
}

/// Error half of the envelope. Converts into a response carrying
/// `{success:false, statusCode, data:null, message, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ApiError {
    pub(super) kind: ErrorKind,
    pub(super) message: String,
    pub(super) error: Option<String>,
}

impl ApiError {
    pub(super) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error: None,
        }
    }

    pub(super) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub(super) fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub(super) fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub(super) fn internal() -> Self {
        Self::new(ErrorKind::Internal, INTERNAL_ERROR_MESSAGE)
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Validation(err) => ApiError::validation(err.to_string()),
            other => {
                tracing::error!(error = %other, "analysis request failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorEnvelope::from_kind(self.kind, self.message, self.error)),
        )
            .into_response()
    }
}
