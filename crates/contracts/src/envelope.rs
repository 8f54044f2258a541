//! Uniform success/error response shapes shared by every HTTP route.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Forbidden,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 422,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Internal => 500,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation failed",
            ErrorKind::Unauthorized => "Unauthorized access",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Forbidden => "Access forbidden",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub data: Option<T>,
    pub message: String,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(data: T, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            success: true,
            status_code,
            data: Some(data),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub data: Option<serde_json::Value>,
    pub message: String,
    pub error: String,
}

impl ErrorEnvelope {
    /// `error` falls back to `message` when no separate detail is given.
    pub fn new(status_code: u16, message: impl Into<String>, error: Option<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            status_code,
            data: None,
            error: error.unwrap_or_else(|| message.clone()),
            message,
        }
    }

    pub fn from_kind(kind: ErrorKind, message: impl Into<String>, error: Option<String>) -> Self {
        Self::new(kind.status_code(), message, error)
    }
}
