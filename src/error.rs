// shm-guard: structured application errors and the panic-to-response funnel.
//
// Mirrors the two error classes from the original `panicerr` package: a
// structured error (code + text) that serializes straight to the response
// body, and an unstructured fault that gets logged with full context and
// turned into a plain 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Structured error codes, matching the original `panicerr` namespaces
/// (`Core.Auth`, `Handlers.RequestsExceeded`, `JSON.ParsingError`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    Auth,
    RequestsExceeded,
    JsonParsingError,
    JsonEncodingError,
    Internal,
}

/// The single error type that flows through the admission pipeline.
///
/// Variants carrying an [`ErrorCode`] are "structured": they always
/// serialize to a JSON body of the shape `{"Code": ..., "Err": "..."}` and
/// surface as HTTP 500. Admission
/// decisions that are not errors at all (brute ban, rate limit, missing
/// session, permission denial) have their own response paths in
/// [`crate::pipeline`] and are not represented here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Structured { code: ErrorCode, message: String },

    #[error("internal fault: {0}")]
    Fault(String),
}

impl AppError {
    pub fn auth(message: impl Into<String>) -> Self {
        AppError::Structured {
            code: ErrorCode::Auth,
            message: message.into(),
        }
    }

    pub fn requests_exceeded(message: impl Into<String>) -> Self {
        AppError::Structured {
            code: ErrorCode::RequestsExceeded,
            message: message.into(),
        }
    }

    pub fn json_parsing(message: impl Into<String>) -> Self {
        AppError::Structured {
            code: ErrorCode::JsonParsingError,
            message: message.into(),
        }
    }

    pub fn json_encoding(message: impl Into<String>) -> Self {
        AppError::Structured {
            code: ErrorCode::JsonEncodingError,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Structured { code, .. } => *code,
            AppError::Fault(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Serialize)]
struct StructuredBody<'a> {
    #[serde(rename = "Code")]
    code: ErrorCode,
    #[serde(rename = "Err")]
    err: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Structured { code, message } => {
                let body = StructuredBody {
                    code: *code,
                    err: message,
                };
                let json = serde_json::to_string(&body)
                    .unwrap_or_else(|_| r#"{"Code":"Internal","Err":"error encoding failed"}"#.to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, json).into_response()
            }
            AppError::Fault(message) => {
                tracing::error!(error = %message, "unstructured fault");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
