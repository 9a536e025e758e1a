//! Centralized error types for the Lingo Relay core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//! - Carries the upstream cancellation error codes surfaced to clients

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::LanguageError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation Error Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Error classification carried by `canceled` events.
///
/// Mirrors the upstream provider's cancellation taxonomy so that clients can
/// distinguish credential problems from transient service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CancellationErrorCode {
    /// No error; the session ended normally.
    #[default]
    NoError,
    /// The provider rejected the credentials (401).
    AuthFailure,
    /// The provider rejected the request shape (400).
    BadRequest,
    /// The provider is throttling (429).
    TooManyRequests,
    /// The credentials lack access to the resource (403).
    Forbidden,
    /// The upstream connection could not be established or was lost.
    ConnectionFailure,
    /// The provider timed out (408).
    ServiceTimeout,
    /// The provider reported an internal failure (500).
    ServiceError,
    /// The provider is temporarily unavailable (503).
    ServiceUnavailable,
    /// A failure inside this service (panic, logic error).
    RuntimeError,
}

impl CancellationErrorCode {
    /// Infers a cancellation code from an HTTP-style status.
    #[must_use]
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::AuthFailure,
            403 => Self::Forbidden,
            408 => Self::ServiceTimeout,
            429 => Self::TooManyRequests,
            500 => Self::ServiceError,
            503 => Self::ServiceUnavailable,
            _ => Self::ConnectionFailure,
        }
    }

    /// Returns the code as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoError => "noError",
            Self::AuthFailure => "authFailure",
            Self::BadRequest => "badRequest",
            Self::TooManyRequests => "tooManyRequests",
            Self::Forbidden => "forbidden",
            Self::ConnectionFailure => "connectionFailure",
            Self::ServiceTimeout => "serviceTimeout",
            Self::ServiceError => "serviceError",
            Self::ServiceUnavailable => "serviceUnavailable",
            Self::RuntimeError => "runtimeError",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Error
// ─────────────────────────────────────────────────────────────────────────────

/// Application-wide error type for the Lingo Relay server.
#[derive(Debug, Error)]
pub enum LingoError {
    /// The source language tag failed normalization.
    #[error("invalid source language code: {0}")]
    InvalidSourceLanguage(String),

    /// The target language tag failed normalization.
    #[error("invalid target language code: {0}")]
    InvalidTargetLanguage(String),

    /// The requested audio format is not in the allowed set.
    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    /// Requested session id does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session with this id already exists.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// The concurrency cap on streaming sessions was reached.
    #[error("Maximum number of concurrent sessions reached ({0})")]
    SessionLimitReached(usize),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream speech provider failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The text translation provider failed.
    #[error("Translation failed: {0}")]
    Translation(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LingoError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSourceLanguage(_) => "invalid_source_language",
            Self::InvalidTargetLanguage(_) => "invalid_target_language",
            Self::UnsupportedAudioFormat(_) => "unsupported_audio_format",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExists(_) => "session_exists",
            Self::SessionLimitReached(_) => "session_limit_reached",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Upstream(_) => "upstream_error",
            Self::Translation(_) => "translation_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidSourceLanguage(_)
            | Self::InvalidTargetLanguage(_)
            | Self::UnsupportedAudioFormat(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::SessionExists(_) => StatusCode::CONFLICT,
            Self::SessionLimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::Translation(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type LingoResult<T> = Result<T, LingoError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for LingoError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl LingoError {
    /// Wraps a language error for the source-language slot.
    pub fn source_language(err: LanguageError) -> Self {
        Self::InvalidSourceLanguage(err.to_string())
    }

    /// Wraps a language error for the target-language slot.
    pub fn target_language(err: LanguageError) -> Self {
        Self::InvalidTargetLanguage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_code_maps_http_statuses() {
        assert_eq!(
            CancellationErrorCode::from_http_status(401),
            CancellationErrorCode::AuthFailure
        );
        assert_eq!(
            CancellationErrorCode::from_http_status(429),
            CancellationErrorCode::TooManyRequests
        );
        assert_eq!(
            CancellationErrorCode::from_http_status(599),
            CancellationErrorCode::ConnectionFailure
        );
    }

    #[test]
    fn cancellation_code_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&CancellationErrorCode::AuthFailure).unwrap(),
            "\"authFailure\""
        );
        assert_eq!(
            serde_json::to_string(&CancellationErrorCode::NoError).unwrap(),
            "\"noError\""
        );
    }

    #[test]
    fn session_not_found_returns_404() {
        let err = LingoError::SessionNotFound("abc".into());
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_language_returns_400() {
        let err = LingoError::InvalidSourceLanguage("xx".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("invalid source language code"));
    }

    #[test]
    fn duplicate_session_returns_conflict() {
        let err = LingoError::SessionExists("abc".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
