//! API error mapping: every core error kind becomes a status code plus a
//! short detail string. Stack traces never cross the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::export::ExportError;
use crate::parsers::ParseError;
use crate::session::SessionError;
use crate::transforms::TransformError;
use crate::xas::{ProjectError, XasError};

/// Error payload returned by every failing endpoint.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status
    pub status: StatusCode,
    /// User-visible error kind plus short detail
    pub message: String,
}

impl ApiError {
    /// 400 with a message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    /// 404 with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    /// 500 with a message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SessionError::SessionNotFound(_) | SessionError::FileNotFound(_) => {
                StatusCode::NOT_FOUND
            }
        };
        ApiError { status, message: err.to_string() }
    }
}

impl From<TransformError> for ApiError {
    fn from(err: TransformError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        let status = match &err {
            ExportError::FormatError => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: err.to_string() }
    }
}

impl From<XasError> for ApiError {
    fn from(err: XasError) -> Self {
        let status = match &err {
            XasError::NotFound(_) => StatusCode::NOT_FOUND,
            XasError::NoChannels(_) | XasError::EvalError(_) | XasError::Normalization(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: err.to_string() }
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        let status = match &err {
            ProjectError::NotFound(_) => StatusCode::NOT_FOUND,
            ProjectError::InUse { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { status, message: err.to_string() }
    }
}
