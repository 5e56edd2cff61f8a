use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::ErrorBody;

pub const INVALID_REQUEST_ERROR: &str = "Invalid chat request";
pub const PROCESSING_ERROR: &str = "Failed to process chat request";

/// Failures the relay reports before any stream bytes are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request body is not a usable chat request.
    Validation(String),
    /// The upstream sequence could not be opened.
    Transport(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (error, details) = match self {
            ApiError::Validation(details) => (INVALID_REQUEST_ERROR, details),
            ApiError::Transport(details) => (PROCESSING_ERROR, details),
        };
        ErrorBody {
            error: error.to_string(),
            details: details.clone(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(details) => write!(f, "{INVALID_REQUEST_ERROR}: {details}"),
            ApiError::Transport(details) => write!(f, "{PROCESSING_ERROR}: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
