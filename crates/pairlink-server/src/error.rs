//! API error type.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use pairlink_capability::CapabilityError;
use pairlink_session::{Rejection, RenderError};

/// Every way a request can fail, mapped onto a status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request fields
    #[error("{0}")]
    Input(String),

    /// The request body exceeded the upload limit
    #[error("{0}")]
    TooLarge(String),

    /// Nothing to show yet
    #[error("{0}")]
    NotFound(String),

    /// The account is not connected
    #[error("messaging account is not ready, try again later: {0}")]
    NotReady(Rejection),

    /// The capability call itself failed
    #[error("{0}")]
    Capability(#[from] CapabilityError),

    /// A pairing code could not be rendered
    #[error("{0}")]
    Render(#[from] RenderError),

    /// The session machinery is gone
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// A request body that could not be read; over-limit bodies keep their 413.
    pub fn unreadable_body(status: StatusCode, msg: impl Into<String>) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge(msg.into())
        } else {
            Self::Input(msg.into())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Input(_) => StatusCode::BAD_REQUEST,
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Capability(_) | ApiError::Render(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::unreadable_body(e.status(), e.body_text())
    }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self {
        ApiError::NotReady(r)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let body = match &self {
            ApiError::NotReady(rejection) => {
                warn!(state = %rejection.state, "Request rejected: {}", message);
                json!({ "error": message, "state": rejection.state })
            }
            ApiError::Capability(_) | ApiError::Render(_) | ApiError::Internal(_) => {
                error!(status = status.as_u16(), "Request failed: {}", message);
                json!({ "error": message })
            }
            ApiError::Input(_) | ApiError::TooLarge(_) | ApiError::NotFound(_) => {
                warn!(status = status.as_u16(), "Request refused: {}", message);
                json!({ "error": message })
            }
        };

        (status, Json(body)).into_response()
    }
}
