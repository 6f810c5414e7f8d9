//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::device::GatewayError;
use crate::inventory::InventoryError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    GatewayTimeout(String),

    /// The device answered without an error status but the reply was unusable.
    #[error("{0}")]
    BadDeviceReply(String),

    /// The device answered with an error; its status and body pass through.
    #[error("Device returned HTTP {status}")]
    Upstream { status: u16, body: Value },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
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
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) | Self::BadDeviceReply(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::BadGateway(_) => "DEVICE_AUTH_FAILED",
            Self::GatewayTimeout(_) => "DEVICE_UNREACHABLE",
            Self::BadDeviceReply(_) => "DEVICE_BAD_RESPONSE",
            Self::Upstream { .. } => "DEVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response, shaped like a device error reply.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub result: &'static str,
    pub msg: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match self {
            ApiError::Upstream { body, .. } => {
                warn!(error_code = code, %status, "device error passed through");
                (status, Json(body)).into_response()
            }
            other => {
                let message = other.to_string();
                match &other {
                    ApiError::Internal(_) | ApiError::BadGateway(_) | ApiError::BadDeviceReply(_) => {
                        error!(error_code = code, message = %message, "API error");
                    }
                    ApiError::GatewayTimeout(_) => {
                        warn!(error_code = code, message = %message, "Device unreachable");
                    }
                    _ => {
                        tracing::debug!(error_code = code, message = %message, "Client error");
                    }
                }

                let body = ErrorResponse {
                    result: "error",
                    msg: message,
                    code,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::AuthFailure { .. } => ApiError::BadGateway(err.to_string()),
            GatewayError::TransportFailure { .. } => ApiError::GatewayTimeout(err.to_string()),
            // Only error statuses pass through; anything else would look like success.
            GatewayError::UpstreamFailure { base, status, body } if status < 400 => {
                let text = match body {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                ApiError::BadDeviceReply(format!(
                    "Device {base} returned HTTP {status} with an unreadable body: {text}"
                ))
            }
            GatewayError::UpstreamFailure { status, body, .. } => ApiError::Upstream { status, body },
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::UnknownKit(_) => ApiError::BadRequest(err.to_string()),
            InventoryError::Io { .. } | InventoryError::Parse { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
