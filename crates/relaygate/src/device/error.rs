//! Device gateway error types.

use serde_json::Value;
use thiserror::Error;

/// Result type for device gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while talking to a decoder appliance.
///
/// The type is `Clone` because one authorization outcome is handed to every
/// caller waiting on the same in-flight exchange.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The device would not issue a token.
    #[error("Device authorize failed for {base}: {detail}")]
    AuthFailure { base: String, detail: String },

    /// A token was obtained but the device call itself failed.
    #[error("Device {base} returned HTTP {status}")]
    UpstreamFailure {
        base: String,
        status: u16,
        body: Value,
    },

    /// No response was received from the device.
    #[error("Failed to reach device at {base}: {detail}")]
    TransportFailure { base: String, detail: String },
}

impl GatewayError {
    pub fn auth(base: &str, detail: impl Into<String>) -> Self {
        Self::AuthFailure {
            base: base.to_string(),
            detail: detail.into(),
        }
    }

    pub fn transport(base: &str, detail: impl Into<String>) -> Self {
        Self::TransportFailure {
            base: base.to_string(),
            detail: detail.into(),
        }
    }

    /// Base URL of the device the error refers to.
    pub fn base(&self) -> &str {
        match self {
            Self::AuthFailure { base, .. }
            | Self::UpstreamFailure { base, .. }
            | Self::TransportFailure { base, .. } => base,
        }
    }
}
