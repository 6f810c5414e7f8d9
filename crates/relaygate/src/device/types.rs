//! Device API request and response types.

use reqwest::Method;
use serde_json::Value;
use std::fmt;

/// Path of the credential exchange endpoint on every device.
pub const AUTHORIZE_PATH: &str = "/api/user/authorize.json";

/// Value of the `result` field a device answers with when it rejects a token.
pub const AUTH_REJECTED: &str = "auth-failed";

/// Operator identity used for every device authorization.
#[derive(Clone)]
pub struct DeviceCredentials {
    pub user: String,
    pub password: String,
}

impl DeviceCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options for a single device API call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            body: None,
        }
    }
}

impl CallOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Send `body` as a JSON request body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Decoded upstream response, returned without reinterpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResponse {
    pub status: u16,
    pub data: Value,
}

impl DeviceResponse {
    /// Whether the device rejected the session token for this call.
    pub fn is_auth_rejection(&self) -> bool {
        self.data.get("result").and_then(Value::as_str) == Some(AUTH_REJECTED)
    }
}
