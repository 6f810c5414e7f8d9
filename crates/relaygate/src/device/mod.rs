//! Authenticated device gateway.
//!
//! Provides an async client that calls decoder appliance APIs, acquiring and
//! caching one session token per device base URL.

mod client;
mod error;
mod types;

pub use client::{DEFAULT_REQUEST_TIMEOUT, DeviceGateway};
pub use error::{GatewayError, GatewayResult};
pub use types::*;
