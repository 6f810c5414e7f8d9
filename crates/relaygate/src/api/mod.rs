//! HTTP API module.
//!
//! Kit inventory endpoints, decoder device commands proxied through the
//! device gateway, and the relay WebSocket mount.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{RouterConfig, create_router};
pub use state::AppState;
