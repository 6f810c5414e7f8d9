//! Relaygate control-plane gateway.
//!
//! A realtime relay between one authoring-tool peer and many browser UIs,
//! plus an authenticated gateway to the decoder devices of the active kit.

pub mod api;
pub mod config;
pub mod device;
pub mod inventory;
pub mod peer;
pub mod ws;
