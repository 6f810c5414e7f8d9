//! Application state shared across handlers.

use std::sync::Arc;

use crate::device::DeviceGateway;
use crate::inventory::Inventory;
use crate::ws::RelayHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authenticated device API client.
    pub gateway: DeviceGateway,
    /// Realtime relay hub.
    pub hub: Arc<RelayHub>,
    /// Kit catalogue and active-kit selection.
    pub inventory: Arc<Inventory>,
}

impl AppState {
    pub fn new(gateway: DeviceGateway, hub: Arc<RelayHub>, inventory: Arc<Inventory>) -> Self {
        Self {
            gateway,
            hub,
            inventory,
        }
    }
}
