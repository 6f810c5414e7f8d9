//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use relaygate::api::{self, AppState, RouterConfig};
use relaygate::device::{DeviceCredentials, DeviceGateway};
use relaygate::inventory::{GenerateSpec, Inventory, KitSpec};
use relaygate::ws::{HubSettings, RelayHub};
use serde_json::json;
use tempfile::TempDir;

pub const DEVICE_USER: &str = "admin";
pub const DEVICE_PASSWORD: &str = "test-password";

/// Router plus the state behind it; the temp dir holds the state file.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn state_file(&self) -> std::path::PathBuf {
        self.dir.path().join("state.json")
    }
}

/// A kit whose single device lives on `127.0.0.1:<port>`.
pub fn loopback_kit(kit_id: &str, port: u16) -> KitSpec {
    serde_json::from_value(json!({
        "kitId": kit_id,
        "kitName": format!("Loopback {kit_id}"),
        "count": 1,
        "vgStart": port,
        "hostPrefix": "127.0.0.1:",
        "hostSuffix": ""
    }))
    .unwrap()
}

/// A kit with the default host naming.
pub fn named_kit(kit_id: &str, count: u32) -> KitSpec {
    serde_json::from_value(json!({ "kitId": kit_id, "count": count })).unwrap()
}

pub fn test_state(kits: Vec<KitSpec>, dir: &TempDir) -> AppState {
    let gateway = DeviceGateway::new(
        DeviceCredentials::new(DEVICE_USER, DEVICE_PASSWORD),
        Duration::from_secs(2),
    )
    .unwrap();
    let inventory = Inventory::new(GenerateSpec { kits }, dir.path().join("state.json"));
    let hub = Arc::new(RelayHub::new(HubSettings::default()));
    AppState::new(gateway, hub, Arc::new(inventory))
}

/// Create a test application over the given kits.
pub fn test_app(kits: Vec<KitSpec>) -> TestApp {
    let dir = TempDir::new().unwrap();
    let state = test_state(kits, &dir);
    let router = api::create_router(state.clone(), &RouterConfig::default());
    TestApp { router, state, dir }
}
