//! Device inventory.
//!
//! Maps the active kit to its decoder devices. Kits come from a generation
//! file; which kit is active is persisted in a small state file so it
//! survives restarts.

mod error;
mod kit;

pub use error::{InventoryError, InventoryResult};
pub use kit::{Device, ExpandedKit, GenerateSpec, KitSpec, KitSummary};

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Persisted selection of the active kit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveState {
    #[serde(default)]
    active_kit_id: Option<String>,
}

/// Kit catalogue plus the persisted active-kit selection.
pub struct Inventory {
    spec: GenerateSpec,
    state_path: PathBuf,
    state: RwLock<ActiveState>,
}

impl Inventory {
    /// Create an inventory from an in-memory catalogue.
    pub fn new(spec: GenerateSpec, state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let state = read_state(&state_path);
        Self {
            spec,
            state_path,
            state: RwLock::new(state),
        }
    }

    /// Load the catalogue from `generate_path`.
    ///
    /// A missing generation file yields an empty catalogue.
    pub fn load(generate_path: &Path, state_path: impl Into<PathBuf>) -> InventoryResult<Self> {
        let spec = match std::fs::read_to_string(generate_path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| InventoryError::Parse {
                    path: generate_path.to_path_buf(),
                    source,
                })?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "Inventory file {} not found, no kits configured",
                    generate_path.display()
                );
                GenerateSpec::default()
            }
            Err(source) => {
                return Err(InventoryError::Io {
                    path: generate_path.to_path_buf(),
                    source,
                });
            }
        };

        info!(
            "Loaded {} kit(s) from {}",
            spec.kits.len(),
            generate_path.display()
        );
        Ok(Self::new(spec, state_path))
    }

    pub fn list_kits(&self) -> Vec<KitSummary> {
        self.spec.kits.iter().map(KitSpec::summary).collect()
    }

    pub fn kit_spec(&self, kit_id: &str) -> Option<&KitSpec> {
        self.spec.kits.iter().find(|k| k.kit_id == kit_id)
    }

    /// The persisted kit if it still exists, otherwise the first kit.
    pub async fn active_kit_id(&self) -> Option<String> {
        let state = self.state.read().await;
        self.resolve_active(&state).map(|k| k.kit_id.clone())
    }

    pub async fn active_kit(&self) -> ExpandedKit {
        let state = self.state.read().await;
        self.resolve_active(&state)
            .map(KitSpec::expand)
            .unwrap_or_else(ExpandedKit::empty)
    }

    /// Look up a device in the active kit.
    pub async fn device(&self, device_id: &str) -> Option<Device> {
        self.active_kit().await.device(device_id).cloned()
    }

    /// Make `kit_id` the active kit and persist the choice.
    pub async fn set_active(&self, kit_id: &str) -> InventoryResult<()> {
        if self.kit_spec(kit_id).is_none() {
            return Err(InventoryError::UnknownKit(kit_id.to_string()));
        }

        let mut state = self.state.write().await;
        let next = ActiveState {
            active_kit_id: Some(kit_id.to_string()),
        };
        write_state(&self.state_path, &next).await?;
        *state = next;

        info!("Active kit set to {}", kit_id);
        Ok(())
    }

    fn resolve_active(&self, state: &ActiveState) -> Option<&KitSpec> {
        state
            .active_kit_id
            .as_deref()
            .and_then(|id| self.kit_spec(id))
            .or_else(|| self.spec.kits.first())
    }
}

fn read_state(path: &Path) -> ActiveState {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Ignoring malformed state file {}: {}", path.display(), e);
            ActiveState::default()
        }),
        Err(_) => ActiveState::default(),
    }
}

async fn write_state(path: &Path, state: &ActiveState) -> InventoryResult<()> {
    let io_err = |source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let contents = serde_json::to_string_pretty(state).map_err(|source| InventoryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, contents).await.map_err(io_err)
}
