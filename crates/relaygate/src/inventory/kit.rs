//! Kit records and their expansion into device descriptors.

use serde::{Deserialize, Serialize};

const DEFAULT_COUNT: u32 = 25;
const DEFAULT_VG_START: u32 = 1;
const DEFAULT_HOST_PREFIX: &str = "vg-";
const DEFAULT_HOST_SUFFIX: &str = ".local";
const DEFAULT_SCHEME: &str = "http";
const DEFAULT_NAME_PREFIX: &str = "LW-AMGF1-VG";

/// Contents of the inventory generation file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateSpec {
    #[serde(default)]
    pub kits: Vec<KitSpec>,
}

/// One kit: a numbered range of decoder hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitSpec {
    pub kit_id: String,
    #[serde(default)]
    pub kit_name: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub vg_start: Option<u32>,
    #[serde(default)]
    pub host_prefix: Option<String>,
    #[serde(default)]
    pub host_suffix: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
}

impl KitSpec {
    pub fn display_name(&self) -> &str {
        self.kit_name.as_deref().unwrap_or(&self.kit_id)
    }

    pub fn count(&self) -> u32 {
        self.count.unwrap_or(DEFAULT_COUNT)
    }

    pub fn vg_start(&self) -> u32 {
        self.vg_start.unwrap_or(DEFAULT_VG_START)
    }

    /// Kit number used in device ids: the first run of digits in the kit id,
    /// or the whole id when it has none.
    pub fn kit_number(&self) -> &str {
        let id = self.kit_id.as_str();
        match id.find(|c: char| c.is_ascii_digit()) {
            Some(start) => {
                let rest = &id[start..];
                let len = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                &rest[..len]
            }
            None => id,
        }
    }

    pub fn summary(&self) -> KitSummary {
        KitSummary {
            kit_id: self.kit_id.clone(),
            kit_name: self.display_name().to_string(),
            count: self.count(),
            vg_start: self.vg_start(),
        }
    }

    /// Expand the kit into its ordered device list.
    pub fn expand(&self) -> ExpandedKit {
        let kit_number = self.kit_number();
        let host_prefix = self.host_prefix.as_deref().unwrap_or(DEFAULT_HOST_PREFIX);
        let host_suffix = self.host_suffix.as_deref().unwrap_or(DEFAULT_HOST_SUFFIX);
        let scheme = self.scheme.as_deref().unwrap_or(DEFAULT_SCHEME);
        let name_prefix = self.name_prefix.as_deref().unwrap_or(DEFAULT_NAME_PREFIX);

        let devices = (0..self.count())
            .map(|i| {
                let vg_num = self.vg_start() + i;
                let kilo_num = i + 1;
                let host = format!("{}{:02}{}", host_prefix, vg_num, host_suffix);
                Device {
                    id: format!("kit{}-k{:02}", kit_number, kilo_num),
                    name: format!("{}-Kit{}-Kilo{:02}", name_prefix, kit_number, kilo_num),
                    base: format!("{}://{}", scheme, host),
                    host,
                    vg_num,
                    kilo_num,
                }
            })
            .collect();

        ExpandedKit {
            kit_id: Some(self.kit_id.clone()),
            kit_name: self.display_name().to_string(),
            devices,
        }
    }
}

/// Kit listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitSummary {
    pub kit_id: String,
    pub kit_name: String,
    pub count: u32,
    pub vg_start: u32,
}

/// An addressable decoder appliance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub host: String,
    pub base: String,
    pub vg_num: u32,
    pub kilo_num: u32,
}

/// A kit with its devices resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedKit {
    pub kit_id: Option<String>,
    pub kit_name: String,
    pub devices: Vec<Device>,
}

impl ExpandedKit {
    /// Placeholder returned when no kit is configured.
    pub fn empty() -> Self {
        Self {
            kit_id: None,
            kit_name: "No kits configured".to_string(),
            devices: Vec::new(),
        }
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }
}
