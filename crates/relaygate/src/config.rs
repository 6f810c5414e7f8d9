//! Layered configuration: defaults, TOML file, then `RELAYGATE__*` env vars.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::device::{DEFAULT_REQUEST_TIMEOUT, DeviceCredentials};
use crate::ws::{DEFAULT_CONNECTION_BUFFER, DEFAULT_HEARTBEAT_INTERVAL, HubSettings};

pub const APP_NAME: &str = "relaygate";
pub const ENV_PREFIX: &str = "RELAYGATE";

const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub devices: DevicesConfig,
    pub relay: RelayConfig,
    pub inventory: InventoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Built UI bundle to serve; nothing is served when unset.
    pub dist_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9980,
            dist_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub user: String,
    pub password: String,
    pub request_timeout_secs: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            password: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub path: String,
    pub heartbeat_interval_secs: u64,
    pub connection_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            path: "/td".to_string(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Kit catalogue (`{"kits": [...]}`).
    pub generate_path: String,
    /// Persisted active-kit selection.
    pub state_path: String,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            generate_path: "generate.json".to_string(),
            state_path: "state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (optional on disk) and the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process env.
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let built = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(env),
            )
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?;

        let mut config: AppConfig = built.try_deserialize().context("parsing config")?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    fn expand_paths(&mut self) -> Result<()> {
        if let Some(dist) = &self.server.dist_dir {
            self.server.dist_dir = Some(expand_str(dist)?);
        }
        self.inventory.generate_path = expand_str(&self.inventory.generate_path)?;
        self.inventory.state_path = expand_str(&self.inventory.state_path)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.relay.path.starts_with('/') {
            bail!("relay.path must start with '/': {:?}", self.relay.path);
        }
        if self.relay.heartbeat_interval_secs == 0 {
            bail!("relay.heartbeat_interval_secs must be positive");
        }
        if self.relay.connection_buffer == 0 {
            bail!("relay.connection_buffer must be positive");
        }
        if self.devices.request_timeout_secs == 0 {
            bail!("devices.request_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Copy safe to print: the device password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.devices.password.is_empty() {
            copy.devices.password = REDACTED.to_string();
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config to TOML")
    }

    pub fn credentials(&self) -> DeviceCredentials {
        DeviceCredentials {
            user: self.devices.user.clone(),
            password: self.devices.password.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.devices.request_timeout_secs)
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            heartbeat_interval: Duration::from_secs(self.relay.heartbeat_interval_secs),
            connection_buffer: self.relay.connection_buffer,
        }
    }

    pub fn dist_dir(&self) -> Option<PathBuf> {
        self.server.dist_dir.as_ref().map(PathBuf::from)
    }
}

/// Resolve the config file location, honouring an explicit override.
pub fn config_file_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine config directory"))
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => Ok(PathBuf::from(expand_str(text)?)),
        None => Ok(path.to_path_buf()),
    }
}

fn expand_str(text: &str) -> Result<String> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(expanded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_with_env(&dir.path().join("missing.toml"), env(&[])).unwrap();

        assert_eq!(config.server.port, 9980);
        assert_eq!(config.devices.user, "admin");
        assert_eq!(config.relay.path, "/td");
        assert_eq!(config.hub_settings().heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.dist_dir().is_none());
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[server]\nport = 8080\n\n[devices]\nuser = \"operator\"\npassword = \"from-file\"\n",
        )
        .unwrap();

        let config = AppConfig::load_with_env(
            &path,
            env(&[
                ("RELAYGATE__DEVICES__PASSWORD", "from-env"),
                ("RELAYGATE__RELAY__HEARTBEAT_INTERVAL_SECS", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.devices.user, "operator");
        assert_eq!(config.devices.password, "from-env");
        assert_eq!(config.relay.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_invalid_relay_path_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[relay]\npath = \"td\"\n").unwrap();

        assert!(AppConfig::load_with_env(&path, env(&[])).is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[relay]\nconnection_buffer = 0\n").unwrap();

        assert!(AppConfig::load_with_env(&path, env(&[])).is_err());
    }

    #[test]
    fn test_redacted_hides_password() {
        let mut config = AppConfig::default();
        config.devices.password = "hunter2".to_string();

        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(REDACTED));
        assert_eq!(config.credentials().password, "hunter2");
    }

    #[test]
    fn test_config_file_path_directory_override() {
        let dir = TempDir::new().unwrap();
        let path = config_file_path(Some(dir.path())).unwrap();
        assert_eq!(path, dir.path().join("config.toml"));
    }
}
