//! Daemon Configuration
//!
//! TOML configuration for the tvlink daemon. Every field has a default so a
//! partial file is enough; a missing file is created with the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tvlink_protocol::pairing::PairingConfig;
use tvlink_protocol::remote::RemoteConfig;
use tvlink_protocol::MachineConfig;

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub pairing: PairingSection,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub paths: PathConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TLS port of the pairing service
    #[serde(default = "default_pairing_port")]
    pub pairing_port: u16,

    /// TLS port of the remote-control service
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    /// TCP connect and TLS handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// Pairing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingSection {
    /// Name shown on the TV during pairing
    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Timeout of each handshake step in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout: u64,

    /// How long the user has to type the code, in seconds
    #[serde(default = "default_code_timeout")]
    pub code_timeout: u64,
}

/// Session and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Failures tolerated before the device enters the error state
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Retry delay ceiling in seconds
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u64,

    /// Seconds between heartbeat checks
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Seconds between keep-alive pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,

    /// Seconds of silence before a heartbeat check fails
    #[serde(default = "default_liveness_window")]
    pub liveness_window: u64,

    /// Model reported to the TV
    #[serde(default = "default_model")]
    pub model: String,

    /// Vendor reported to the TV
    #[serde(default = "default_vendor")]
    pub vendor: String,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    pub config_dir: PathBuf,

    /// Data directory (registry and credentials)
    pub data_dir: PathBuf,
}

fn default_pairing_port() -> u16 {
    tvlink_protocol::PAIRING_PORT
}

fn default_remote_port() -> u16 {
    tvlink_protocol::REMOTE_PORT
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_client_name() -> String {
    "tvlink".to_string()
}

fn default_service_name() -> String {
    "atvremote".to_string()
}

fn default_step_timeout() -> u64 {
    30
}

fn default_code_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_cap() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    5
}

fn default_liveness_window() -> u64 {
    20
}

fn default_model() -> String {
    "tvlink".to_string()
}

fn default_vendor() -> String {
    "tvlink".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pairing_port: default_pairing_port(),
            remote_port: default_remote_port(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            service_name: default_service_name(),
            step_timeout: default_step_timeout(),
            code_timeout: default_code_timeout(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap: default_retry_cap(),
            heartbeat_interval: default_heartbeat_interval(),
            ping_interval: default_ping_interval(),
            liveness_window: default_liveness_window(),
            model: default_model(),
            vendor: default_vendor(),
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            config_dir: dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join("tvlink"),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join("tvlink"),
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        PathConfig::default().config_dir.join("daemon.toml")
    }

    /// Load configuration from file, creating default if not found
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map_or_else(Self::default_path, Path::to_path_buf);

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {:?}", config_path))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {:?}", config_path))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.data_dir).context("Failed to create data directory")?;
        fs::create_dir_all(self.credentials_dir())
            .context("Failed to create credentials directory")?;
        Ok(())
    }

    /// Device registry file
    pub fn registry_path(&self) -> PathBuf {
        self.paths.data_dir.join("devices.json")
    }

    /// One credential record per device id
    pub fn credentials_dir(&self) -> PathBuf {
        self.paths.data_dir.join("credentials")
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            max_retries: self.session.max_retries,
            retry_base: Duration::from_millis(self.session.retry_base_ms),
            retry_cap: Duration::from_secs(self.session.retry_cap),
            heartbeat_interval: Duration::from_secs(self.session.heartbeat_interval),
        }
    }

    pub fn pairing_config(&self) -> PairingConfig {
        PairingConfig {
            port: self.network.pairing_port,
            step_timeout: Duration::from_secs(self.pairing.step_timeout),
            code_timeout: Duration::from_secs(self.pairing.code_timeout),
            client_name: self.pairing.client_name.clone(),
            service_name: self.pairing.service_name.clone(),
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            port: self.network.remote_port,
            ping_interval: Duration::from_secs(self.session.ping_interval),
            liveness_window: Duration::from_secs(self.session.liveness_window),
            connect_timeout: Duration::from_secs(self.network.connect_timeout),
            model: self.session.model.clone(),
            vendor: self.session.vendor.clone(),
            ..RemoteConfig::default()
        }
    }
}
