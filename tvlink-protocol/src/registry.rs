//! Device registry record
//!
//! The registry is a plain JSON document:
//!
//! ```json
//! { "version": 1, "devices": [ { "id": "...", "name": "Living Room",
//!   "platform": "androidtv", "ip": "192.168.1.50" } ] }
//! ```
//!
//! `status` is runtime-only. It is derived after load from whether stored
//! credentials exist and is never written back.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Current registry document version
pub const REGISTRY_VERSION: u32 = 1;

/// TV platform a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    AndroidTv,
    WebOs,
    Tizen,
    Philips,
    Adb,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::AndroidTv => "androidtv",
            PlatformKind::WebOs => "webos",
            PlatformKind::Tizen => "tizen",
            PlatformKind::Philips => "philips",
            PlatformKind::Adb => "adb",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "androidtv" | "android-tv" => Ok(PlatformKind::AndroidTv),
            "webos" => Ok(PlatformKind::WebOs),
            "tizen" => Ok(PlatformKind::Tizen),
            "philips" => Ok(PlatformKind::Philips),
            "adb" => Ok(PlatformKind::Adb),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

/// Derived, never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceStatus {
    #[default]
    Unpaired,
    Paired,
}

/// One registered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub name: String,
    pub platform: PlatformKind,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Platform specific settings, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(skip)]
    pub status: DeviceStatus,
}

impl DeviceEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        platform: PlatformKind,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            platform,
            ip: ip.into(),
            mac: None,
            config: None,
            status: DeviceStatus::Unpaired,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.status == DeviceStatus::Paired
    }
}

/// The registry document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistry {
    pub version: u32,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            devices: Vec::new(),
        }
    }
}

impl DeviceRegistry {
    /// Load from disk; a missing file is an empty registry
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No existing registry file at {:?}", path);
            return Ok(Self::default());
        }

        let json = fs::read_to_string(path)?;
        let registry: Self = serde_json::from_str(&json)?;
        info!("Loaded {} devices from registry", registry.devices.len());
        Ok(registry)
    }

    /// Save to disk, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!("Saved device registry to {:?}", path);
        Ok(())
    }

    /// Fill in the runtime status of every entry
    pub fn derive_status(&mut self, has_credentials: impl Fn(&str) -> bool) {
        for device in &mut self.devices {
            device.status = if has_credentials(&device.id) {
                DeviceStatus::Paired
            } else {
                DeviceStatus::Unpaired
            };
        }
    }

    pub fn get(&self, id: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Look up by id or, failing that, by case-insensitive name
    pub fn find(&self, id_or_name: &str) -> Option<&DeviceEntry> {
        self.get(id_or_name).or_else(|| {
            self.devices
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(id_or_name))
        })
    }

    /// Add or replace by id
    pub fn upsert(&mut self, entry: DeviceEntry) {
        info!("Adding/updating device: {} ({})", entry.name, entry.id);
        match self.devices.iter_mut().find(|d| d.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.devices.push(entry),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<DeviceEntry> {
        let index = self.devices.iter().position(|d| d.id == id)?;
        info!("Removing device: {}", id);
        Some(self.devices.remove(index))
    }
}
