//! File-backed device store
//!
//! Devices live in the registry document; credentials live next to it, one
//! JSON record per device id.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tvlink_protocol::{
    CredentialRecord, Credentials, DeviceIdentity, DeviceRegistry, DeviceStore, PlatformKind,
    ProtocolError, Result,
};
use tvlink_protocol::registry::DeviceEntry;

/// Registry plus credential files; all disk access after `open` goes through tokio::fs
pub struct FileStore {
    registry_path: PathBuf,
    credentials_dir: PathBuf,
    registry: Mutex<DeviceRegistry>,
}

impl FileStore {
    /// Open the store, loading the registry and deriving each device's status
    pub fn open(registry_path: impl Into<PathBuf>, credentials_dir: impl Into<PathBuf>) -> Result<Self> {
        let registry_path = registry_path.into();
        let credentials_dir = credentials_dir.into();

        let mut registry = DeviceRegistry::load(&registry_path)?;
        registry.derive_status(|id| credentials_path(&credentials_dir, id).exists());

        Ok(Self {
            registry_path,
            credentials_dir,
            registry: Mutex::new(registry),
        })
    }

    /// Copy of the registry as last loaded or written
    pub async fn registry(&self) -> DeviceRegistry {
        self.registry.lock().await.clone()
    }

    pub async fn has_credentials(&self, id: &str) -> bool {
        tokio::fs::try_exists(credentials_path(&self.credentials_dir, id))
            .await
            .unwrap_or(false)
    }

    /// Credentials for a device; unreadable or incomplete records count as absent
    pub async fn load_credentials(&self, id: &str) -> Option<Credentials> {
        let path = credentials_path(&self.credentials_dir, id);
        let json = tokio::fs::read_to_string(&path).await.ok()?;
        let record: CredentialRecord = match serde_json::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring malformed credentials at {:?}: {}", path, e);
                return None;
            }
        };
        let credentials = Credentials::from_record(&record);
        if credentials.is_none() {
            warn!("Ignoring incomplete credentials for device {}", id);
        }
        credentials
    }

    /// Delete whatever credential file a device has, readable or not
    pub async fn purge_credentials(&self, id: &str) -> Result<bool> {
        let removed = remove_file_if_exists(&credentials_path(&self.credentials_dir, id)).await?;
        let mut registry = self.registry.lock().await;
        self.refresh_status(&mut registry).await;
        Ok(removed)
    }

    /// Drop a device from the registry along with its credentials
    pub async fn remove_device(&self, id: &str) -> Result<Option<DeviceEntry>> {
        let mut registry = self.registry.lock().await;
        let removed = registry.remove(id);
        self.persist(&registry).await?;
        remove_file_if_exists(&credentials_path(&self.credentials_dir, id)).await?;
        Ok(removed)
    }

    async fn persist(&self, registry: &DeviceRegistry) -> Result<()> {
        if let Some(parent) = self.registry_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(registry)?;
        tokio::fs::write(&self.registry_path, json).await?;
        debug!("Saved device registry to {:?}", self.registry_path);
        Ok(())
    }

    async fn refresh_status(&self, registry: &mut DeviceRegistry) {
        let mut paired = Vec::new();
        for device in &registry.devices {
            if self.has_credentials(&device.id).await {
                paired.push(device.id.clone());
            }
        }
        registry.derive_status(|id| paired.iter().any(|p| p == id));
    }
}

fn credentials_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id))
}

/// Whether a file was actually removed
async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

#[async_trait]
impl DeviceStore for FileStore {
    async fn identity_assigned(&self, identity: &DeviceIdentity) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let mut entry = DeviceEntry::new(
            identity.id.clone(),
            identity.name.clone(),
            PlatformKind::AndroidTv,
            identity.ip.to_string(),
        );
        if let Some(existing) = registry.get(&identity.id) {
            entry.platform = existing.platform;
            entry.mac = existing.mac.clone();
            entry.config = existing.config.clone();
        }
        registry.upsert(entry);
        self.persist(&registry).await
    }

    async fn store_credentials(
        &self,
        identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<()> {
        let record = credentials.to_record()?;
        let json = serde_json::to_string_pretty(&record)?;

        tokio::fs::create_dir_all(&self.credentials_dir).await?;
        let path = credentials_path(&self.credentials_dir, &identity.id);
        tokio::fs::write(&path, json).await?;
        info!("Stored credentials for {} ({})", identity.name, identity.id);

        let mut registry = self.registry.lock().await;
        self.refresh_status(&mut registry).await;
        Ok(())
    }

    async fn clear_credentials(&self, identity: &DeviceIdentity) -> Result<()> {
        self.purge_credentials(&identity.id).await?;
        debug!("Cleared credentials for {}", identity.id);
        Ok(())
    }

    async fn discard_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        if self.remove_device(&identity.id).await?.is_some() {
            info!("Discarded {} ({})", identity.name, identity.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tvlink_protocol::ClientIdentity;

    fn credentials() -> Credentials {
        let client = ClientIdentity::generate("tvlink").unwrap();
        let server = ClientIdentity::generate("tv").unwrap();
        Credentials::new(client, server.certificate)
    }

    fn open(dir: &Path) -> FileStore {
        FileStore::open(dir.join("devices.json"), dir.join("credentials")).unwrap()
    }

    fn bedroom() -> DeviceIdentity {
        DeviceIdentity::generate("Bedroom", "10.0.0.7".parse().unwrap())
    }

    #[tokio::test]
    async fn test_identity_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let identity = bedroom();

        store.identity_assigned(&identity).await.unwrap();

        let reopened = open(dir.path());
        let registry = reopened.registry().await;
        let entry = registry.get(&identity.id).unwrap();
        assert_eq!(entry.name, "Bedroom");
        assert_eq!(entry.ip, "10.0.0.7");
        assert_eq!(entry.platform, PlatformKind::AndroidTv);
        assert!(!entry.is_paired());
    }

    #[tokio::test]
    async fn test_credentials_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let identity = bedroom();
        let credentials = credentials();

        store.identity_assigned(&identity).await.unwrap();
        store.store_credentials(&identity, &credentials).await.unwrap();

        let reopened = open(dir.path());
        assert!(reopened.registry().await.get(&identity.id).unwrap().is_paired());
        let loaded = reopened.load_credentials(&identity.id).await.unwrap();
        assert_eq!(loaded.server_fingerprint(), credentials.server_fingerprint());
    }

    #[tokio::test]
    async fn test_clear_credentials_keeps_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let identity = bedroom();

        store.identity_assigned(&identity).await.unwrap();
        store.store_credentials(&identity, &credentials()).await.unwrap();
        store.clear_credentials(&identity).await.unwrap();
        // Clearing twice is not an error
        store.clear_credentials(&identity).await.unwrap();

        assert!(!store.has_credentials(&identity.id).await);
        assert!(store.load_credentials(&identity.id).await.is_none());
        assert!(store.registry().await.get(&identity.id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_credentials_are_absent_until_purged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        std::fs::create_dir_all(dir.path().join("credentials")).unwrap();
        std::fs::write(dir.path().join("credentials").join("abc.json"), "not json").unwrap();

        assert!(store.has_credentials("abc").await);
        assert!(store.load_credentials("abc").await.is_none());

        assert!(store.purge_credentials("abc").await.unwrap());
        assert!(!store.has_credentials("abc").await);
        assert!(!store.purge_credentials("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let identity = bedroom();
        store.identity_assigned(&identity).await.unwrap();
        store.store_credentials(&identity, &credentials()).await.unwrap();

        let removed = store.remove_device(&identity.id).await.unwrap();
        assert_eq!(removed.map(|e| e.name), Some("Bedroom".to_string()));
        assert!(!store.has_credentials(&identity.id).await);
        assert!(open(dir.path()).registry().await.devices.is_empty());
    }

    #[tokio::test]
    async fn test_discard_identity_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let kept = DeviceIdentity::generate("Kitchen", "10.0.0.8".parse().unwrap());
        let identity = bedroom();
        store.identity_assigned(&kept).await.unwrap();
        store.identity_assigned(&identity).await.unwrap();
        store.store_credentials(&identity, &credentials()).await.unwrap();

        store.discard_identity(&identity).await.unwrap();
        // Already gone
        store.discard_identity(&identity).await.unwrap();

        assert!(!store.has_credentials(&identity.id).await);
        let registry = open(dir.path()).registry().await;
        assert!(registry.get(&identity.id).is_none());
        assert!(registry.get(&kept.id).is_some());
    }
}
