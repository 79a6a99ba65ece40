//! Persisted storage configuration.
//!
//! ```json
//! {"storages": [{"id": "usb0", "name": "USB stick", "path": "/media/usb0",
//!   "vroot": "/media/usb0", "filesystem": "vfat", "mountdev": "/dev/sdb1",
//!   "mountpt": "/media/usb0", "automount": true, "readonly": false,
//!   "per_user": false}]}
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::kv::KvStore;

use super::error::{VfsError, VfsResult};

/// Key/value table holding storage configurations.
pub const KV_TABLE: &str = "storage";

/// Key of the default mount set.
pub const KV_DEFAULT_KEY: &str = "default";

fn default_filesystem() -> String {
    "local".to_string()
}

/// One configured storage handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Real root; `~` and environment variables are expanded.
    pub path: String,
    pub vroot: String,
    #[serde(default = "default_filesystem")]
    pub filesystem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountdev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpt: Option<String>,
    #[serde(default)]
    pub automount: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub per_user: bool,
}

/// The whole storage configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storages: Vec<HandlerConfig>,
}

impl StorageConfig {
    pub fn from_json(json: &str) -> VfsResult<Self> {
        serde_json::from_str(json).map_err(|e| VfsError::config(e.to_string()))
    }

    pub fn to_json(&self) -> VfsResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| VfsError::config(e.to_string()))
    }

    /// Load from a JSON file.
    pub async fn load(path: &Path) -> VfsResult<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| VfsError::config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&json)
            .map_err(|e| VfsError::config(format!("{}: {}", path.display(), e)))
    }

    /// Write to a JSON file.
    pub async fn save(&self, path: &Path) -> VfsResult<()> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Load the default mount set from a key/value store.
    ///
    /// A missing entry yields an empty configuration.
    pub fn load_from_kv(kv: &dyn KvStore) -> VfsResult<Self> {
        let bytes = kv
            .get(KV_TABLE, KV_DEFAULT_KEY)
            .map_err(|e| VfsError::config(e.to_string()))?;
        match bytes {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| VfsError::config(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Store this configuration as the default mount set.
    pub fn save_to_kv(&self, kv: &dyn KvStore) -> VfsResult<()> {
        kv.put(KV_TABLE, KV_DEFAULT_KEY, self.to_json()?.as_bytes())
            .map_err(|e| VfsError::config(e.to_string()))
    }
}
