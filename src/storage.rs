//! Key-addressable blob storage on local disks
//!
//! Every disk is a root directory; objects are addressed by relative,
//! `/`-separated keys such as `torrents/2024/05/01/Foo.torrent`. The quarantine
//! disk is kept apart from the permanent disks and is always named
//! [`QUARANTINE_DISK`].

use crate::config::StorageConfig;
use crate::error::{QuarantineError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Name of the quarantine disk as stored on download records
pub const QUARANTINE_DISK: &str = "quarantine";

/// A named storage root
#[derive(Clone, Debug)]
pub struct Disk {
    name: String,
    root: PathBuf,
}

impl Disk {
    /// Create a disk rooted at `root`
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Disk name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a filesystem path, rejecting keys that escape the root
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_clean = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_clean {
            return Err(QuarantineError::InvalidKey {
                key: key.to_string(),
            }
            .into());
        }
        Ok(self.root.join(relative))
    }

    /// Whether an object exists under `key`
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Size of the object under `key`
    pub async fn size(&self, key: &str) -> Result<u64> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(self.missing(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` under `key`, creating parent directories
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Delete the object under `key`
    ///
    /// Returns false when there was nothing to delete.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the object under `key` to `dest_key` on `dest`
    ///
    /// Returns the number of bytes copied.
    pub async fn copy_to(&self, key: &str, dest: &Disk, dest_key: &str) -> Result<u64> {
        let source = self.path(key)?;
        let target = dest.path(dest_key)?;
        if !fs::try_exists(&source).await? {
            return Err(self.missing(key));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs::copy(&source, &target).await?)
    }

    fn missing(&self, key: &str) -> crate::Error {
        QuarantineError::ObjectMissing {
            disk: self.name.clone(),
            key: key.to_string(),
        }
        .into()
    }
}

/// The quarantine disk plus every permanent disk
#[derive(Clone, Debug)]
pub struct Disks {
    quarantine: Disk,
    permanent: HashMap<String, Disk>,
    default_disk: String,
}

impl Disks {
    /// Build the disk set from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        let permanent = config
            .disks
            .iter()
            .map(|(name, root)| (name.clone(), Disk::new(name.clone(), root.clone())))
            .collect();
        Self {
            quarantine: Disk::new(QUARANTINE_DISK, config.quarantine_dir.clone()),
            permanent,
            default_disk: config.default_disk.clone(),
        }
    }

    /// Create every disk root
    pub async fn ensure_roots(&self) -> Result<()> {
        for disk in std::iter::once(&self.quarantine).chain(self.permanent.values()) {
            fs::create_dir_all(disk.root()).await.map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create disk '{}' at '{}': {}",
                        disk.name(),
                        disk.root().display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }

    /// The quarantine disk
    pub fn quarantine(&self) -> &Disk {
        &self.quarantine
    }

    /// A permanent disk by name
    pub fn get(&self, name: &str) -> Result<&Disk> {
        self.permanent.get(name).ok_or_else(|| {
            QuarantineError::UnknownDisk {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Name of the default permanent disk
    pub fn default_disk(&self) -> &str {
        &self.default_disk
    }
}
