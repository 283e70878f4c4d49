//! Durable volume metadata.
//!
//! # On-disk layout
//!
//! ```text
//! <metadata_path>/          # mode 0700
//!   <volume-name>           # mode 0600, JSON-encoded VolumeRecord
//!   .<volume-name>.tmp      # transient, only while a write is in flight
//! ```
//!
//! The store never writes on its own; the driver tells it when to save or
//! remove a record, so the directory always mirrors the in-memory table.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::VolumeError;
use crate::types::VolumeRecord;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// One metadata file per volume name under a single directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the metadata file for `name`.
    ///
    /// Names that are empty, start with a dot or contain a path separator are
    /// rejected so a record can never escape the metadata directory.
    pub fn path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            return Err(VolumeError::Validation(format!(
                "{name:?} is not a valid volume name"
            )));
        }
        Ok(self.root.join(name))
    }

    /// Create the metadata directory with restrictive permissions.
    pub async fn init(&self) -> Result<(), VolumeError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            VolumeError::LocalIo(format!("create dir {}: {e}", self.root.display()))
        })?;
        tokio::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(DIR_MODE))
            .await
            .map_err(|e| VolumeError::LocalIo(format!("chmod {}: {e}", self.root.display())))
    }

    /// Persist `record`, replacing any previous file for the same name.
    pub async fn save(&self, record: &VolumeRecord) -> Result<(), VolumeError> {
        let path = self.path(&record.name)?;
        let tmp = self.root.join(format!(".{}.tmp", record.name));
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| VolumeError::LocalIo(format!("encode metadata {}: {e}", record.name)))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&tmp)
            .await
            .map_err(|e| VolumeError::LocalIo(format!("create {}: {e}", tmp.display())))?;
        file.write_all(&json)
            .await
            .map_err(|e| VolumeError::LocalIo(format!("write {}: {e}", tmp.display())))?;
        file.sync_all()
            .await
            .map_err(|e| VolumeError::LocalIo(format!("sync {}: {e}", tmp.display())))?;
        drop(file);

        // `mode` only applies when the file is created.
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(FILE_MODE))
            .await
            .map_err(|e| VolumeError::LocalIo(format!("chmod {}: {e}", tmp.display())))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(VolumeError::LocalIo(format!(
                "rename {} -> {}: {e}",
                tmp.display(),
                path.display()
            )));
        }

        debug!(name = %record.name, path = %path.display(), "metadata saved");
        Ok(())
    }

    /// Read the record persisted for `name`.
    ///
    /// A missing file is [`VolumeError::NotFound`].  A file that exists but
    /// does not decode (for instance an empty placeholder) yields `Ok(None)`:
    /// its name is still meaningful, its content is not.
    pub async fn load(&self, name: &str) -> Result<Option<VolumeRecord>, VolumeError> {
        let path = self.path(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolumeError::NotFound(format!(
                    "no metadata for volume {name:?}"
                )));
            }
            Err(e) => {
                return Err(VolumeError::LocalIo(format!("read {}: {e}", path.display())));
            }
        };

        match serde_json::from_slice::<VolumeRecord>(&bytes) {
            Ok(record) if record.name == name => Ok(Some(record)),
            Ok(record) => {
                warn!(name, recorded = %record.name, "metadata name mismatch, ignoring content");
                Ok(None)
            }
            Err(e) => {
                warn!(name, error = %e, "undecodable metadata, ignoring content");
                Ok(None)
            }
        }
    }

    /// Remove the metadata file for `name`. Removing an absent file succeeds.
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name, "metadata removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::LocalIo(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }

    /// Whether a metadata file exists for `name`.
    pub async fn contains(&self, name: &str) -> bool {
        match self.path(name) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Names of all persisted volumes, sorted.
    pub async fn names(&self) -> Result<Vec<String>, VolumeError> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            VolumeError::LocalIo(format!("read_dir {}: {e}", self.root.display()))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| {
            VolumeError::LocalIo(format!("read_dir {}: {e}", self.root.display()))
        })? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping non-UTF8 metadata file");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}
