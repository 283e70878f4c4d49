//! Local compute node identity.

use std::path::Path;

use crate::error::VolumeError;

/// Read this compute node's identifier from `path` (by default the DMI
/// product UUID).  The value is trimmed and lower-cased; an empty file is an
/// error.
pub async fn read_node_id(path: &Path) -> Result<String, VolumeError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        VolumeError::LocalIo(format!("read node identity {}: {e}", path.display()))
    })?;
    let id = raw.trim().to_lowercase();
    if id.is_empty() {
        return Err(VolumeError::LocalIo(format!(
            "node identity file {} is empty",
            path.display()
        )));
    }
    Ok(id)
}
