//! Core types: local volume records, create options, cloud-side resources and
//! long-running operation state.
//!
//! Everything here is [`Serialize`]/[`Deserialize`]: records are persisted as
//! JSON metadata files, and the plugin-facing types are returned inside
//! response envelopes.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier the Volume Service assigns to a cloud volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Handle of a long-running remote operation (a status URL or request ID).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Local record
// ---------------------------------------------------------------------------

/// Local state kept for every user-visible volume name.
///
/// One record lives in the driver's table and one JSON file with the same
/// name lives in the metadata directory; the driver keeps the two in step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    /// User-visible name; also the metadata file name.
    pub name: String,
    /// Identifier of the backing cloud volume. Never changes once set.
    #[serde(rename = "cloudVolumeID")]
    pub cloud_volume_id: VolumeId,
    /// `<mount_path>/<cloud_volume_id>`.
    pub mount_point: PathBuf,
    /// Local device path discovered at attach time, e.g. `/dev/vdb`.
    /// May be stale after a reboot.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Whether the driver currently holds a mount at `mount_point`.
    #[serde(skip)]
    pub mounted: bool,
}

// ---------------------------------------------------------------------------
// Create options
// ---------------------------------------------------------------------------

/// Options accepted by `Create`, as sent by the container host.
///
/// Empty strings are treated the same as absent options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateOptions {
    /// Size in GB, as a decimal string.
    #[serde(default)]
    pub volume_size: Option<String>,
    /// Disk type, e.g. `HDD` or `SSD`.
    #[serde(default)]
    pub volume_type: Option<String>,
    /// Adopt an existing cloud volume by name. Must equal the request name.
    #[serde(default)]
    pub volume_name: Option<String>,
    /// Adopt an existing cloud volume by ID.
    #[serde(default)]
    pub volume_id: Option<String>,
    /// Create the volume from the snapshot with this name.
    #[serde(default)]
    pub snapshot_name: Option<String>,
    /// Create the volume from the snapshot with this ID.
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl CreateOptions {
    /// Build options from the raw key/value map of a plugin request.
    /// Unknown keys are ignored.
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        let get = |key: &str| options.get(key).cloned();
        Self {
            volume_size: get("volume_size"),
            volume_type: get("volume_type"),
            volume_name: get("volume_name"),
            volume_id: get("volume_id"),
            snapshot_name: get("snapshot_name"),
            snapshot_id: get("snapshot_id"),
        }
    }

    /// Parsed `volume_size`, if given.
    pub fn size_gb(&self) -> Result<Option<u32>, VolumeError> {
        non_empty(&self.volume_size)
            .map(|s| {
                s.parse::<u32>().map_err(|e| {
                    VolumeError::Validation(format!("volume_size {s:?} is not a valid size: {e}"))
                })
            })
            .transpose()
    }

    pub fn disk_type(&self) -> Option<&str> {
        non_empty(&self.volume_type)
    }

    pub fn volume_name(&self) -> Option<&str> {
        non_empty(&self.volume_name)
    }

    pub fn volume_id(&self) -> Option<&str> {
        non_empty(&self.volume_id)
    }

    pub fn snapshot_name(&self) -> Option<&str> {
        non_empty(&self.snapshot_name)
    }

    pub fn snapshot_id(&self) -> Option<&str> {
        non_empty(&self.snapshot_id)
    }
}

// ---------------------------------------------------------------------------
// Plugin-facing views
// ---------------------------------------------------------------------------

/// A volume as reported by `List` and `Get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
}

/// Reachability scope advertised to the container host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Reachable only from the host that created it.
    Local,
    /// Reachable regardless of which host mounts it.
    Global,
}

/// Static driver capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    pub scope: Scope,
}

// ---------------------------------------------------------------------------
// Cloud-side resources
// ---------------------------------------------------------------------------

/// A cloud volume as listed by the Volume Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudVolume {
    pub id: VolumeId,
    pub name: String,
}

/// A cloud snapshot as listed by the Volume Service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
}

/// Properties of a volume to be created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Remote name; carries the ownership tag.
    pub name: String,
    pub size_gb: u32,
    pub disk_type: String,
    /// Licence type; unset when the volume is built from an image.
    #[serde(default)]
    pub licence_type: Option<String>,
    /// Source image or snapshot ID.
    #[serde(default)]
    pub image: Option<String>,
}

/// Properties changed by an update call. `None` leaves a property untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUpdate {
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of a create call: the new volume and the operation provisioning it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionedVolume {
    pub volume: CloudVolume,
    pub operation: OperationHandle,
}

/// Status of a long-running operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
    Failed,
}

/// A single status observation of a long-running operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationState {
    pub status: OperationStatus,
    /// Service-provided message; meaningful for [`OperationStatus::Failed`].
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Local block devices
// ---------------------------------------------------------------------------

/// One row of the block-device listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDevice {
    /// Kernel name without the `/dev/` prefix, e.g. `vdb`.
    pub name: String,
    /// `disk`, `part`, `rom`, ...
    pub device_type: String,
    /// Empty when not mounted.
    pub mountpoint: String,
    /// Empty when no filesystem UUID is assigned.
    pub fs_uuid: String,
}
