//! Driver configuration.
//!
//! Defaults match a stock installation. [`DriverConfig::from_env`] overrides
//! individual fields from environment variables:
//!
//! - `BLOCKVOL_METADATA_PATH`: directory holding one metadata file per volume.
//! - `BLOCKVOL_MOUNT_PATH`: directory under which mount points are created.
//! - `BLOCKVOL_LOCATION`: data center / location ID the volumes live in. Required.
//! - `BLOCKVOL_VOLUME_SIZE`: default volume size in GB.
//! - `BLOCKVOL_DISK_TYPE`: default disk type.
//! - `BLOCKVOL_NODE_ID_PATH`: file exposing this compute node's identifier.
//! - `BLOCKVOL_BOOT_DISK`: kernel name of the boot disk, never a discovery candidate.
//! - `BLOCKVOL_POLL_INTERVAL_SECS`: delay between operation status checks.
//! - `BLOCKVOL_MAX_POLLS`: status checks before an operation times out.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::VolumeError;

const DEFAULT_METADATA_PATH: &str = "/etc/docker/plugins/profitbricks/volumes";
const DEFAULT_MOUNT_PATH: &str = "/var/run/docker/volumedriver/profitbricks";
const DEFAULT_NODE_ID_PATH: &str = "/sys/devices/virtual/dmi/id/product_uuid";
const DEFAULT_BY_UUID_DIR: &str = "/dev/disk/by-uuid";

/// Runtime configuration of a [`VolumeDriver`](crate::driver::VolumeDriver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub metadata_path: PathBuf,
    pub mount_path: PathBuf,
    /// Location (data center) holding the volumes and this compute node.
    pub location: String,
    pub default_size_gb: u32,
    pub default_disk_type: String,
    pub node_id_path: PathBuf,
    pub boot_disk: String,
    /// Directory of filesystem-UUID symlinks used as the mount source.
    pub device_by_uuid_dir: PathBuf,
    pub poll_interval: Duration,
    /// Polling budget of the operation waiter. With the default interval
    /// this bounds every remote operation to about fifteen minutes.
    pub max_polls: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from(DEFAULT_METADATA_PATH),
            mount_path: PathBuf::from(DEFAULT_MOUNT_PATH),
            location: String::new(),
            default_size_gb: 50,
            default_disk_type: "HDD".to_owned(),
            node_id_path: PathBuf::from(DEFAULT_NODE_ID_PATH),
            boot_disk: "vda".to_owned(),
            device_by_uuid_dir: PathBuf::from(DEFAULT_BY_UUID_DIR),
            poll_interval: Duration::from_secs(10),
            max_polls: 90,
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, VolumeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| VolumeError::Validation(format!("{key}={raw:?}: {e}")))
}

impl DriverConfig {
    /// Defaults overridden by `BLOCKVOL_*` environment variables.
    pub fn from_env() -> Result<Self, VolumeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, VolumeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BLOCKVOL_METADATA_PATH") {
            config.metadata_path = PathBuf::from(v);
        }
        if let Some(v) = var("BLOCKVOL_MOUNT_PATH") {
            config.mount_path = PathBuf::from(v);
        }
        if let Some(v) = var("BLOCKVOL_LOCATION") {
            config.location = v.trim().to_owned();
        }
        if let Some(v) = var("BLOCKVOL_VOLUME_SIZE") {
            config.default_size_gb = parse_var("BLOCKVOL_VOLUME_SIZE", &v)?;
        }
        if let Some(v) = var("BLOCKVOL_DISK_TYPE") {
            config.default_disk_type = v.trim().to_owned();
        }
        if let Some(v) = var("BLOCKVOL_NODE_ID_PATH") {
            config.node_id_path = PathBuf::from(v);
        }
        if let Some(v) = var("BLOCKVOL_BOOT_DISK") {
            config.boot_disk = v.trim().to_owned();
        }
        if let Some(v) = var("BLOCKVOL_POLL_INTERVAL_SECS") {
            config.poll_interval =
                Duration::from_secs(parse_var("BLOCKVOL_POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = var("BLOCKVOL_MAX_POLLS") {
            config.max_polls = parse_var("BLOCKVOL_MAX_POLLS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the driver cannot start with.
    pub fn validate(&self) -> Result<(), VolumeError> {
        if self.location.is_empty() {
            return Err(VolumeError::Validation(
                "a location ID is required (BLOCKVOL_LOCATION)".into(),
            ));
        }
        if self.max_polls == 0 {
            return Err(VolumeError::Validation(
                "BLOCKVOL_MAX_POLLS must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
