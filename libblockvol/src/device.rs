//! Local block devices: the tool capability used to mount, unmount and format
//! them, and discovery of the device a remote attach just produced.
//!
//! Attach APIs change which block devices the kernel exposes but do not
//! report the resulting device name.  [`discover_new_device`] finds it by
//! elimination over the device listing: a freshly attached volume is a whole
//! disk that is neither the boot disk, nor mounted, nor stamped with a
//! filesystem UUID yet.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::VolumeError;
use crate::types::BlockDevice;

/// Columns requested from `lsblk`, in `-P` (key="value") form.
const LSBLK_COLUMNS: &str = "NAME,MOUNTPOINT,TYPE,UUID";

/// Local block-device tooling.
///
/// Every call is a synchronous external-process invocation; a non-zero exit
/// is reported as [`VolumeError::LocalIo`] carrying the captured stderr.
#[async_trait]
pub trait BlockDeviceTool: Send + Sync {
    async fn mount(&self, device: &Path, target: &Path) -> Result<(), VolumeError>;

    async fn unmount(&self, target: &Path) -> Result<(), VolumeError>;

    /// Create a new filesystem on `device` whose UUID is `uuid`.
    async fn make_filesystem(&self, device: &str, uuid: &str) -> Result<(), VolumeError>;

    /// Rewrite the UUID of the existing filesystem on `device`.
    async fn set_filesystem_uuid(&self, device: &str, uuid: &str) -> Result<(), VolumeError>;

    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, VolumeError>;
}

/// [`BlockDeviceTool`] backed by `mount`, `umount`, `mkfs.ext4`, `tune2fs`
/// and `lsblk`.
#[derive(Debug, Clone, Default)]
pub struct SystemBlockDeviceTool;

impl SystemBlockDeviceTool {
    pub fn new() -> Self {
        Self
    }
}

/// Run `program args..` and return its stdout.
async fn run(program: &str, args: &[&str]) -> Result<String, VolumeError> {
    debug!(program, ?args, "running");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| VolumeError::LocalIo(format!("failed to execute {program}: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VolumeError::LocalIo(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(stdout)
}

fn path_arg(path: &Path) -> Result<&str, VolumeError> {
    path.to_str()
        .ok_or_else(|| VolumeError::LocalIo(format!("non-UTF8 path {}", path.display())))
}

#[async_trait]
impl BlockDeviceTool for SystemBlockDeviceTool {
    #[instrument(skip(self))]
    async fn mount(&self, device: &Path, target: &Path) -> Result<(), VolumeError> {
        run("mount", &[path_arg(device)?, path_arg(target)?]).await?;
        info!(device = %device.display(), target = %target.display(), "mounted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unmount(&self, target: &Path) -> Result<(), VolumeError> {
        run("umount", &[path_arg(target)?]).await?;
        info!(target = %target.display(), "unmounted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn make_filesystem(&self, device: &str, uuid: &str) -> Result<(), VolumeError> {
        run("mkfs.ext4", &["-U", uuid, device]).await?;
        info!(device, uuid, "filesystem created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_filesystem_uuid(&self, device: &str, uuid: &str) -> Result<(), VolumeError> {
        run("tune2fs", &["-U", uuid, device]).await?;
        info!(device, uuid, "filesystem uuid updated");
        Ok(())
    }

    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, VolumeError> {
        let stdout = run("lsblk", &["-P", "-o", LSBLK_COLUMNS]).await?;
        Ok(parse_lsblk_pairs(&stdout))
    }
}

static PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Z:\-]+)="([^"]*)""#).expect("valid lsblk pair pattern"));

/// Parse `lsblk -P` output.  Lines without a `NAME` are skipped; missing
/// columns read as empty.
pub fn parse_lsblk_pairs(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let mut device = BlockDevice::default();
            let mut has_name = false;
            for cap in PAIR_RE.captures_iter(line) {
                let value = cap[2].to_owned();
                match &cap[1] {
                    "NAME" => {
                        device.name = value;
                        has_name = true;
                    }
                    "MOUNTPOINT" => device.mountpoint = value,
                    "TYPE" => device.device_type = value,
                    "UUID" => device.fs_uuid = value,
                    _ => {}
                }
            }
            has_name.then_some(device)
        })
        .collect()
}

/// Whether `device` looks like a volume that was just attached.
fn is_discovery_candidate(device: &BlockDevice, boot_disk: &str) -> bool {
    device.device_type == "disk"
        && device.name != boot_disk
        && device.mountpoint.is_empty()
        && device.fs_uuid.is_empty()
}

/// Find the single newly attached device in `devices`.
///
/// Returns its `/dev/...` path, `Ok(None)` when there is no candidate, and
/// [`VolumeError::Ambiguous`] when more than one device qualifies.
pub fn discover_new_device(
    devices: &[BlockDevice],
    boot_disk: &str,
) -> Result<Option<String>, VolumeError> {
    let candidates: Vec<&BlockDevice> = devices
        .iter()
        .filter(|d| is_discovery_candidate(d, boot_disk))
        .collect();

    match candidates.as_slice() {
        [] => Ok(None),
        [device] => Ok(Some(format!("/dev/{}", device.name))),
        many => {
            let names: Vec<&str> = many.iter().map(|d| d.name.as_str()).collect();
            Err(VolumeError::Ambiguous(format!(
                "{} new devices without filesystem: {}",
                many.len(),
                names.join(", ")
            )))
        }
    }
}
