//! Volume lifecycle orchestrator.
//!
//! [`VolumeDriver`] drives cloud volumes through
//! create → attach → format → detach, mount (attach → mount),
//! unmount (unmount → detach) and remove (detach → delete), keeping the
//! in-memory volume table and the metadata directory in step.
//!
//! # Concurrency
//!
//! Every lifecycle call takes one exclusive lock over the volume table and
//! holds it for the whole call, remote polling included.  No two calls run
//! concurrently, even for unrelated names: attach/detach against the same
//! compute node must not interleave, and a metadata file and its in-memory
//! record must change together.  Nothing is spawned; every call runs to
//! completion before the next one starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::DriverConfig;
use crate::device::{BlockDeviceTool, discover_new_device};
use crate::error::{ServiceError, VolumeError};
use crate::host::read_node_id;
use crate::metadata::MetadataStore;
use crate::resolver::{IdentityResolver, Resolution, tagged_name};
use crate::service::VolumeService;
use crate::types::{
    Capabilities, CreateOptions, OperationHandle, Scope, VolumeId, VolumeInfo, VolumeRecord,
    VolumeSpec,
};
use crate::waiter::OperationWaiter;

/// Licence type given to blank volumes.
const BLANK_LICENCE_TYPE: &str = "OTHER";

/// The volume lifecycle orchestrator.
pub struct VolumeDriver {
    config: DriverConfig,
    node_id: String,
    service: Arc<dyn VolumeService>,
    tool: Arc<dyn BlockDeviceTool>,
    waiter: OperationWaiter,
    store: MetadataStore,
    /// Volume records keyed by user-visible name.
    volumes: Mutex<HashMap<String, VolumeRecord>>,
}

fn not_found(name: &str) -> VolumeError {
    VolumeError::NotFound(format!("volume {name:?} does not exist"))
}

fn remote_failure(action: String, e: ServiceError) -> VolumeError {
    VolumeError::RemoteOperation(format!("failed to {action}: {e}"))
}

impl VolumeDriver {
    /// Prepare directories, read the node identity and rebuild the volume
    /// table from the metadata directory.
    ///
    /// Any error here is a startup failure.
    pub async fn new(
        config: DriverConfig,
        service: Arc<dyn VolumeService>,
        tool: Arc<dyn BlockDeviceTool>,
    ) -> Result<Self, VolumeError> {
        config.validate()?;

        let store = MetadataStore::new(&config.metadata_path);
        store.init().await?;
        tokio::fs::create_dir_all(&config.mount_path)
            .await
            .map_err(|e| {
                VolumeError::LocalIo(format!("create dir {}: {e}", config.mount_path.display()))
            })?;

        let node_id = read_node_id(&config.node_id_path).await?;
        info!(%node_id, location = %config.location, "volume driver starting");

        let driver = Self {
            waiter: OperationWaiter::new(config.poll_interval, config.max_polls),
            config,
            node_id,
            service,
            tool,
            store,
            volumes: Mutex::new(HashMap::new()),
        };
        driver.rehydrate().await?;
        Ok(driver)
    }

    /// Identifier of the compute node volumes are attached to.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(self.service.as_ref(), &self.config.location)
    }

    fn mount_point(&self, id: &VolumeId) -> PathBuf {
        self.config.mount_path.join(&id.0)
    }

    /// Mount source for a volume: its filesystem carries the volume ID as UUID.
    fn device_path(&self, id: &VolumeId) -> PathBuf {
        self.config.device_by_uuid_dir.join(&id.0)
    }

    async fn wait(&self, handle: &OperationHandle) -> Result<(), VolumeError> {
        self.waiter.wait(self.service.as_ref(), handle).await
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Rebuild the table from the metadata directory: resolve each name back
    /// to its cloud volume, recreate the mount point and drop stale mounts.
    ///
    /// Volumes left attached by an interrupted `Create` stay attached.
    async fn rehydrate(&self) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.lock().await;

        for name in self.store.names().await? {
            info!(%name, "initializing volume from metadata");
            let persisted = self.store.load(&name).await?;

            let volume = self.resolver().find_volume_by_name(&name).await?;
            if let Some(p) = &persisted
                && p.cloud_volume_id != volume.id
            {
                warn!(%name, recorded = %p.cloud_volume_id, resolved = %volume.id,
                    "metadata records a different volume id, using the resolved one");
            }

            let mount_point = self.mount_point(&volume.id);
            tokio::fs::create_dir_all(&mount_point).await.map_err(|e| {
                VolumeError::LocalIo(format!(
                    "failed to create the volume mount path {}: {e}",
                    mount_point.display()
                ))
            })?;
            if let Err(e) = self.tool.unmount(&mount_point).await {
                debug!(%name, error = %e, "no stale mount to tear down");
            }

            let record = VolumeRecord {
                name: name.clone(),
                cloud_volume_id: volume.id,
                mount_point,
                device_name: persisted
                    .as_ref()
                    .and_then(|p| p.device_name.clone()),
                mounted: false,
            };
            if persisted.as_ref() != Some(&record) {
                self.store.save(&record).await?;
            }
            volumes.insert(name, record);
        }

        info!(
            metadata_path = %self.store.root().display(),
            count = volumes.len(),
            "rehydration complete",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Remote steps
    // -----------------------------------------------------------------------

    /// Create the cloud volume for a new resolution and wait until it exists.
    async fn provision(
        &self,
        name: &str,
        size_gb: u32,
        disk_type: String,
        resolution: &Resolution,
    ) -> Result<VolumeId, VolumeError> {
        let remote_name = tagged_name(name);
        let location = &self.config.location;

        let existing = self
            .service
            .list_volumes(location)
            .await
            .map_err(|e| remote_failure(format!("list volumes in {location}"), e))?;
        if existing.iter().any(|v| v.name == remote_name) {
            return Err(VolumeError::Validation(format!(
                "failed to create volume {name}, a volume with this name already exists in {location}"
            )));
        }

        let (licence_type, image) = match resolution {
            Resolution::FromSnapshot(snapshot) => (None, Some(snapshot.id.clone())),
            _ => (Some(BLANK_LICENCE_TYPE.to_owned()), None),
        };
        let spec = VolumeSpec {
            name: remote_name,
            size_gb,
            disk_type,
            licence_type,
            image,
        };

        let provisioned = self
            .service
            .create_volume(location, &spec)
            .await
            .map_err(|e| remote_failure(format!("create volume {name}"), e))?;
        self.wait(&provisioned.operation).await?;

        info!(id = %provisioned.volume.id, remote_name = %spec.name, "volume provisioned");
        Ok(provisioned.volume.id)
    }

    async fn attach(&self, id: &VolumeId) -> Result<(), VolumeError> {
        let handle = self
            .service
            .attach_volume(&self.config.location, &self.node_id, id)
            .await
            .map_err(|e| remote_failure(format!("attach volume {id} to node {}", self.node_id), e))?;
        self.wait(&handle).await?;
        info!(%id, "volume attached");
        Ok(())
    }

    async fn detach(&self, id: &VolumeId) -> Result<(), VolumeError> {
        let handle = self
            .service
            .detach_volume(&self.config.location, &self.node_id, id)
            .await
            .map_err(|e| {
                remote_failure(format!("detach volume {id} from node {}", self.node_id), e)
            })?;
        self.wait(&handle).await?;
        info!(%id, "volume detached");
        Ok(())
    }

    /// Give the freshly attached device a filesystem whose UUID is the
    /// volume ID, or re-stamp the existing one.
    async fn prepare_filesystem(
        &self,
        id: &VolumeId,
        resolution: &Resolution,
    ) -> Result<Option<String>, VolumeError> {
        let devices = self.tool.list_block_devices().await?;
        let Some(device) = discover_new_device(&devices, &self.config.boot_disk)? else {
            warn!(%id, "no new block device found after attach, skipping filesystem setup");
            return Ok(None);
        };

        if resolution.needs_formatting() {
            info!(%device, %id, "formatting volume");
            self.tool.make_filesystem(&device, &id.0).await?;
        } else {
            info!(%device, %id, "adjusting filesystem uuid");
            self.tool.set_filesystem_uuid(&device, &id.0).await?;
        }
        Ok(Some(device))
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Create (or adopt) the volume `name` and leave it detached.
    ///
    /// Creating a name that is already known succeeds without remote calls.
    /// A failure aborts the call; steps already committed remotely are left
    /// for a later `create` or `remove` to reconcile.
    #[instrument(skip(self, opts))]
    pub async fn create(&self, name: &str, opts: &CreateOptions) -> Result<(), VolumeError> {
        self.store.path(name)?;
        let mut volumes = self.volumes.lock().await;

        if volumes.contains_key(name) {
            debug!("volume already known, nothing to create");
            return Ok(());
        }

        let size_gb = opts.size_gb()?.unwrap_or(self.config.default_size_gb);
        let disk_type = opts
            .disk_type()
            .unwrap_or(&self.config.default_disk_type)
            .to_owned();

        let resolution = self.resolver().resolve(name, opts).await?;
        debug!(?resolution, "request resolved");

        let id = match &resolution {
            Resolution::ExistingNoFormat(volume) => volume.id.clone(),
            Resolution::Fresh | Resolution::FromSnapshot(_) => {
                self.provision(name, size_gb, disk_type, &resolution).await?
            }
        };

        self.attach(&id).await?;
        let device_name = self.prepare_filesystem(&id, &resolution).await?;

        let mount_point = self.mount_point(&id);
        tokio::fs::create_dir_all(&mount_point).await.map_err(|e| {
            VolumeError::LocalIo(format!("create dir {}: {e}", mount_point.display()))
        })?;

        let record = VolumeRecord {
            name: name.to_owned(),
            cloud_volume_id: id.clone(),
            mount_point,
            device_name,
            mounted: false,
        };
        self.store.save(&record).await?;
        volumes.insert(name.to_owned(), record);

        // Attach is deferred to `mount`.
        self.detach(&id).await?;

        info!(%id, "volume created");
        Ok(())
    }

    /// Attach the volume and mount it; returns the mount point.
    #[instrument(skip(self))]
    pub async fn mount(&self, name: &str) -> Result<PathBuf, VolumeError> {
        let mut volumes = self.volumes.lock().await;
        let record = volumes.get_mut(name).ok_or_else(|| not_found(name))?;

        if record.mounted {
            debug!(mount_point = %record.mount_point.display(), "already mounted");
            return Ok(record.mount_point.clone());
        }

        self.attach(&record.cloud_volume_id).await?;
        let device = self.device_path(&record.cloud_volume_id);
        self.tool.mount(&device, &record.mount_point).await?;
        record.mounted = true;

        self.refresh_device_name(record, &device).await;

        info!(mount_point = %record.mount_point.display(), "volume mounted");
        Ok(record.mount_point.clone())
    }

    /// Re-derive the kernel device name behind the by-UUID link.
    async fn refresh_device_name(&self, record: &mut VolumeRecord, link: &Path) {
        let resolved = match tokio::fs::canonicalize(link).await {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(link = %link.display(), error = %e, "cannot resolve device link");
                return;
            }
        };
        if record.device_name.as_deref() == Some(resolved.as_str()) {
            return;
        }
        record.device_name = Some(resolved);
        if let Err(e) = self.store.save(record).await {
            warn!(name = %record.name, error = %e, "failed to persist device name");
        }
    }

    /// Unmount the mount point, then detach the volume.
    #[instrument(skip(self))]
    pub async fn unmount(&self, name: &str) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.lock().await;
        let record = volumes.get_mut(name).ok_or_else(|| not_found(name))?;

        self.tool.unmount(&record.mount_point).await?;
        record.mounted = false;

        self.detach(&record.cloud_volume_id).await?;
        info!("volume unmounted");
        Ok(())
    }

    /// Detach and delete the cloud volume, then drop every local trace of it.
    ///
    /// A volume that is already detached or already deleted is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.lock().await;
        let record = volumes.get(name).cloned().ok_or_else(|| not_found(name))?;
        let id = &record.cloud_volume_id;
        let location = &self.config.location;

        match self
            .service
            .detach_volume(location, &self.node_id, id)
            .await
        {
            Ok(handle) => self.wait(&handle).await?,
            Err(e) if e.is_not_found() => {
                warn!(%id, "volume already detached");
            }
            Err(e) => {
                return Err(remote_failure(
                    format!("detach volume {id} from node {}", self.node_id),
                    e,
                ));
            }
        }

        // A retry after a failed local cleanup finds the volume already gone.
        match self.service.delete_volume(location, id).await {
            Ok(handle) => self.wait(&handle).await?,
            Err(e) if e.is_not_found() => {
                warn!(%id, "volume already deleted");
            }
            Err(e) => {
                return Err(remote_failure(format!("delete volume {id} from {location}"), e));
            }
        }

        match tokio::fs::remove_dir(&record.mount_point).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VolumeError::LocalIo(format!(
                    "remove dir {}: {e}",
                    record.mount_point.display()
                )));
            }
        }
        self.store.remove(name).await?;
        volumes.remove(name);

        info!(%id, "volume removed");
        Ok(())
    }

    /// All known volumes, sorted by name.
    pub async fn list(&self) -> Vec<VolumeInfo> {
        let volumes = self.volumes.lock().await;
        let mut list: Vec<VolumeInfo> = volumes
            .values()
            .map(|r| VolumeInfo {
                name: r.name.clone(),
                mountpoint: r.mount_point.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// The volume `name`, if known. Never consults the Volume Service.
    pub async fn get(&self, name: &str) -> Option<VolumeInfo> {
        let volumes = self.volumes.lock().await;
        volumes.get(name).map(|r| VolumeInfo {
            name: r.name.clone(),
            mountpoint: r.mount_point.clone(),
        })
    }

    /// A copy of the full local record for `name`.
    pub async fn record(&self, name: &str) -> Option<VolumeRecord> {
        self.volumes.lock().await.get(name).cloned()
    }

    /// Mount point of `name`.
    pub async fn path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        let volumes = self.volumes.lock().await;
        volumes
            .get(name)
            .map(|r| r.mount_point.clone())
            .ok_or_else(|| not_found(name))
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }
}
