#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libblockvol::{
    BlockDevice, BlockDeviceTool, CloudVolume, DriverConfig, OperationHandle, OperationState,
    OperationStatus, ProvisionedVolume, ServiceError, Snapshot, VolumeDriver, VolumeError,
    VolumeId, VolumeService, VolumeSpec, VolumeUpdate,
};
use tempfile::TempDir;

pub const LOCATION: &str = "dc-1";
pub const NODE_ID: &str = "4c4c4544-0042-3010-8051-b4c04f4b4d32";

// ---------------------------------------------------------------------------
// Volume Service double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateVolume(VolumeSpec),
    ListVolumes,
    GetVolume(String),
    UpdateVolume(String, Option<String>),
    DeleteVolume(String),
    Attach(String),
    Detach(String),
    ListSnapshots,
    GetSnapshot(String),
    OperationStatus(String),
}

impl Call {
    /// Calls that change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::CreateVolume(_)
                | Call::UpdateVolume(..)
                | Call::DeleteVolume(_)
                | Call::Attach(_)
                | Call::Detach(_)
        )
    }
}

#[derive(Debug)]
struct Operation {
    pending_polls: u32,
    outcome: OperationStatus,
    message: String,
}

#[derive(Debug, Default)]
struct ServiceState {
    volumes: Vec<CloudVolume>,
    snapshots: Vec<Snapshot>,
    attached: HashSet<VolumeId>,
    open_pair: Option<VolumeId>,
    calls: Vec<Call>,
    operations: HashMap<String, Operation>,
    next_ids: VecDeque<String>,
    counter: u64,
    /// Status checks answered `Pending` before an operation finishes.
    pending_polls: u32,
    /// Outcome for the next operation that gets created; consumed.
    next_failure: Option<String>,
    never_finish: bool,
    strict_pairs: bool,
    interleavings: u32,
    fail_delete: bool,
    status_unavailable: bool,
}

/// In-process Volume Service recording every call.
#[derive(Debug, Default)]
pub struct FakeVolumeService {
    state: Mutex<ServiceState>,
}

impl FakeVolumeService {
    pub fn new() -> Self {
        let svc = Self::default();
        svc.state.lock().unwrap().pending_polls = 1;
        svc
    }

    /// IDs handed out by subsequent creates, in order.
    pub fn push_create_id(&self, id: &str) {
        self.state.lock().unwrap().next_ids.push_back(id.to_owned());
    }

    pub fn add_volume(&self, id: &str, name: &str) {
        self.state.lock().unwrap().volumes.push(CloudVolume {
            id: VolumeId::from(id),
            name: name.to_owned(),
        });
    }

    pub fn add_snapshot(&self, id: &str, name: &str) {
        self.state.lock().unwrap().snapshots.push(Snapshot {
            id: id.to_owned(),
            name: name.to_owned(),
        });
    }

    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().unwrap().pending_polls = polls;
    }

    pub fn fail_next_operation(&self, message: &str) {
        self.state.lock().unwrap().next_failure = Some(message.to_owned());
    }

    pub fn never_finish(&self) {
        self.state.lock().unwrap().never_finish = true;
    }

    pub fn fail_delete(&self) {
        self.state.lock().unwrap().fail_delete = true;
    }

    pub fn status_unavailable(&self) {
        self.state.lock().unwrap().status_unavailable = true;
    }

    /// Reject an attach issued while another volume's attach has not been
    /// followed by its detach yet.
    pub fn strict_pairs(&self) {
        self.state.lock().unwrap().strict_pairs = true;
    }

    pub fn interleavings(&self) -> u32 {
        self.state.lock().unwrap().interleavings
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn volumes(&self) -> Vec<CloudVolume> {
        self.state.lock().unwrap().volumes.clone()
    }

    pub fn is_attached(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .attached
            .contains(&VolumeId::from(id))
    }

    /// Start an operation and return its handle.
    pub fn start_operation(&self) -> OperationHandle {
        let mut state = self.state.lock().unwrap();
        Self::new_operation(&mut state)
    }

    fn new_operation(state: &mut ServiceState) -> OperationHandle {
        state.counter += 1;
        let handle = format!("/requests/{}", state.counter);
        let (outcome, message) = match state.next_failure.take() {
            Some(message) => (OperationStatus::Failed, message),
            None => (OperationStatus::Done, String::new()),
        };
        state.operations.insert(
            handle.clone(),
            Operation {
                pending_polls: state.pending_polls,
                outcome,
                message,
            },
        );
        OperationHandle(handle)
    }
}

#[async_trait]
impl VolumeService for FakeVolumeService {
    async fn create_volume(
        &self,
        location: &str,
        spec: &VolumeSpec,
    ) -> Result<ProvisionedVolume, ServiceError> {
        assert_eq!(location, LOCATION);
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateVolume(spec.clone()));
        state.counter += 1;
        let id = match state.next_ids.pop_front() {
            Some(id) => id,
            None => format!("00000000-0000-4000-8000-{:012}", state.counter),
        };
        let volume = CloudVolume {
            id: VolumeId(id),
            name: spec.name.clone(),
        };
        state.volumes.push(volume.clone());
        let operation = Self::new_operation(&mut state);
        Ok(ProvisionedVolume { volume, operation })
    }

    async fn list_volumes(&self, location: &str) -> Result<Vec<CloudVolume>, ServiceError> {
        assert_eq!(location, LOCATION);
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListVolumes);
        Ok(state.volumes.clone())
    }

    async fn get_volume(
        &self,
        _location: &str,
        id: &VolumeId,
    ) -> Result<CloudVolume, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetVolume(id.0.clone()));
        state
            .volumes
            .iter()
            .find(|v| &v.id == id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("volume {id}")))
    }

    async fn update_volume(
        &self,
        _location: &str,
        id: &VolumeId,
        update: &VolumeUpdate,
    ) -> Result<CloudVolume, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::UpdateVolume(id.0.clone(), update.name.clone()));
        let volume = state
            .volumes
            .iter_mut()
            .find(|v| &v.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("volume {id}")))?;
        if let Some(name) = &update.name {
            volume.name = name.clone();
        }
        Ok(volume.clone())
    }

    async fn delete_volume(
        &self,
        _location: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteVolume(id.0.clone()));
        if state.fail_delete {
            return Err(ServiceError::Api("delete rejected".into()));
        }
        let before = state.volumes.len();
        state.volumes.retain(|v| &v.id != id);
        if state.volumes.len() == before {
            return Err(ServiceError::NotFound(format!("volume {id}")));
        }
        Ok(Self::new_operation(&mut state))
    }

    async fn attach_volume(
        &self,
        _location: &str,
        node: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError> {
        assert_eq!(node, NODE_ID);
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Attach(id.0.clone()));
            if state.strict_pairs {
                if let Some(open) = state.open_pair.clone()
                    && &open != id
                {
                    state.interleavings += 1;
                    return Err(ServiceError::Api(format!(
                        "attach of {id} interleaved with pending pair of {open}"
                    )));
                }
                state.open_pair = Some(id.clone());
            }
            if !state.volumes.iter().any(|v| &v.id == id) {
                return Err(ServiceError::NotFound(format!("volume {id}")));
            }
            state.attached.insert(id.clone());
        }
        // Give a concurrent caller the chance to interleave.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Ok(Self::new_operation(&mut state))
    }

    async fn detach_volume(
        &self,
        _location: &str,
        node: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError> {
        assert_eq!(node, NODE_ID);
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Detach(id.0.clone()));
        if state.open_pair.as_ref() == Some(id) {
            state.open_pair = None;
        }
        if !state.attached.remove(id) {
            return Err(ServiceError::NotFound(format!(
                "volume {id} is not attached to {node}"
            )));
        }
        Ok(Self::new_operation(&mut state))
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListSnapshots);
        Ok(state.snapshots.clone())
    }

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetSnapshot(id.to_owned()));
        state
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("snapshot {id}")))
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationState, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::OperationStatus(handle.0.clone()));
        if state.status_unavailable {
            return Err(ServiceError::Api("status endpoint unavailable".into()));
        }
        let never_finish = state.never_finish;
        let op = state
            .operations
            .get_mut(&handle.0)
            .ok_or_else(|| ServiceError::NotFound(format!("operation {handle}")))?;
        if never_finish || op.pending_polls > 0 {
            op.pending_polls = op.pending_polls.saturating_sub(1);
            return Ok(OperationState {
                status: OperationStatus::Pending,
                message: String::new(),
            });
        }
        Ok(OperationState {
            status: op.outcome,
            message: op.message.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Block Device Tool double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Mount(PathBuf, PathBuf),
    Unmount(PathBuf),
    MakeFilesystem(String, String),
    SetFilesystemUuid(String, String),
    ListBlockDevices,
}

#[derive(Debug, Default)]
pub struct FakeBlockDeviceTool {
    devices: Mutex<Vec<BlockDevice>>,
    calls: Mutex<Vec<ToolCall>>,
    fail_unmount: Mutex<bool>,
}

pub fn disk(name: &str) -> BlockDevice {
    BlockDevice {
        name: name.to_owned(),
        device_type: "disk".to_owned(),
        mountpoint: String::new(),
        fs_uuid: String::new(),
    }
}

impl FakeBlockDeviceTool {
    /// A host with only the boot disk.
    pub fn new() -> Self {
        let tool = Self::default();
        let mut boot = disk("vda");
        boot.fs_uuid = "boot-uuid".into();
        tool.devices.lock().unwrap().push(boot);
        tool
    }

    /// Make a blank disk appear, as an attach would.
    pub fn add_blank_disk(&self, name: &str) {
        self.devices.lock().unwrap().push(disk(name));
    }

    pub fn fail_unmount(&self) {
        *self.fail_unmount.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn stamp(&self, device: &str, uuid: &str) {
        let name = device.trim_start_matches("/dev/");
        if let Some(d) = self
            .devices
            .lock()
            .unwrap()
            .iter_mut()
            .find(|d| d.name == name)
        {
            d.fs_uuid = uuid.to_owned();
        }
    }
}

#[async_trait]
impl BlockDeviceTool for FakeBlockDeviceTool {
    async fn mount(&self, device: &Path, target: &Path) -> Result<(), VolumeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolCall::Mount(device.to_owned(), target.to_owned()));
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), VolumeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolCall::Unmount(target.to_owned()));
        if *self.fail_unmount.lock().unwrap() {
            return Err(VolumeError::LocalIo(format!(
                "umount {}: target is busy",
                target.display()
            )));
        }
        Ok(())
    }

    async fn make_filesystem(&self, device: &str, uuid: &str) -> Result<(), VolumeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolCall::MakeFilesystem(device.to_owned(), uuid.to_owned()));
        self.stamp(device, uuid);
        Ok(())
    }

    async fn set_filesystem_uuid(&self, device: &str, uuid: &str) -> Result<(), VolumeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ToolCall::SetFilesystemUuid(device.to_owned(), uuid.to_owned()));
        self.stamp(device, uuid);
        Ok(())
    }

    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, VolumeError> {
        self.calls.lock().unwrap().push(ToolCall::ListBlockDevices);
        Ok(self.devices.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub tmp: TempDir,
    pub config: DriverConfig,
    pub service: Arc<FakeVolumeService>,
    pub tool: Arc<FakeBlockDeviceTool>,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let node_id_path = tmp.path().join("product_uuid");
        std::fs::write(&node_id_path, format!("{}\n", NODE_ID.to_uppercase())).unwrap();

        let config = DriverConfig {
            metadata_path: tmp.path().join("metadata"),
            mount_path: tmp.path().join("mounts"),
            location: LOCATION.to_owned(),
            node_id_path,
            device_by_uuid_dir: tmp.path().join("by-uuid"),
            poll_interval: Duration::from_millis(1),
            max_polls: 5,
            ..DriverConfig::default()
        };

        Self {
            tmp,
            config,
            service: Arc::new(FakeVolumeService::new()),
            tool: Arc::new(FakeBlockDeviceTool::new()),
        }
    }

    pub async fn driver(&self) -> VolumeDriver {
        self.try_driver().await.unwrap()
    }

    pub async fn try_driver(&self) -> Result<VolumeDriver, VolumeError> {
        VolumeDriver::new(self.config.clone(), self.service.clone(), self.tool.clone()).await
    }

    pub fn metadata_file(&self, name: &str) -> PathBuf {
        self.config.metadata_path.join(name)
    }

    pub fn mount_point(&self, id: &str) -> PathBuf {
        self.config.mount_path.join(id)
    }
}
