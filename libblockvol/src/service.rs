//! Volume Service contract.
//!
//! The remote block-storage API is an external collaborator.  The driver only
//! depends on this trait; a cloud SDK binding implements it in production and
//! in-process fakes implement it in tests.
//!
//! Mutating calls return an [`OperationHandle`] that must be polled through
//! [`VolumeService::operation_status`] (see [`OperationWaiter`]) before the
//! change can be relied upon.
//!
//! [`OperationWaiter`]: crate::waiter::OperationWaiter

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::types::{
    CloudVolume, OperationHandle, OperationState, ProvisionedVolume, Snapshot, VolumeId,
    VolumeSpec, VolumeUpdate,
};

/// Remote block-storage API.
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// Start provisioning a new volume in `location`.
    async fn create_volume(
        &self,
        location: &str,
        spec: &VolumeSpec,
    ) -> Result<ProvisionedVolume, ServiceError>;

    /// List every volume in `location`.
    async fn list_volumes(&self, location: &str) -> Result<Vec<CloudVolume>, ServiceError>;

    async fn get_volume(&self, location: &str, id: &VolumeId)
    -> Result<CloudVolume, ServiceError>;

    /// Change volume properties in place; returns the updated volume.
    async fn update_volume(
        &self,
        location: &str,
        id: &VolumeId,
        update: &VolumeUpdate,
    ) -> Result<CloudVolume, ServiceError>;

    async fn delete_volume(
        &self,
        location: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError>;

    /// Bind a volume to the compute node `node`.
    async fn attach_volume(
        &self,
        location: &str,
        node: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError>;

    /// Unbind a volume from the compute node `node`.
    ///
    /// Returns [`ServiceError::NotFound`] when the volume is not attached.
    async fn detach_volume(
        &self,
        location: &str,
        node: &str,
        id: &VolumeId,
    ) -> Result<OperationHandle, ServiceError>;

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>, ServiceError>;

    async fn get_snapshot(&self, id: &str) -> Result<Snapshot, ServiceError>;

    /// Current status of a long-running operation.
    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationState, ServiceError>;
}
