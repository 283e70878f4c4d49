//! Long-running operation waiter.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::VolumeError;
use crate::service::VolumeService;
use crate::types::{OperationHandle, OperationStatus};

/// Polls an operation handle at a fixed interval until it reaches a terminal
/// status or the polling budget runs out.
///
/// Only the status check is repeated; the operation itself is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationWaiter {
    interval: Duration,
    max_polls: u32,
}

impl OperationWaiter {
    /// `max_polls` is clamped to at least one status check.
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls: max_polls.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    /// Block until `handle` is done.
    ///
    /// * `Done` returns `Ok(())`.
    /// * `Failed` returns [`VolumeError::RemoteOperation`] carrying the
    ///   service message and the handle.
    /// * A failed status query is also a [`VolumeError::RemoteOperation`].
    /// * Still pending after `max_polls` checks returns [`VolumeError::Timeout`].
    #[instrument(skip(self, service), fields(%handle))]
    pub async fn wait(
        &self,
        service: &dyn VolumeService,
        handle: &OperationHandle,
    ) -> Result<(), VolumeError> {
        for poll in 1..=self.max_polls {
            let state = service.operation_status(handle).await.map_err(|e| {
                VolumeError::RemoteOperation(format!(
                    "failed to get status of operation {handle}: {e}"
                ))
            })?;
            debug!(poll, status = ?state.status, "operation status");

            match state.status {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Failed => {
                    return Err(VolumeError::RemoteOperation(format!(
                        "operation {handle} failed: {}",
                        state.message
                    )));
                }
                OperationStatus::Pending if poll < self.max_polls => {
                    tokio::time::sleep(self.interval).await;
                }
                OperationStatus::Pending => {}
            }
        }

        Err(VolumeError::Timeout {
            handle: handle.to_string(),
            polls: self.max_polls,
        })
    }
}
