//! # libblockvol: block-storage volumes for container hosts
//!
//! `libblockvol` provisions, attaches, formats, mounts and tears down remote
//! block-storage volumes, exposing them to a container host as named,
//! mountable volumes.  It follows the RK8s conventions (Tokio async runtime,
//! `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: `VolumeRecord`, create options, cloud resources. |
//! | [`error`] | [`VolumeError`] and [`ServiceError`]. |
//! | [`config`] | [`DriverConfig`] defaults and environment overrides. |
//! | [`service`] | [`VolumeService`] trait for the remote block-storage API. |
//! | [`device`] | [`BlockDeviceTool`] trait, system implementation, new-device discovery. |
//! | [`waiter`] | [`OperationWaiter`]: bounded long-running operation poller. |
//! | [`metadata`] | [`MetadataStore`]: one metadata file per volume. |
//! | [`resolver`] | [`IdentityResolver`]: create-request classification. |
//! | [`host`] | Local compute node identity. |
//! | [`driver`] | [`VolumeDriver`]: the lifecycle orchestrator. |
//! | [`message`] | Plugin request/response shapes and [`dispatch`](message::dispatch). |

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod host;
pub mod message;
pub mod metadata;
pub mod resolver;
pub mod service;
pub mod types;
pub mod waiter;

// Re-export the most commonly used items at crate root for convenience.
pub use config::DriverConfig;
pub use device::{BlockDeviceTool, SystemBlockDeviceTool};
pub use driver::VolumeDriver;
pub use error::{ServiceError, VolumeError};
pub use message::{PluginRequest, PluginResponse};
pub use metadata::MetadataStore;
pub use resolver::{IdentityResolver, Resolution};
pub use service::VolumeService;
pub use types::*;
pub use waiter::OperationWaiter;
