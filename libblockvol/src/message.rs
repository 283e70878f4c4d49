//! Plugin request and response shapes.
//!
//! The transport that carries these (a Unix socket speaking the container
//! host's volume plugin protocol) lives outside this crate.  It decodes a
//! [`PluginRequest`], hands it to [`dispatch`], and encodes the returned
//! [`PluginResponse`].  Failures never escape as Rust errors: they are
//! reported in the response's `Err` field.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::types::{Capabilities, CreateOptions, VolumeInfo};

/// A lifecycle request from the container host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginRequest {
    Create {
        name: String,
        #[serde(default)]
        options: HashMap<String, String>,
    },
    Remove {
        name: String,
    },
    Mount {
        name: String,
    },
    Unmount {
        name: String,
    },
    Path {
        name: String,
    },
    Get {
        name: String,
    },
    List,
    Capabilities,
}

impl fmt::Display for PluginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { name, .. } => write!(f, "Create({name})"),
            Self::Remove { name } => write!(f, "Remove({name})"),
            Self::Mount { name } => write!(f, "Mount({name})"),
            Self::Unmount { name } => write!(f, "Unmount({name})"),
            Self::Path { name } => write!(f, "Path({name})"),
            Self::Get { name } => write!(f, "Get({name})"),
            Self::List => f.write_str("List"),
            Self::Capabilities => f.write_str("Capabilities"),
        }
    }
}

/// Response to a [`PluginRequest`], using the host's field names.
/// Unset fields are omitted from the encoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PluginResponse {
    /// Error string; empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl PluginResponse {
    pub fn error(e: &VolumeError) -> Self {
        Self {
            err: e.to_string(),
            ..Default::default()
        }
    }

    pub fn mountpoint(path: PathBuf) -> Self {
        Self {
            mountpoint: Some(path),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}

impl From<Result<(), VolumeError>> for PluginResponse {
    fn from(res: Result<(), VolumeError>) -> Self {
        match res {
            Ok(()) => Self::default(),
            Err(e) => Self::error(&e),
        }
    }
}

/// Run `request` against `driver` and build the response.
pub async fn dispatch(driver: &VolumeDriver, request: PluginRequest) -> PluginResponse {
    let label = request.to_string();
    debug!(request = %label, "plugin request received");

    let response: PluginResponse = match request {
        PluginRequest::Create { name, options } => driver
            .create(&name, &CreateOptions::from_map(&options))
            .await
            .into(),
        PluginRequest::Remove { name } => driver.remove(&name).await.into(),
        PluginRequest::Mount { name } => match driver.mount(&name).await {
            Ok(path) => PluginResponse::mountpoint(path),
            Err(e) => PluginResponse::error(&e),
        },
        PluginRequest::Unmount { name } => driver.unmount(&name).await.into(),
        PluginRequest::Path { name } => match driver.path(&name).await {
            Ok(path) => PluginResponse::mountpoint(path),
            Err(e) => PluginResponse::error(&e),
        },
        PluginRequest::Get { name } => PluginResponse {
            volume: driver.get(&name).await,
            ..Default::default()
        },
        PluginRequest::List => PluginResponse {
            volumes: Some(driver.list().await),
            ..Default::default()
        },
        PluginRequest::Capabilities => PluginResponse {
            capabilities: Some(driver.capabilities()),
            ..Default::default()
        },
    };

    if !response.is_ok() {
        warn!(request = %label, error = %response.err, "plugin request failed");
    }
    response
}
