//! Volume identity resolution for `Create`.
//!
//! The container host re-issues `Create` for volumes that already exist, and
//! users may ask to adopt an existing cloud volume or to start from a
//! snapshot.  [`IdentityResolver::resolve`] turns a request into a single
//! [`Resolution`] that the driver acts on.
//!
//! Volumes owned by this driver carry the ownership tag as a name suffix:
//! the user-visible volume `data` is named `data:docker-volume` remotely.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use crate::error::{ServiceError, VolumeError};
use crate::service::VolumeService;
use crate::types::{CloudVolume, CreateOptions, Snapshot, VolumeId, VolumeUpdate};

/// Name suffix marking a cloud volume as managed by this driver.
pub const OWNERSHIP_TAG: &str = "docker-volume";

static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid identifier pattern")
});

/// Remote name of the volume backing the user-visible `name`.
pub fn tagged_name(name: &str) -> String {
    format!("{name}:{OWNERSHIP_TAG}")
}

/// Whether `value` is a well-formed cloud identifier. Purely syntactic.
pub fn is_valid_id(value: &str) -> bool {
    ID_RE.is_match(value)
}

/// How `Create` should obtain its cloud volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing matched: create a blank volume and format it.
    Fresh,
    /// Adopt an existing volume: no creation, no formatting.
    ExistingNoFormat(CloudVolume),
    /// Create a volume from a snapshot: already carries a filesystem.
    FromSnapshot(Snapshot),
}

impl Resolution {
    /// Whether the attached device needs a new filesystem.
    pub fn needs_formatting(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Resolves create requests against the remote listing of one location.
///
/// Lookups are read-only, except that adopting a volume by ID renames it to
/// carry the ownership tag.
pub struct IdentityResolver<'a> {
    service: &'a dyn VolumeService,
    location: &'a str,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(service: &'a dyn VolumeService, location: &'a str) -> Self {
        Self { service, location }
    }

    /// Classify a create request for `name`.
    ///
    /// Explicit volume hints win over snapshot hints, which win over
    /// implicit adoption by tagged name.
    #[instrument(skip(self, opts))]
    pub async fn resolve(&self, name: &str, opts: &CreateOptions) -> Result<Resolution, VolumeError> {
        if let Some(volume_name) = opts.volume_name()
            && volume_name != name
        {
            return Err(VolumeError::Validation(format!(
                "volume name {name} and volume_name parameter {volume_name} have to be the same"
            )));
        }
        for (key, value) in [("volume_id", opts.volume_id()), ("snapshot_id", opts.snapshot_id())] {
            if let Some(id) = value
                && !is_valid_id(id)
            {
                return Err(VolumeError::Validation(format!(
                    "{key} {id:?} is not a valid identifier"
                )));
            }
        }

        // Explicit adoption by name and/or ID.
        let by_name = match opts.volume_name() {
            Some(volume_name) => Some(self.find_volume_by_name(volume_name).await?.id),
            None => None,
        };
        let by_id = opts.volume_id().map(VolumeId::from);
        let adopt = match (by_name, by_id) {
            (Some(a), Some(b)) if a.0.to_lowercase() != b.0.to_lowercase() => {
                return Err(VolumeError::Validation(format!(
                    "volume_name resolves to {a} but volume_id is {b}"
                )));
            }
            (Some(id), _) | (None, Some(id)) => Some(id),
            (None, None) => None,
        };
        if let Some(id) = adopt {
            let volume = self.adopt_volume(name, &id).await?;
            return Ok(Resolution::ExistingNoFormat(volume));
        }

        // Snapshot source. Always a new volume; an existing volume with the
        // same tagged name is rejected when provisioning.
        if let Some(snapshot_name) = opts.snapshot_name() {
            let snapshot = self.find_snapshot_by_name(snapshot_name).await?;
            if let Some(id) = opts.snapshot_id()
                && !id.eq_ignore_ascii_case(&snapshot.id)
            {
                return Err(VolumeError::Validation(format!(
                    "snapshot_name resolves to {} but snapshot_id is {id}",
                    snapshot.id
                )));
            }
            return Ok(Resolution::FromSnapshot(snapshot));
        }
        if let Some(id) = opts.snapshot_id() {
            let snapshot = self.service.get_snapshot(id).await.map_err(|e| match e {
                ServiceError::NotFound(_) => {
                    VolumeError::NotFound(format!("snapshot with id {id} could not be found"))
                }
                other => other.into(),
            })?;
            info!(snapshot = %snapshot.id, "using provided snapshot");
            return Ok(Resolution::FromSnapshot(snapshot));
        }

        // Implicit adoption: a previous Create for this name already ran.
        let tagged = tagged_name(name);
        if let Some(volume) = self
            .service
            .list_volumes(self.location)
            .await?
            .into_iter()
            .find(|v| v.name == tagged)
        {
            debug!(id = %volume.id, "found driver-owned volume for name");
            return Ok(Resolution::ExistingNoFormat(volume));
        }

        Ok(Resolution::Fresh)
    }

    /// Find a volume by exact name, then by its tagged name.
    pub async fn find_volume_by_name(&self, name: &str) -> Result<CloudVolume, VolumeError> {
        let volumes = self.service.list_volumes(self.location).await?;

        if let Some(v) = volumes.iter().find(|v| v.name == name) {
            debug!(name, id = %v.id, "found volume by name");
            return Ok(v.clone());
        }
        if !name.ends_with(OWNERSHIP_TAG) {
            let tagged = tagged_name(name);
            if let Some(v) = volumes.iter().find(|v| v.name == tagged) {
                debug!(name = %tagged, id = %v.id, "found volume by tagged name");
                return Ok(v.clone());
            }
        }

        Err(VolumeError::NotFound(format!(
            "volume with name {name} could not be found"
        )))
    }

    /// Fetch volume `id` and make sure it carries the ownership tag.
    async fn adopt_volume(&self, name: &str, id: &VolumeId) -> Result<CloudVolume, VolumeError> {
        let volume = self
            .service
            .get_volume(self.location, id)
            .await
            .map_err(|e| match e {
                ServiceError::NotFound(_) => {
                    VolumeError::NotFound(format!("volume with id {id} could not be found"))
                }
                other => other.into(),
            })?;

        if volume.name.ends_with(OWNERSHIP_TAG) {
            return Ok(volume);
        }

        let update = VolumeUpdate {
            name: Some(tagged_name(name)),
        };
        info!(%id, from = %volume.name, to = ?update.name, "tagging adopted volume");
        let updated = self
            .service
            .update_volume(self.location, id, &update)
            .await
            .map_err(|e| {
                VolumeError::RemoteOperation(format!("volume with id {id} could not be updated: {e}"))
            })?;
        Ok(updated)
    }

    async fn find_snapshot_by_name(&self, name: &str) -> Result<Snapshot, VolumeError> {
        self.service
            .list_snapshots()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                VolumeError::NotFound(format!("snapshot with name {name} could not be found"))
            })
    }
}
