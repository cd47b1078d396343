//! Storage backend collaborators
//!
//! Request handlers validate and then delegate to two narrow traits:
//! [`Provisioner`] for volume lifecycle and [`AttachMounter`] for device
//! attach and filesystem stage/publish. Both must be idempotent: the
//! orchestrator retries after timeouts without knowing whether the first
//! attempt took effect.
//!
//! [`NoopBackend`] implements both by accepting every call. It is what the
//! driver ships with until a real storage backend is wired in.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Result of a successful provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    /// Normalized volume id
    pub volume_id: String,
    /// Capacity actually provisioned in bytes
    pub capacity_bytes: i64,
}

/// Provisioning backend failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// A volume with this id exists with incompatible size or parameters
    #[error("volume {0} already exists with different parameters")]
    AlreadyExists(String),

    /// The account cannot hold another volume of this size
    #[error("quota exceeded for volume {0}")]
    QuotaExceeded(String),

    /// The storage API could not be reached
    #[error("storage backend unavailable")]
    Unavailable,
}

/// Attach/mount backend failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
    /// The device or mount point is in use
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// The volume, device or path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not permitted on this node
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Volume lifecycle backend, consumed by `CreateVolume` and `DeleteVolume`
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision `volume_id` with `capacity_bytes`. Repeating the call with
    /// the same arguments returns the existing volume.
    async fn create(
        &self,
        volume_id: &str,
        capacity_bytes: i64,
        parameters: &HashMap<String, String>,
    ) -> Result<ProvisionedVolume, ProvisionError>;

    /// Remove `volume_id`. Deleting an absent volume succeeds.
    async fn delete(&self, volume_id: &str) -> Result<(), ProvisionError>;
}

/// Device attach and mount backend, consumed by the publish and stage RPCs
#[async_trait]
pub trait AttachMounter: Send + Sync {
    /// Request attachment of `volume_id` to `node_id`. Attachment may
    /// complete asynchronously; see [`AttachMounter::is_attached`].
    async fn attach(&self, volume_id: &str, node_id: &str) -> Result<(), AttachError>;

    /// Whether `volume_id` is attached to `node_id`
    async fn is_attached(&self, volume_id: &str, node_id: &str) -> Result<bool, AttachError>;

    /// Format if needed and mount the device at the staging path
    async fn stage(&self, volume_id: &str, staging_path: &str) -> Result<(), AttachError>;

    /// Unmount the staging path
    async fn unstage(&self, volume_id: &str, staging_path: &str) -> Result<(), AttachError>;

    /// Mount the staged volume at `target_path` with `options`
    async fn mount(
        &self,
        volume_id: &str,
        target_path: &str,
        options: &[String],
    ) -> Result<(), AttachError>;

    /// Unmount `target_path`
    async fn unmount(&self, volume_id: &str, target_path: &str) -> Result<(), AttachError>;
}

/// Backend that accepts every request without touching storage
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

#[async_trait]
impl Provisioner for NoopBackend {
    async fn create(
        &self,
        volume_id: &str,
        capacity_bytes: i64,
        _parameters: &HashMap<String, String>,
    ) -> Result<ProvisionedVolume, ProvisionError> {
        debug!(volume_id, capacity_bytes, "noop provision");
        Ok(ProvisionedVolume {
            volume_id: volume_id.to_string(),
            capacity_bytes,
        })
    }

    async fn delete(&self, volume_id: &str) -> Result<(), ProvisionError> {
        debug!(volume_id, "noop delete");
        Ok(())
    }
}

#[async_trait]
impl AttachMounter for NoopBackend {
    async fn attach(&self, volume_id: &str, node_id: &str) -> Result<(), AttachError> {
        debug!(volume_id, node_id, "noop attach");
        Ok(())
    }

    async fn is_attached(&self, _volume_id: &str, _node_id: &str) -> Result<bool, AttachError> {
        Ok(true)
    }

    async fn stage(&self, volume_id: &str, staging_path: &str) -> Result<(), AttachError> {
        debug!(volume_id, staging_path, "noop stage");
        Ok(())
    }

    async fn unstage(&self, volume_id: &str, staging_path: &str) -> Result<(), AttachError> {
        debug!(volume_id, staging_path, "noop unstage");
        Ok(())
    }

    async fn mount(
        &self,
        volume_id: &str,
        target_path: &str,
        options: &[String],
    ) -> Result<(), AttachError> {
        debug!(volume_id, target_path, ?options, "noop mount");
        Ok(())
    }

    async fn unmount(&self, volume_id: &str, target_path: &str) -> Result<(), AttachError> {
        debug!(volume_id, target_path, "noop unmount");
        Ok(())
    }
}
