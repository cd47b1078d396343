//! gRPC Node service implementation
//!
//! Validates stage/publish requests and hands them to the [`AttachMounter`].
//! Volume statistics come straight from `statvfs(2)` on the published path.

use std::io::ErrorKind;
use std::sync::Arc;

use fortress_proto::csi::node_server::Node;
use fortress_proto::csi::volume_usage::Unit;
use fortress_proto::csi::{
    NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetCapabilitiesRequest,
    NodeGetCapabilitiesResponse, NodeGetInfoRequest, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodePublishVolumeResponse, NodeStageVolumeRequest, NodeStageVolumeResponse,
    NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest,
    NodeUnstageVolumeResponse, VolumeCapability, VolumeUsage,
};
use nix::sys::statvfs::statvfs;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::backend::AttachMounter;
use crate::capabilities::NodeRegistry;
use crate::error::{DriverError, DriverResult};

/// Mount options for publishing a staged volume: always a bind mount,
/// read-only when requested, then the caller's mount flags.
pub fn mount_options(readonly: bool, capability: Option<&VolumeCapability>) -> Vec<String> {
    let mut options = vec!["bind".to_string()];
    if readonly {
        options.push("ro".to_string());
    }
    if let Some(mount) = capability.and_then(|c| c.mount.as_ref()) {
        options.extend(mount.mount_flags.iter().cloned());
    }
    options
}

fn require(value: &str, message: &str) -> DriverResult<()> {
    if value.is_empty() {
        Err(DriverError::invalid_argument(message))
    } else {
        Ok(())
    }
}

/// Filesystem usage of the filesystem containing a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: i64,
    pub available_bytes: i64,
    pub used_bytes: i64,
    pub total_inodes: i64,
    pub available_inodes: i64,
    pub used_inodes: i64,
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl FsUsage {
    /// Query `statvfs(2)` for `path`
    pub fn of(path: &str) -> nix::Result<Self> {
        let stat = statvfs(path)?;
        let fragment = u64::from(stat.fragment_size());
        let blocks = u64::from(stat.blocks());
        let blocks_free = u64::from(stat.blocks_free());
        let blocks_available = u64::from(stat.blocks_available());
        let files = u64::from(stat.files());
        let files_free = u64::from(stat.files_free());

        Ok(Self {
            total_bytes: clamp(blocks.saturating_mul(fragment)),
            available_bytes: clamp(blocks_available.saturating_mul(fragment)),
            used_bytes: clamp(blocks.saturating_sub(blocks_free).saturating_mul(fragment)),
            total_inodes: clamp(files),
            available_inodes: clamp(files_free),
            used_inodes: clamp(files.saturating_sub(files_free)),
        })
    }

    fn into_usage(self) -> Vec<VolumeUsage> {
        vec![
            VolumeUsage {
                available: self.available_bytes,
                total: self.total_bytes,
                used: self.used_bytes,
                unit: Unit::Bytes.into(),
            },
            VolumeUsage {
                available: self.available_inodes,
                total: self.total_inodes,
                used: self.used_inodes,
                unit: Unit::Inodes.into(),
            },
        ]
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct NodeService {
    node_id: String,
    capabilities: Arc<NodeRegistry>,
    mounter: Arc<dyn AttachMounter>,
}

impl NodeService {
    pub fn new(
        node_id: impl Into<String>,
        capabilities: Arc<NodeRegistry>,
        mounter: Arc<dyn AttachMounter>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            capabilities,
            mounter,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn capabilities(&self) -> &NodeRegistry {
        &self.capabilities
    }

    async fn stage(&self, req: NodeStageVolumeRequest) -> DriverResult<NodeStageVolumeResponse> {
        require(&req.staging_target_path, "staging path missing in request")?;
        if req.volume_capability.is_none() {
            return Err(DriverError::invalid_argument(
                "volume capability missing in request",
            ));
        }
        require(&req.volume_id, "volume id missing in request")?;

        self.mounter
            .stage(&req.volume_id, &req.staging_target_path)
            .await?;
        info!(volume_id = %req.volume_id, staging_path = %req.staging_target_path, "volume staged");
        Ok(NodeStageVolumeResponse {})
    }

    async fn unstage(
        &self,
        req: NodeUnstageVolumeRequest,
    ) -> DriverResult<NodeUnstageVolumeResponse> {
        require(&req.volume_id, "NodeUnstageVolume Volume ID must be provided")?;
        require(
            &req.staging_target_path,
            "NodeUnstageVolume Staging Target Path must be provided",
        )?;

        self.mounter
            .unstage(&req.volume_id, &req.staging_target_path)
            .await?;
        info!(
            volume_id = %req.volume_id,
            staging_path = %req.staging_target_path,
            "volume unstaged"
        );
        Ok(NodeUnstageVolumeResponse {})
    }

    async fn publish(
        &self,
        req: NodePublishVolumeRequest,
    ) -> DriverResult<NodePublishVolumeResponse> {
        require(&req.volume_id, "VolumeID must be provided")?;
        require(&req.staging_target_path, "Staging Target Path must be provided")?;
        require(&req.target_path, "Target Path must be provided")?;

        let options = mount_options(req.readonly, req.volume_capability.as_ref());
        self.mounter
            .mount(&req.volume_id, &req.target_path, &options)
            .await?;
        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            ?options,
            "volume published"
        );
        Ok(NodePublishVolumeResponse {})
    }

    async fn unpublish(
        &self,
        req: NodeUnpublishVolumeRequest,
    ) -> DriverResult<NodeUnpublishVolumeResponse> {
        require(&req.volume_id, "NodeUnpublishVolume Volume ID must be provided")?;
        require(&req.target_path, "NodeUnpublishVolume Target Path must be provided")?;

        self.mounter.unmount(&req.volume_id, &req.target_path).await?;
        info!(volume_id = %req.volume_id, target_path = %req.target_path, "volume unpublished");
        Ok(NodeUnpublishVolumeResponse {})
    }

    async fn stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> DriverResult<NodeGetVolumeStatsResponse> {
        require(&req.volume_id, "volume id missing in request")?;
        require(&req.volume_path, "volume path missing in request")?;

        match tokio::fs::metadata(&req.volume_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DriverError::NotFound(format!(
                    "volume path {} does not exist",
                    req.volume_path
                )));
            }
            Err(e) => {
                return Err(DriverError::internal(format!(
                    "failed to stat volume path {}: {e}",
                    req.volume_path
                )));
            }
        }

        let path = req.volume_path.clone();
        let usage = tokio::task::spawn_blocking(move || FsUsage::of(&path))
            .await
            .map_err(|e| DriverError::internal(format!("statvfs task failed: {e}")))?
            .map_err(|e| {
                DriverError::internal(format!("statvfs {} failed: {e}", req.volume_path))
            })?;

        Ok(NodeGetVolumeStatsResponse {
            usage: usage.into_usage(),
            volume_condition: None,
        })
    }

    fn expand(&self, req: &NodeExpandVolumeRequest) -> DriverResult<NodeExpandVolumeResponse> {
        require(&req.volume_path, "volume path missing in request")?;
        require(&req.volume_id, "volume id missing in request")?;

        Err(DriverError::unimplemented(format!(
            "volume {} cannot be expanded driver only supports offline expansion",
            req.volume_id
        )))
    }
}

// ── Node impl ─────────────────────────────────────────────────────────────────

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        Ok(Response::new(self.stage(request.into_inner()).await?))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        Ok(Response::new(self.unstage(request.into_inner()).await?))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        Ok(Response::new(self.publish(request.into_inner()).await?))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        Ok(Response::new(self.unpublish(request.into_inner()).await?))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Ok(Response::new(self.stats(request.into_inner()).await?))
    }

    async fn node_expand_volume(
        &self,
        request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Ok(Response::new(self.expand(request.get_ref())?))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: self.capabilities.node_capabilities(),
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}
