//! Request/response logging for every CSI call
//!
//! [`Logged`] wraps a service and implements the same generated tonic
//! trait. Each call logs the redacted request, runs the wrapped handler and
//! logs either the redacted response or the error. Polling RPCs that the
//! orchestrator issues constantly log at `trace`; when one of them fails,
//! the error line carries the request so the failure still has context.
//!
//! Only the logged representation is redacted. Requests and responses pass
//! through unchanged, and errors are never turned into successes.
//!
//! Handlers run until they finish or the wrapper's cancellation token
//! fires; a cancelled call is dropped and answered with `UNAVAILABLE`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use fortress_proto::csi::controller_server::Controller;
use fortress_proto::csi::identity_server::Identity;
use fortress_proto::csi::node_server::Node;
use fortress_proto::csi::*;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{error, info, trace};

use crate::redact::{Sanitized, StripSecrets};

/// Every CSI RPC the plugin serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    // Identity
    GetPluginInfo,
    GetPluginCapabilities,
    Probe,
    // Controller
    CreateVolume,
    DeleteVolume,
    ControllerPublishVolume,
    ControllerUnpublishVolume,
    ValidateVolumeCapabilities,
    ListVolumes,
    GetCapacity,
    ControllerGetCapabilities,
    CreateSnapshot,
    DeleteSnapshot,
    ListSnapshots,
    ControllerExpandVolume,
    ControllerGetVolume,
    // Node
    NodeStageVolume,
    NodeUnstageVolume,
    NodePublishVolume,
    NodeUnpublishVolume,
    NodeGetVolumeStats,
    NodeExpandVolume,
    NodeGetCapabilities,
    NodeGetInfo,
}

impl Operation {
    pub const ALL: [Self; 24] = [
        Self::GetPluginInfo,
        Self::GetPluginCapabilities,
        Self::Probe,
        Self::CreateVolume,
        Self::DeleteVolume,
        Self::ControllerPublishVolume,
        Self::ControllerUnpublishVolume,
        Self::ValidateVolumeCapabilities,
        Self::ListVolumes,
        Self::GetCapacity,
        Self::ControllerGetCapabilities,
        Self::CreateSnapshot,
        Self::DeleteSnapshot,
        Self::ListSnapshots,
        Self::ControllerExpandVolume,
        Self::ControllerGetVolume,
        Self::NodeStageVolume,
        Self::NodeUnstageVolume,
        Self::NodePublishVolume,
        Self::NodeUnpublishVolume,
        Self::NodeGetVolumeStats,
        Self::NodeExpandVolume,
        Self::NodeGetCapabilities,
        Self::NodeGetInfo,
    ];

    /// Protocol method name, as in `/csi.v1.Node/NodeGetInfo`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetPluginInfo => "GetPluginInfo",
            Self::GetPluginCapabilities => "GetPluginCapabilities",
            Self::Probe => "Probe",
            Self::CreateVolume => "CreateVolume",
            Self::DeleteVolume => "DeleteVolume",
            Self::ControllerPublishVolume => "ControllerPublishVolume",
            Self::ControllerUnpublishVolume => "ControllerUnpublishVolume",
            Self::ValidateVolumeCapabilities => "ValidateVolumeCapabilities",
            Self::ListVolumes => "ListVolumes",
            Self::GetCapacity => "GetCapacity",
            Self::ControllerGetCapabilities => "ControllerGetCapabilities",
            Self::CreateSnapshot => "CreateSnapshot",
            Self::DeleteSnapshot => "DeleteSnapshot",
            Self::ListSnapshots => "ListSnapshots",
            Self::ControllerExpandVolume => "ControllerExpandVolume",
            Self::ControllerGetVolume => "ControllerGetVolume",
            Self::NodeStageVolume => "NodeStageVolume",
            Self::NodeUnstageVolume => "NodeUnstageVolume",
            Self::NodePublishVolume => "NodePublishVolume",
            Self::NodeUnpublishVolume => "NodeUnpublishVolume",
            Self::NodeGetVolumeStats => "NodeGetVolumeStats",
            Self::NodeExpandVolume => "NodeExpandVolume",
            Self::NodeGetCapabilities => "NodeGetCapabilities",
            Self::NodeGetInfo => "NodeGetInfo",
        }
    }
}

/// Logging tier of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// High-frequency polling calls, logged at `trace`
    Quiet,
    /// Everything else, logged at `info`
    Normal,
}

/// Operation → verbosity mapping, built once per server
#[derive(Debug, Clone)]
pub struct VerbosityMap {
    levels: HashMap<Operation, Verbosity>,
}

impl Default for VerbosityMap {
    fn default() -> Self {
        Self::new([Operation::NodeGetCapabilities, Operation::NodeGetVolumeStats])
    }
}

impl VerbosityMap {
    /// Map `quiet` operations to [`Verbosity::Quiet`], all others to
    /// [`Verbosity::Normal`]
    pub fn new(quiet: impl IntoIterator<Item = Operation>) -> Self {
        let mut levels: HashMap<Operation, Verbosity> = Operation::ALL
            .into_iter()
            .map(|op| (op, Verbosity::Normal))
            .collect();
        for op in quiet {
            levels.insert(op, Verbosity::Quiet);
        }
        Self { levels }
    }

    #[must_use]
    pub fn level(&self, operation: Operation) -> Verbosity {
        self.levels
            .get(&operation)
            .copied()
            .unwrap_or(Verbosity::Normal)
    }
}

macro_rules! log_at {
    ($verbosity:expr, $($arg:tt)+) => {
        match $verbosity {
            Verbosity::Quiet => trace!($($arg)+),
            Verbosity::Normal => info!($($arg)+),
        }
    };
}

/// A CSI service wrapped with request/response logging
#[derive(Debug, Clone)]
pub struct Logged<S> {
    inner: S,
    verbosity: Arc<VerbosityMap>,
    abandon: CancellationToken,
}

impl<S> Logged<S> {
    pub fn new(inner: S, verbosity: Arc<VerbosityMap>) -> Self {
        Self {
            inner,
            verbosity,
            abandon: CancellationToken::new(),
        }
    }

    /// Abandon in-flight and later calls once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.abandon = token;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn intercept<Req, Resp, F, Fut>(
        &self,
        operation: Operation,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: StripSecrets + Debug,
        Resp: StripSecrets + Debug,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let method = operation.as_str();
        let verbosity = self.verbosity.level(operation);

        log_at!(verbosity, "{}: req: {:?}", method, Sanitized(request.get_ref()));

        // Quiet calls don't log the request up front at a visible level, so
        // keep a redacted copy for the error line.
        let retained = (verbosity == Verbosity::Quiet).then(|| request.get_ref().strip_secrets());

        let result = tokio::select! {
            biased;
            () = self.abandon.cancelled() => Err(Status::unavailable(format!(
                "{method} abandoned: plugin server is stopping"
            ))),
            result = handler(request) => result,
        };

        match &result {
            Ok(response) => {
                log_at!(verbosity, "{}: rsp: {:?}", method, Sanitized(response.get_ref()));
            }
            Err(status) => match &retained {
                Some(req) => error!(
                    "{}: req: {:?} err: {:?}: {}",
                    method,
                    req,
                    status.code(),
                    status.message()
                ),
                None => error!("{}: err: {:?}: {}", method, status.code(), status.message()),
            },
        }

        result
    }
}

#[tonic::async_trait]
impl<S: Identity> Identity for Logged<S> {
    async fn get_plugin_info(
        &self,
        request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        self.intercept(Operation::GetPluginInfo, request, |r| {
            self.inner.get_plugin_info(r)
        })
        .await
    }

    async fn get_plugin_capabilities(
        &self,
        request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        self.intercept(Operation::GetPluginCapabilities, request, |r| {
            self.inner.get_plugin_capabilities(r)
        })
        .await
    }

    async fn probe(
        &self,
        request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        self.intercept(Operation::Probe, request, |r| self.inner.probe(r))
            .await
    }
}

#[tonic::async_trait]
impl<S: Controller> Controller for Logged<S> {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        self.intercept(Operation::CreateVolume, request, |r| {
            self.inner.create_volume(r)
        })
        .await
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        self.intercept(Operation::DeleteVolume, request, |r| {
            self.inner.delete_volume(r)
        })
        .await
    }

    async fn controller_publish_volume(
        &self,
        request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        self.intercept(Operation::ControllerPublishVolume, request, |r| {
            self.inner.controller_publish_volume(r)
        })
        .await
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        self.intercept(Operation::ControllerUnpublishVolume, request, |r| {
            self.inner.controller_unpublish_volume(r)
        })
        .await
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        self.intercept(Operation::ValidateVolumeCapabilities, request, |r| {
            self.inner.validate_volume_capabilities(r)
        })
        .await
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        self.intercept(Operation::ListVolumes, request, |r| {
            self.inner.list_volumes(r)
        })
        .await
    }

    async fn get_capacity(
        &self,
        request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        self.intercept(Operation::GetCapacity, request, |r| {
            self.inner.get_capacity(r)
        })
        .await
    }

    async fn controller_get_capabilities(
        &self,
        request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        self.intercept(Operation::ControllerGetCapabilities, request, |r| {
            self.inner.controller_get_capabilities(r)
        })
        .await
    }

    async fn create_snapshot(
        &self,
        request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        self.intercept(Operation::CreateSnapshot, request, |r| {
            self.inner.create_snapshot(r)
        })
        .await
    }

    async fn delete_snapshot(
        &self,
        request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        self.intercept(Operation::DeleteSnapshot, request, |r| {
            self.inner.delete_snapshot(r)
        })
        .await
    }

    async fn list_snapshots(
        &self,
        request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        self.intercept(Operation::ListSnapshots, request, |r| {
            self.inner.list_snapshots(r)
        })
        .await
    }

    async fn controller_expand_volume(
        &self,
        request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        self.intercept(Operation::ControllerExpandVolume, request, |r| {
            self.inner.controller_expand_volume(r)
        })
        .await
    }

    async fn controller_get_volume(
        &self,
        request: Request<ControllerGetVolumeRequest>,
    ) -> Result<Response<ControllerGetVolumeResponse>, Status> {
        self.intercept(Operation::ControllerGetVolume, request, |r| {
            self.inner.controller_get_volume(r)
        })
        .await
    }
}

#[tonic::async_trait]
impl<S: Node> Node for Logged<S> {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        self.intercept(Operation::NodeStageVolume, request, |r| {
            self.inner.node_stage_volume(r)
        })
        .await
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        self.intercept(Operation::NodeUnstageVolume, request, |r| {
            self.inner.node_unstage_volume(r)
        })
        .await
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        self.intercept(Operation::NodePublishVolume, request, |r| {
            self.inner.node_publish_volume(r)
        })
        .await
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        self.intercept(Operation::NodeUnpublishVolume, request, |r| {
            self.inner.node_unpublish_volume(r)
        })
        .await
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        self.intercept(Operation::NodeGetVolumeStats, request, |r| {
            self.inner.node_get_volume_stats(r)
        })
        .await
    }

    async fn node_expand_volume(
        &self,
        request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        self.intercept(Operation::NodeExpandVolume, request, |r| {
            self.inner.node_expand_volume(r)
        })
        .await
    }

    async fn node_get_capabilities(
        &self,
        request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        self.intercept(Operation::NodeGetCapabilities, request, |r| {
            self.inner.node_get_capabilities(r)
        })
        .await
    }

    async fn node_get_info(
        &self,
        request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        self.intercept(Operation::NodeGetInfo, request, |r| {
            self.inner.node_get_info(r)
        })
        .await
    }
}
