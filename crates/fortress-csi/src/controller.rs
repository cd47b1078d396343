//! gRPC Controller service implementation

use std::sync::Arc;

use fortress_common::{NAME_MAXIMUM_LENGTH, auto_correct_name, effective_size};
use fortress_proto::csi::controller_server::Controller;
use fortress_proto::csi::validate_volume_capabilities_response::Confirmed;
use fortress_proto::csi::{
    ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerGetVolumeRequest, ControllerGetVolumeResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest,
    ControllerUnpublishVolumeResponse, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest, DeleteSnapshotResponse,
    DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest, GetCapacityResponse,
    ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesRequest, ListVolumesResponse,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::backend::{AttachMounter, Provisioner};
use crate::capabilities::ControllerRegistry;
use crate::error::{DriverError, DriverResult};
use crate::poll::{Clock, PollPolicy, PollState, Poller, TokioClock, within};

// ── Service ───────────────────────────────────────────────────────────────────

pub struct ControllerService {
    capabilities: Arc<ControllerRegistry>,
    provisioner: Arc<dyn Provisioner>,
    attacher: Arc<dyn AttachMounter>,
    clock: Arc<dyn Clock>,
    attach_policy: PollPolicy,
}

impl ControllerService {
    pub fn new(
        capabilities: Arc<ControllerRegistry>,
        provisioner: Arc<dyn Provisioner>,
        attacher: Arc<dyn AttachMounter>,
    ) -> Self {
        Self {
            capabilities,
            provisioner,
            attacher,
            clock: Arc::new(TokioClock),
            attach_policy: PollPolicy::ATTACH_DETACH,
        }
    }

    /// Replace the time source used while waiting for attachment
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_attach_policy(mut self, policy: PollPolicy) -> Self {
        self.attach_policy = policy;
        self
    }

    pub fn capabilities(&self) -> &ControllerRegistry {
        &self.capabilities
    }

    async fn create(&self, req: CreateVolumeRequest) -> DriverResult<CreateVolumeResponse> {
        let volume_id = auto_correct_name(&req.name, NAME_MAXIMUM_LENGTH);
        if volume_id.is_empty() {
            return Err(DriverError::invalid_argument("volume name missing in request"));
        }

        self.capabilities
            .validate_volume_capabilities(&req.volume_capabilities)?;

        let range = req.capacity_range.unwrap_or_default();
        let capacity_bytes = effective_size(range.required_bytes).ok_or_else(|| {
            DriverError::OutOfRange(format!(
                "required capacity {} bytes cannot be aligned",
                range.required_bytes
            ))
        })?;
        if range.limit_bytes > 0 && capacity_bytes > range.limit_bytes {
            return Err(DriverError::OutOfRange(format!(
                "volume size {capacity_bytes} bytes exceeds limit {} bytes",
                range.limit_bytes
            )));
        }

        let parameters = req.parameters;
        let provisioned = self
            .provisioner
            .create(&volume_id, capacity_bytes, &parameters)
            .await?;
        info!(
            volume_id = %provisioned.volume_id,
            capacity_bytes = provisioned.capacity_bytes,
            "volume provisioned"
        );

        Ok(CreateVolumeResponse {
            volume: Some(Volume {
                capacity_bytes: provisioned.capacity_bytes,
                volume_id: provisioned.volume_id,
                volume_context: parameters,
                content_source: req.volume_content_source,
                accessible_topology: Vec::new(),
            }),
        })
    }

    async fn delete(&self, req: DeleteVolumeRequest) -> DriverResult<DeleteVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::invalid_argument("volume id missing in request"));
        }

        self.provisioner.delete(&req.volume_id).await?;
        info!(volume_id = %req.volume_id, "volume deleted");
        Ok(DeleteVolumeResponse {})
    }

    async fn publish(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> DriverResult<ControllerPublishVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::invalid_argument(
                "ControllerPublishVolume Volume ID is missing",
            ));
        }
        if req.node_id.is_empty() {
            return Err(DriverError::invalid_argument(
                "ControllerPublishVolume Node ID is missing",
            ));
        }
        if req.volume_capability.is_none() {
            return Err(DriverError::invalid_argument(
                "ControllerPublishVolume VolumeCapability is missing",
            ));
        }
        if req.readonly {
            return Err(DriverError::invalid_argument(
                "ControllerPublishVolume read only is not currently supported",
            ));
        }

        let volume_id = req.volume_id.as_str();
        let node_id = req.node_id.as_str();
        let attacher = self.attacher.as_ref();
        let clock = self.clock.as_ref();
        let started = clock.now();

        // Attach and the follow-up polling share one budget
        let Some(attached) = within(
            clock,
            self.attach_policy.timeout,
            attacher.attach(volume_id, node_id),
        )
        .await
        else {
            return Err(self.attach_timed_out(volume_id, node_id, 0));
        };
        attached?;

        let policy = PollPolicy {
            timeout: self
                .attach_policy
                .timeout
                .saturating_sub(clock.now().duration_since(started)),
            ..self.attach_policy
        };
        let state = Poller::new(policy)
            .run(clock, move || attacher.is_attached(volume_id, node_id))
            .await?;

        match state {
            PollState::Completed { attempts } => {
                info!(volume_id, node_id, attempts, "volume attached");
                Ok(ControllerPublishVolumeResponse::default())
            }
            PollState::TimedOut { attempts } => {
                Err(self.attach_timed_out(volume_id, node_id, attempts))
            }
            other => Err(DriverError::internal(format!(
                "attach poller stopped in state {other:?}"
            ))),
        }
    }

    fn attach_timed_out(&self, volume_id: &str, node_id: &str, attempts: u32) -> DriverError {
        warn!(volume_id, node_id, attempts, "volume attach timed out");
        DriverError::DeadlineExceeded(format!(
            "volume {volume_id} was not attached to node {node_id} within {}s",
            self.attach_policy.timeout.as_secs()
        ))
    }
}

fn not_implemented<T>(method: &str) -> Result<Response<T>, Status> {
    Err(DriverError::unimplemented(format!("{method} is not implemented")).into())
}

// ── Controller impl ───────────────────────────────────────────────────────────

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        Ok(Response::new(self.create(request.into_inner()).await?))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        Ok(Response::new(self.delete(request.into_inner()).await?))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Ok(Response::new(self.publish(request.into_inner()).await?))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        not_implemented("ControllerUnpublishVolume")
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(Confirmed {
                volume_context: req.volume_context,
                volume_capabilities: req.volume_capabilities,
                parameters: req.parameters,
            }),
            message: String::new(),
        }))
    }

    async fn list_volumes(
        &self,
        _request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        not_implemented("ListVolumes")
    }

    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        not_implemented("GetCapacity")
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: self.capabilities.controller_capabilities(),
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        not_implemented("CreateSnapshot")
    }

    async fn delete_snapshot(
        &self,
        _request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        not_implemented("DeleteSnapshot")
    }

    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        not_implemented("ListSnapshots")
    }

    async fn controller_expand_volume(
        &self,
        _request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        not_implemented("ControllerExpandVolume")
    }

    async fn controller_get_volume(
        &self,
        _request: Request<ControllerGetVolumeRequest>,
    ) -> Result<Response<ControllerGetVolumeResponse>, Status> {
        not_implemented("ControllerGetVolume")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AttachError, NoopBackend, ProvisionError, ProvisionedVolume};
    use crate::capabilities::tests::{block_capability, mount_capability};
    use crate::poll::tests::ManualClock;
    use async_trait::async_trait;
    use fortress_common::MINIMAL_VOLUME_SIZE;
    use fortress_proto::csi::volume_capability::access_mode::Mode as AccessMode;
    use fortress_proto::csi::volume_content_source::{self, SnapshotSource};
    use fortress_proto::csi::{CapacityRange, VolumeContentSource};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tonic::Code;

    const MIB: i64 = 1024 * 1024;

    /// Provisioner that records what it was asked to create
    #[derive(Default)]
    struct RecordingProvisioner {
        created: Mutex<Vec<(String, i64)>>,
        fail: Option<ProvisionError>,
    }

    #[async_trait]
    impl Provisioner for RecordingProvisioner {
        async fn create(
            &self,
            volume_id: &str,
            capacity_bytes: i64,
            _parameters: &HashMap<String, String>,
        ) -> Result<ProvisionedVolume, ProvisionError> {
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            self.created
                .lock()
                .push((volume_id.to_string(), capacity_bytes));
            Ok(ProvisionedVolume {
                volume_id: volume_id.to_string(),
                capacity_bytes,
            })
        }

        async fn delete(&self, _volume_id: &str) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    /// Attacher that reports attached after `ready_after` checks, or never
    struct SlowAttacher {
        ready_after: Option<u32>,
        checks: AtomicU32,
    }

    impl SlowAttacher {
        fn new(ready_after: Option<u32>) -> Self {
            Self {
                ready_after,
                checks: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AttachMounter for SlowAttacher {
        async fn attach(&self, _volume_id: &str, _node_id: &str) -> Result<(), AttachError> {
            Ok(())
        }

        async fn is_attached(&self, _volume_id: &str, _node_id: &str) -> Result<bool, AttachError> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.ready_after.is_some_and(|ready| n >= ready))
        }

        async fn stage(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }

        async fn unstage(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }

        async fn mount(&self, _: &str, _: &str, _: &[String]) -> Result<(), AttachError> {
            Ok(())
        }

        async fn unmount(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }
    }

    /// Attacher whose attach or attachment check never returns
    struct HungAttacher {
        hang_in_attach: bool,
    }

    #[async_trait]
    impl AttachMounter for HungAttacher {
        async fn attach(&self, _volume_id: &str, _node_id: &str) -> Result<(), AttachError> {
            if self.hang_in_attach {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn is_attached(&self, _volume_id: &str, _node_id: &str) -> Result<bool, AttachError> {
            std::future::pending().await
        }

        async fn stage(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }

        async fn unstage(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }

        async fn mount(&self, _: &str, _: &str, _: &[String]) -> Result<(), AttachError> {
            Ok(())
        }

        async fn unmount(&self, _: &str, _: &str) -> Result<(), AttachError> {
            Ok(())
        }
    }

    fn service() -> ControllerService {
        ControllerService::new(
            Arc::new(ControllerRegistry::default()),
            Arc::new(NoopBackend),
            Arc::new(NoopBackend),
        )
    }

    fn create_request(name: &str, required_bytes: i64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.into(),
            capacity_range: Some(CapacityRange {
                required_bytes,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![mount_capability(AccessMode::SingleNodeWriter)],
            ..Default::default()
        }
    }

    fn publish_request() -> ControllerPublishVolumeRequest {
        ControllerPublishVolumeRequest {
            volume_id: "pvc-1".into(),
            node_id: "worker-1".into(),
            volume_capability: Some(block_capability(AccessMode::SingleNodeWriter)),
            ..Default::default()
        }
    }

    async fn create(
        service: &ControllerService,
        req: CreateVolumeRequest,
    ) -> Result<Volume, Status> {
        service
            .create_volume(Request::new(req))
            .await
            .map(|r| r.into_inner().volume.unwrap())
    }

    // ── CreateVolume ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_applies_floor_and_alignment() {
        let service = service();

        let volume = create(&service, create_request("pvc-a", 0)).await.unwrap();
        assert_eq!(volume.capacity_bytes, MINIMAL_VOLUME_SIZE);

        let volume = create(&service, create_request("pvc-b", 10 * MIB + 1))
            .await
            .unwrap();
        assert_eq!(volume.capacity_bytes, 12 * MIB);

        let volume = create(&service, create_request("pvc-c", 20 * MIB))
            .await
            .unwrap();
        assert_eq!(volume.capacity_bytes, 20 * MIB);
    }

    #[tokio::test]
    async fn test_create_normalizes_name() {
        let service = service();
        let volume = create(&service, create_request("PVC-Upper", 0)).await.unwrap();
        assert_eq!(volume.volume_id, "pvc-upper");

        let long = "my-very-long-volume-name-that-exceeds-forty-characters";
        let volume = create(&service, create_request(long, 0)).await.unwrap();
        assert_eq!(volume.volume_id, "my-very-long-volume-name-that-e-aea67a34");
    }

    #[tokio::test]
    async fn test_create_echoes_parameters_and_source() {
        let service = service();
        let mut req = create_request("pvc-src", 0);
        req.parameters = HashMap::from([("tier".to_string(), "fast".to_string())]);
        let source = VolumeContentSource {
            r#type: Some(volume_content_source::Type::Snapshot(SnapshotSource {
                snapshot_id: "snap-1".into(),
            })),
        };
        req.volume_content_source = Some(source.clone());

        let volume = create(&service, req).await.unwrap();
        assert_eq!(volume.volume_context["tier"], "fast");
        assert_eq!(volume.content_source, Some(source));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let service = service();
        let first = create(&service, create_request("pvc-same", 15 * MIB))
            .await
            .unwrap();
        let second = create(&service, create_request("pvc-same", 15 * MIB))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_name() {
        let status = create(&service(), create_request("", 0)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "volume name missing in request");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_capabilities() {
        let service = service();

        let mut empty = create_request("pvc-1", 0);
        empty.volume_capabilities.clear();
        let status = create(&service, empty).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let mut both = create_request("pvc-1", 0);
        both.volume_capabilities[0].block =
            Some(fortress_proto::csi::volume_capability::BlockVolume {});
        let status = create(&service, both).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "cannot have both block and mount access type");

        let mut read_only = create_request("pvc-1", 0);
        read_only.volume_capabilities = vec![mount_capability(AccessMode::MultiNodeReaderOnly)];
        let status = create(&service, read_only).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_create_checks_capabilities_before_size() {
        let mut req = create_request("pvc-1", i64::MAX);
        req.volume_capabilities[0].block =
            Some(fortress_proto::csi::volume_capability::BlockVolume {});

        let status = create(&service(), req).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "cannot have both block and mount access type");
    }

    #[tokio::test]
    async fn test_create_respects_limit() {
        let service = service();
        let mut req = create_request("pvc-1", 11 * MIB);
        req.capacity_range.as_mut().unwrap().limit_bytes = 11 * MIB;
        let status = create(&service, req).await.unwrap_err();
        assert_eq!(status.code(), Code::OutOfRange);

        let mut req = create_request("pvc-1", 11 * MIB);
        req.capacity_range.as_mut().unwrap().limit_bytes = 12 * MIB;
        assert!(create(&service, req).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_overflowing_size() {
        let status = create(&service(), create_request("pvc-1", i64::MAX))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::OutOfRange);
    }

    #[tokio::test]
    async fn test_create_delegates_to_provisioner() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let service = ControllerService::new(
            Arc::new(ControllerRegistry::default()),
            provisioner.clone(),
            Arc::new(NoopBackend),
        );

        create(&service, create_request("PVC-Rec", 3 * MIB))
            .await
            .unwrap();
        assert_eq!(
            provisioner.created.lock().as_slice(),
            &[("pvc-rec".to_string(), MINIMAL_VOLUME_SIZE)]
        );
    }

    #[tokio::test]
    async fn test_create_maps_provisioner_errors() {
        let provisioner = RecordingProvisioner {
            fail: Some(ProvisionError::QuotaExceeded("pvc-1".into())),
            ..Default::default()
        };
        let service = ControllerService::new(
            Arc::new(ControllerRegistry::default()),
            Arc::new(provisioner),
            Arc::new(NoopBackend),
        );

        let status = create(&service, create_request("pvc-1", 0))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::ResourceExhausted);
    }

    // ── DeleteVolume ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_delete_requires_volume_id() {
        let service = service();
        let status = service
            .delete_volume(Request::new(DeleteVolumeRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        service
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_id: "pvc-absent".into(),
                ..Default::default()
            }))
            .await
            .unwrap();
    }

    // ── ControllerPublishVolume ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_publish_preconditions_in_order() {
        let service = service();
        let cases = [
            (
                ControllerPublishVolumeRequest::default(),
                "ControllerPublishVolume Volume ID is missing",
            ),
            (
                ControllerPublishVolumeRequest {
                    node_id: String::new(),
                    ..publish_request()
                },
                "ControllerPublishVolume Node ID is missing",
            ),
            (
                ControllerPublishVolumeRequest {
                    volume_capability: None,
                    ..publish_request()
                },
                "ControllerPublishVolume VolumeCapability is missing",
            ),
            (
                ControllerPublishVolumeRequest {
                    readonly: true,
                    ..publish_request()
                },
                "ControllerPublishVolume read only is not currently supported",
            ),
        ];

        for (req, message) in cases {
            let status = service
                .controller_publish_volume(Request::new(req))
                .await
                .unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument);
            assert_eq!(status.message(), message);
        }
    }

    #[tokio::test]
    async fn test_publish_waits_for_attachment() {
        let clock = Arc::new(ManualClock::new());
        let service = ControllerService::new(
            Arc::new(ControllerRegistry::default()),
            Arc::new(NoopBackend),
            Arc::new(SlowAttacher::new(Some(3))),
        )
        .with_clock(clock.clone());

        let response = service
            .controller_publish_volume(Request::new(publish_request()))
            .await
            .unwrap()
            .into_inner();
        assert!(response.publish_context.is_empty());
        assert_eq!(clock.sleeps(), 2);
    }

    #[tokio::test]
    async fn test_publish_times_out() {
        let clock = Arc::new(ManualClock::new());
        let service = ControllerService::new(
            Arc::new(ControllerRegistry::default()),
            Arc::new(NoopBackend),
            Arc::new(SlowAttacher::new(None)),
        )
        .with_clock(clock.clone());

        let status = service
            .controller_publish_volume(Request::new(publish_request()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(clock.sleeps(), PollPolicy::ATTACH_DETACH.max_ticks());
    }

    #[tokio::test]
    async fn test_publish_bounded_when_backend_hangs() {
        for hang_in_attach in [true, false] {
            let clock = Arc::new(ManualClock::new());
            let start = clock.now();
            let service = ControllerService::new(
                Arc::new(ControllerRegistry::default()),
                Arc::new(NoopBackend),
                Arc::new(HungAttacher { hang_in_attach }),
            )
            .with_clock(clock.clone());

            let status = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                service.controller_publish_volume(Request::new(publish_request())),
            )
            .await
            .expect("publish must not block past its budget")
            .unwrap_err();

            assert_eq!(status.code(), Code::DeadlineExceeded);
            assert_eq!(
                clock.now().duration_since(start),
                PollPolicy::ATTACH_DETACH.timeout
            );
        }
    }

    // ── Misc ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_validate_confirms_input() {
        let req = ValidateVolumeCapabilitiesRequest {
            volume_id: "pvc-1".into(),
            volume_context: HashMap::from([("a".to_string(), "b".to_string())]),
            volume_capabilities: vec![mount_capability(AccessMode::MultiNodeReaderOnly)],
            parameters: HashMap::from([("c".to_string(), "d".to_string())]),
            ..Default::default()
        };

        let confirmed = service()
            .validate_volume_capabilities(Request::new(req.clone()))
            .await
            .unwrap()
            .into_inner()
            .confirmed
            .unwrap();
        assert_eq!(confirmed.volume_context, req.volume_context);
        assert_eq!(confirmed.volume_capabilities, req.volume_capabilities);
        assert_eq!(confirmed.parameters, req.parameters);
    }

    #[tokio::test]
    async fn test_get_capabilities_matches_registry() {
        let service = service();
        let caps = service
            .controller_get_capabilities(Request::new(ControllerGetCapabilitiesRequest {}))
            .await
            .unwrap()
            .into_inner()
            .capabilities;
        assert_eq!(caps, service.capabilities().controller_capabilities());
        assert_eq!(caps.len(), 5);
    }

    #[tokio::test]
    async fn test_unbacked_rpcs_are_unimplemented() {
        let service = service();
        let codes = [
            service
                .controller_unpublish_volume(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .list_volumes(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .get_capacity(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .create_snapshot(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .delete_snapshot(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .list_snapshots(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .controller_expand_volume(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
            service
                .controller_get_volume(Request::new(Default::default()))
                .await
                .unwrap_err()
                .code(),
        ];
        assert!(codes.iter().all(|c| *c == Code::Unimplemented));
    }
}
