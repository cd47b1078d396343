//! gRPC Identity service implementation

use std::collections::HashMap;

use fortress_proto::csi::identity_server::Identity;
use fortress_proto::csi::plugin_capability::{self, service, volume_expansion};
use fortress_proto::csi::{
    GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse, GetPluginInfoRequest,
    GetPluginInfoResponse, PluginCapability, ProbeRequest, ProbeResponse,
};
use tonic::{Request, Response, Status};

use crate::error::DriverError;

/// Plugin identity and plugin-level capabilities
#[derive(Debug, Clone)]
pub struct IdentityService {
    name: String,
    version: String,
    hosts_controller: bool,
}

impl IdentityService {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        hosts_controller: bool,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hosts_controller,
        }
    }

    /// Plugin capabilities advertised for this process
    pub fn plugin_capabilities(&self) -> Vec<PluginCapability> {
        let mut capabilities = Vec::with_capacity(2);
        if self.hosts_controller {
            capabilities.push(PluginCapability {
                r#type: Some(plugin_capability::Type::Service(plugin_capability::Service {
                    r#type: service::Type::ControllerService.into(),
                })),
            });
        }
        capabilities.push(PluginCapability {
            r#type: Some(plugin_capability::Type::VolumeExpansion(
                plugin_capability::VolumeExpansion {
                    r#type: volume_expansion::Type::Offline.into(),
                },
            )),
        });
        capabilities
    }
}

#[tonic::async_trait]
impl Identity for IdentityService {
    async fn get_plugin_info(
        &self,
        _request: Request<GetPluginInfoRequest>,
    ) -> Result<Response<GetPluginInfoResponse>, Status> {
        if self.name.is_empty() {
            return Err(DriverError::Unavailable("driver name not configured".into()).into());
        }
        if self.version.is_empty() {
            return Err(DriverError::Unavailable("driver is missing version".into()).into());
        }

        Ok(Response::new(GetPluginInfoResponse {
            name: self.name.clone(),
            vendor_version: self.version.clone(),
            manifest: HashMap::new(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: self.plugin_capabilities(),
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        Ok(Response::new(ProbeResponse { ready: Some(true) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn has_controller_service(caps: &[PluginCapability]) -> bool {
        caps.iter().any(|c| {
            matches!(
                &c.r#type,
                Some(plugin_capability::Type::Service(s))
                    if s.r#type == i32::from(service::Type::ControllerService)
            )
        })
    }

    fn has_offline_expansion(caps: &[PluginCapability]) -> bool {
        caps.iter().any(|c| {
            matches!(
                &c.r#type,
                Some(plugin_capability::Type::VolumeExpansion(e))
                    if e.r#type == i32::from(volume_expansion::Type::Offline)
            )
        })
    }

    #[tokio::test]
    async fn test_plugin_info() {
        let service = IdentityService::new("block.csi.fortress.com", "0.1", true);
        let info = service
            .get_plugin_info(Request::new(GetPluginInfoRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(info.name, "block.csi.fortress.com");
        assert_eq!(info.vendor_version, "0.1");
    }

    #[tokio::test]
    async fn test_plugin_info_requires_name_and_version() {
        let unnamed = IdentityService::new("", "0.1", true);
        let status = unnamed
            .get_plugin_info(Request::new(GetPluginInfoRequest {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);

        let unversioned = IdentityService::new("block.csi.fortress.com", "", true);
        let status = unversioned
            .get_plugin_info(Request::new(GetPluginInfoRequest {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[test]
    fn test_controller_process_advertises_controller_service() {
        let caps = IdentityService::new("d", "1", true).plugin_capabilities();
        assert!(has_controller_service(&caps));
        assert!(has_offline_expansion(&caps));
    }

    #[test]
    fn test_node_process_omits_controller_service() {
        let caps = IdentityService::new("d", "1", false).plugin_capabilities();
        assert!(!has_controller_service(&caps));
        assert!(has_offline_expansion(&caps));
    }

    #[tokio::test]
    async fn test_probe_reports_ready() {
        let service = IdentityService::new("d", "1", false);
        let probe = service
            .probe(Request::new(ProbeRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(probe.ready, Some(true));
    }
}
