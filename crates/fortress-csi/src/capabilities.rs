//! Capability registry and volume capability validation
//!
//! Each role builds one immutable registry at startup. Handlers share it by
//! `Arc` and only ever read it, so negotiation answers and validation
//! decisions always agree.

use std::collections::BTreeSet;
use std::fmt::Debug;

use fortress_proto::csi::controller_service_capability::rpc::Type as ControllerRpc;
use fortress_proto::csi::node_service_capability::rpc::Type as NodeRpc;
use fortress_proto::csi::volume_capability::access_mode::Mode as AccessMode;
use fortress_proto::csi::{
    ControllerServiceCapability, NodeServiceCapability, VolumeCapability,
    controller_service_capability, node_service_capability,
};
use tracing::info;

use crate::error::{DriverError, DriverResult};

/// An operation identifier that can be advertised in a registry
pub trait CapabilityKind: Copy + Ord + Debug {
    /// Which service the capability belongs to, for logging
    const SERVICE: &'static str;

    /// Protocol name of the capability
    fn name(&self) -> &'static str;
}

impl CapabilityKind for ControllerRpc {
    const SERVICE: &'static str = "controller";

    fn name(&self) -> &'static str {
        self.as_str_name()
    }
}

impl CapabilityKind for NodeRpc {
    const SERVICE: &'static str = "node";

    fn name(&self) -> &'static str {
        self.as_str_name()
    }
}

/// Immutable set of supported operations and access modes for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRegistry<Op> {
    operations: BTreeSet<Op>,
    access_modes: BTreeSet<AccessMode>,
}

/// Registry of the controller role
pub type ControllerRegistry = CapabilityRegistry<ControllerRpc>;

/// Registry of the node role
pub type NodeRegistry = CapabilityRegistry<NodeRpc>;

impl<Op: CapabilityKind> CapabilityRegistry<Op> {
    /// Build a registry, logging every enabled entry
    pub fn new(
        operations: impl IntoIterator<Item = Op>,
        access_modes: impl IntoIterator<Item = AccessMode>,
    ) -> Self {
        let operations: BTreeSet<Op> = operations.into_iter().collect();
        let access_modes: BTreeSet<AccessMode> = access_modes.into_iter().collect();

        for op in &operations {
            info!("Enabling {} service capability: {}", Op::SERVICE, op.name());
        }
        for mode in &access_modes {
            info!("Enabling volume access mode: {}", mode.as_str_name());
        }

        Self {
            operations,
            access_modes,
        }
    }

    /// Operations this role advertises
    pub fn supported_operations(&self) -> &BTreeSet<Op> {
        &self.operations
    }

    /// Access modes a volume capability may request
    pub fn supported_access_modes(&self) -> &BTreeSet<AccessMode> {
        &self.access_modes
    }

    /// Whether a volume capability may request `mode`
    pub fn supports_access_mode(&self, mode: AccessMode) -> bool {
        self.access_modes.contains(&mode)
    }

    /// Check one volume capability: exactly one access type and a
    /// registered access mode.
    pub fn validate_volume_capability(&self, capability: &VolumeCapability) -> DriverResult<()> {
        match (&capability.block, &capability.mount) {
            (None, None) => {
                return Err(DriverError::invalid_argument(
                    "cannot have both mount and block access type be undefined",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(DriverError::invalid_argument(
                    "cannot have both block and mount access type",
                ));
            }
            _ => {}
        }

        let raw_mode = capability.access_mode.as_ref().map_or(0, |m| m.mode);
        match AccessMode::try_from(raw_mode) {
            Ok(mode) if self.supports_access_mode(mode) => Ok(()),
            Ok(mode) => Err(DriverError::invalid_argument(format!(
                "access mode {} is not supported",
                mode.as_str_name()
            ))),
            Err(_) => Err(DriverError::invalid_argument(format!(
                "access mode {raw_mode} is not supported"
            ))),
        }
    }

    /// Check a non-empty list of volume capabilities, reporting the first
    /// offending entry.
    pub fn validate_volume_capabilities(
        &self,
        capabilities: &[VolumeCapability],
    ) -> DriverResult<()> {
        if capabilities.is_empty() {
            return Err(DriverError::invalid_argument(
                "Volume Capabilities cannot be empty",
            ));
        }
        capabilities
            .iter()
            .try_for_each(|capability| self.validate_volume_capability(capability))
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new(
            [
                ControllerRpc::CreateDeleteVolume,
                ControllerRpc::PublishUnpublishVolume,
                ControllerRpc::ExpandVolume,
                ControllerRpc::CreateDeleteSnapshot,
                ControllerRpc::CloneVolume,
            ],
            [
                AccessMode::SingleNodeWriter,
                AccessMode::MultiNodeMultiWriter,
            ],
        )
    }
}

impl ControllerRegistry {
    /// `ControllerGetCapabilities` payload: exactly the registry contents
    pub fn controller_capabilities(&self) -> Vec<ControllerServiceCapability> {
        self.operations
            .iter()
            .map(|op| ControllerServiceCapability {
                r#type: Some(controller_service_capability::Type::Rpc(
                    controller_service_capability::Rpc { r#type: (*op).into() },
                )),
            })
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(
            [NodeRpc::GetVolumeStats, NodeRpc::StageUnstageVolume],
            std::iter::empty(),
        )
    }
}

impl NodeRegistry {
    /// `NodeGetCapabilities` payload: exactly the registry contents
    pub fn node_capabilities(&self) -> Vec<NodeServiceCapability> {
        self.operations
            .iter()
            .map(|op| NodeServiceCapability {
                r#type: Some(node_service_capability::Type::Rpc(
                    node_service_capability::Rpc { r#type: (*op).into() },
                )),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fortress_proto::csi::volume_capability::{self, BlockVolume, MountVolume};

    pub(crate) fn mount_capability(mode: AccessMode) -> VolumeCapability {
        VolumeCapability {
            block: None,
            mount: Some(MountVolume {
                fs_type: "ext4".into(),
                mount_flags: vec![],
            }),
            access_mode: Some(volume_capability::AccessMode { mode: mode.into() }),
        }
    }

    pub(crate) fn block_capability(mode: AccessMode) -> VolumeCapability {
        VolumeCapability {
            block: Some(BlockVolume {}),
            mount: None,
            access_mode: Some(volume_capability::AccessMode { mode: mode.into() }),
        }
    }

    #[test]
    fn test_controller_defaults() {
        let registry = ControllerRegistry::default();
        assert_eq!(registry.supported_operations().len(), 5);
        let ops = registry.supported_operations();
        assert!(ops.contains(&ControllerRpc::CreateDeleteVolume));
        assert!(ops.contains(&ControllerRpc::CloneVolume));
        assert!(!ops.contains(&ControllerRpc::ListVolumes));
        assert!(registry.supports_access_mode(AccessMode::SingleNodeWriter));
        assert!(registry.supports_access_mode(AccessMode::MultiNodeMultiWriter));
        assert!(!registry.supports_access_mode(AccessMode::MultiNodeReaderOnly));
    }

    #[test]
    fn test_controller_negotiation_returns_registry() {
        let registry = ControllerRegistry::default();
        let advertised: BTreeSet<i32> = registry
            .controller_capabilities()
            .into_iter()
            .filter_map(|c| match c.r#type {
                Some(controller_service_capability::Type::Rpc(rpc)) => Some(rpc.r#type),
                None => None,
            })
            .collect();
        let expected: BTreeSet<i32> = registry
            .supported_operations()
            .iter()
            .map(|op| i32::from(*op))
            .collect();
        assert_eq!(advertised, expected);
    }

    #[test]
    fn test_node_negotiation_returns_registry() {
        let registry = NodeRegistry::default();
        let caps = registry.node_capabilities();
        assert_eq!(caps.len(), 2);
        assert!(registry.supported_access_modes().is_empty());
    }

    #[test]
    fn test_accepts_mount_and_block() {
        let registry = ControllerRegistry::default();
        assert!(registry
            .validate_volume_capability(&mount_capability(AccessMode::SingleNodeWriter))
            .is_ok());
        assert!(registry
            .validate_volume_capability(&block_capability(AccessMode::MultiNodeMultiWriter))
            .is_ok());
    }

    #[test]
    fn test_rejects_both_access_types() {
        let registry = ControllerRegistry::default();
        let mut capability = mount_capability(AccessMode::SingleNodeWriter);
        capability.block = Some(BlockVolume {});

        let err = registry.validate_volume_capability(&capability).unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "cannot have both block and mount access type");
    }

    #[test]
    fn test_rejects_neither_access_type() {
        let registry = ControllerRegistry::default();
        let mut capability = mount_capability(AccessMode::SingleNodeWriter);
        capability.mount = None;

        let err = registry.validate_volume_capability(&capability).unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_unregistered_access_mode() {
        let registry = ControllerRegistry::default();
        let err = registry
            .validate_volume_capability(&mount_capability(AccessMode::SingleNodeReaderOnly))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "access mode SINGLE_NODE_READER_ONLY is not supported"
        );
    }

    #[test]
    fn test_rejects_missing_and_unknown_access_mode() {
        let registry = ControllerRegistry::default();

        let mut missing = mount_capability(AccessMode::SingleNodeWriter);
        missing.access_mode = None;
        assert!(registry.validate_volume_capability(&missing).is_err());

        let mut bogus = mount_capability(AccessMode::SingleNodeWriter);
        bogus.access_mode = Some(volume_capability::AccessMode { mode: 42 });
        let err = registry.validate_volume_capability(&bogus).unwrap_err();
        assert_eq!(err.to_string(), "access mode 42 is not supported");
    }

    #[test]
    fn test_list_reports_first_offender() {
        let registry = ControllerRegistry::default();
        let mut both = block_capability(AccessMode::SingleNodeWriter);
        both.mount = Some(MountVolume::default());
        let caps = vec![
            mount_capability(AccessMode::SingleNodeWriter),
            both,
            mount_capability(AccessMode::MultiNodeReaderOnly),
        ];

        let err = registry.validate_volume_capabilities(&caps).unwrap_err();
        assert_eq!(err.to_string(), "cannot have both block and mount access type");
    }

    #[test]
    fn test_empty_list_rejected() {
        let registry = ControllerRegistry::default();
        let err = registry.validate_volume_capabilities(&[]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }
}
