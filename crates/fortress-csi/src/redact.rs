//! Secret redaction for logged CSI messages
//!
//! CSI carries credentials and key material in `secrets` maps. Before a
//! message is logged, a copy with every secret value replaced by
//! [`STRIPPED`] is formatted instead. The message handed to the service is
//! never touched.

use std::collections::HashMap;
use std::fmt;

use fortress_proto::csi::*;

/// Replacement for a redacted value
pub const STRIPPED: &str = "***stripped***";

/// A CSI message that can produce a copy safe to log
pub trait StripSecrets: Clone {
    /// Copy of `self` with secret values replaced
    fn strip_secrets(&self) -> Self {
        self.clone()
    }
}

/// `Debug` adapter that formats the redacted copy of a message
pub struct Sanitized<'a, T>(pub &'a T);

impl<T: StripSecrets + fmt::Debug> fmt::Debug for Sanitized<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0.strip_secrets(), f)
    }
}

fn mask(map: &mut HashMap<String, String>) {
    for value in map.values_mut() {
        *value = STRIPPED.to_string();
    }
}

macro_rules! with_secrets {
    ($($message:ty),* $(,)?) => {
        $(
            impl StripSecrets for $message {
                fn strip_secrets(&self) -> Self {
                    let mut copy = self.clone();
                    mask(&mut copy.secrets);
                    copy
                }
            }
        )*
    };
}

macro_rules! without_secrets {
    ($($message:ty),* $(,)?) => {
        $(impl StripSecrets for $message {})*
    };
}

with_secrets!(
    CreateVolumeRequest,
    DeleteVolumeRequest,
    ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest,
    ValidateVolumeCapabilitiesRequest,
    CreateSnapshotRequest,
    DeleteSnapshotRequest,
    ListSnapshotsRequest,
    ControllerExpandVolumeRequest,
    NodeStageVolumeRequest,
    NodePublishVolumeRequest,
);

without_secrets!(
    // Identity
    GetPluginInfoRequest,
    GetPluginInfoResponse,
    GetPluginCapabilitiesRequest,
    GetPluginCapabilitiesResponse,
    ProbeRequest,
    ProbeResponse,
    // Controller
    CreateVolumeResponse,
    DeleteVolumeResponse,
    ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeResponse,
    ValidateVolumeCapabilitiesResponse,
    ListVolumesRequest,
    ListVolumesResponse,
    GetCapacityRequest,
    GetCapacityResponse,
    ControllerGetCapabilitiesRequest,
    ControllerGetCapabilitiesResponse,
    CreateSnapshotResponse,
    DeleteSnapshotResponse,
    ListSnapshotsResponse,
    ControllerExpandVolumeResponse,
    ControllerGetVolumeRequest,
    ControllerGetVolumeResponse,
    // Node
    NodeStageVolumeResponse,
    NodeUnstageVolumeRequest,
    NodeUnstageVolumeResponse,
    NodePublishVolumeResponse,
    NodeUnpublishVolumeRequest,
    NodeUnpublishVolumeResponse,
    NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse,
    NodeExpandVolumeRequest,
    NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest,
    NodeGetCapabilitiesResponse,
    NodeGetInfoRequest,
    NodeGetInfoResponse,
);
