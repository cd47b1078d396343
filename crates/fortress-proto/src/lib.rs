//! Fortress CSI Protocol - gRPC service definitions
//!
//! This crate contains the protobuf-generated code for the Container
//! Storage Interface (v1) that the plugin serves to the orchestrator.

/// CSI v1 identity, controller and node services
pub mod csi {
    tonic::include_proto!("csi.v1");
}
