//! Fortress CSI Common - Shared types and utilities
//!
//! This crate provides the pure building blocks of the plugin: volume name
//! normalization, volume size policy, driver configuration and the common
//! error type used at startup.

pub mod config;
pub mod error;
pub mod naming;
pub mod size;

pub use config::{DriverConfig, Role};
pub use error::{Error, Result};
pub use naming::{NAME_MAXIMUM_LENGTH, auto_correct_name};
pub use size::{MINIMAL_VOLUME_SIZE, SIZE_ALIGNMENT, effective_size, round_up_size};

/// Default CSI driver name
pub const DEFAULT_DRIVER_NAME: &str = "block.csi.fortress.com";

/// Driver version reported to the orchestrator
pub const DRIVER_VERSION: &str = "0.1";
