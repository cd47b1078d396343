//! Configuration types for Fortress CSI
//!
//! The driver is configured from an optional TOML file; command-line flags
//! override individual fields.

use crate::error::{Error, Result};
use crate::{DEFAULT_DRIVER_NAME, DRIVER_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which CSI services a process hosts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Identity + Controller (cluster-wide volume lifecycle)
    Controller,
    /// Identity + Node (per-node stage/publish)
    Node,
    /// Identity + Controller + Node in one process
    All,
}

impl Role {
    /// Default role selection: an API token means this process talks to the
    /// storage API and therefore runs the controller side.
    #[must_use]
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Self::Controller,
            _ => Self::Node,
        }
    }

    #[must_use]
    pub const fn hosts_controller(self) -> bool {
        matches!(self, Self::Controller | Self::All)
    }

    #[must_use]
    pub const fn hosts_node(self) -> bool {
        matches!(self, Self::Node | Self::All)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controller => f.write_str("controller"),
            Self::Node => f.write_str("node"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Root configuration for the driver process
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Listen endpoint (`unix:///path` or `tcp://host:port`)
    pub endpoint: String,
    /// Storage API token; its presence selects the controller role
    pub token: Option<String>,
    /// CSI driver name reported by `GetPluginInfo`
    pub driver_name: String,
    /// Vendor version reported by `GetPluginInfo`
    pub version: String,
    /// User agent for outbound storage API calls
    pub user_agent: String,
    /// Node id reported by `NodeGetInfo` (defaults to the host name)
    pub node_id: Option<String>,
    /// Explicit role, overriding the token-based selection
    pub role: Option<Role>,
    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(DEFAULT_DRIVER_NAME),
            token: None,
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            user_agent: format!("csi-fortress/{DRIVER_VERSION}"),
            node_id: None,
            role: None,
            log_level: "info".to_string(),
        }
    }
}

// The token is a credential; keep it out of `{:?}` output.
impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "***stripped***"))
            .field("driver_name", &self.driver_name)
            .field("version", &self.version)
            .field("user_agent", &self.user_agent)
            .field("node_id", &self.node_id)
            .field("role", &self.role)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Effective role: the explicit override, else token-based
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
            .unwrap_or_else(|| Role::from_token(self.token.as_deref()))
    }

    /// Check the fields the server cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::configuration("endpoint must not be empty"));
        }
        if self.driver_name.trim().is_empty() {
            return Err(Error::configuration("driver name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(Error::configuration("driver version must not be empty"));
        }
        Ok(())
    }
}

/// Default kubelet plugin socket for a driver name
#[must_use]
pub fn default_endpoint(driver_name: &str) -> String {
    format!("unix:///var/lib/kubelet/plugins/{driver_name}/csi.sock")
}
