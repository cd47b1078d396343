//! Role composition
//!
//! Builds the capability registries and services for the configured role
//! and runs them on a [`PluginServer`] until shutdown.

use std::future::Future;
use std::sync::Arc;

use fortress_common::{DriverConfig, Role};
use tracing::{error, info};

use crate::backend::{AttachMounter, NoopBackend, Provisioner};
use crate::capabilities::{ControllerRegistry, NodeRegistry};
use crate::controller::ControllerService;
use crate::identity::IdentityService;
use crate::node::NodeService;
use crate::server::{PluginServer, ServerError, Services};

/// A configured CSI driver process
pub struct Driver {
    config: DriverConfig,
    node_id: String,
    provisioner: Arc<dyn Provisioner>,
    attacher: Arc<dyn AttachMounter>,
    server: PluginServer,
}

impl Driver {
    /// Driver backed by [`NoopBackend`]
    pub fn new(config: DriverConfig, node_id: impl Into<String>) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            provisioner: Arc::new(NoopBackend),
            attacher: Arc::new(NoopBackend),
            server: PluginServer::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn server(&self) -> &PluginServer {
        &self.server
    }

    /// Services hosted by this process's role
    pub fn services(&self) -> Services {
        let role = self.role();

        let controller = role.hosts_controller().then(|| {
            ControllerService::new(
                Arc::new(ControllerRegistry::default()),
                self.provisioner.clone(),
                self.attacher.clone(),
            )
        });
        let node = role.hosts_node().then(|| {
            NodeService::new(
                self.node_id.clone(),
                Arc::new(NodeRegistry::default()),
                self.attacher.clone(),
            )
        });

        Services {
            identity: Some(IdentityService::new(
                self.config.driver_name.clone(),
                self.config.version.clone(),
                role.hosts_controller(),
            )),
            controller,
            node,
        }
    }

    /// Serve until `shutdown` resolves. A server that exits on its own
    /// yields [`ServerError::Exited`].
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            driver = %self.config.driver_name,
            version = %self.config.version,
            role = %self.role(),
            node_id = %self.node_id,
            "Starting Fortress CSI driver"
        );

        self.server
            .start(&self.config.endpoint, self.services())
            .await?;

        tokio::select! {
            () = shutdown => {
                info!("Shutting down...");
                self.server.stop()?;
            }
            () = self.server.wait() => {
                if self.server.exited_unexpectedly() {
                    error!("plugin server exited without a shutdown request");
                    return Err(ServerError::Exited);
                }
            }
        }

        self.server.wait().await;
        info!("Fortress CSI driver shut down gracefully");
        Ok(())
    }
}
