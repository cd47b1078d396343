//! Fortress CSI driver
//!
//! Serves the CSI identity service plus the controller and/or node service
//! on a unix or tcp socket until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use fortress_common::{DriverConfig, Role};
use fortress_csi::Driver;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fortress-csi-driver")]
#[command(about = "Fortress Container Storage Interface plugin")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML); flags override its values
    #[arg(short, long, env = "FORTRESS_CSI_CONFIG")]
    config: Option<String>,

    /// CSI endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT")]
    endpoint: Option<String>,

    /// Storage API token; when set the controller service is started
    #[arg(long, env = "FORTRESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Name of the driver
    #[arg(long, env = "DRIVER_NAME")]
    driver_name: Option<String>,

    /// User agent for storage API calls
    #[arg(long)]
    user_agent: Option<String>,

    /// Node id reported to the orchestrator (defaults to the host name)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Services to host, overriding token-based selection
    #[arg(long, value_parser = parse_role)]
    role: Option<Role>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_role(s: &str) -> Result<Role, String> {
    match s.to_ascii_lowercase().as_str() {
        "controller" => Ok(Role::Controller),
        "node" => Ok(Role::Node),
        "all" => Ok(Role::All),
        other => Err(format!(
            "unknown role {other}, expected controller, node or all"
        )),
    }
}

/// Layer command-line flags over the configuration file
fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_file(path)
            .with_context(|| format!("failed to load config file {path}"))?,
        None => DriverConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    if let Some(driver_name) = &args.driver_name {
        config.driver_name.clone_from(driver_name);
    }
    if let Some(user_agent) = &args.user_agent {
        config.user_agent.clone_from(user_agent);
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = Some(node_id.clone());
    }
    if let Some(role) = args.role {
        config.role = Some(role);
    }
    if let Some(log_level) = &args.log_level {
        config.log_level.clone_from(log_level);
    }

    Ok(config)
}

fn node_id(config: &DriverConfig) -> Result<String> {
    match &config.node_id {
        Some(id) if !id.is_empty() => Ok(id.clone()),
        _ => gethostname::gethostname()
            .into_string()
            .map_err(|name| anyhow::anyhow!("host name {name:?} is not valid UTF-8")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("invalid driver configuration")?;
    let node_id = node_id(&config)?;

    let driver = Driver::new(config, node_id);
    let config = driver.config();
    info!(
        "Driver: {} Version: {} User agent: {}",
        config.driver_name, config.version, config.user_agent
    );
    info!("Endpoint: {}", config.endpoint);
    info!("Role: {}", driver.role());

    driver
        .run(shutdown_signal())
        .await
        .context("failed to run CSI driver")?;

    Ok(())
}
