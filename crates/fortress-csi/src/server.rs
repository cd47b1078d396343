//! Plugin server lifecycle
//!
//! Binds the orchestrator-facing socket, registers the enabled services
//! behind the logging interceptor and runs the accept loop on a Tokio task.
//!
//! ```text
//! Created ──start()──▶ Starting ──▶ Started ──stop()──▶ Stopping ──▶ Stopped
//!    ▲                     │           │                                 ▲
//!    └──── bind failed ────┘           └────────── force_stop() ─────────┘
//! ```
//!
//! `force_stop` also cancels every in-flight call; the wrapped handlers are
//! dropped and their callers get `UNAVAILABLE`.

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use fortress_proto::csi::controller_server::ControllerServer;
use fortress_proto::csi::identity_server::IdentityServer;
use fortress_proto::csi::node_server::NodeServer;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::controller::ControllerService;
use crate::identity::IdentityService;
use crate::interceptor::{Logged, VerbosityMap};
use crate::node::NodeService;

/// Plugin server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to remove stale socket {}: {source}", path.display())]
    RemoveSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    #[error("server not started")]
    NotStarted,

    #[error("plugin server exited without a shutdown request")]
    Exited,
}

impl ServerError {
    fn invalid(endpoint: &str, reason: &str) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Listen address in `scheme://address` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at an absolute path
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, address)) = s.split_once("://") else {
            return Err(ServerError::invalid(s, "expected scheme://address"));
        };
        if address.is_empty() {
            return Err(ServerError::invalid(s, "address is empty"));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "unix" => {
                let path = if address.starts_with('/') {
                    PathBuf::from(address)
                } else {
                    Path::new("/").join(address)
                };
                Ok(Self::Unix(path))
            }
            "tcp" => Ok(Self::Tcp(address.to_string())),
            other => Err(ServerError::invalid(
                s,
                &format!("unsupported scheme {other}"),
            )),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(address) => write!(f, "tcp://{address}"),
        }
    }
}

/// Address the server is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`PluginServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Services to register; `None` entries are not served
#[derive(Default)]
pub struct Services {
    pub identity: Option<IdentityService>,
    pub controller: Option<ControllerService>,
    pub node: Option<NodeService>,
}

struct Inner {
    state: ServerState,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<AbortHandle>,
    local_addr: Option<ListenAddr>,
    exited: Option<watch::Receiver<bool>>,
    stop_requested: bool,
    abandon: CancellationToken,
}

/// Removes the socket file and signals exit when the accept task ends,
/// whether it returned or was aborted.
struct ExitGuard {
    exited: watch::Sender<bool>,
    socket: Option<PathBuf>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.socket {
            if let Err(e) = std::fs::remove_file(path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!("failed to remove socket {}: {}", path.display(), e);
            }
        }
        self.exited.send_replace(true);
    }
}

enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

/// gRPC server hosting the CSI services
pub struct PluginServer {
    inner: Mutex<Inner>,
    verbosity: Arc<VerbosityMap>,
}

impl Default for PluginServer {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginServer {
    pub fn new() -> Self {
        Self::with_verbosity(VerbosityMap::default())
    }

    pub fn with_verbosity(verbosity: VerbosityMap) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ServerState::Created,
                shutdown: None,
                task: None,
                local_addr: None,
                exited: None,
                stop_requested: false,
                abandon: CancellationToken::new(),
            }),
            verbosity: Arc::new(verbosity),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        let inner = self.inner.lock();
        match (inner.state, &inner.exited) {
            (ServerState::Started | ServerState::Stopping, Some(rx)) if *rx.borrow() => {
                ServerState::Stopped
            }
            (state, _) => state,
        }
    }

    /// Address the server is bound to, once started
    pub fn local_addr(&self) -> Option<ListenAddr> {
        self.inner.lock().local_addr.clone()
    }

    /// Whether the accept loop ended without [`stop`](Self::stop) or
    /// [`force_stop`](Self::force_stop) being called
    pub fn exited_unexpectedly(&self) -> bool {
        let inner = self.inner.lock();
        !inner.stop_requested && inner.exited.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Bind `endpoint` and start serving in the background.
    ///
    /// Returns once the socket is bound; the accept loop runs on its own
    /// task until [`stop`](Self::stop) or [`force_stop`](Self::force_stop).
    pub async fn start(&self, endpoint: &str, services: Services) -> Result<(), ServerError> {
        let endpoint: Endpoint = endpoint.parse()?;

        // Claim the server before touching the socket path
        {
            let mut inner = self.inner.lock();
            if inner.state != ServerState::Created {
                return Err(ServerError::AlreadyStarted);
            }
            inner.state = ServerState::Starting;
        }

        let bound = bind(&endpoint).await.and_then(|listener| {
            let local_addr = match &listener {
                Listener::Unix(_, path) => ListenAddr::Unix(path.clone()),
                Listener::Tcp(l) => ListenAddr::Tcp(l.local_addr().map_err(|source| {
                    ServerError::Listen {
                        address: endpoint.to_string(),
                        source,
                    }
                })?),
            };
            Ok((listener, local_addr))
        });
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.inner.lock().state = ServerState::Created;
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        let abandon = inner.abandon.clone();

        let router = Server::builder()
            .add_optional_service(
                services
                    .identity
                    .map(|s| IdentityServer::new(self.logged(s, &abandon))),
            )
            .add_optional_service(
                services
                    .controller
                    .map(|s| ControllerServer::new(self.logged(s, &abandon))),
            )
            .add_optional_service(
                services
                    .node
                    .map(|s| NodeServer::new(self.logged(s, &abandon))),
            );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = watch::channel(false);
        let signal = async move {
            let _ = shutdown_rx.await;
        };

        info!("Listening for connections on address: {}", local_addr);

        let task = match listener {
            Listener::Unix(listener, path) => {
                let guard = ExitGuard {
                    exited: exited_tx,
                    socket: Some(path),
                };
                tokio::spawn(async move {
                    let _guard = guard;
                    let incoming = UnixListenerStream::new(listener);
                    if let Err(e) = router.serve_with_incoming_shutdown(incoming, signal).await {
                        error!("plugin server exited with error: {}", e);
                    }
                })
            }
            Listener::Tcp(listener) => {
                let guard = ExitGuard {
                    exited: exited_tx,
                    socket: None,
                };
                tokio::spawn(async move {
                    let _guard = guard;
                    let incoming = TcpListenerStream::new(listener);
                    if let Err(e) = router.serve_with_incoming_shutdown(incoming, signal).await {
                        error!("plugin server exited with error: {}", e);
                    }
                })
            }
        };

        inner.state = ServerState::Started;
        inner.shutdown = Some(shutdown_tx);
        inner.task = Some(task.abort_handle());
        inner.local_addr = Some(local_addr);
        inner.exited = Some(exited_rx);
        Ok(())
    }

    fn logged<S>(&self, service: S, abandon: &CancellationToken) -> Logged<S> {
        Logged::new(service, self.verbosity.clone()).with_cancellation(abandon.clone())
    }

    /// Resolve once the accept loop has exited. Returns immediately if the
    /// server was never started.
    pub async fn wait(&self) {
        let exited = self.inner.lock().exited.clone();
        if let Some(mut rx) = exited {
            // An error means the guard is gone, which also means exited.
            let _ = rx.wait_for(|exited| *exited).await;
        }
    }

    /// Stop accepting connections and let in-flight calls finish
    pub fn stop(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, ServerState::Created | ServerState::Starting) {
            return Err(ServerError::NotStarted);
        }
        inner.stop_requested = true;
        if let Some(shutdown) = inner.shutdown.take() {
            info!("stopping plugin server");
            let _ = shutdown.send(());
        }
        if inner.state == ServerState::Started {
            inner.state = ServerState::Stopping;
        }
        Ok(())
    }

    /// Abort the accept loop, abandoning in-flight calls
    pub fn force_stop(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, ServerState::Created | ServerState::Starting) {
            return Err(ServerError::NotStarted);
        }
        inner.stop_requested = true;
        if let Some(task) = inner.task.take() {
            warn!("force stopping plugin server");
            inner.abandon.cancel();
            task.abort();
        }
        inner.shutdown = None;
        if inner.state == ServerState::Started {
            inner.state = ServerState::Stopping;
        }
        Ok(())
    }

    /// End the accept loop the way a serve failure would
    #[cfg(test)]
    pub(crate) fn abort_accept_loop(&self) {
        if let Some(task) = self.inner.lock().task.take() {
            task.abort();
        }
    }
}

async fn bind(endpoint: &Endpoint) -> Result<Listener, ServerError> {
    match endpoint {
        Endpoint::Unix(path) => {
            match std::fs::remove_file(path) {
                Ok(()) => info!("removed stale socket {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ServerError::RemoveSocket {
                        path: path.clone(),
                        source,
                    });
                }
            }
            let listener = UnixListener::bind(path).map_err(|source| ServerError::Listen {
                address: endpoint.to_string(),
                source,
            })?;
            Ok(Listener::Unix(listener, path.clone()))
        }
        Endpoint::Tcp(address) => {
            let listener = TcpListener::bind(address.as_str())
                .await
                .map_err(|source| ServerError::Listen {
                    address: endpoint.to_string(),
                    source,
                })?;
            Ok(Listener::Tcp(listener))
        }
    }
}
