//! Fortress CSI
//!
//! The protocol contract layer of the Fortress Container Storage Interface
//! plugin: capability negotiation, per-RPC request validation, and the
//! lifecycle of the gRPC server that exposes the identity, controller and
//! node services to the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │     Orchestrator     │  (CSI sidecars / kubelet)
//! └──────────┬───────────┘
//!            │ unix:// or tcp://
//! ┌──────────▼───────────┐
//! │     PluginServer     │
//! │  Logged<S>           │  secret-redacting request/response logging
//! │  ├─ Identity         │
//! │  ├─ Controller       │  CapabilityRegistry, name + size policy
//! │  └─ Node             │
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ Provisioner          │  storage backends
//! │ AttachMounter        │
//! └──────────────────────┘
//! ```

pub mod backend;
pub mod capabilities;
pub mod controller;
pub mod driver;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod node;
pub mod poll;
pub mod redact;
pub mod server;

pub use backend::{AttachError, AttachMounter, NoopBackend, ProvisionError, Provisioner};
pub use capabilities::{CapabilityRegistry, ControllerRegistry, NodeRegistry};
pub use controller::ControllerService;
pub use driver::Driver;
pub use error::{DriverError, DriverResult};
pub use identity::IdentityService;
pub use interceptor::{Logged, Operation, Verbosity, VerbosityMap};
pub use node::NodeService;
pub use poll::{Clock, PollPolicy, PollState, Poller, TokioClock};
pub use server::{Endpoint, ListenAddr, PluginServer, ServerError, ServerState, Services};
