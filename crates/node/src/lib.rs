//! # opml Node Crate
//!
//! Compute node of a verifiable-inference network. The node accepts work
//! from a remote dispatcher over an HTTP RPC endpoint, executes it on one
//! of two backends, and reports liveness back to the dispatcher.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           NodeRuntime                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  NodeSettings (Arc, read-only)                                   │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  ExecutionBackendRegistry ──► NativeBackend  (external runner)   │
//! │        │                 └──► ReplayBackend  (opml-runtime-vm)   │
//! │        ▼                                                         │
//! │  RpcService ── /health /inference /checkpoint ──► persistence    │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  HeartbeatReporter ── POST /heartbeat ──► dispatcher             │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  ShutdownCoordinator ── first signal ──► ordered unwind          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Entry Modes
//!
//! | Mode | Function | Network |
//! |------|----------|---------|
//! | start | [`orchestrator::run_node`] | RPC service + heartbeat |
//! | checkpoint | [`checkpoint::run_checkpoint_mode`] | none |
//!
//! # Failure Model
//!
//! Backend init, persistence connect and bind failures are fatal and happen
//! before the service is reachable. Heartbeat failures are transient: logged,
//! counted, retried on the next tick. See [`error`] for the full table.

pub mod backends;
pub mod checkpoint;
pub mod config;
pub mod dispatcher_client;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod log_sink;
pub mod native;
pub mod orchestrator;
pub mod persistence;
pub mod rpc_service;
pub mod shutdown;

pub use backends::{BackendStatus, ExecutionBackendRegistry};
pub use checkpoint::{run_checkpoint_mode, CheckpointRunner};
pub use config::{load_from_file, load_or_default, ConfigError, NodeSettings};
pub use dispatcher_client::DispatcherClient;
pub use error::{BootstrapError, CheckpointError};
pub use heartbeat::{
    HeartbeatError, HeartbeatHandle, HeartbeatMessage, HeartbeatReporter, HeartbeatSink,
    HeartbeatSnapshot, NodeIdentity,
};
pub use log_sink::{Console, LogSink};
pub use native::{InferenceOutput, NativeBackend, NativeError};
pub use orchestrator::{run_node, NodeExit, NodeRuntime, StartOptions};
pub use persistence::{PersistenceClient, PersistenceError, TaskKind, TaskRecord};
pub use rpc_service::{RpcService, ServiceHandle};
pub use shutdown::{ManagedResource, ShutdownCoordinator, ShutdownReason, UnwindReport};

/// Node version string.
pub const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input used by the checkpoint mode when none is given.
pub const DEFAULT_PROMPT: &str = "Why Golang is so popular?";
