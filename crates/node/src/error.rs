//! Error taxonomy of the node.
//!
//! | Type | Severity | Handling |
//! |------|----------|----------|
//! | [`BootstrapError`] | fatal | propagated to `main`, process exits non-zero before announcing availability |
//! | [`HeartbeatError`](crate::heartbeat::HeartbeatError) | transient | logged at the heartbeat boundary, next tick retries |
//! | [`CheckpointError`] | per invocation | returned to the checkpoint caller |

use std::net::SocketAddr;

use opml_runtime_vm::ReplayError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::heartbeat::HeartbeatError;
use crate::native::NativeError;
use crate::persistence::PersistenceError;

/// Anything that stops the node from coming up, or kills it while serving.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("log sink error: {0}")]
    LogSink(#[source] std::io::Error),

    #[error("native backend init failed: {0}")]
    NativeBackend(#[source] NativeError),

    #[error("replay backend init failed: {0}")]
    ReplayBackend(#[source] ReplayError),

    #[error("persistence connect failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("dispatcher client setup failed: {0}")]
    Dispatcher(#[source] HeartbeatError),

    #[error("failed to bind rpc service to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The RPC service stopped on its own: a transport error or an
    /// unexpected exit while the node was supposed to be serving.
    #[error("rpc service terminated: {0}")]
    Service(String),
}

/// Failure of the standalone checkpoint mode.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("checkpoint task aborted: {0}")]
    Join(String),
}
