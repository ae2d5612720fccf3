//! Node bootstrap and lifecycle.
//!
//! ```text
//! validate settings
//!   → ExecutionBackendRegistry::initialize   (native, then replay)
//!   → persistence::connect
//!   → RpcService::start                       (bind failure is fatal)
//!   → HeartbeatReporter::spawn                (skipped without dispatcher)
//!   → wait: termination signal | rpc service exit
//!   → unwind: rpc service → heartbeat → log sink → persistence
//! ```
//!
//! Any error before the service is listening aborts the run; nothing is
//! announced and no port stays open. If the RPC service stops on its own
//! while the node is serving, the node shuts down the same way a signal
//! would and the run ends with [`BootstrapError::Service`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use crate::backends::ExecutionBackendRegistry;
use crate::config::{self, NodeSettings};
use crate::dispatcher_client::DispatcherClient;
use crate::error::BootstrapError;
use crate::heartbeat::{HeartbeatHandle, HeartbeatReporter, HeartbeatSink, HeartbeatSnapshot, NodeIdentity};
use crate::log_sink::LogSink;
use crate::persistence::{self, PersistenceClient};
use crate::rpc_service::RpcService;
use crate::shutdown::{ManagedResource, ShutdownCoordinator, ShutdownReason, UnwindReport};

/// Options of the `start` entry point.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub config: Option<PathBuf>,
    pub log_level: Level,
    pub log_dir: PathBuf,
}

/// How a run ended when it ended cleanly.
#[derive(Debug)]
pub struct NodeExit {
    pub reason: ShutdownReason,
    pub teardown: UnwindReport,
    pub heartbeat: Option<HeartbeatSnapshot>,
}

/// Loads settings, opens the log sink and runs the node until shutdown.
pub async fn run_node(opts: StartOptions) -> Result<NodeExit, BootstrapError> {
    let settings = config::load_or_default(opts.config.as_deref())?;
    settings.validate()?;

    let log_sink = LogSink::open(&opts.log_dir, opts.log_level).map_err(BootstrapError::LogSink)?;
    if !log_sink.install() {
        warn!("a global tracing subscriber was already installed");
    }
    if let Some(path) = log_sink.path() {
        info!(path = %path.display(), "logging to file");
    }

    NodeRuntime::new(Arc::new(settings)).run(log_sink).await
}

pub struct NodeRuntime {
    settings: Arc<NodeSettings>,
    coordinator: Arc<ShutdownCoordinator>,
    heartbeat_sink: Option<Arc<dyn HeartbeatSink>>,
    persistence: Option<Arc<dyn PersistenceClient>>,
    service_token: CancellationToken,
    on_ready: Option<oneshot::Sender<SocketAddr>>,
}

impl NodeRuntime {
    pub fn new(settings: Arc<NodeSettings>) -> Self {
        Self {
            settings,
            coordinator: Arc::new(ShutdownCoordinator::new()),
            heartbeat_sink: None,
            persistence: None,
            service_token: CancellationToken::new(),
            on_ready: None,
        }
    }

    /// Shares a coordinator with the caller, which can then trigger shutdown.
    pub fn with_coordinator(mut self, coordinator: Arc<ShutdownCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Replaces the dispatcher client. Heartbeats then run even without a
    /// dispatcher URL.
    pub fn with_heartbeat_sink(mut self, sink: Arc<dyn HeartbeatSink>) -> Self {
        self.heartbeat_sink = Some(sink);
        self
    }

    /// Uses an already connected persistence client instead of connecting
    /// to `persistence_uri`.
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceClient>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Token the RPC service serves under. Cancelling it from outside stops
    /// the service while the node is running, which ends the run with
    /// [`BootstrapError::Service`].
    pub fn with_service_token(mut self, token: CancellationToken) -> Self {
        self.service_token = token;
        self
    }

    /// Receives the bound address once the service is listening.
    pub fn notify_ready(mut self, tx: oneshot::Sender<SocketAddr>) -> Self {
        self.on_ready = Some(tx);
        self
    }

    pub async fn run(self, log_sink: LogSink) -> Result<NodeExit, BootstrapError> {
        let result = self.run_inner(&log_sink).await;
        if let Err(e) = &result {
            error!("node failed: {}", e);
            // Bootstrap failures never reach teardown. After a service exit
            // the sink is already closed and this is a no-op.
            let _ = log_sink.close();
        }
        result
    }

    async fn run_inner(mut self, log_sink: &LogSink) -> Result<NodeExit, BootstrapError> {
        let settings = self.settings.clone();
        settings.validate()?;
        info!(
            node_id = %settings.node_id,
            model = %settings.model_name,
            "bootstrapping node"
        );

        let backends = ExecutionBackendRegistry::initialize(&settings)?;
        let persistence = match self.persistence.take() {
            Some(p) => p,
            None => persistence::connect(&settings.persistence_uri)?,
        };
        let bind = settings.bind_addr()?;

        let service = match RpcService::configure(bind, &settings, backends, persistence.clone())
            .start(self.service_token.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = persistence.disconnect().await;
                return Err(e);
            }
        };

        let heartbeat = match self.start_heartbeat() {
            Ok(h) => h,
            Err(e) => {
                let _ = service.stop().await;
                let _ = persistence.disconnect().await;
                return Err(e);
            }
        };

        info!(addr = %service.local_addr(), "node is serving");
        if let Some(tx) = self.on_ready.take() {
            let _ = tx.send(service.local_addr());
        }

        let service_failed = tokio::select! {
            reason = self.coordinator.await_signal() => {
                info!(%reason, "shutdown signal received");
                false
            }
            _ = service.exited() => {
                error!("rpc service terminated unexpectedly");
                self.coordinator.trigger(ShutdownReason::ServiceExited);
                true
            }
        };

        let mut resources: Vec<&dyn ManagedResource> = Vec::with_capacity(4);
        resources.push(&service);
        if let Some(h) = heartbeat.as_ref() {
            resources.push(h);
        }
        resources.push(log_sink);
        resources.push(&persistence);

        let teardown = self
            .coordinator
            .unwind(&resources)
            .await
            .unwrap_or_default();
        let heartbeat_stats = heartbeat.as_ref().map(HeartbeatHandle::stats);

        if service_failed {
            let detail = teardown
                .failed
                .iter()
                .find(|(name, _)| name == service.name())
                .map(|(_, msg)| msg.clone())
                .unwrap_or_else(|| "serve loop exited".to_string());
            return Err(BootstrapError::Service(detail));
        }

        Ok(NodeExit {
            reason: self.coordinator.reason().unwrap_or(ShutdownReason::Requested),
            teardown,
            heartbeat: heartbeat_stats,
        })
    }

    fn start_heartbeat(&self) -> Result<Option<HeartbeatHandle>, BootstrapError> {
        let settings = &self.settings;
        let sink: Arc<dyn HeartbeatSink> = match &self.heartbeat_sink {
            Some(sink) => sink.clone(),
            None if settings.heartbeat_enabled() => Arc::new(
                DispatcherClient::new(&settings.dispatcher_url, settings.heartbeat_timeout)
                    .map_err(BootstrapError::Dispatcher)?,
            ),
            None => {
                info!("no dispatcher configured, heartbeat disabled");
                return Ok(None);
            }
        };

        let reporter = HeartbeatReporter::new(
            sink,
            NodeIdentity::from_settings(settings),
            settings.heartbeat_interval,
        );
        Ok(Some(reporter.spawn(self.coordinator.token().child_token())))
    }
}
