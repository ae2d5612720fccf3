//! RPC service lifecycle.
//!
//! [`RpcService::configure`] captures everything the service needs; it does
//! not touch the network. [`RpcService::start`] binds the listener (a bind
//! failure is fatal and returned before anything is spawned) and serves on a
//! background task until [`ServiceHandle::stop`] or a transport error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backends::ExecutionBackendRegistry;
use crate::config::NodeSettings;
use crate::error::BootstrapError;
use crate::handlers::{build_router, AppState};
use crate::persistence::PersistenceClient;
use crate::shutdown::ManagedResource;

pub struct RpcService {
    bind: SocketAddr,
    state: Arc<AppState>,
}

impl RpcService {
    pub fn configure(
        bind: SocketAddr,
        settings: &NodeSettings,
        backends: ExecutionBackendRegistry,
        persistence: Arc<dyn PersistenceClient>,
    ) -> Self {
        let state = Arc::new(AppState {
            node_id: settings.node_id.clone(),
            model_name: settings.model_name.clone(),
            backends,
            persistence,
            started: Instant::now(),
        });
        Self { bind, state }
    }

    /// Binds and starts serving. `cancel` stops the service gracefully.
    pub async fn start(self, cancel: CancellationToken) -> Result<ServiceHandle, BootstrapError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| BootstrapError::Bind {
                addr: self.bind,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| BootstrapError::Bind {
            addr: self.bind,
            source,
        })?;

        let router = build_router(self.state);
        let done = CancellationToken::new();
        let shutdown = cancel.clone();
        let done_guard = done.clone().drop_guard();

        let task = tokio::spawn(async move {
            let _done = done_guard;
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| e.to_string())
        });

        info!("rpc service listening on http://{}", local_addr);
        Ok(ServiceHandle {
            local_addr,
            cancel,
            done,
            task: Mutex::new(Some(task)),
        })
    }
}

/// A running RPC service.
pub struct ServiceHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    done: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<(), String>>>>,
}

impl ServiceHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves once the serve loop has exited, for whatever reason.
    pub async fn exited(&self) {
        self.done.cancelled().await
    }

    pub fn has_exited(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Stops serving and waits for the serve loop to settle. Returns the
    /// transport error if the loop had failed on its own.
    pub async fn stop(&self) -> Result<(), BootstrapError> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        match task.await {
            Ok(Ok(())) => {
                info!("rpc service stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("rpc service failed: {}", e);
                Err(BootstrapError::Service(e))
            }
            Err(e) => Err(BootstrapError::Service(format!("serve task: {}", e))),
        }
    }
}

#[async_trait]
impl ManagedResource for ServiceHandle {
    fn name(&self) -> &str {
        "rpc service"
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeBackend;
    use crate::persistence::MemoryStore;
    use opml_runtime_vm::ReplayBackend;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(dir: &TempDir, bind: SocketAddr) -> RpcService {
        let model = dir.path().join("model.bin");
        let program = dir.path().join("program.bin");
        std::fs::write(&model, b"weights").unwrap();
        std::fs::write(&program, [0u8, 1, 2, 3]).unwrap();

        let settings = NodeSettings {
            node_id: "node-1".into(),
            model_name: "llama".into(),
            ..NodeSettings::default()
        };
        let native = NativeBackend::init("llama", &model, None, Duration::from_secs(1)).unwrap();
        let replay = ReplayBackend::init("llama", &model, &program).unwrap();
        RpcService::configure(
            bind,
            &settings,
            ExecutionBackendRegistry::from_parts(native, replay),
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_start_serves_health_and_stops() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, "127.0.0.1:0".parse().unwrap());
        let handle = svc.start(CancellationToken::new()).await.unwrap();
        let addr = handle.local_addr();

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["node_id"], "node-1");
        assert_eq!(body["healthy"], true);

        handle.stop().await.unwrap();
        assert!(handle.has_exited());
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_over_http() {
        let dir = TempDir::new().unwrap();
        let handle = service(&dir, "127.0.0.1:0".parse().unwrap())
            .start(CancellationToken::new())
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let url = format!("http://{}/checkpoint", handle.local_addr());
        let resp: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({ "prompt": "hello" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let hash = resp["node_hash"].as_str().unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let dir = TempDir::new().unwrap();
        let err = service(&dir, addr)
            .start(CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BootstrapError::Bind { .. }));
    }
}
