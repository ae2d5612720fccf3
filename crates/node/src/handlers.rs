//! HTTP handlers of the RPC service.
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `GET /health` | | node id, model, uptime, backend status and model size |
//! | `POST /inference` | `{ "prompt": str }` | native runner output |
//! | `POST /checkpoint` | `{ "prompt": str }` | `{ "node_hash": "0x…" }` |
//!
//! Completed tasks are recorded through the persistence client. A failed
//! record is logged and does not fail the request.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use opml_runtime_vm::{NodeHash, ReplayError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backends::{BackendStatus, ExecutionBackendRegistry};
use crate::native::NativeError;
use crate::persistence::{PersistenceClient, TaskKind, TaskRecord};

// ════════════════════════════════════════════════════════════════════════════
// APP STATE
// ════════════════════════════════════════════════════════════════════════════

pub struct AppState {
    pub node_id: String,
    pub model_name: String,
    pub backends: ExecutionBackendRegistry,
    pub persistence: Arc<dyn PersistenceClient>,
    pub started: Instant,
}

impl AppState {
    async fn record(&self, kind: TaskKind, prompt: &str, result: &str) {
        let record = TaskRecord::new(self.node_id.clone(), kind, prompt, result);
        if let Err(e) = self.persistence.record(record).await {
            warn!("failed to record {:?} task: {}", kind, e);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST / RESPONSE TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct PromptReq {
    pub prompt: String,
}

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub healthy: bool,
    pub node_id: String,
    pub model_name: String,
    pub uptime_secs: u64,
    pub backends: BackendStatus,
}

/// POST /inference response
#[derive(Debug, Serialize)]
pub struct InferenceResp {
    pub output: String,
    pub duration_ms: u64,
}

/// POST /checkpoint response
#[derive(Debug, Serialize)]
pub struct CheckpointResp {
    pub node_hash: NodeHash,
    pub step: u64,
    pub committed_pages: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResp {
    pub error: String,
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResp { error: self.message })).into_response()
    }
}

impl From<NativeError> for ApiError {
    fn from(e: NativeError) -> Self {
        let status = match e {
            NativeError::NoRunner => StatusCode::SERVICE_UNAVAILABLE,
            NativeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<ReplayError> for ApiError {
    fn from(e: ReplayError) -> Self {
        let status = match e {
            ReplayError::RegionOverflow { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// GET /health
pub async fn health_handler(State(app): State<Arc<AppState>>) -> Json<HealthResp> {
    Json(HealthResp {
        healthy: true,
        node_id: app.node_id.clone(),
        model_name: app.model_name.clone(),
        uptime_secs: app.started.elapsed().as_secs(),
        backends: app.backends.status(),
    })
}

/// POST /inference
pub async fn inference_handler(
    State(app): State<Arc<AppState>>,
    Json(req): Json<PromptReq>,
) -> Result<Json<InferenceResp>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "prompt is empty"));
    }

    let out = app.backends.native().infer(&req.prompt).await?;
    info!(duration_ms = out.duration_ms, "inference completed");
    app.record(TaskKind::Inference, &req.prompt, &out.output).await;

    Ok(Json(InferenceResp {
        output: out.output,
        duration_ms: out.duration_ms,
    }))
}

/// POST /checkpoint
///
/// Runs on the blocking pool; the replay backend touches every model byte.
pub async fn checkpoint_handler(
    State(app): State<Arc<AppState>>,
    Json(req): Json<PromptReq>,
) -> Result<Json<CheckpointResp>, ApiError> {
    let replay = app.backends.replay().clone();
    let input = req.prompt.clone().into_bytes();

    let outcome = tokio::task::spawn_blocking(move || replay.checkpoint(&input))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;

    info!(node_hash = %outcome.node_hash, "checkpoint computed");
    app.record(TaskKind::Checkpoint, &req.prompt, &outcome.node_hash.to_string())
        .await;

    Ok(Json(CheckpointResp {
        node_hash: outcome.node_hash,
        step: outcome.step,
        committed_pages: outcome.committed_pages,
    }))
}

pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/inference", post(inference_handler))
        .route("/checkpoint", post(checkpoint_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeBackend;
    use crate::persistence::MemoryStore;
    use opml_runtime_vm::ReplayBackend;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        app: Arc<AppState>,
        store: Arc<MemoryStore>,
    }

    fn fixture(runner: Option<Vec<String>>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.bin");
        let program = dir.path().join("program.bin");
        std::fs::write(&model, b"weights").unwrap();
        std::fs::write(&program, [0u8, 1, 2, 3]).unwrap();

        let native = NativeBackend::init("llama", &model, runner, Duration::from_secs(5)).unwrap();
        let replay = ReplayBackend::init("llama", &model, &program).unwrap();
        let store = Arc::new(MemoryStore::new());

        let app = Arc::new(AppState {
            node_id: "node-1".into(),
            model_name: "llama".into(),
            backends: ExecutionBackendRegistry::from_parts(native, replay),
            persistence: store.clone(),
            started: Instant::now(),
        });
        Fixture {
            _dir: dir,
            app,
            store,
        }
    }

    fn prompt(p: &str) -> Json<PromptReq> {
        Json(PromptReq { prompt: p.into() })
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture(None);
        let Json(resp) = health_handler(State(f.app.clone())).await;
        assert!(resp.healthy);
        assert_eq!(resp.node_id, "node-1");
        assert!(resp.backends.replay_ready);
        assert_eq!(resp.backends.model_size, b"weights".len() as u64);
    }

    #[tokio::test]
    async fn test_checkpoint_records_task() {
        let f = fixture(None);
        let Json(h1) = checkpoint_handler(State(f.app.clone()), prompt("hello")).await.unwrap();
        let Json(h2) = checkpoint_handler(State(f.app.clone()), prompt("world")).await.unwrap();
        let Json(again) = checkpoint_handler(State(f.app.clone()), prompt("hello")).await.unwrap();

        assert_ne!(h1.node_hash, h2.node_hash);
        assert_eq!(h1.node_hash, again.node_hash);

        let records = f.store.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, TaskKind::Checkpoint);
        assert_eq!(records[0].result, h1.node_hash.to_string());
    }

    #[tokio::test]
    async fn test_inference_without_runner_is_unavailable() {
        let f = fixture(None);
        let err = inference_handler(State(f.app.clone()), prompt("hi")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(f.store.records().is_empty());
    }

    #[tokio::test]
    async fn test_inference_empty_prompt() {
        let f = fixture(None);
        let err = inference_handler(State(f.app.clone()), prompt("  ")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inference_with_runner() {
        let f = fixture(Some(vec!["echo".into(), "{prompt}".into()]));
        let Json(resp) = inference_handler(State(f.app.clone()), prompt("hi")).await.unwrap();
        assert_eq!(resp.output, "hi");
        assert_eq!(f.store.records()[0].kind, TaskKind::Inference);
    }

    #[test]
    fn test_replay_overflow_maps_to_413() {
        let err: ApiError = ReplayError::RegionOverflow {
            region: "input",
            addr: 0x3000_0000,
            len: 1 << 31,
        }
        .into();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
