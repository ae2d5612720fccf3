//! Execution backend registry.
//!
//! Both backends come up together or not at all: native first, then replay.
//! A registry value exists only once both are initialized, so holding one is
//! proof of readiness.

use std::sync::Arc;

use opml_runtime_vm::ReplayBackend;
use serde::Serialize;
use tracing::info;

use crate::config::NodeSettings;
use crate::error::BootstrapError;
use crate::native::NativeBackend;

#[derive(Debug, Clone)]
pub struct ExecutionBackendRegistry {
    native: Arc<NativeBackend>,
    replay: Arc<ReplayBackend>,
}

/// Snapshot reported by `/health`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendStatus {
    pub native_ready: bool,
    pub native_runner: bool,
    pub replay_ready: bool,
    pub model_digest: String,
    pub model_size: u64,
    pub program_digest: String,
}

impl ExecutionBackendRegistry {
    pub fn initialize(settings: &NodeSettings) -> Result<Self, BootstrapError> {
        info!(model = %settings.model_name, path = %settings.model_path.display(), "initializing native backend");
        let native = NativeBackend::init(
            settings.model_name.clone(),
            &settings.model_path,
            settings.native_runner.clone(),
            settings.native_timeout,
        )
        .map_err(BootstrapError::NativeBackend)?;

        info!(program = %settings.program_path.display(), "initializing replay backend");
        let replay = ReplayBackend::init(
            settings.model_name.clone(),
            &settings.model_path,
            &settings.program_path,
        )
        .map_err(BootstrapError::ReplayBackend)?;

        Ok(Self::from_parts(native, replay))
    }

    pub fn from_parts(native: NativeBackend, replay: ReplayBackend) -> Self {
        Self {
            native: Arc::new(native),
            replay: Arc::new(replay),
        }
    }

    pub fn native(&self) -> &Arc<NativeBackend> {
        &self.native
    }

    pub fn replay(&self) -> &Arc<ReplayBackend> {
        &self.replay
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            native_ready: true,
            native_runner: self.native.has_runner(),
            replay_ready: true,
            model_digest: hex::encode(self.native.model_digest()),
            model_size: self.native.model_size(),
            program_digest: hex::encode(self.replay.program().digest()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> NodeSettings {
        let model = dir.path().join("model.bin");
        let program = dir.path().join("program.bin");
        std::fs::write(&model, b"weights").unwrap();
        std::fs::write(&program, [0u8, 0, 0, 1]).unwrap();

        NodeSettings {
            model_name: "llama".into(),
            model_path: model,
            program_path: program,
            ..NodeSettings::default()
        }
    }

    #[test]
    fn test_initialize_both() {
        let dir = TempDir::new().unwrap();
        let registry = ExecutionBackendRegistry::initialize(&settings(&dir)).unwrap();

        let status = registry.status();
        assert!(status.native_ready && status.replay_ready);
        assert!(!status.native_runner);
        assert_eq!(status.model_digest.len(), 64);
        assert_eq!(status.model_size, 7);
        assert_eq!(registry.replay().model_name(), "llama");
    }

    #[test]
    fn test_native_failure_comes_first() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir);
        s.model_path = PathBuf::from("/nonexistent/model.bin");
        s.program_path = PathBuf::from("/nonexistent/program.bin");

        let err = ExecutionBackendRegistry::initialize(&s).unwrap_err();
        assert!(matches!(err, BootstrapError::NativeBackend(_)));
    }

    #[test]
    fn test_replay_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir);
        s.program_path = dir.path().join("missing.bin");

        let err = ExecutionBackendRegistry::initialize(&s).unwrap_err();
        assert!(matches!(err, BootstrapError::ReplayBackend(_)));
    }
}
