//! Standalone checkpoint mode.
//!
//! Loads the replay program and model, computes the checkpoint root for one
//! input and returns it. No RPC service, no heartbeat, no persistence.

use std::path::{Path, PathBuf};

use opml_runtime_vm::{NodeHash, ReplayBackend};
use tracing::info;

use crate::config::NodeSettings;
use crate::error::CheckpointError;

pub struct CheckpointRunner;

impl CheckpointRunner {
    /// Computes the root synchronously on the current thread.
    pub fn compute_root_blocking(
        program_path: &Path,
        model_path: &Path,
        input: &[u8],
    ) -> Result<NodeHash, CheckpointError> {
        let backend = ReplayBackend::init("checkpoint", model_path, program_path)?;
        Ok(backend.run_checkpoint(input)?)
    }

    /// Computes the root on the blocking pool.
    pub async fn compute_root(
        program_path: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        input: impl Into<Vec<u8>>,
    ) -> Result<NodeHash, CheckpointError> {
        let program_path = program_path.into();
        let model_path = model_path.into();
        let input = input.into();

        tokio::task::spawn_blocking(move || {
            Self::compute_root_blocking(&program_path, &model_path, &input)
        })
        .await
        .map_err(|e| CheckpointError::Join(e.to_string()))?
    }
}

/// Entry of the `checkpoint` subcommand.
pub async fn run_checkpoint_mode(
    settings: &NodeSettings,
    prompt: &str,
) -> Result<NodeHash, CheckpointError> {
    settings.validate_for_checkpoint()?;
    info!(
        program = %settings.program_path.display(),
        model = %settings.model_path.display(),
        input_len = prompt.len(),
        "computing checkpoint root"
    );

    let hash = CheckpointRunner::compute_root(
        settings.program_path.clone(),
        settings.model_path.clone(),
        prompt.as_bytes(),
    )
    .await?;

    info!(node_hash = %hash, "checkpoint root computed");
    Ok(hash)
}
