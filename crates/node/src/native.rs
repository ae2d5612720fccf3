//! Native inference backend.
//!
//! The node does not implement model inference itself. At init the backend
//! checks the model artifact and fingerprints it; inference requests are
//! handed to an external runner command with `{model}` and `{prompt}`
//! substituted into its arguments.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum NativeError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("model path {0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("model artifact {0} is empty")]
    EmptyModel(PathBuf),

    #[error("no native runner configured")]
    NoRunner,

    #[error("failed to spawn native runner: {0}")]
    Spawn(#[source] io::Error),

    #[error("native runner timed out after {0:?}")]
    Timeout(Duration),

    #[error("native runner exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Result of one native inference.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceOutput {
    pub output: String,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct NativeBackend {
    model_name: String,
    model_path: PathBuf,
    model_digest: [u8; 32],
    model_size: u64,
    runner: Option<Vec<String>>,
    timeout: Duration,
}

impl NativeBackend {
    pub fn init(
        model_name: impl Into<String>,
        model_path: impl AsRef<Path>,
        runner: Option<Vec<String>>,
        timeout: Duration,
    ) -> Result<Self, NativeError> {
        let model_name = model_name.into();
        let model_path = model_path.as_ref().to_path_buf();
        let io_err = |source| NativeError::Io {
            path: model_path.clone(),
            source,
        };

        let meta = std::fs::metadata(&model_path).map_err(io_err)?;
        if !meta.is_file() {
            return Err(NativeError::NotAFile(model_path));
        }
        if meta.len() == 0 {
            return Err(NativeError::EmptyModel(model_path));
        }

        let mut file = File::open(&model_path).map_err(io_err)?;
        let mut hasher = Sha3_256::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut model_size = 0u64;
        loop {
            let n = file.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            model_size += n as u64;
        }
        let model_digest: [u8; 32] = hasher.finalize().into();

        if runner.is_none() {
            warn!(model = %model_name, "no native runner configured, inference requests will be rejected");
        }
        info!(
            model = %model_name,
            path = %model_path.display(),
            size = model_size,
            digest = %hex::encode(model_digest),
            "native backend ready"
        );

        Ok(Self {
            model_name,
            model_path,
            model_digest,
            model_size,
            runner,
            timeout,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_digest(&self) -> [u8; 32] {
        self.model_digest
    }

    pub fn model_size(&self) -> u64 {
        self.model_size
    }

    pub fn has_runner(&self) -> bool {
        self.runner.is_some()
    }

    /// Runner argv for `prompt`, placeholders substituted.
    fn command_for(&self, prompt: &str) -> Result<Vec<String>, NativeError> {
        let template = self.runner.as_ref().ok_or(NativeError::NoRunner)?;
        let model = self.model_path.to_string_lossy();
        Ok(template
            .iter()
            .map(|arg| arg.replace("{model}", &model).replace("{prompt}", prompt))
            .collect())
    }

    /// Runs the external runner and returns its stdout.
    pub async fn infer(&self, prompt: &str) -> Result<InferenceOutput, NativeError> {
        let argv = self.command_for(prompt)?;
        let (program, args) = argv.split_first().ok_or(NativeError::NoRunner)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(NativeError::Spawn)?;
        debug!(runner = %program, "native runner spawned");

        // Dropping the wait future on timeout drops the child, which kills it.
        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(NativeError::Spawn)?,
            Err(_) => return Err(NativeError::Timeout(self.timeout)),
        };

        if !out.status.success() {
            return Err(NativeError::Failed {
                code: out.status.code(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        Ok(InferenceOutput {
            output: String::from_utf8_lossy(&out.stdout).trim_end().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
