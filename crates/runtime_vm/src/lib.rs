//! # opml-runtime-vm: Deterministic Replay Backend
//!
//! Loads a replay program and a model artifact once, then computes
//! checkpoint roots ("node hashes") for arbitrary inputs. A node hash commits
//! to the complete machine state at a given step: program image, input,
//! model weights and register file, all laid out in a sparse 32-bit memory
//! and folded into a SHA3-256 Merkle root.
//!
//! ## Pipeline
//!
//! ```text
//! ReplayBackend::init(model_name, model_path, program_path)
//!        │  ProgramImage::load / ModelImage::load (read once, digested)
//!        ▼
//! ReplayBackend::run_checkpoint(input)
//!        │  run_checkpoint_zero(program, model, input)
//!        │    build_initial_memory → Memory::state_root
//!        ▼
//! NodeHash (32 bytes, hex on the wire)
//! ```
//!
//! ## Determinism
//!
//! Same program bytes + same model bytes + same input → same node hash, on
//! any host. This is what lets a challenger recompute a node's commitment
//! and compare byte-for-byte.
//!
//! ## Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`memory`] | Sparse paged memory and its state root |
//! | [`merkle`] | Binary SHA3-256 Merkle fold |
//! | [`state_capture`] | Domain-separated digests |
//! | [`image`] | Program/model images, memory layout, register file |
//! | [`checkpoint`] | Checkpoint-zero computation |
//! | [`node_hash`] | `NodeHash`, `CheckpointOutcome` |

pub mod checkpoint;
pub mod image;
pub mod memory;
pub mod merkle;
pub mod node_hash;
pub mod state_capture;

pub use checkpoint::run_checkpoint_zero;
pub use image::{ModelImage, ProgramImage, RegisterFile};
pub use memory::Memory;
pub use merkle::compute_merkle_root;
pub use node_hash::{CheckpointOutcome, NodeHash, ParseNodeHashError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

/// Errors from loading replay artifacts or building a checkpoint.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Program or model file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("replay program {0} is empty")]
    EmptyProgram(PathBuf),

    #[error("model artifact {0} is empty")]
    EmptyModel(PathBuf),

    /// A region (program, input, model) does not fit its slot in memory.
    #[error("{region} of {len} bytes at {addr:#010x} does not fit in its memory region")]
    RegionOverflow {
        region: &'static str,
        addr: u32,
        len: u64,
    },
}

pub type ReplayResult<T> = Result<T, ReplayError>;

/// An initialized replay backend.
///
/// Exists only once both the program and the model have loaded; cloning is
/// cheap and shares the loaded images.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    model_name: String,
    program: Arc<ProgramImage>,
    model: Arc<ModelImage>,
}

impl ReplayBackend {
    pub fn init(
        model_name: impl Into<String>,
        model_path: impl AsRef<Path>,
        program_path: impl AsRef<Path>,
    ) -> ReplayResult<Self> {
        let model_name = model_name.into();
        let program = ProgramImage::load(program_path)?;
        let model = ModelImage::load(model_path)?;

        info!(
            model = %model_name,
            program = %program.path().display(),
            program_digest = %hex::encode(program.digest()),
            model_digest = %hex::encode(model.digest()),
            "replay backend ready"
        );

        Ok(Self::from_images(model_name, program, model))
    }

    pub fn from_images(model_name: impl Into<String>, program: ProgramImage, model: ModelImage) -> Self {
        Self {
            model_name: model_name.into(),
            program: Arc::new(program),
            model: Arc::new(model),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn program(&self) -> &ProgramImage {
        &self.program
    }

    pub fn model(&self) -> &ModelImage {
        &self.model
    }

    /// Full checkpoint-zero outcome for `input`.
    pub fn checkpoint(&self, input: &[u8]) -> ReplayResult<CheckpointOutcome> {
        run_checkpoint_zero(&self.program, &self.model, input)
    }

    /// Node hash of the checkpoint-zero state for `input`.
    pub fn run_checkpoint(&self, input: &[u8]) -> ReplayResult<NodeHash> {
        self.checkpoint(input).map(|outcome| outcome.node_hash)
    }
}
