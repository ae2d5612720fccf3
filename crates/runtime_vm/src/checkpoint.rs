//! # Checkpoint-Zero Computation
//!
//! Produces the root of the machine state immediately before the first
//! instruction of a replay executes:
//!
//! ```text
//! ┌─ run_checkpoint_zero ─────────────────────────────────────┐
//! │  1. hash_input(input)                  ← input digest      │
//! │  2. build_initial_memory(prog, model, input)               │
//! │       program  @ 0x0000_0000                               │
//! │       input    @ 0x3000_0000 (len-prefixed)                │
//! │       model    @ 0x8000_0000 (len-prefixed)                │
//! │       registers@ 0xC000_0000                               │
//! │  3. memory.state_root()                ← Merkle over pages │
//! │  4. CheckpointOutcome { node_hash = root, step = 0, .. }   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step is a pure function of the program bytes, model bytes and input
//! bytes. No clock, no randomness, no host-dependent ordering.
//!
//! If any region does not fit, the error propagates and no outcome is built.

use crate::image::{build_initial_memory, ModelImage, ProgramImage};
use crate::node_hash::{CheckpointOutcome, NodeHash};
use crate::state_capture::hash_input;
use crate::ReplayResult;

/// Computes the checkpoint-zero root for `input` under `program` and `model`.
pub fn run_checkpoint_zero(
    program: &ProgramImage,
    model: &ModelImage,
    input: &[u8],
) -> ReplayResult<CheckpointOutcome> {
    let input_digest = hash_input(input);

    let memory = build_initial_memory(program, model, input)?;
    let root = memory.state_root();

    Ok(CheckpointOutcome {
        node_hash: NodeHash::new(root),
        step: 0,
        program_digest: program.digest(),
        model_digest: model.digest(),
        input_digest,
        committed_pages: memory.committed_pages(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(seed: u8) -> ProgramImage {
        ProgramImage::from_bytes("prog", vec![seed; 64]).unwrap()
    }

    fn model(seed: u8) -> ModelImage {
        ModelImage::from_bytes("model", vec![seed; 128]).unwrap()
    }

    #[test]
    fn outcome_fields_populated() {
        let out = run_checkpoint_zero(&program(1), &model(2), b"hello").unwrap();
        assert_eq!(out.step, 0);
        assert_ne!(out.node_hash.as_bytes(), &[0u8; 32]);
        assert_eq!(out.input_digest, hash_input(b"hello"));
        assert_eq!(out.program_digest, program(1).digest());
        assert_eq!(out.model_digest, model(2).digest());
        // program, input, model and register pages
        assert_eq!(out.committed_pages, 4);
    }

    #[test]
    fn same_arguments_same_root() {
        let reference = run_checkpoint_zero(&program(1), &model(2), b"hello").unwrap();
        for _ in 0..10 {
            let again = run_checkpoint_zero(&program(1), &model(2), b"hello").unwrap();
            assert_eq!(again, reference);
        }
    }

    #[test]
    fn input_changes_root() {
        let a = run_checkpoint_zero(&program(1), &model(2), b"hello").unwrap();
        let b = run_checkpoint_zero(&program(1), &model(2), b"world").unwrap();
        assert_ne!(a.node_hash, b.node_hash);
    }

    #[test]
    fn program_changes_root() {
        let a = run_checkpoint_zero(&program(1), &model(2), b"x").unwrap();
        let b = run_checkpoint_zero(&program(3), &model(2), b"x").unwrap();
        assert_ne!(a.node_hash, b.node_hash);
    }

    #[test]
    fn model_changes_root() {
        let a = run_checkpoint_zero(&program(1), &model(2), b"x").unwrap();
        let b = run_checkpoint_zero(&program(1), &model(4), b"x").unwrap();
        assert_ne!(a.node_hash, b.node_hash);
    }

    #[test]
    fn empty_input_is_valid() {
        let out = run_checkpoint_zero(&program(1), &model(2), b"").unwrap();
        assert_ne!(out.node_hash.as_bytes(), &[0u8; 32]);
    }
}
