//! # Binary Merkle Tree over Page Leaves
//!
//! The state root of a replay checkpoint is a binary SHA3-256 Merkle root
//! over the leaf hashes of every non-zero memory page, in address order.
//!
//! ## Algorithm
//!
//! - No leaves → `[0u8; 32]`
//! - Parent: `SHA3-256(left || right)`
//! - Odd node count: duplicate last node
//!
//! Leaf hashing (domain prefix + page index + page bytes) lives in
//! [`state_capture::hash_page`](crate::state_capture::hash_page); this module
//! only folds already-hashed leaves.
//!
//! Any change here changes every node hash the network has ever committed to.

use sha3::{Digest, Sha3_256};

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(left);
    hasher.update(right);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Folds ordered leaf hashes into a binary Merkle root.
///
/// Returns `[0u8; 32]` when `leaves` is empty. A single leaf is its own root.
#[must_use]
pub fn compute_merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut nodes: Vec<[u8; 32]> = leaves.to_vec();

    while nodes.len() > 1 {
        if nodes.len() % 2 != 0 {
            let last = nodes[nodes.len() - 1];
            nodes.push(last);
        }

        nodes = nodes
            .chunks_exact(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    nodes[0]
}
