//! # Domain-Separated SHA3-256 Hashing
//!
//! Every digest that feeds a checkpoint is computed as
//! `SHA3-256(prefix || data)` with a prefix unique to its role, so a page
//! leaf can never collide with an artifact digest over the same bytes.
//!
//! | Function | Prefix |
//! |----------|--------|
//! | [`hash_page`] | `OPML:page:v1:` |
//! | [`hash_program`] | `OPML:program:v1:` |
//! | [`hash_model`] | `OPML:model:v1:` |
//! | [`hash_input`] | `OPML:input:v1:` |
//!
//! Prefixes are part of the commitment format. Do not change them.

use sha3::{Digest, Sha3_256};

const PAGE_PREFIX: &[u8] = b"OPML:page:v1:";
const PROGRAM_PREFIX: &[u8] = b"OPML:program:v1:";
const MODEL_PREFIX: &[u8] = b"OPML:model:v1:";
const INPUT_PREFIX: &[u8] = b"OPML:input:v1:";

fn finish(hasher: Sha3_256) -> [u8; 32] {
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

fn domain_hash(prefix: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(prefix);
    hasher.update(data);
    finish(hasher)
}

/// Leaf hash of one memory page: `SHA3-256(prefix || index_be || bytes)`.
///
/// The page index is part of the leaf so that moving identical bytes to a
/// different address changes the root.
#[must_use]
pub fn hash_page(page_index: u32, bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(PAGE_PREFIX);
    hasher.update(page_index.to_be_bytes());
    hasher.update(bytes);
    finish(hasher)
}

/// Digest of a replay program image.
#[must_use]
pub fn hash_program(image: &[u8]) -> [u8; 32] {
    domain_hash(PROGRAM_PREFIX, image)
}

/// Digest of a model artifact.
#[must_use]
pub fn hash_model(artifact: &[u8]) -> [u8; 32] {
    domain_hash(MODEL_PREFIX, artifact)
}

/// Digest of a checkpoint input.
#[must_use]
pub fn hash_input(input: &[u8]) -> [u8; 32] {
    domain_hash(INPUT_PREFIX, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_same_data_different_hashes() {
        let data = b"identical-data";
        let program = hash_program(data);
        let model = hash_model(data);
        let input = hash_input(data);

        assert_ne!(program, model);
        assert_ne!(program, input);
        assert_ne!(model, input);
    }

    #[test]
    fn page_index_is_committed() {
        let bytes = [0xABu8; 64];
        assert_ne!(hash_page(0, &bytes), hash_page(1, &bytes));
    }

    #[test]
    fn empty_input_not_zero_hash() {
        assert_ne!(hash_input(b""), [0u8; 32]);
        assert_ne!(hash_page(0, b""), [0u8; 32]);
    }

    #[test]
    fn matches_manual_prefix_hash() {
        let mut hasher = Sha3_256::new();
        hasher.update(b"OPML:input:v1:");
        hasher.update(b"hello");
        let expected = hasher.finalize();

        assert_eq!(&hash_input(b"hello")[..], &expected[..]);
    }
}
