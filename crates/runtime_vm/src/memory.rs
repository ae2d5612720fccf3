//! Sparse paged memory over a 32-bit address space.
//!
//! Pages are allocated on first write. The state root only covers pages that
//! hold at least one non-zero byte, so two memories with the same contents
//! hash identically no matter which zero pages happen to be allocated.

use std::collections::BTreeMap;

use crate::merkle::compute_merkle_root;
use crate::state_capture::hash_page;
use crate::{ReplayError, ReplayResult};

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

const PAGE_SHIFT: u32 = 12;
const ADDRESS_SPACE: u64 = 1 << 32;

type Page = Box<[u8; PAGE_SIZE]>;

#[derive(Debug, Clone, Default)]
pub struct Memory {
    pages: BTreeMap<u32, Page>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `bytes` starting at `addr`.
    ///
    /// Fails with [`ReplayError::RegionOverflow`] if the write would run past
    /// the end of the address space. Nothing is written in that case.
    pub fn write(&mut self, addr: u32, bytes: &[u8]) -> ReplayResult<()> {
        let end = u64::from(addr) + bytes.len() as u64;
        if end > ADDRESS_SPACE {
            return Err(ReplayError::RegionOverflow {
                region: "memory",
                addr,
                len: bytes.len() as u64,
            });
        }

        let mut cursor = addr as u64;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let page_index = (cursor >> PAGE_SHIFT) as u32;
            let offset = (cursor as usize) & (PAGE_SIZE - 1);
            let take = remaining.len().min(PAGE_SIZE - offset);

            let page = self
                .pages
                .entry(page_index)
                .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
            page[offset..offset + take].copy_from_slice(&remaining[..take]);

            cursor += take as u64;
            remaining = &remaining[take..];
        }
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> ReplayResult<()> {
        self.write(addr, &value.to_be_bytes())
    }

    /// Reads a big-endian word. Unmapped memory reads as zero.
    pub fn read_u32(&self, addr: u32) -> u32 {
        let mut word = [0u8; 4];
        for (i, byte) in word.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32);
            let page_index = a >> PAGE_SHIFT;
            let offset = (a as usize) & (PAGE_SIZE - 1);
            if let Some(page) = self.pages.get(&page_index) {
                *byte = page[offset];
            }
        }
        u32::from_be_bytes(word)
    }

    /// Number of pages that contribute to the state root.
    pub fn committed_pages(&self) -> usize {
        self.pages.values().filter(|p| !is_zero(p)).count()
    }

    /// Merkle root over all non-zero pages in address order.
    pub fn state_root(&self) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = self
            .pages
            .iter()
            .filter(|(_, page)| !is_zero(page))
            .map(|(index, page)| hash_page(*index, &page[..]))
            .collect();
        compute_merkle_root(&leaves)
    }
}

fn is_zero(page: &[u8; PAGE_SIZE]) -> bool {
    page.iter().all(|b| *b == 0)
}
