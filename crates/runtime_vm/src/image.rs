//! Program and model images, and the checkpoint-zero memory layout.
//!
//! ```text
//! 0x0000_0000  program image            (ends at or below HEAP_START)
//! 0x2000_0000  heap start               (recorded in the register file)
//! 0x3000_0000  input:  len_be32 || bytes (ends at or below INPUT_LIMIT)
//! 0x7FFF_F000  initial stack pointer
//! 0x8000_0000  model:  len_be32 || bytes (ends at or below REGISTER_ADDR)
//! 0xC000_0000  register file            (see RegisterFile)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::memory::Memory;
use crate::state_capture::{hash_model, hash_program};
use crate::{ReplayError, ReplayResult};

pub const PROGRAM_BASE: u32 = 0x0000_0000;
pub const HEAP_START: u32 = 0x2000_0000;
pub const INPUT_ADDR: u32 = 0x3000_0000;
pub const INPUT_LIMIT: u32 = 0x7000_0000;
pub const STACK_TOP: u32 = 0x7FFF_F000;
pub const MODEL_ADDR: u32 = 0x8000_0000;
pub const REGISTER_ADDR: u32 = 0xC000_0000;

/// Index of the stack pointer in the general purpose register file.
const SP: usize = 29;

fn read_artifact(path: &Path) -> ReplayResult<Vec<u8>> {
    fs::read(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A loaded replay program.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    path: PathBuf,
    bytes: Vec<u8>,
    digest: [u8; 32],
}

impl ProgramImage {
    pub fn load(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let path = path.as_ref();
        let bytes = read_artifact(path)?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> ReplayResult<Self> {
        let path = path.into();
        if bytes.is_empty() {
            return Err(ReplayError::EmptyProgram(path));
        }
        let end = u64::from(PROGRAM_BASE) + bytes.len() as u64;
        if end > u64::from(HEAP_START) {
            return Err(ReplayError::RegionOverflow {
                region: "program",
                addr: PROGRAM_BASE,
                len: bytes.len() as u64,
            });
        }
        let digest = hash_program(&bytes);
        debug!(path = %path.display(), size = bytes.len(), "program image loaded");
        Ok(Self { path, bytes, digest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }
}

/// A loaded model artifact.
#[derive(Debug, Clone)]
pub struct ModelImage {
    path: PathBuf,
    bytes: Vec<u8>,
    digest: [u8; 32],
}

impl ModelImage {
    pub fn load(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let path = path.as_ref();
        let bytes = read_artifact(path)?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> ReplayResult<Self> {
        let path = path.into();
        if bytes.is_empty() {
            return Err(ReplayError::EmptyModel(path));
        }
        let end = u64::from(MODEL_ADDR) + 4 + bytes.len() as u64;
        if end > u64::from(REGISTER_ADDR) {
            return Err(ReplayError::RegionOverflow {
                region: "model",
                addr: MODEL_ADDR,
                len: bytes.len() as u64,
            });
        }
        let digest = hash_model(&bytes);
        debug!(path = %path.display(), size = bytes.len(), "model image loaded");
        Ok(Self { path, bytes, digest })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }
}

/// CPU state stored at [`REGISTER_ADDR`] as consecutive big-endian words:
/// 32 general purpose registers, then `pc`, `next_pc`, `hi`, `lo`, `heap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    pub gpr: [u32; 32],
    pub pc: u32,
    pub next_pc: u32,
    pub hi: u32,
    pub lo: u32,
    pub heap: u32,
}

impl RegisterFile {
    /// Register state before the first instruction executes.
    pub fn initial() -> Self {
        let mut gpr = [0u32; 32];
        gpr[SP] = STACK_TOP;
        Self {
            gpr,
            pc: PROGRAM_BASE,
            next_pc: PROGRAM_BASE + 4,
            hi: 0,
            lo: 0,
            heap: HEAP_START,
        }
    }

    pub fn write_to(&self, memory: &mut Memory) -> ReplayResult<()> {
        let mut addr = REGISTER_ADDR;
        let tail = [self.pc, self.next_pc, self.hi, self.lo, self.heap];
        for word in self.gpr.iter().chain(tail.iter()) {
            memory.write_u32(addr, *word)?;
            addr += 4;
        }
        Ok(())
    }
}

/// Writes `len_be32 || bytes` at `addr`, refusing to cross `limit`.
fn write_prefixed(
    memory: &mut Memory,
    region: &'static str,
    addr: u32,
    limit: u32,
    bytes: &[u8],
) -> ReplayResult<()> {
    let end = u64::from(addr) + 4 + bytes.len() as u64;
    if end > u64::from(limit) || bytes.len() > u32::MAX as usize {
        return Err(ReplayError::RegionOverflow {
            region,
            addr,
            len: bytes.len() as u64,
        });
    }
    memory.write_u32(addr, bytes.len() as u32)?;
    memory.write(addr + 4, bytes)
}

/// Builds the machine state at step zero: program, input, model and the
/// initial register file laid out per the module-level map.
pub fn build_initial_memory(
    program: &ProgramImage,
    model: &ModelImage,
    input: &[u8],
) -> ReplayResult<Memory> {
    let mut memory = Memory::new();
    memory.write(PROGRAM_BASE, program.bytes())?;
    write_prefixed(&mut memory, "input", INPUT_ADDR, INPUT_LIMIT, input)?;
    write_prefixed(&mut memory, "model", MODEL_ADDR, REGISTER_ADDR, model.bytes())?;
    RegisterFile::initial().write_to(&mut memory)?;
    Ok(memory)
}
