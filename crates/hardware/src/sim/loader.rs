//! ELF64 program loader.
//!
//! Only `PT_LOAD` segment decoding is implemented: enough to place a
//! RV64IM guest binary into simulated physical memory and find its
//! entry point. Section headers, relocations, and dynamic linking are
//! all out of scope — guests are statically linked, position-dependent
//! binaries.

use object::{Object, ObjectSegment};

use crate::common::error::{SimError, SimResult};
use crate::memory::controller::Backing;

/// Something an ELF loader can place `PT_LOAD` segment bytes into.
pub trait LoadTarget {
    /// Writes `data` at physical address `addr`.
    fn load_bytes(&mut self, addr: u64, data: &[u8]);
}

impl LoadTarget for Backing {
    fn load_bytes(&mut self, addr: u64, data: &[u8]) {
        self.load_slice(addr, data);
    }
}

/// Where a loaded binary starts executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedElf {
    /// The binary's entry point, as a guest physical address.
    pub entry: u64,
}

/// Scans `bytes` for the highest address any `PT_LOAD` segment touches,
/// so a caller can size a [`Backing`] before calling [`load_elf`].
pub fn required_size(bytes: &[u8]) -> SimResult<u64> {
    let file = object::File::parse(bytes).map_err(|e| SimError::Config(format!("malformed ELF: {e}")))?;
    Ok(file.segments().map(|s| s.address() + s.size()).max().unwrap_or(0))
}

/// Parses `bytes` as an ELF64 binary and copies every `PT_LOAD`
/// segment's file contents into `target` at its segment address,
/// zero-filling out to the segment's memory size (`p_memsz >= p_filesz`
/// covers `.bss`).
pub fn load_elf(bytes: &[u8], target: &mut dyn LoadTarget) -> SimResult<LoadedElf> {
    let file = object::File::parse(bytes).map_err(|e| SimError::Config(format!("malformed ELF: {e}")))?;
    for segment in file.segments() {
        let addr = segment.address();
        let data = segment
            .data()
            .map_err(|e| SimError::Config(format!("unreadable PT_LOAD segment: {e}")))?;
        target.load_bytes(addr, data);
        let mem_size = segment.size();
        if mem_size > data.len() as u64 {
            let bss_len = (mem_size - data.len() as u64) as usize;
            target.load_bytes(addr + data.len() as u64, &vec![0u8; bss_len]);
        }
    }
    Ok(LoadedElf { entry: file.entry() })
}
