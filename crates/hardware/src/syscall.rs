//! Host syscall bridge: the guest ECALLs a RISC-V hart can make that need
//! host I/O (`BRK`/`WRITE`/`READ`/`OPEN`/`FSTAT`/`CLOSE`; `EXIT` never
//! reaches this module — [`crate::hart::riscv::interp::step`] handles it
//! directly since it never touches host I/O).
//!
//! Guest buffers live in simulated memory, so every syscall that touches
//! one round-trips through the owning core's [`MemoryInterface`] first.
//! That round trip completes synchronously within the same tick that
//! issued the `ecall` — see `DESIGN.md`'s syscall-bridge entry for why
//! the full per-chunk suspend/resume protocol buys nothing here.

use std::ffi::CStr;

use crate::common::error::{SimError, SimResult};
use crate::hart::riscv::hart::RiscvHart;
use crate::memory::{MemoryInterface, Request};
use crate::thread_state::{MemOp, Width};

const SYS_CLOSE: u64 = 57;
const SYS_OPENAT: u64 = 56;
const SYS_READ: u64 = 63;
const SYS_WRITE: u64 = 64;
const SYS_FSTAT: u64 = 80;
const SYS_BRK: u64 = 214;

/// `AT_FDCWD`: relative paths resolve against the host process's own
/// working directory, since this simulator has no guest filesystem.
const AT_FDCWD: i32 = -100;

/// Longest guest path `OPEN` will read looking for a NUL terminator.
const MAX_PATH_LEN: usize = 4096;

/// Translates the bridge's guest ECALLs into host file operations.
#[derive(Debug, Default)]
pub struct SyscallBridge;

impl SyscallBridge {
    /// A fresh bridge; it holds no state of its own beyond what the host
    /// OS tracks for the file descriptors it hands back.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Dispatches one `ecall` other than `exit`: reads the syscall number
    /// from `a7`, its arguments from `a0..a2`, performs the host
    /// operation, writes the result into `a0`, and advances `pc`. `coords`
    /// is the issuing hart's own coordinates; ECALL buffers always live in
    /// the calling hart's own address space.
    pub fn dispatch(&self, hart: &mut RiscvHart, mem: &mut MemoryInterface, coords: (u64, u64, u64)) -> SimResult<()> {
        let num = hart.regs.read(17);
        let result = match num {
            SYS_BRK => -1i64,
            SYS_WRITE => self.sys_write(hart, mem, coords)?,
            SYS_READ => self.sys_read(hart, mem, coords)?,
            SYS_OPENAT => self.sys_open(hart, mem, coords)?,
            SYS_FSTAT => self.sys_fstat(hart, mem, coords)?,
            SYS_CLOSE => self.sys_close(hart),
            other => return Err(SimError::Config(format!("unknown ECALL number {other}"))),
        };
        hart.regs.write(10, result as u64);
        hart.pc += 4;
        Ok(())
    }

    fn sys_write(&self, hart: &RiscvHart, mem: &mut MemoryInterface, coords: (u64, u64, u64)) -> SimResult<i64> {
        let fd = hart.regs.read(10) as i32;
        let addr = hart.regs.read(11);
        let len = hart.regs.read(12) as usize;
        let data = read_guest_bytes(hart, mem, coords, addr, len)?;
        // SAFETY: `data` is a valid, fully-initialized buffer of `len` bytes.
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        Ok(n as i64)
    }

    fn sys_read(&self, hart: &RiscvHart, mem: &mut MemoryInterface, coords: (u64, u64, u64)) -> SimResult<i64> {
        let fd = hart.regs.read(10) as i32;
        let addr = hart.regs.read(11);
        let len = hart.regs.read(12) as usize;
        let mut data = vec![0u8; len];
        // SAFETY: `data` has `len` bytes of writable capacity.
        let n = unsafe { libc::read(fd, data.as_mut_ptr().cast(), data.len()) };
        if n > 0 {
            write_guest_bytes(hart, mem, coords, addr, &data[..n as usize])?;
        }
        Ok(n as i64)
    }

    fn sys_open(&self, hart: &RiscvHart, mem: &mut MemoryInterface, coords: (u64, u64, u64)) -> SimResult<i64> {
        let path_addr = hart.regs.read(10);
        let guest_flags = hart.regs.read(11) as i32;
        let raw = read_guest_bytes(hart, mem, coords, path_addr, MAX_PATH_LEN)?;
        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| SimError::Config("OPEN: guest path has no NUL terminator".to_string()))?;
        let path = CStr::from_bytes_with_nul(&raw[..=nul]).map_err(|e| SimError::Config(format!("OPEN: {e}")))?;
        let flags = host_open_flags(guest_flags);
        // SAFETY: `path` is a valid, NUL-terminated C string.
        let fd = unsafe { libc::openat(AT_FDCWD, path.as_ptr(), flags, 0o644u32) };
        Ok(fd as i64)
    }

    fn sys_fstat(&self, hart: &RiscvHart, mem: &mut MemoryInterface, coords: (u64, u64, u64)) -> SimResult<i64> {
        let fd = hart.regs.read(10) as i32;
        let stat_buf = hart.regs.read(11);
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `st` is a valid, writable `libc::stat` for the duration of the call.
        let r = unsafe { libc::fstat(fd, &raw mut st) };
        if r == 0 {
            write_guest_bytes(hart, mem, coords, stat_buf, &guest_stat_bytes(&st))?;
        }
        Ok(i64::from(r))
    }

    fn sys_close(&self, hart: &RiscvHart) -> i64 {
        let fd = hart.regs.read(10) as i32;
        if matches!(fd, 0 | 1 | 2) {
            return 0;
        }
        // SAFETY: `fd` is a plain integer; `close` is safe to call on any value,
        // failing with `EBADF` if it doesn't name an open descriptor.
        i64::from(unsafe { libc::close(fd) })
    }
}

/// Reads `len` bytes starting at the guest's own-relative `addr`, one byte
/// at a time through the memory interface (no real host round-trip
/// latency exists to amortize by batching).
fn read_guest_bytes(
    hart: &RiscvHart,
    mem: &mut MemoryInterface,
    coords: (u64, u64, u64),
    addr: u64,
    len: usize,
) -> SimResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    for i in 0..len as u64 {
        let abs = hart.codec.to_absolute(addr.wrapping_add(i));
        let op = MemOp::Read { address: abs, width: Width::Byte };
        let (_, resp) = mem.issue(Request { hart: hart.id as u32, op }, coords)?;
        out.push(resp.value as u8);
    }
    Ok(out)
}

/// Writes `data` starting at the guest's own-relative `addr`.
fn write_guest_bytes(
    hart: &RiscvHart,
    mem: &mut MemoryInterface,
    coords: (u64, u64, u64),
    addr: u64,
    data: &[u8],
) -> SimResult<()> {
    for (i, &byte) in data.iter().enumerate() {
        let abs = hart.codec.to_absolute(addr.wrapping_add(i as u64));
        let op = MemOp::Write { address: abs, width: Width::Byte, value: u64::from(byte) };
        let _ = mem.issue(Request { hart: hart.id as u32, op }, coords)?;
    }
    Ok(())
}

/// Translates the guest's `O_*` encoding to the host's. On Linux these
/// bit patterns already coincide for every architecture this simulator
/// targets, but the translation is explicit so the bridge doesn't rely
/// on that coincidence.
fn host_open_flags(guest: i32) -> i32 {
    const O_CREAT: i32 = 0o100;
    const O_EXCL: i32 = 0o200;
    const O_TRUNC: i32 = 0o1000;
    const O_APPEND: i32 = 0o2000;

    let mut flags = match guest & 0o3 {
        0o1 => libc::O_WRONLY,
        0o2 => libc::O_RDWR,
        _ => libc::O_RDONLY,
    };
    if guest & O_CREAT != 0 {
        flags |= libc::O_CREAT;
    }
    if guest & O_EXCL != 0 {
        flags |= libc::O_EXCL;
    }
    if guest & O_TRUNC != 0 {
        flags |= libc::O_TRUNC;
    }
    if guest & O_APPEND != 0 {
        flags |= libc::O_APPEND;
    }
    flags
}

/// Re-lays-out a host `stat` into the 128-byte `struct stat` RV64 Linux
/// guests expect (the generic `asm-generic/stat.h` layout).
fn guest_stat_bytes(st: &libc::stat) -> [u8; 128] {
    let mut buf = [0u8; 128];
    buf[0..8].copy_from_slice(&(st.st_dev as u64).to_le_bytes());
    buf[8..16].copy_from_slice(&(st.st_ino as u64).to_le_bytes());
    buf[16..20].copy_from_slice(&(st.st_mode).to_le_bytes());
    buf[20..24].copy_from_slice(&(st.st_nlink as u32).to_le_bytes());
    buf[24..28].copy_from_slice(&(st.st_uid).to_le_bytes());
    buf[28..32].copy_from_slice(&(st.st_gid).to_le_bytes());
    buf[32..40].copy_from_slice(&(st.st_rdev as u64).to_le_bytes());
    buf[48..56].copy_from_slice(&(st.st_size as u64).to_le_bytes());
    buf[56..60].copy_from_slice(&(st.st_blksize as u32).to_le_bytes());
    buf[64..72].copy_from_slice(&(st.st_blocks as u64).to_le_bytes());
    buf[72..80].copy_from_slice(&(st.st_atime as u64).to_le_bytes());
    buf[80..88].copy_from_slice(&(st.st_atime_nsec as u64).to_le_bytes());
    buf[88..96].copy_from_slice(&(st.st_mtime as u64).to_le_bytes());
    buf[96..104].copy_from_slice(&(st.st_mtime_nsec as u64).to_le_bytes());
    buf[104..112].copy_from_slice(&(st.st_ctime as u64).to_le_bytes());
    buf[112..120].copy_from_slice(&(st.st_ctime_nsec as u64).to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::addr::AddressCodec;
    use crate::common::config::Config;
    use crate::hart::icache::ICache;
    use crate::hart::riscv::csr::CsrFile;

    fn hart_and_mem() -> (RiscvHart, MemoryInterface) {
        let cfg = Config::default();
        let codec = AddressCodec::new(0, 0, 0, &cfg.system);
        let csrs = CsrFile::new(0, 0, 0, 0, 1, &cfg.system);
        let icache = ICache::new(64, 2, 64);
        let mut hart = RiscvHart::new(0, csrs, codec, icache);
        hart.release_reset(0);
        (hart, MemoryInterface::new(&cfg))
    }

    #[test]
    fn brk_always_returns_minus_one() {
        let (mut hart, mut mem) = hart_and_mem();
        let bridge = SyscallBridge::new();
        hart.regs.write(17, SYS_BRK);
        hart.regs.write(10, 0x5000);
        bridge.dispatch(&mut hart, &mut mem, (0, 0, 0)).unwrap();
        assert_eq!(hart.regs.read(10) as i64, -1);
        assert_eq!(hart.pc, 4);
    }

    #[test]
    fn close_of_stdio_is_always_ok_without_touching_the_host() {
        let (mut hart, mut mem) = hart_and_mem();
        let bridge = SyscallBridge::new();
        hart.regs.write(17, SYS_CLOSE);
        hart.regs.write(10, 1);
        bridge.dispatch(&mut hart, &mut mem, (0, 0, 0)).unwrap();
        assert_eq!(hart.regs.read(10), 0);
    }

    #[test]
    fn write_reads_the_guest_buffer_and_calls_host_write() {
        let (mut hart, mut mem) = hart_and_mem();
        let codec = AddressCodec::new(0, 0, 0, &Config::default().system);
        let abs = codec.to_absolute(0x100);
        for (i, byte) in b"hi\n".iter().enumerate() {
            let op = MemOp::Write { address: abs + i as u64, width: Width::Byte, value: u64::from(*byte) };
            let _ = mem.issue(Request { hart: 0, op }, (0, 0, 0)).unwrap();
        }
        let bridge = SyscallBridge::new();
        hart.regs.write(17, SYS_WRITE);
        hart.regs.write(10, 1); // stdout
        hart.regs.write(11, 0x100);
        hart.regs.write(12, 3);
        bridge.dispatch(&mut hart, &mut mem, (0, 0, 0)).unwrap();
        assert_eq!(hart.regs.read(10) as i64, 3);
    }

    #[test]
    fn open_flags_translate_create_and_truncate() {
        let flags = host_open_flags(0o1 | 0o100 | 0o1000);
        assert_ne!(flags & libc::O_WRONLY, 0);
        assert_ne!(flags & libc::O_CREAT, 0);
        assert_ne!(flags & libc::O_TRUNC, 0);
    }
}
