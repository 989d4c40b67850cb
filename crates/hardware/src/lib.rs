//! PANDO fabric simulator library.
//!
//! This crate implements a hierarchical many-core accelerator simulator:
//! 1. **Common:** the tagged physical address codec, configuration, and
//!    error types every other module builds on.
//! 2. **Thread state:** the closed set of states a coroutine hart
//!    suspends in between resumptions.
//! 3. **Hart:** native-hosted coroutine harts and the RV64IM interpreter
//!    harts, each with their own instruction cache.
//! 4. **Memory:** the request/response protocol, per-op statistics, and
//!    the controller backends (fixed-latency and DRAM row-buffer).
//! 5. **Scheduler:** per-core round-robin hart selection and power-gating.
//! 6. **Syscall:** the bridge from guest syscalls to host I/O.
//! 7. **Sim:** the event queue, ELF loader, and topology builder that tie
//!    everything together into a runnable machine.
//! 8. **Console:** the on-chip MMIO print ports, a synchronous side
//!    effect of a store rather than a routed memory request.
//!
//! All eight modules are implemented.

/// Common types and constants (address codec, configuration, errors).
pub mod common;
/// On-chip console MMIO print ports.
pub mod console;
/// Coroutine and RV64IM hart execution models, and the shared i-cache.
pub mod hart;
/// The request/response protocol, controller backends, and traffic stats.
pub mod memory;
/// Per-core round-robin hart selection and power-gating.
pub mod scheduler;
/// The out-of-scope DES kernel's interface, and the ELF loader.
pub mod sim;
/// Traffic and instruction-mix statistics.
pub mod stats;
/// Translates guest ECALLs into host file operations.
pub mod syscall;
/// The closed set of states a coroutine hart suspends in.
pub mod thread_state;

pub use crate::common::{AddressCodec, AddressInfo, Config, MemoryClass, SimError, SimResult};
pub use crate::console::{Console, StdoutConsole};
pub use crate::hart::{CoroutineHart, RiscvHart};
pub use crate::memory::{MemoryInterface, Request, Response};
pub use crate::scheduler::{Core, Lane};
pub use crate::sim::event::{Event, EventQueue, SimTransport};
pub use crate::sim::loader::{load_elf, LoadTarget, LoadedElf};
pub use crate::sim::topology::Simulator;
pub use crate::stats::SimStats;
pub use crate::syscall::SyscallBridge;
