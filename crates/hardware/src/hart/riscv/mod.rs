//! The guest RV64IM execution mode: register file, decoder, CSRs, and
//! interpreter for harts that run a loaded ELF binary rather than a
//! native-hosted coroutine.

pub mod csr;
pub mod decode;
pub mod hart;
pub mod interp;
pub mod regs;

pub use csr::CsrFile;
pub use decode::{decode as decode_instruction, Decoded};
pub use hart::RiscvHart;
pub use interp::{complete, step, StepEffect};
