//! The two hart execution models: native-hosted coroutines and the
//! RV64IM guest interpreter, sharing the instruction cache and
//! [`ThreadState`] machinery.
//!
//! [`ThreadState`]: crate::thread_state::ThreadState

/// Native-hosted coroutine hart.
pub mod coroutine;
/// Tag-indexed, set-associative instruction cache shared by both hart kinds.
pub mod icache;
/// RV64IM guest hart: register file, decoder, CSRs, interpreter.
pub mod riscv;

pub use coroutine::{Context, CoroutineHart, Entry};
pub use icache::ICache;
pub use riscv::{CsrFile, Decoded, RiscvHart, StepEffect};
