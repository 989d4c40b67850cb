//! Error kinds surfaced by the simulator.
//!
//! The core surfaces exactly the six error kinds enumerated by the system
//! design: configuration problems (fatal at setup), decode faults (fatal to
//! a hart), bad addresses, syscall failures (passed through as a return
//! value, not fatal), response mismatches, and unavailable `ToNative`
//! translations.

use crate::common::addr::AddressInfo;

/// The errors this simulator can raise.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// An unknown or missing configuration parameter, or a topology count
    /// that disagrees with what was actually configured.
    #[error("config error: {0}")]
    Config(String),

    /// A RISC-V instruction word matched no decode pattern.
    #[error("decode fault at pc {pc:#x}: instruction word {word:#010x}")]
    DecodeFault {
        /// Program counter of the faulting instruction.
        pc: u64,
        /// The undecodable instruction word.
        word: u32,
    },

    /// An address decoded to a `(class, pxn, pod)` with no owning
    /// controller.
    #[error("bad address: {0}")]
    BadAddress(AddressInfo),

    /// A host syscall returned `-errno`; passed through as the guest's
    /// return value rather than treated as fatal.
    #[error("syscall failed: {0}")]
    Syscall(#[from] std::io::Error),

    /// A response carried an unknown hart id, or an op kind different from
    /// the hart's in-flight op.
    #[error("response mismatch for hart {hart_id}: {detail}")]
    ResponseMismatch {
        /// The hart id named by the mismatched response.
        hart_id: u32,
        /// What about the response didn't match.
        detail: String,
    },

    /// The address's memory class or backend does not expose a
    /// host-visible pointer; documented limitation, fatal at first use.
    #[error("ToNative unavailable for {0}")]
    ToNativeUnavailable(AddressInfo),
}

/// Convenience alias used throughout the core.
pub type SimResult<T> = Result<T, SimError>;
