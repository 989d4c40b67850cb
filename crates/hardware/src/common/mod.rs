//! Common types shared across the simulator: the address codec,
//! configuration, and error types.

/// Tagged physical address encode/decode.
pub mod addr;

/// Simulation configuration, loaded from TOML/JSON or defaulted.
pub mod config;

/// Error types surfaced by the simulator.
pub mod error;

pub use addr::{AddressCodec, AddressInfo, MemoryClass};
pub use config::Config;
pub use error::{SimError, SimResult};
