//! Configuration for the simulated machine.
//!
//! A [`Config`] is the one thing every other module is built from: the
//! topology (`SystemConfig`) sizes the address codec and the core
//! scheduler, `MemoryConfig` selects and parameterizes the memory
//! controller backends, and `CoreConfig` sizes each core's instruction
//! cache and hart count. Configuration loads from TOML (the CLI's native
//! format) or from JSON, or falls back to [`Config::default`].
//!
//! ```
//! use pando_core::common::config::Config;
//!
//! let cfg = Config::from_toml_str(r#"
//!     [system]
//!     num_pxn = 2
//!     pods_per_pxn = 4
//! "#).unwrap();
//! assert_eq!(cfg.system.num_pxn, 2);
//! assert_eq!(cfg.system.cores_per_pod_x, 1); // default
//! ```

use serde::Deserialize;

use crate::common::error::SimError;

/// Default configuration constants for the simulated machine.
mod defaults {
    /// Number of PXNs in the fabric.
    pub const NUM_PXN: u32 = 1;
    /// Pods per PXN.
    pub const PODS_PER_PXN: u32 = 1;
    /// Cores per pod, X dimension.
    pub const CORES_PER_POD_X: u32 = 1;
    /// Cores per pod, Y dimension.
    pub const CORES_PER_POD_Y: u32 = 1;

    /// Per-core L1 scratchpad size in bytes (128 KiB).
    pub const L1SP_SIZE: usize = 131_072;
    /// Per-pod L2 scratchpad size in bytes (16 MiB).
    pub const L2SP_SIZE: usize = 16 * 1024 * 1024;
    /// Number of interleaved banks within a pod's L2 scratchpad.
    pub const L2SP_BANKS: u32 = 1;
    /// Interleave stride across L2 scratchpad banks, in bytes.
    pub const L2SP_INTERLEAVE: u64 = 64;
    /// Per-PXN DRAM size in bytes (1 GiB).
    pub const DRAM_SIZE: usize = 1024 * 1024 * 1024;
    /// Number of DRAM ports (independent interleaved channels) per PXN.
    pub const DRAM_PORTS: u32 = 1;
    /// Interleave stride across DRAM ports, in bytes.
    pub const DRAM_INTERLEAVE: u64 = 64;

    /// Fixed access latency used by the `Simple` memory controller.
    pub const SIMPLE_LATENCY: u64 = 10;
    /// CAS latency in DRAM cycles.
    pub const T_CAS: u64 = 14;
    /// RAS latency in DRAM cycles.
    pub const T_RAS: u64 = 14;
    /// Precharge latency in DRAM cycles.
    pub const T_PRE: u64 = 14;
    /// DRAM row size in bytes, used to derive the row-address mask.
    pub const ROW_SIZE: u64 = 4096;

    /// Resident harts per core.
    pub const THREADS_PER_CORE: u32 = 16;
    /// Number of tag-indexed lines in each core's instruction cache.
    pub const ICACHE_LINES: usize = 64;
    /// Set associativity of the instruction cache.
    pub const ICACHE_ASSOCIATIVITY: usize = 2;
    /// Bytes per instruction cache line.
    pub const ICACHE_LINE_SIZE: usize = 64;
    /// Consecutive idle ticks (no ready hart) before a core power-gates.
    pub const MAX_IDLE_CYCLES: u32 = 1_000_000;
}

/// Which timing model a PXN's DRAM controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MemoryControllerKind {
    /// Fixed-latency controller: every access costs the same.
    #[default]
    Simple,
    /// Row-buffer DRAM model: CAS/RAS/precharge timing, row hit/miss.
    #[serde(alias = "DRAM")]
    Dram,
}

/// Fabric topology: PXN/pod/core counts that size the address codec and
/// the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SystemConfig {
    /// Number of PXNs.
    #[serde(default = "system_defaults::num_pxn")]
    pub num_pxn: u32,
    /// Pods per PXN.
    #[serde(default = "system_defaults::pods_per_pxn")]
    pub pods_per_pxn: u32,
    /// Cores per pod, X dimension.
    #[serde(default = "system_defaults::cores_per_pod_x")]
    pub cores_per_pod_x: u32,
    /// Cores per pod, Y dimension.
    #[serde(default = "system_defaults::cores_per_pod_y")]
    pub cores_per_pod_y: u32,
    /// Per-core L1 scratchpad size in bytes.
    #[serde(default = "system_defaults::l1sp_size")]
    pub l1sp_size: usize,
    /// Per-pod L2 scratchpad size in bytes.
    #[serde(default = "system_defaults::l2sp_size")]
    pub l2sp_size: usize,
    /// Number of interleaved banks within the L2 scratchpad.
    #[serde(default = "system_defaults::l2sp_banks")]
    pub l2sp_banks: u32,
    /// Interleave stride across L2 scratchpad banks, in bytes.
    #[serde(default = "system_defaults::l2sp_interleave")]
    pub l2sp_interleave: u64,
    /// Per-PXN DRAM size in bytes.
    #[serde(default = "system_defaults::dram_size")]
    pub dram_size: usize,
    /// Number of DRAM ports per PXN.
    #[serde(default = "system_defaults::dram_ports")]
    pub dram_ports: u32,
    /// Interleave stride across DRAM ports, in bytes.
    #[serde(default = "system_defaults::dram_interleave")]
    pub dram_interleave: u64,
}

mod system_defaults {
    use super::defaults;
    pub fn num_pxn() -> u32 {
        defaults::NUM_PXN
    }
    pub fn pods_per_pxn() -> u32 {
        defaults::PODS_PER_PXN
    }
    pub fn cores_per_pod_x() -> u32 {
        defaults::CORES_PER_POD_X
    }
    pub fn cores_per_pod_y() -> u32 {
        defaults::CORES_PER_POD_Y
    }
    pub fn l1sp_size() -> usize {
        defaults::L1SP_SIZE
    }
    pub fn l2sp_size() -> usize {
        defaults::L2SP_SIZE
    }
    pub fn l2sp_banks() -> u32 {
        defaults::L2SP_BANKS
    }
    pub fn l2sp_interleave() -> u64 {
        defaults::L2SP_INTERLEAVE
    }
    pub fn dram_size() -> usize {
        defaults::DRAM_SIZE
    }
    pub fn dram_ports() -> u32 {
        defaults::DRAM_PORTS
    }
    pub fn dram_interleave() -> u64 {
        defaults::DRAM_INTERLEAVE
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_pxn: defaults::NUM_PXN,
            pods_per_pxn: defaults::PODS_PER_PXN,
            cores_per_pod_x: defaults::CORES_PER_POD_X,
            cores_per_pod_y: defaults::CORES_PER_POD_Y,
            l1sp_size: defaults::L1SP_SIZE,
            l2sp_size: defaults::L2SP_SIZE,
            l2sp_banks: defaults::L2SP_BANKS,
            l2sp_interleave: defaults::L2SP_INTERLEAVE,
            dram_size: defaults::DRAM_SIZE,
            dram_ports: defaults::DRAM_PORTS,
            dram_interleave: defaults::DRAM_INTERLEAVE,
        }
    }
}

/// Memory controller selection and timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MemoryConfig {
    /// Which controller backend to instantiate per PXN.
    #[serde(default)]
    pub controller: MemoryControllerKind,
    /// Fixed latency used by the `Simple` controller.
    #[serde(default = "memory_defaults::simple_latency")]
    pub simple_latency: u64,
    /// CAS latency used by the `Dram` controller.
    #[serde(default = "memory_defaults::t_cas")]
    pub t_cas: u64,
    /// RAS latency used by the `Dram` controller.
    #[serde(default = "memory_defaults::t_ras")]
    pub t_ras: u64,
    /// Precharge latency used by the `Dram` controller.
    #[serde(default = "memory_defaults::t_pre")]
    pub t_pre: u64,
    /// Row size in bytes, used to derive the row-address mask.
    #[serde(default = "memory_defaults::row_size")]
    pub row_size: u64,
}

mod memory_defaults {
    use super::defaults;
    pub fn simple_latency() -> u64 {
        defaults::SIMPLE_LATENCY
    }
    pub fn t_cas() -> u64 {
        defaults::T_CAS
    }
    pub fn t_ras() -> u64 {
        defaults::T_RAS
    }
    pub fn t_pre() -> u64 {
        defaults::T_PRE
    }
    pub fn row_size() -> u64 {
        defaults::ROW_SIZE
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            controller: MemoryControllerKind::default(),
            simple_latency: defaults::SIMPLE_LATENCY,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
            row_size: defaults::ROW_SIZE,
        }
    }
}

/// Per-core sizing: resident hart count and instruction cache shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CoreConfig {
    /// Number of coroutine harts resident on each core.
    #[serde(default = "core_defaults::threads_per_core")]
    pub threads_per_core: u32,
    /// Number of tag-indexed lines in the instruction cache.
    #[serde(default = "core_defaults::icache_lines")]
    pub icache_lines: usize,
    /// Set associativity of the instruction cache.
    #[serde(default = "core_defaults::icache_associativity")]
    pub icache_associativity: usize,
    /// Bytes per instruction cache line.
    #[serde(default = "core_defaults::icache_line_size")]
    pub icache_line_size: usize,
    /// Consecutive idle ticks (no ready hart) before a core power-gates.
    #[serde(default = "core_defaults::max_idle_cycles")]
    pub max_idle_cycles: u32,
}

mod core_defaults {
    use super::defaults;
    pub fn threads_per_core() -> u32 {
        defaults::THREADS_PER_CORE
    }
    pub fn icache_lines() -> usize {
        defaults::ICACHE_LINES
    }
    pub fn icache_associativity() -> usize {
        defaults::ICACHE_ASSOCIATIVITY
    }
    pub fn max_idle_cycles() -> u32 {
        defaults::MAX_IDLE_CYCLES
    }
    pub fn icache_line_size() -> usize {
        defaults::ICACHE_LINE_SIZE
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            threads_per_core: defaults::THREADS_PER_CORE,
            icache_lines: defaults::ICACHE_LINES,
            icache_associativity: defaults::ICACHE_ASSOCIATIVITY,
            icache_line_size: defaults::ICACHE_LINE_SIZE,
            max_idle_cycles: defaults::MAX_IDLE_CYCLES,
        }
    }
}

/// Top-level configuration for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct Config {
    /// Fabric topology.
    #[serde(default)]
    pub system: SystemConfig,
    /// Memory controller selection and timing.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Per-core sizing.
    #[serde(default)]
    pub core: CoreConfig,
}

impl Config {
    /// Parses a TOML configuration document, filling in defaults for any
    /// field (or whole table) the document omits.
    pub fn from_toml_str(text: &str) -> Result<Self, SimError> {
        toml::from_str(text).map_err(|e| SimError::Config(e.to_string()))
    }

    /// Parses a JSON configuration document, filling in defaults for any
    /// field (or whole object) the document omits.
    pub fn from_json_str(text: &str) -> Result<Self, SimError> {
        serde_json::from_str(text).map_err(|e| SimError::Config(e.to_string()))
    }

    /// Loads configuration from a file, dispatching on its extension
    /// (`.toml` or `.json`); any other extension is a config error.
    pub fn from_path(path: &std::path::Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("reading {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("json") => Self::from_json_str(&text),
            other => Err(SimError::Config(format!(
                "unrecognized config extension: {other:?}"
            ))),
        }
    }
}
