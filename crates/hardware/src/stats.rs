//! Simulation statistics: per-op memory traffic classification and, on
//! the RISC-V side, per-hart instruction mix.
//!
//! Every request the memory interface routes is classified once, at
//! issue time, into one of fifteen buckets (`{load,store,atomic} ×
//! {local-L1SP, remote-L1SP, L2SP, DRAM, remote-PXN}`); this module only
//! holds and prints the counters, the classification itself lives in
//! [`crate::memory::request::classify`].

use std::collections::HashMap;
use std::fmt;

use crate::memory::request::{Locality, OpKind};

/// Per-hart instruction category counts, RISC-V mode only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstMix {
    /// ALU ops (`OP`/`OP_IMM`/`OP_32`/`OP_IMM_32`/`LUI`/`AUIPC`).
    pub alu: u64,
    /// Loads.
    pub load: u64,
    /// Stores and atomics.
    pub store: u64,
    /// Branches and jumps.
    pub branch: u64,
    /// `SYSTEM` (CSR/ECALL/EBREAK).
    pub system: u64,
}

/// All statistics this simulator collects: memory traffic by class and
/// locality, and per-hart instruction mix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimStats {
    /// `counts[(kind, locality)]`, the fifteen traffic buckets.
    counts: HashMap<(OpKind, Locality), u64>,
    /// Number of requests that crossed a PXN boundary; also traced
    /// individually via `tracing` at issue time.
    pub remote_pxn_crossings: u64,
    /// Per-hart instruction mix, RISC-V harts only.
    pub inst_mix: HashMap<u32, InstMix>,
}

impl SimStats {
    /// An empty set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request of the given kind and locality.
    pub fn record(&mut self, kind: OpKind, locality: Locality) {
        *self.counts.entry((kind, locality)).or_insert(0) += 1;
        if locality == Locality::RemotePxn {
            self.remote_pxn_crossings += 1;
        }
    }

    /// The count recorded for one `(kind, locality)` bucket.
    #[must_use]
    pub fn count(&self, kind: OpKind, locality: Locality) -> u64 {
        self.counts.get(&(kind, locality)).copied().unwrap_or(0)
    }

    /// Records one retired instruction's category for `hart`.
    pub fn record_inst(&mut self, hart: u32, f: impl FnOnce(&mut InstMix)) {
        f(self.inst_mix.entry(hart).or_default());
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MEMORY TRAFFIC")?;
        for kind in [OpKind::Load, OpKind::Store, OpKind::Atomic] {
            for locality in [
                Locality::LocalL1sp,
                Locality::RemoteL1sp,
                Locality::L2sp,
                Locality::Dram,
                Locality::RemotePxn,
            ] {
                writeln!(f, "  {kind:?}/{locality:?}: {}", self.count(kind, locality))?;
            }
        }
        writeln!(f, "  remote_pxn_crossings: {}", self.remote_pxn_crossings)?;
        if !self.inst_mix.is_empty() {
            writeln!(f, "INSTRUCTION MIX")?;
            let mut harts: Vec<_> = self.inst_mix.keys().copied().collect();
            harts.sort_unstable();
            for hart in harts {
                let m = self.inst_mix[&hart];
                writeln!(
                    f,
                    "  hart {hart}: alu={} load={} store={} branch={} system={}",
                    m.alu, m.load, m.store, m.branch, m.system
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_increments_the_right_bucket_only() {
        let mut s = SimStats::new();
        s.record(OpKind::Load, Locality::LocalL1sp);
        s.record(OpKind::Load, Locality::LocalL1sp);
        s.record(OpKind::Store, Locality::Dram);
        assert_eq!(s.count(OpKind::Load, Locality::LocalL1sp), 2);
        assert_eq!(s.count(OpKind::Store, Locality::Dram), 1);
        assert_eq!(s.count(OpKind::Atomic, Locality::L2sp), 0);
    }

    #[test]
    fn remote_pxn_crossings_tracked_separately() {
        let mut s = SimStats::new();
        s.record(OpKind::Load, Locality::RemotePxn);
        s.record(OpKind::Atomic, Locality::RemotePxn);
        s.record(OpKind::Load, Locality::LocalL1sp);
        assert_eq!(s.remote_pxn_crossings, 2);
    }

    #[test]
    fn inst_mix_is_per_hart() {
        let mut s = SimStats::new();
        s.record_inst(0, |m| m.alu += 1);
        s.record_inst(1, |m| m.load += 1);
        assert_eq!(s.inst_mix[&0].alu, 1);
        assert_eq!(s.inst_mix[&1].load, 1);
        assert_eq!(s.inst_mix[&0].load, 0);
    }
}
