//! Control and status registers exposed to guest code: topology
//! identity, the cycle counter, and the hart-sleep request register.
//!
//! Most of these are read-only machine-custom registers (`0xFC0-0xFCA`,
//! the "Machine Custom Read-Only" space) carrying a coordinate or a
//! topology count that the original hardware exposes through inline
//! `csrr` reads rather than a memory-mapped table. Their numeric
//! encodings aren't recoverable from the retained source, except for
//! `MCSR_SLEEP`, which is the one confirmed real encoding.

use crate::common::config::SystemConfig;

/// Standard `mhartid` CSR: this hart's unique id.
pub const MHARTID: u32 = 0xF14;
/// Standard `cycle` CSR: elapsed simulation cycles.
pub const CYCLE: u32 = 0xC00;
/// Confirmed hart-sleep request register: write a cycle count to park
/// this hart for that many ticks.
pub const MCSR_SLEEP: u32 = 0x7A5;

/// This core's id within its pod.
pub const MCSR_MCOREID: u32 = 0xFC0;
/// This core's pod id within its PXN.
pub const MCSR_MPODID: u32 = 0xFC1;
/// This core's PXN id.
pub const MCSR_MPXNID: u32 = 0xFC2;
/// Number of coroutine harts resident on this core.
pub const MCSR_MCOREHARTS: u32 = 0xFC3;
/// Number of PXNs in the fabric.
pub const MCSR_MNUMPXN: u32 = 0xFC4;
/// Number of pods per PXN.
pub const MCSR_MPXNPODS: u32 = 0xFC5;
/// Cores per pod, X dimension.
pub const MCSR_MPODCORESX: u32 = 0xFC6;
/// Cores per pod, Y dimension.
pub const MCSR_MPODCORESY: u32 = 0xFC7;
/// This core's L1 scratchpad size in bytes.
pub const MCSR_MCOREL1SPSIZE: u32 = 0xFC8;
/// This pod's L2 scratchpad size in bytes.
pub const MCSR_MPODL2SPSIZE: u32 = 0xFC9;
/// This PXN's DRAM size in bytes.
pub const MCSR_MPXNDRAMSIZE: u32 = 0xFCA;

/// A hart's CSR file: fixed topology identity plus the sleep register.
#[derive(Debug, Clone, Copy)]
pub struct CsrFile {
    hart_id: u64,
    core_id: u64,
    pod_id: u64,
    pxn_id: u64,
    core_threads: u64,
    num_pxn: u64,
    pxn_pods: u64,
    pod_cores_x: u64,
    pod_cores_y: u64,
    core_l1sp_size: u64,
    pod_l2sp_size: u64,
    pxn_dram_size: u64,
}

impl CsrFile {
    /// Builds the CSR file for a hart at the given coordinates.
    #[must_use]
    pub fn new(hart_id: u64, pxn: u64, pod: u64, core: u64, threads_per_core: u32, sys: &SystemConfig) -> Self {
        Self {
            hart_id,
            core_id: core,
            pod_id: pod,
            pxn_id: pxn,
            core_threads: u64::from(threads_per_core),
            num_pxn: u64::from(sys.num_pxn),
            pxn_pods: u64::from(sys.pods_per_pxn),
            pod_cores_x: u64::from(sys.cores_per_pod_x),
            pod_cores_y: u64::from(sys.cores_per_pod_y),
            core_l1sp_size: sys.l1sp_size as u64,
            pod_l2sp_size: sys.l2sp_size as u64,
            pxn_dram_size: sys.dram_size as u64,
        }
    }

    /// Reads a CSR. `cycle` supplies the live value of the `cycle` CSR.
    /// Returns `None` for an address this file doesn't implement.
    #[must_use]
    pub fn read(&self, addr: u32, cycle: u64) -> Option<u64> {
        Some(match addr {
            MHARTID => self.hart_id,
            CYCLE => cycle,
            MCSR_MCOREID => self.core_id,
            MCSR_MPODID => self.pod_id,
            MCSR_MPXNID => self.pxn_id,
            MCSR_MCOREHARTS => self.core_threads,
            MCSR_MNUMPXN => self.num_pxn,
            MCSR_MPXNPODS => self.pxn_pods,
            MCSR_MPODCORESX => self.pod_cores_x,
            MCSR_MPODCORESY => self.pod_cores_y,
            MCSR_MCOREL1SPSIZE => self.core_l1sp_size,
            MCSR_MPODL2SPSIZE => self.pod_l2sp_size,
            MCSR_MPXNDRAMSIZE => self.pxn_dram_size,
            _ => return None,
        })
    }

    /// Writes a CSR. Only `MCSR_SLEEP` accepts writes, returning the
    /// requested sleep duration in cycles; every other address this file
    /// knows about is read-only and the write is silently dropped (as a
    /// real machine-custom read-only bank would do).
    pub fn write(&mut self, addr: u32, val: u64) -> Option<u64> {
        if addr == MCSR_SLEEP {
            Some(val)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csrs() -> CsrFile {
        let sys = SystemConfig {
            num_pxn: 2,
            pods_per_pxn: 3,
            cores_per_pod_x: 4,
            cores_per_pod_y: 1,
            ..SystemConfig::default()
        };
        CsrFile::new(7, 1, 2, 3, 1, &sys)
    }

    #[test]
    fn identity_csrs_report_coordinates() {
        let c = csrs();
        assert_eq!(c.read(MHARTID, 0), Some(7));
        assert_eq!(c.read(MCSR_MPXNID, 0), Some(1));
        assert_eq!(c.read(MCSR_MPODID, 0), Some(2));
        assert_eq!(c.read(MCSR_MCOREID, 0), Some(3));
        assert_eq!(c.read(MCSR_MNUMPXN, 0), Some(2));
        assert_eq!(c.read(MCSR_MPXNPODS, 0), Some(3));
    }

    #[test]
    fn cycle_reads_the_live_counter() {
        assert_eq!(csrs().read(CYCLE, 12345), Some(12345));
    }

    #[test]
    fn sleep_write_is_the_only_writable_csr() {
        let mut c = csrs();
        assert_eq!(c.write(MCSR_SLEEP, 100), Some(100));
        assert_eq!(c.write(MHARTID, 5), None);
    }

    #[test]
    fn unknown_csr_reads_as_none() {
        assert_eq!(csrs().read(0x999, 0), None);
    }
}
