//! Routes [`Request`]s to the right backing, charges latency, applies
//! the op, and classifies traffic for statistics.
//!
//! Backings are created lazily, one per `(class, coordinates)` the
//! first time something addresses them — the full PXN/pod/core topology
//! is built one layer up (`sim::topology`); this module only needs to
//! know the system's sizing, not which coordinates actually exist.

use std::collections::HashMap;

use tracing::trace;

use crate::common::addr::{AddressCodec, AddressInfo, MemoryClass};
use crate::common::config::{Config, MemoryConfig, MemoryControllerKind, SystemConfig};
use crate::common::error::{SimError, SimResult};
use crate::memory::controller::{Backing, DramController, MemoryController, SimpleController};
use crate::memory::request::{classify, is_noncacheable, mem_op_kind, Locality, OpKind, Request, Response};
use crate::stats::SimStats;
use crate::thread_state::{AtomicOp, MemOp, Width};

type Coords = (u64, u64, u64);

struct Bank {
    backing: Backing,
    controller: Box<dyn MemoryController>,
}

impl Bank {
    fn new(size: usize, cfg: &MemoryConfig) -> Self {
        let controller: Box<dyn MemoryController> = match cfg.controller {
            MemoryControllerKind::Simple => Box::new(SimpleController::new(cfg.simple_latency)),
            MemoryControllerKind::Dram => {
                Box::new(DramController::new(cfg.t_cas, cfg.t_ras, cfg.t_pre, cfg.row_size))
            }
        };
        Self { backing: Backing::new(size), controller }
    }
}

/// Owns every memory backing the fabric can address, and the controller
/// timing model each one uses.
pub struct MemoryInterface {
    sys: SystemConfig,
    mem: MemoryConfig,
    l1sp: HashMap<Coords, Bank>,
    l2sp: HashMap<(u64, u64), Bank>,
    dram: HashMap<u64, Bank>,
    ctrl: HashMap<Coords, Backing>,
    /// Collected traffic and instruction-mix statistics.
    pub stats: SimStats,
}

impl std::fmt::Debug for MemoryInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryInterface")
            .field("sys", &self.sys)
            .field("mem", &self.mem)
            .field("l1sp_banks", &self.l1sp.len())
            .field("l2sp_banks", &self.l2sp.len())
            .field("dram_banks", &self.dram.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl MemoryInterface {
    /// Builds an interface over an empty fabric: no backing exists until
    /// something addresses it.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            sys: config.system,
            mem: config.memory,
            l1sp: HashMap::new(),
            l2sp: HashMap::new(),
            dram: HashMap::new(),
            ctrl: HashMap::new(),
            stats: SimStats::new(),
        }
    }

    fn l1sp_bank(&mut self, coords: Coords) -> &mut Bank {
        let size = self.sys.l1sp_size;
        let mem = self.mem;
        self.l1sp.entry(coords).or_insert_with(|| Bank::new(size, &mem))
    }

    fn l2sp_bank(&mut self, pxn: u64, pod: u64) -> &mut Bank {
        let size = self.sys.l2sp_size;
        let mem = self.mem;
        self.l2sp.entry((pxn, pod)).or_insert_with(|| Bank::new(size, &mem))
    }

    fn dram_bank(&mut self, pxn: u64) -> &mut Bank {
        let size = self.sys.dram_size;
        let mem = self.mem;
        self.dram.entry(pxn).or_insert_with(|| Bank::new(size, &mem))
    }

    fn ctrl_backing(&mut self, coords: Coords) -> &mut Backing {
        // Large enough for a reset word plus headroom; this is the one
        // MMIO word this region actually decodes (see DESIGN.md's
        // console-ports-vs-reset note).
        self.ctrl.entry(coords).or_insert_with(|| Backing::new(64))
    }

    /// Reads this core's reset control word (offset `0x000` of its
    /// `ctrl_base`). `0` means harts should run; nonzero means held in
    /// reset. Cores that have never been addressed read as held in
    /// reset, matching hardware that powers up reset-asserted.
    #[must_use]
    pub fn ctrl_reset_word(&self, coords: Coords) -> u64 {
        self.ctrl.get(&coords).map_or(1, |b| b.read(0, Width::Double))
    }

    /// Routes one request: decodes `request.op`'s address relative to
    /// `origin`'s coordinates, applies the op against the right backing,
    /// classifies the traffic, and returns `(latency_cycles, response)`.
    pub fn issue(&mut self, request: Request, origin: Coords) -> SimResult<(u64, Response)> {
        let codec = AddressCodec::new(origin.0, origin.1, origin.2, &self.sys);
        let address = op_address(&request.op);
        let info = codec.decode(address);
        let target = (info.pxn, info.pod, info.core);
        let locality = classify(info.class, origin, target);
        if locality == Locality::RemotePxn {
            trace!(hart = request.hart, pxn = info.pxn, class = %info.class, "remote-PXN traffic");
        }

        let (latency, value) = self.apply(&request.op, &info)?;

        let kind = mem_op_kind(&request.op);
        if matches!(kind, OpKind::Load | OpKind::Store | OpKind::Atomic) {
            self.stats.record(kind, locality);
        }
        let non_cacheable = is_noncacheable(info.class);

        Ok((latency, Response { hart: request.hart, value, kind, non_cacheable }))
    }

    fn apply(&mut self, op: &MemOp, info: &AddressInfo) -> SimResult<(u64, u64)> {
        if info.class == MemoryClass::Ctrl {
            return self.apply_ctrl(op, info);
        }
        match *op {
            MemOp::Read { width, .. } => {
                let bank = self.bank_for(info)?;
                let latency = bank.controller.access_latency(info.offset);
                Ok((latency, bank.backing.read(info.offset, width)))
            }
            MemOp::Write { width, value, .. } => {
                let bank = self.bank_for(info)?;
                let latency = bank.controller.access_latency(info.offset);
                bank.backing.write(info.offset, width, value);
                Ok((latency, 0))
            }
            MemOp::Atomic { width, op, operand, .. } => {
                let bank = self.bank_for(info)?;
                let latency = bank.controller.access_latency(info.offset);
                let previous = bank.backing.read(info.offset, width);
                let new = match op {
                    AtomicOp::Swap => operand,
                    AtomicOp::Add => previous.wrapping_add(operand),
                };
                bank.backing.write(info.offset, width, new);
                Ok((latency, previous))
            }
            MemOp::FlushLine { .. } | MemOp::InvLine { .. } => {
                // No in-core cache is modeled (Non-goal); these still cost
                // a controller round trip since they touch the backing.
                let bank = self.bank_for(info)?;
                Ok((bank.controller.access_latency(info.offset), 0))
            }
            MemOp::ToNative { .. } => self.to_native(info),
        }
    }

    fn apply_ctrl(&mut self, op: &MemOp, info: &AddressInfo) -> SimResult<(u64, u64)> {
        let coords = (info.pxn, info.pod, info.core);
        match *op {
            MemOp::Read { width, .. } => {
                let value = self.ctrl_backing(coords).read(info.offset, width);
                Ok((self.mem.simple_latency, value))
            }
            MemOp::Write { width, value, .. } => {
                self.ctrl_backing(coords).write(info.offset, width, value);
                Ok((self.mem.simple_latency, 0))
            }
            MemOp::Atomic { .. } | MemOp::FlushLine { .. } | MemOp::InvLine { .. } | MemOp::ToNative { .. } => {
                Err(SimError::BadAddress(*info))
            }
        }
    }

    fn bank_for(&mut self, info: &AddressInfo) -> SimResult<&mut Bank> {
        match info.class {
            MemoryClass::L1sp => Ok(self.l1sp_bank((info.pxn, info.pod, info.core))),
            MemoryClass::L2sp => Ok(self.l2sp_bank(info.pxn, info.pod)),
            MemoryClass::Dram => Ok(self.dram_bank(info.pxn)),
            MemoryClass::Ctrl => Err(SimError::BadAddress(*info)),
        }
    }

    /// Resolves `info` to a host-visible pointer, charging the backing's
    /// normal access latency. The pointer is guaranteed valid for at
    /// least one byte; [`SimError::ToNativeUnavailable`] if the offset
    /// falls exactly at the end of its stripe or its backing.
    fn to_native(&mut self, info: &AddressInfo) -> SimResult<(u64, u64)> {
        let stride: u64 = match info.class {
            MemoryClass::L2sp => self.sys.l2sp_interleave,
            MemoryClass::Dram => self.sys.dram_interleave,
            MemoryClass::L1sp | MemoryClass::Ctrl => u64::MAX,
        }
        .max(1);
        let remaining_in_stripe = stride - info.offset % stride;

        let bank = self.bank_for(info)?;
        let latency = bank.controller.access_latency(info.offset);
        let remaining_in_backing = bank.backing.bytes_remaining(info.offset);
        if remaining_in_stripe.min(remaining_in_backing) == 0 {
            return Err(SimError::ToNativeUnavailable(*info));
        }
        let ptr = bank.backing.as_mut_ptr(info.offset).ok_or(SimError::ToNativeUnavailable(*info))?;
        Ok((latency, ptr as u64))
    }
}

fn op_address(op: &MemOp) -> u64 {
    match *op {
        MemOp::Read { address, .. }
        | MemOp::Write { address, .. }
        | MemOp::Atomic { address, .. }
        | MemOp::FlushLine { address, .. }
        | MemOp::InvLine { address }
        | MemOp::ToNative { address } => address,
    }
}
