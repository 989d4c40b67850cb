//! Builds and drives a complete machine: a
//! [`MemoryInterface`](crate::memory::interface::MemoryInterface) shared
//! by every core, plus one [`Core`](crate::scheduler::Core) per
//! populated `(pxn, pod, core)` coordinate, each with its own event
//! queue.
//!
//! Events never cross a core boundary — a core's
//! [`Core::tick`](crate::scheduler::Core::tick) drains only the events
//! its own lanes scheduled — so each core gets its own
//! [`EventQueue`](crate::sim::event::EventQueue) rather than sharing one
//! with the rest of the machine. The memory interface is the one thing
//! that *is* shared: it is where cross-core traffic (a PXN-0 core
//! writing a PXN-1 core's DRAM, or releasing another core's reset)
//! actually happens.

use crate::common::addr::{AddressCodec, AddressInfo, MemoryClass};
use crate::common::config::{Config, CoreConfig, SystemConfig};
use crate::common::error::{SimError, SimResult};
use crate::hart::coroutine::{CoroutineHart, Entry};
use crate::hart::icache::ICache;
use crate::hart::riscv::csr::CsrFile;
use crate::hart::riscv::hart::RiscvHart;
use crate::memory::controller::Backing;
use crate::memory::interface::MemoryInterface;
use crate::scheduler::{Core, Lane};
use crate::sim::event::EventQueue;
use crate::sim::loader;
use crate::stats::SimStats;

struct Slot {
    coords: (u64, u64, u64),
    core: Core,
    transport: EventQueue,
    /// Cycle at which this core's reset auto-releases; `None` means it
    /// stays held until something else writes its reset MMIO word.
    release_at: Option<u64>,
    released: bool,
}

/// A complete, runnable machine: the fabric's memory plus every core
/// populated onto it.
pub struct Simulator {
    sys: SystemConfig,
    core_cfg: CoreConfig,
    mem: MemoryInterface,
    slots: Vec<Slot>,
    cycle: u64,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("cycle", &self.cycle)
            .field("cores", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Builds an empty machine sized by `config`; cores are added with
    /// [`Simulator::add_riscv_core`]/[`Simulator::add_coroutine_core`].
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self { sys: config.system, core_cfg: config.core, mem: MemoryInterface::new(config), slots: Vec::new(), cycle: 0 }
    }

    fn check_coords(&self, coords: (u64, u64, u64)) -> SimResult<()> {
        let (pxn, pod, core) = coords;
        let cores_per_pod = u64::from(self.sys.cores_per_pod_x) * u64::from(self.sys.cores_per_pod_y);
        if pxn >= u64::from(self.sys.num_pxn) || pod >= u64::from(self.sys.pods_per_pxn) || core >= cores_per_pod {
            return Err(SimError::Config(format!(
                "core ({pxn}, {pod}, {core}) is outside the configured topology"
            )));
        }
        if self.slots.iter().any(|s| s.coords == coords) {
            return Err(SimError::Config(format!("core ({pxn}, {pod}, {core}) already populated")));
        }
        Ok(())
    }

    /// Populates `coords` with a RISC-V core running `program` (a parsed
    /// ELF64 image) on `num_harts` resident harts, all sharing the same
    /// program image and boot PC. `release_at`, if set, auto-releases
    /// this core's reset at that cycle; otherwise it stays held until a
    /// write to its reset MMIO word (from any core, including itself).
    pub fn add_riscv_core(
        &mut self,
        coords: (u64, u64, u64),
        program: &[u8],
        num_harts: u32,
        release_at: Option<u64>,
    ) -> SimResult<()> {
        self.check_coords(coords)?;
        let (pxn, pod, core) = coords;
        let needed = loader::required_size(program)?;
        let size = needed.max(self.sys.l1sp_size as u64) as usize;
        let mut code = Backing::new(size);
        let loaded = loader::load_elf(program, &mut code)?;

        let lanes = (0..num_harts)
            .map(|hart| {
                let codec = AddressCodec::new(pxn, pod, core, &self.sys);
                let csrs = CsrFile::new(u64::from(hart), pxn, pod, core, self.core_cfg.threads_per_core, &self.sys);
                let icache = ICache::new(self.core_cfg.icache_lines, self.core_cfg.icache_associativity, self.core_cfg.icache_line_size);
                Lane::Riscv(RiscvHart::new(u64::from(hart), csrs, codec, icache))
            })
            .collect();

        let core_obj = Core::new(coords, self.sys, lanes, code, loaded.entry, self.core_cfg.max_idle_cycles);
        self.slots.push(Slot { coords, core: core_obj, transport: EventQueue::new(), release_at, released: false });
        Ok(())
    }

    /// Populates `coords` with a native-hosted core: one coroutine hart
    /// per entry point in `entries`, each started at the same `(argc,
    /// argv)`.
    pub fn add_coroutine_core(
        &mut self,
        coords: (u64, u64, u64),
        entries: Vec<(i32, Vec<u64>, Box<Entry>)>,
        release_at: Option<u64>,
    ) -> SimResult<()> {
        self.check_coords(coords)?;
        let lanes = entries
            .into_iter()
            .enumerate()
            .map(|(id, (argc, argv, entry))| Lane::Coroutine(CoroutineHart::new(id as u64, argc, argv, entry)))
            .collect();
        let core_obj = Core::new(coords, self.sys, lanes, Backing::new(0), 0, self.core_cfg.max_idle_cycles);
        self.slots.push(Slot { coords, core: core_obj, transport: EventQueue::new(), release_at, released: false });
        Ok(())
    }

    /// Writes `0` to `coords`'s reset MMIO word, releasing that core on
    /// the next tick — the same mechanism a running hart uses to bring
    /// up a neighbor (`original_source`'s release-from-reset scenario).
    pub fn release_core_reset(&mut self, coords: (u64, u64, u64)) -> SimResult<()> {
        let codec = AddressCodec::new(coords.0, coords.1, coords.2, &self.sys);
        let address = codec.encode(&AddressInfo {
            absolute: true,
            class: MemoryClass::Ctrl,
            pxn: coords.0,
            pod: coords.1,
            core: coords.2,
            offset: 0,
        });
        let op = crate::thread_state::MemOp::Write { address, width: crate::thread_state::Width::Double, value: 0 };
        let _ = self.mem.issue(crate::memory::request::Request { hart: 0, op }, coords)?;
        Ok(())
    }

    /// Advances every populated core by one clock tick, applying any
    /// `release_at` auto-releases first.
    pub fn tick(&mut self) -> SimResult<()> {
        for slot in &mut self.slots {
            if !slot.released && slot.release_at == Some(self.cycle) {
                slot.core.release_reset(&mut self.mem)?;
                slot.released = true;
            }
        }
        for slot in &mut self.slots {
            slot.core.tick(self.cycle, &mut self.mem, &mut slot.transport)?;
        }
        self.cycle += 1;
        Ok(())
    }

    /// Ticks the machine until every populated core has terminated or
    /// `max_cycles` elapses, returning the number of cycles actually run.
    pub fn run(&mut self, max_cycles: u64) -> SimResult<u64> {
        let mut ran = 0;
        while ran < max_cycles && !self.all_done() {
            self.tick()?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Whether every populated core has had every resident hart
    /// terminate.
    #[must_use]
    pub fn all_done(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| s.core.all_done())
    }

    /// Per-hart exit codes, grouped by core in population order.
    #[must_use]
    pub fn exit_codes(&self) -> Vec<((u64, u64, u64), &[Option<i32>])> {
        self.slots.iter().map(|s| (s.coords, s.core.exit_codes())).collect()
    }

    /// Collected traffic and instruction-mix statistics.
    #[must_use]
    pub fn stats(&self) -> &SimStats {
        &self.mem.stats
    }

    /// The current simulated cycle.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_elf(entry: u64, instrs: &[u32]) -> Vec<u8> {
        const EHSIZE: u16 = 64;
        const PHSIZE: u16 = 56;
        let code: Vec<u8> = instrs.iter().flat_map(|w| w.to_le_bytes()).collect();

        let mut buf = vec![0u8; EHSIZE as usize + PHSIZE as usize];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 2;
        buf[5] = 1;
        buf[6] = 1;
        buf[16..18].copy_from_slice(&2u16.to_le_bytes());
        buf[18..20].copy_from_slice(&0xF3u16.to_le_bytes());
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[24..32].copy_from_slice(&entry.to_le_bytes());
        buf[32..40].copy_from_slice(&(EHSIZE as u64).to_le_bytes());
        buf[52..54].copy_from_slice(&EHSIZE.to_le_bytes());
        buf[54..56].copy_from_slice(&PHSIZE.to_le_bytes());
        buf[56..58].copy_from_slice(&1u16.to_le_bytes());

        let ph_off = EHSIZE as usize;
        buf[ph_off..ph_off + 4].copy_from_slice(&1u32.to_le_bytes());
        buf[ph_off + 4..ph_off + 8].copy_from_slice(&5u32.to_le_bytes());
        buf[ph_off + 16..ph_off + 24].copy_from_slice(&entry.to_le_bytes());
        buf[ph_off + 24..ph_off + 32].copy_from_slice(&entry.to_le_bytes());
        let seg_len = code.len() as u64;
        buf[ph_off + 32..ph_off + 40].copy_from_slice(&seg_len.to_le_bytes());
        buf[ph_off + 40..ph_off + 48].copy_from_slice(&seg_len.to_le_bytes());
        buf[ph_off + 48..ph_off + 56].copy_from_slice(&4u64.to_le_bytes());

        buf.extend_from_slice(&code);
        let code_off = (buf.len() - code.len()) as u64;
        buf[ph_off + 8..ph_off + 16].copy_from_slice(&code_off.to_le_bytes());
        buf
    }

    #[test]
    fn single_riscv_core_runs_to_exit() {
        // addi x10, x0, 0 ; addi x17, x0, 93 ; ecall
        let elf = tiny_elf(0, &[0x0000_0513, 0x05d0_0893, 0x0000_0073]);
        let cfg = Config::default();
        let mut sim = Simulator::new(&cfg);
        sim.add_riscv_core((0, 0, 0), &elf, 1, Some(0)).unwrap();
        let _ = sim.run(10).unwrap();
        assert!(sim.all_done());
        assert_eq!(sim.exit_codes(), vec![((0, 0, 0), &[Some(0)][..])]);
    }

    #[test]
    fn a_core_held_in_reset_never_advances_until_released() {
        let elf = tiny_elf(0, &[0x0000_0513, 0x05d0_0893, 0x0000_0073]);
        let cfg = Config::default();
        let mut sim = Simulator::new(&cfg);
        sim.add_riscv_core((0, 0, 0), &elf, 1, None).unwrap();
        for _ in 0..5 {
            sim.tick().unwrap();
        }
        assert!(!sim.all_done());
        sim.release_core_reset((0, 0, 0)).unwrap();
        let _ = sim.run(10).unwrap();
        assert!(sim.all_done());
    }

    #[test]
    fn unpopulated_coordinates_are_a_config_error() {
        let cfg = Config::default();
        let mut sim = Simulator::new(&cfg);
        let elf = tiny_elf(0, &[0x0000_0073]);
        assert!(sim.add_riscv_core((5, 0, 0), &elf, 1, Some(0)).is_err());
    }

    /// Several harts on one core each loop `amoadd.d`-ing the shared
    /// relative-DRAM word. If the atomic op ever lost an update, the
    /// final sum would come up short of `harts * iterations`.
    #[test]
    fn amoadd_race_loses_no_updates_across_harts() {
        use crate::hart::riscv::decode::{funct5, opcodes};
        use crate::memory::request::Request;
        use crate::thread_state::{MemOp, Width};

        fn u_type(rd: u8, imm20: u32) -> u32 {
            (imm20 << 12) | (u32::from(rd) << 7) | opcodes::LUI
        }
        fn i_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: i64) -> u32 {
            ((imm as u32 & 0xFFF) << 20) | (u32::from(rs1) << 15) | (funct3 << 12) | (u32::from(rd) << 7) | opcode
        }
        fn amo_d(funct5: u32, rs1: u8, rs2: u8, rd: u8) -> u32 {
            (funct5 << 27) | (u32::from(rs2) << 20) | (u32::from(rs1) << 15) | (0b011 << 12) | (u32::from(rd) << 7) | opcodes::AMO
        }
        fn bne(rs1: u8, rs2: u8, imm: i64) -> u32 {
            let imm = imm as u32;
            let bit12 = (imm >> 12) & 1;
            let bit11 = (imm >> 11) & 1;
            let bits10_5 = (imm >> 5) & 0x3F;
            let bits4_1 = (imm >> 1) & 0xF;
            (bit12 << 31) | (bits10_5 << 25) | (u32::from(rs2) << 20) | (u32::from(rs1) << 15) | (0b001 << 12) | (bits4_1 << 8) | (bit11 << 7) | opcodes::BRANCH
        }

        let cfg = Config::default();
        let codec = AddressCodec::new(0, 0, 0, &cfg.system);
        let dram_addr =
            codec.encode(&AddressInfo { absolute: false, class: MemoryClass::Dram, pxn: 0, pod: 0, core: 0, offset: 0 });
        assert_eq!(dram_addr & 0xFFF, 0, "relative DRAM base must be LUI-loadable with no ADDI remainder");
        let imm20 = (dram_addr >> 12) as u32;

        let iterations: i64 = 50;
        let num_harts: u32 = 8;
        let instrs = [
            u_type(1, imm20),                             // lui x1, imm20        -> x1 = shared DRAM word
            i_type(opcodes::OP_IMM, 3, 0, 0, 1),           // addi x3, x0, 1
            i_type(opcodes::OP_IMM, 2, 0, 0, iterations),  // addi x2, x0, iterations
            amo_d(funct5::AMOADD, 1, 3, 0),                // loop: amoadd.d x0, x3, (x1)
            i_type(opcodes::OP_IMM, 2, 0, 2, -1),          // addi x2, x2, -1
            bne(2, 0, -8),                                 // bne x2, x0, loop
            i_type(opcodes::OP_IMM, 10, 0, 0, 0),          // addi x10, x0, 0
            i_type(opcodes::OP_IMM, 17, 0, 0, 93),         // addi x17, x0, 93
            0x0000_0073,                                   // ecall
        ];
        let elf = tiny_elf(0, &instrs);

        let mut sim = Simulator::new(&cfg);
        sim.add_riscv_core((0, 0, 0), &elf, num_harts, Some(0)).unwrap();
        let _ = sim.run(200_000).unwrap();
        assert!(sim.all_done());

        let codes = sim.exit_codes();
        assert_eq!(codes.len(), 1);
        assert!(codes[0].1.iter().all(|c| *c == Some(0)));

        let (_, resp) = sim.mem.issue(Request { hart: 0, op: MemOp::Read { address: dram_addr, width: Width::Double } }, (0, 0, 0)).unwrap();
        assert_eq!(resp.value, iterations as u64 * u64::from(num_harts));
    }
}
