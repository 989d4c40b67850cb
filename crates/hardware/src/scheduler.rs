//! Core Scheduler (C9): per-core round-robin hart selection, at most one
//! unit of work per tick, and power-gating.
//!
//! A core owns a fixed set of resident harts — coroutine, RISC-V, or a
//! mix — plus, for any RISC-V lanes, the flat program image their PC
//! indexes for fetch (`§4.4`'s instruction cache only counts hit/miss;
//! the word itself always comes from this image). Reset is a core-wide
//! gate read off the control MMIO word each tick, not a per-hart flag:
//! the controlling contract ("a write of 0 deasserts reset for all harts
//! on that core") only ever changes every lane at once.

use crate::common::addr::{AddressCodec, AddressInfo, MemoryClass};
use crate::common::config::SystemConfig;
use crate::common::error::{SimError, SimResult};
use crate::console::{Console, StdoutConsole};
use crate::hart::coroutine::CoroutineHart;
use crate::hart::riscv::hart::RiscvHart;
use crate::hart::riscv::interp::{self, StepEffect};
use crate::memory::controller::Backing;
use crate::memory::interface::MemoryInterface;
use crate::memory::request::{mem_op_kind, OpKind, Request};
use crate::sim::event::{Event, SimTransport};
use crate::syscall::SyscallBridge;
use crate::thread_state::{MemOp, ThreadState, Width};

/// One hart resident on a core.
#[derive(Debug)]
pub enum Lane {
    /// A native-hosted coroutine hart.
    Coroutine(CoroutineHart),
    /// A RISC-V guest interpreter hart.
    Riscv(RiscvHart),
}

impl Lane {
    fn id(&self) -> u64 {
        match self {
            Self::Coroutine(h) => h.id,
            Self::Riscv(h) => h.id,
        }
    }

    fn can_resume(&self) -> bool {
        match self {
            Self::Coroutine(h) => h.can_resume(),
            Self::Riscv(h) => h.can_resume(),
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Self::Coroutine(h) => h.is_finished(),
            Self::Riscv(h) => h.exited,
        }
    }

    fn tick_nop(&mut self) {
        match self {
            Self::Coroutine(h) => h.tick_nop(),
            Self::Riscv(h) => h.state.tick_nop(),
        }
    }

    /// The kind of the op this lane's hart is currently waiting on, if
    /// any. Used to verify a delivered response actually answers the op
    /// in flight.
    fn in_flight_kind(&self) -> Option<OpKind> {
        let state = match self {
            Self::Coroutine(h) => &h.state,
            Self::Riscv(h) => &h.state,
        };
        match state {
            ThreadState::Mem { op, .. } => Some(mem_op_kind(op)),
            _ => None,
        }
    }

    fn deliver(&mut self, value: u64) {
        match self {
            Self::Coroutine(h) => h.deliver(value),
            Self::Riscv(h) => interp::complete(h, value),
        }
    }
}

/// One core: `N` resident harts, a round-robin pointer, and the
/// busy/stall/idle bookkeeping the scheduler alone mutates.
#[derive(Debug)]
pub struct Core {
    coords: (u64, u64, u64),
    sys: SystemConfig,
    lanes: Vec<Lane>,
    /// Flat program image RISC-V lanes fetch from; empty on
    /// coroutine-only cores.
    code: Backing,
    boot_pc: u64,
    max_idle_cycles: u32,
    rr: usize,
    idle_cycles: u32,
    gated: bool,
    held_in_reset: bool,
    exit_codes: Vec<Option<i32>>,
    syscalls: SyscallBridge,
    busy_cycles: u64,
    stall_cycles: u64,
    console: Box<dyn Console>,
}

impl Core {
    /// Builds a core holding `lanes`, reset-asserted, with `code` as the
    /// fetch image any RISC-V lane uses and `boot_pc` the PC they're
    /// released to.
    #[must_use]
    pub fn new(
        coords: (u64, u64, u64),
        sys: SystemConfig,
        lanes: Vec<Lane>,
        code: Backing,
        boot_pc: u64,
        max_idle_cycles: u32,
    ) -> Self {
        let exit_codes = vec![None; lanes.len()];
        Self {
            coords,
            sys,
            lanes,
            code,
            boot_pc,
            max_idle_cycles,
            rr: 0,
            idle_cycles: 0,
            gated: false,
            held_in_reset: true,
            exit_codes,
            syscalls: SyscallBridge::new(),
            busy_cycles: 0,
            stall_cycles: 0,
            console: Box::new(StdoutConsole),
        }
    }

    /// Replaces this core's console sink (real stdout by default) — tests
    /// use this to capture prints instead of writing to the process's
    /// actual stdout.
    #[must_use]
    pub fn with_console(mut self, console: Box<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Busy ticks: one hart was driven.
    #[must_use]
    pub fn busy_cycles(&self) -> u64 {
        self.busy_cycles
    }

    /// Stall ticks: reset-held, or no hart was ready.
    #[must_use]
    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles
    }

    /// Whether the core has gone `max_idle_cycles` ticks without any
    /// hart becoming ready. An outer driver may use this to skip
    /// ticking the core until a response for one of its harts is due.
    #[must_use]
    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Whether every resident hart has terminated.
    #[must_use]
    pub fn all_done(&self) -> bool {
        self.lanes.iter().all(Lane::is_done)
    }

    /// Exit codes recorded so far, one slot per lane in residency order;
    /// `None` until that lane's hart terminates.
    #[must_use]
    pub fn exit_codes(&self) -> &[Option<i32>] {
        &self.exit_codes
    }

    /// This core's control-MMIO reset word address, at offset `0x000` of
    /// its `ctrl_base`.
    fn ctrl_address(&self) -> u64 {
        let codec = AddressCodec::new(self.coords.0, self.coords.1, self.coords.2, &self.sys);
        codec.encode(&AddressInfo {
            absolute: true,
            class: MemoryClass::Ctrl,
            pxn: self.coords.0,
            pod: self.coords.1,
            core: self.coords.2,
            offset: 0,
        })
    }

    fn write_ctrl(&self, mem: &mut MemoryInterface, value: u64) -> SimResult<()> {
        let op = crate::thread_state::MemOp::Write { address: self.ctrl_address(), width: Width::Double, value };
        let _ = mem.issue(Request { hart: 0, op }, self.coords)?;
        Ok(())
    }

    /// Writes `0` to this core's reset MMIO word, releasing every
    /// resident hart — the same effect a write from another core's
    /// software would have.
    pub fn release_reset(&self, mem: &mut MemoryInterface) -> SimResult<()> {
        self.write_ctrl(mem, 0)
    }

    /// Writes a nonzero value to this core's reset MMIO word,
    /// re-asserting reset on every resident hart.
    pub fn assert_reset(&self, mem: &mut MemoryInterface) -> SimResult<()> {
        self.write_ctrl(mem, 1)
    }

    fn apply_release(&mut self) {
        self.held_in_reset = false;
        let boot_pc = self.boot_pc;
        for lane in &mut self.lanes {
            if let Lane::Riscv(h) = lane {
                h.release_reset(boot_pc);
            }
        }
    }

    fn apply_assert(&mut self) {
        self.held_in_reset = true;
        for lane in &mut self.lanes {
            if let Lane::Riscv(h) = lane {
                h.assert_reset();
            }
        }
    }

    /// Advances the core by one clock tick: delivers any due responses,
    /// syncs reset state off the control MMIO word, drives at most one
    /// ready hart, and updates the busy/stall/idle counters.
    pub fn tick(&mut self, now: u64, mem: &mut MemoryInterface, transport: &mut dyn SimTransport) -> SimResult<()> {
        let due = transport.drain_due(now);
        let delivered_any = !due.is_empty();
        for Event { hart, value, kind } in due {
            let Some(lane) = self.lanes.iter_mut().find(|l| l.id() == u64::from(hart)) else {
                return Err(SimError::ResponseMismatch { hart_id: hart, detail: "no resident hart with this id".to_string() });
            };
            match lane.in_flight_kind() {
                Some(in_flight) if in_flight == kind => lane.deliver(value),
                Some(in_flight) => {
                    return Err(SimError::ResponseMismatch {
                        hart_id: hart,
                        detail: format!("hart has {in_flight:?} in flight, response carries {kind:?}"),
                    });
                }
                None => {
                    return Err(SimError::ResponseMismatch { hart_id: hart, detail: "hart has no op in flight".to_string() });
                }
            }
        }

        let held = mem.ctrl_reset_word(self.coords) != 0;
        if held != self.held_in_reset {
            if held {
                self.apply_assert();
            } else {
                self.apply_release();
            }
        }

        for lane in &mut self.lanes {
            lane.tick_nop();
        }

        if delivered_any {
            self.idle_cycles = 0;
            self.gated = false;
        }

        if self.held_in_reset {
            self.stall_cycles += 1;
            return Ok(());
        }

        let n = self.lanes.len();
        let picked = (0..n).map(|step| (self.rr + step) % n).find(|&idx| self.lanes[idx].can_resume());

        let Some(idx) = picked else {
            self.stall_cycles += 1;
            self.idle_cycles += 1;
            if self.idle_cycles >= self.max_idle_cycles {
                self.gated = true;
            }
            return Ok(());
        };

        self.rr = (idx + 1) % n;
        self.idle_cycles = 0;
        self.gated = false;
        self.busy_cycles += 1;
        self.drive(idx, now, mem, transport)
    }

    fn drive(&mut self, idx: usize, now: u64, mem: &mut MemoryInterface, transport: &mut dyn SimTransport) -> SimResult<()> {
        let hart_id = self.lanes[idx].id();
        let is_riscv = matches!(self.lanes[idx], Lane::Riscv(_));
        if !is_riscv {
            let Lane::Coroutine(h) = &mut self.lanes[idx] else { unreachable!() };
            if let Some(exit) = h.resume() {
                self.exit_codes[idx] = Some(exit);
                return Ok(());
            }
            let ThreadState::Mem { op, .. } = h.state else { return Ok(()) };
            return self.issue(hart_id, op, now, mem, transport);
        }

        // RISC-V: fetch always succeeds from the core's own program image;
        // the i-cache only tallies hit/miss, it never gates the fetch.
        let Lane::Riscv(h) = &mut self.lanes[idx] else { unreachable!() };
        let _hit = h.icache.access(h.pc);
        let word = self.code.read(h.pc, Width::Word) as u32;
        let Lane::Riscv(h) = &mut self.lanes[idx] else { unreachable!() };
        let effect = interp::step(h, word)?;
        match effect {
            StepEffect::Local => {}
            StepEffect::Mem(op) => self.issue(hart_id, op, now, mem, transport)?,
            StepEffect::Ecall => {
                let Lane::Riscv(h) = &mut self.lanes[idx] else { unreachable!() };
                self.syscalls.dispatch(h, mem, self.coords)?;
            }
            StepEffect::Console(bytes) => self.console.write(&bytes),
        }
        let Lane::Riscv(h) = &self.lanes[idx] else { unreachable!() };
        if h.exited {
            self.exit_codes[idx] = Some(h.exit_code);
        }
        Ok(())
    }

    fn issue(&mut self, hart_id: u64, op: MemOp, now: u64, mem: &mut MemoryInterface, transport: &mut dyn SimTransport) -> SimResult<()> {
        let hart = hart_id as u32;
        let (latency, response) = mem.issue(Request { hart, op }, self.coords)?;
        transport.schedule(now + latency, Event { hart, value: response.value, kind: response.kind });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::hart::riscv::csr::CsrFile;
    use crate::hart::riscv::hart::RiscvHart;
    use crate::hart::{Context, ICache};
    use crate::sim::event::EventQueue;
    use crate::thread_state::Width;

    fn coroutine_core(entry: Box<dyn FnOnce(i32, Vec<u64>, &Context<'_>) -> i32>) -> (Core, MemoryInterface) {
        let cfg = Config::default();
        let mem = MemoryInterface::new(&cfg);
        let hart = CoroutineHart::new(0, 0, vec![], entry);
        let core = Core::new((0, 0, 0), cfg.system, vec![Lane::Coroutine(hart)], Backing::new(0), 0, 1_000_000);
        (core, mem)
    }

    #[test]
    fn reset_held_core_never_runs_a_hart() {
        let (mut core, mut mem) = coroutine_core(Box::new(|_a, _v, _c| 7));
        let mut q = EventQueue::new();
        core.tick(0, &mut mem, &mut q).unwrap();
        assert_eq!(core.busy_cycles(), 0);
        assert_eq!(core.stall_cycles(), 1);
        assert!(!core.all_done());
    }

    #[test]
    fn released_core_runs_its_hart_to_completion() {
        let (mut core, mut mem) = coroutine_core(Box::new(|_a, _v, _c| 7));
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        // Tick 1: the release written above is observed by the edge
        // detector, the hart itself doesn't run until the next tick.
        core.tick(0, &mut mem, &mut q).unwrap();
        core.tick(1, &mut mem, &mut q).unwrap();
        assert_eq!(core.busy_cycles(), 1);
        assert!(core.all_done());
        assert_eq!(core.exit_codes(), &[Some(7)]);
    }

    #[test]
    fn memory_op_round_trips_through_the_event_queue_before_resuming() {
        let (mut core, mut mem) = coroutine_core(Box::new(|_a, _v, ctx| {
            let v = ctx.read(0x1000, Width::Double);
            v as i32
        }));
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        core.tick(0, &mut mem, &mut q).unwrap(); // observes the release
        // Tick 1: issues the read, schedules its response, hart now waiting.
        core.tick(1, &mut mem, &mut q).unwrap();
        assert!(!core.all_done());
        assert_eq!(core.busy_cycles(), 1);
        // Nothing is due yet for several ticks (simple controller is
        // latency 10 by default), so these ticks stall.
        core.tick(2, &mut mem, &mut q).unwrap();
        assert_eq!(core.stall_cycles(), 2);
        // Once latency elapses, the response delivers and the next tick
        // resumes the coroutine to completion.
        core.tick(12, &mut mem, &mut q).unwrap();
        assert!(core.all_done());
    }

    #[test]
    fn response_for_an_unknown_hart_id_is_a_fatal_mismatch() {
        let (mut core, mut mem) = coroutine_core(Box::new(|_a, _v, _c| 7));
        let mut q = EventQueue::new();
        q.schedule(0, Event { hart: 99, value: 0, kind: OpKind::Load });
        let err = core.tick(0, &mut mem, &mut q).unwrap_err();
        assert!(matches!(err, SimError::ResponseMismatch { hart_id: 99, .. }));
    }

    #[test]
    fn response_with_the_wrong_op_kind_is_a_fatal_mismatch() {
        let (mut core, mut mem) = coroutine_core(Box::new(|_a, _v, ctx| {
            let v = ctx.read(0x1000, Width::Double);
            v as i32
        }));
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        core.tick(0, &mut mem, &mut q).unwrap(); // observes the release
        core.tick(1, &mut mem, &mut q).unwrap(); // issues the read, hart 0 now waiting on a Load
        q.schedule(2, Event { hart: 0, value: 0, kind: OpKind::Store });
        let err = core.tick(2, &mut mem, &mut q).unwrap_err();
        assert!(matches!(err, SimError::ResponseMismatch { hart_id: 0, .. }));
    }

    #[test]
    fn idle_past_max_idle_cycles_gates_the_core() {
        let cfg = Config::default();
        let mut mem = MemoryInterface::new(&cfg);
        let hart = CoroutineHart::new(0, 0, vec![], Box::new(|_a, _v, ctx| {
            ctx.nop(1000);
            0
        }));
        let mut core = Core::new((0, 0, 0), cfg.system, vec![Lane::Coroutine(hart)], Backing::new(0), 0, 3);
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        core.tick(0, &mut mem, &mut q).unwrap(); // observes the release
        core.tick(1, &mut mem, &mut q).unwrap(); // issues the long nop
        assert!(!core.is_gated());
        for t in 2..6 {
            core.tick(t, &mut mem, &mut q).unwrap();
        }
        assert!(core.is_gated());
    }

    #[derive(Debug, Clone, Default)]
    struct RecordingConsole(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Console for RecordingConsole {
        fn write(&mut self, bytes: &[u8]) {
            if let Ok(mut buf) = self.0.lock() {
                buf.extend_from_slice(bytes);
            }
        }
    }

    #[test]
    fn hello_world_prints_through_the_console_port_and_exits_zero() {
        let sys = crate::common::config::SystemConfig::default();
        let codec = crate::common::addr::AddressCodec::new(0, 0, 0, &sys);
        let csrs = CsrFile::new(0, 0, 0, 0, 1, &sys);
        let icache = ICache::new(64, 2, 64);
        let riscv = RiscvHart::new(0, csrs, codec, icache);

        let mut code = Backing::new(64);
        let program: [u32; 11] = [
            0xFFFF_00B7, // lui x1, 0xFFFF0
            0x0100_8093, // addi x1, x1, 0x10
            0x0480_0113, // addi x2, x0, 0x48 ('H')
            0x0020_8023, // sb x2, 0(x1)
            0x0690_0113, // addi x2, x0, 0x69 ('i')
            0x0020_8023, // sb x2, 0(x1)
            0x00a0_0113, // addi x2, x0, 0x0a ('\n')
            0x0020_8023, // sb x2, 0(x1)
            0x0000_0513, // addi x10, x0, 0
            0x05d0_0893, // addi x17, x0, 93
            0x0000_0073, // ecall
        ];
        for (i, word) in program.iter().enumerate() {
            code.write((i * 4) as u64, Width::Word, u64::from(*word));
        }

        let console = RecordingConsole::default();
        let captured = console.0.clone();

        let cfg = Config::default();
        let mut mem = MemoryInterface::new(&cfg);
        let mut core = Core::new((0, 0, 0), cfg.system, vec![Lane::Riscv(riscv)], code, 0, 1_000_000)
            .with_console(Box::new(console));
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        for t in 0..12 {
            core.tick(t, &mut mem, &mut q).unwrap();
        }
        assert!(core.all_done());
        assert_eq!(core.exit_codes(), &[Some(0)]);
        assert_eq!(&*captured.lock().unwrap(), b"Hi\n");
    }

    #[test]
    fn riscv_lane_fetches_from_the_code_image_and_runs_to_exit() {
        let sys = crate::common::config::SystemConfig::default();
        let codec = crate::common::addr::AddressCodec::new(0, 0, 0, &sys);
        let csrs = CsrFile::new(0, 0, 0, 0, 1, &sys);
        let icache = ICache::new(64, 2, 64);
        let riscv = RiscvHart::new(0, csrs, codec, icache);

        let mut code = Backing::new(64);
        // addi x10, x0, 0 ; addi x17, x0, 93 ; ecall
        code.write(0, Width::Word, 0x0000_0513);
        code.write(4, Width::Word, 0x05d0_0893);
        code.write(8, Width::Word, 0x0000_0073);

        let cfg = Config::default();
        let mut mem = MemoryInterface::new(&cfg);
        let mut core = Core::new((0, 0, 0), cfg.system, vec![Lane::Riscv(riscv)], code, 0, 1_000_000);
        core.release_reset(&mut mem).unwrap();
        let mut q = EventQueue::new();
        for t in 0..4 {
            core.tick(t, &mut mem, &mut q).unwrap();
        }
        assert!(core.all_done());
        assert_eq!(core.exit_codes(), &[Some(0)]);
    }
}
