//! RV64IM interpreter: executes one instruction against a [`RiscvHart`].
//!
//! Arithmetic, shifts, comparisons, branches, jumps, LUI/AUIPC, and CSR
//! access complete immediately and advance the PC. Loads, stores, and
//! atomics externalise to the memory interface: this function sets the
//! hart's [`ThreadState`] to `Mem` and returns the op for the caller to
//! issue; the PC only advances once the caller delivers a response and
//! calls [`complete`].

use crate::common::error::SimError;
use crate::console;
use crate::hart::riscv::decode::{decode, funct5, funct7, opcodes};
use crate::hart::riscv::hart::{Pending, RiscvHart};
use crate::thread_state::{AtomicOp, MemOp, ThreadState, Width};

/// What happened after stepping one instruction.
#[derive(Debug)]
pub enum StepEffect {
    /// The instruction completed fully within the hart.
    Local,
    /// A load, store, or atomic was issued; the caller must route it
    /// through the memory interface and eventually call [`complete`].
    Mem(MemOp),
    /// `ecall` with a syscall number other than `exit`; the caller must
    /// dispatch to the syscall bridge.
    Ecall,
    /// A store addressed a console MMIO port; these bytes are the print
    /// it produced. Already applied to the hart (PC advanced, no pending
    /// op) — the caller only needs to write them out.
    Console(Vec<u8>),
}

/// The syscall number RISC-V `exit` uses (Linux RV64 ABI convention).
const SYS_EXIT: u64 = 93;

/// Fetches, decodes, and executes one instruction. `word` is the 32-bit
/// instruction at `hart.pc`, already resolved by the caller through the
/// instruction cache and backing ELF view.
pub fn step(hart: &mut RiscvHart, word: u32) -> Result<StepEffect, SimError> {
    let d = decode(word);
    let rs1 = hart.regs.read(d.rs1);
    let rs2 = hart.regs.read(d.rs2);
    let shamt64 = ((word >> 20) & 0x3F) as u32;
    let shamt32 = ((word >> 20) & 0x1F) as u32;

    match d.opcode {
        opcodes::OP_IMM => {
            let val = alu_imm(d.funct3, d.funct7, rs1, d.imm, shamt64)?;
            hart.regs.write(d.rd, val);
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::OP_IMM_32 => {
            let val = alu_imm_w(d.funct3, d.funct7, rs1, d.imm, shamt32)?;
            hart.regs.write(d.rd, val);
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::OP => {
            let val = if d.funct7 == funct7::MULDIV {
                muldiv(d.funct3, rs1, rs2)
            } else {
                alu_reg(d.funct3, d.funct7, rs1, rs2)?
            };
            hart.regs.write(d.rd, val);
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::OP_32 => {
            let val = if d.funct7 == funct7::MULDIV {
                muldiv_w(d.funct3, rs1, rs2)
            } else {
                alu_reg_w(d.funct3, d.funct7, rs1, rs2)?
            };
            hart.regs.write(d.rd, val);
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::LUI => {
            hart.regs.write(d.rd, d.imm as u64);
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::AUIPC => {
            hart.regs.write(d.rd, hart.pc.wrapping_add(d.imm as u64));
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::JAL => {
            hart.regs.write(d.rd, hart.pc + 4);
            hart.pc = hart.pc.wrapping_add(d.imm as u64);
            Ok(StepEffect::Local)
        }
        opcodes::JALR => {
            let target = rs1.wrapping_add(d.imm as u64) & !1u64;
            hart.regs.write(d.rd, hart.pc + 4);
            hart.pc = target;
            Ok(StepEffect::Local)
        }
        opcodes::BRANCH => {
            if branch_taken(d.funct3, rs1, rs2)? {
                hart.pc = hart.pc.wrapping_add(d.imm as u64);
            } else {
                hart.pc += 4;
            }
            Ok(StepEffect::Local)
        }
        opcodes::MISC_MEM => {
            // FENCE/FENCE.I: a no-op at this simulator's granularity.
            hart.pc += 4;
            Ok(StepEffect::Local)
        }
        opcodes::LOAD => {
            let (width, signed) = load_width(d.funct3)?;
            let addr = hart.codec.to_absolute(rs1.wrapping_add(d.imm as u64));
            hart.pending = Some(Pending::Load { rd: d.rd, width, signed });
            let op = MemOp::Read { address: addr, width };
            hart.state = ThreadState::Mem { op, result: None };
            Ok(StepEffect::Mem(op))
        }
        opcodes::STORE => {
            let width = store_width(d.funct3)?;
            let raw_addr = rs1.wrapping_add(d.imm as u64);
            let value = truncate(rs2, width);
            if let Some(port) = console::decode_port(raw_addr) {
                let bytes = console::format(port, value, width, hart.codec.coords(), hart.id);
                hart.pc += 4;
                return Ok(StepEffect::Console(bytes));
            }
            let addr = hart.codec.to_absolute(raw_addr);
            hart.pending = Some(Pending::Store);
            let op = MemOp::Write { address: addr, width, value };
            hart.state = ThreadState::Mem { op, result: None };
            Ok(StepEffect::Mem(op))
        }
        opcodes::AMO => {
            let width = match d.funct3 {
                0b010 => Width::Word,
                0b011 => Width::Double,
                _ => return Err(SimError::DecodeFault { pc: hart.pc, word }),
            };
            let atomic_op = match d.funct5 {
                funct5::AMOADD => AtomicOp::Add,
                funct5::AMOSWAP => AtomicOp::Swap,
                _ => return Err(SimError::DecodeFault { pc: hart.pc, word }),
            };
            let addr = hart.codec.to_absolute(rs1);
            let operand = truncate(rs2, width);
            hart.pending = Some(Pending::Atomic { rd: d.rd });
            let op = MemOp::Atomic { address: addr, width, op: atomic_op, operand };
            hart.state = ThreadState::Mem { op, result: None };
            Ok(StepEffect::Mem(op))
        }
        opcodes::SYSTEM => system(hart, &d, word, rs1),
        _ => Err(SimError::DecodeFault { pc: hart.pc, word }),
    }
}

/// Delivers a completed load/store/atomic result into the hart that was
/// waiting on it, writes the destination register if any, and advances
/// the PC. Returns the hart to `Idle`.
pub fn complete(hart: &mut RiscvHart, result: u64) {
    let pending = hart.pending.take();
    match pending {
        Some(Pending::Load { rd, width, signed }) => {
            hart.regs.write(rd, extend(result, width, signed));
        }
        Some(Pending::Atomic { rd }) => {
            hart.regs.write(rd, result);
        }
        Some(Pending::Store) | None => {}
    }
    hart.pc += 4;
    hart.state = ThreadState::Idle;
}

fn truncate(val: u64, width: Width) -> u64 {
    match width {
        Width::Byte => val & 0xFF,
        Width::Half => val & 0xFFFF,
        Width::Word => val & 0xFFFF_FFFF,
        Width::Double => val,
    }
}

fn extend(val: u64, width: Width, signed: bool) -> u64 {
    match (width, signed) {
        (Width::Byte, true) => (val as u8 as i8) as i64 as u64,
        (Width::Byte, false) => val & 0xFF,
        (Width::Half, true) => (val as u16 as i16) as i64 as u64,
        (Width::Half, false) => val & 0xFFFF,
        (Width::Word, true) => (val as u32 as i32) as i64 as u64,
        (Width::Word, false) => val & 0xFFFF_FFFF,
        (Width::Double, _) => val,
    }
}

fn load_width(funct3: u32) -> Result<(Width, bool), SimError> {
    Ok(match funct3 {
        0b000 => (Width::Byte, true),
        0b001 => (Width::Half, true),
        0b010 => (Width::Word, true),
        0b011 => (Width::Double, true),
        0b100 => (Width::Byte, false),
        0b101 => (Width::Half, false),
        0b110 => (Width::Word, false),
        _ => return Err(SimError::Config(format!("bad load funct3 {funct3:#05b}"))),
    })
}

fn store_width(funct3: u32) -> Result<Width, SimError> {
    Ok(match funct3 {
        0b000 => Width::Byte,
        0b001 => Width::Half,
        0b010 => Width::Word,
        0b011 => Width::Double,
        _ => return Err(SimError::Config(format!("bad store funct3 {funct3:#05b}"))),
    })
}

fn branch_taken(funct3: u32, a: u64, b: u64) -> Result<bool, SimError> {
    Ok(match funct3 {
        0b000 => a == b,
        0b001 => a != b,
        0b100 => (a as i64) < (b as i64),
        0b101 => (a as i64) >= (b as i64),
        0b110 => a < b,
        0b111 => a >= b,
        _ => return Err(SimError::Config(format!("bad branch funct3 {funct3:#05b}"))),
    })
}

fn alu_reg(funct3: u32, funct7: u32, a: u64, b: u64) -> Result<u64, SimError> {
    Ok(match funct3 {
        0b000 if funct7 == funct7::ALT => a.wrapping_sub(b),
        0b000 => a.wrapping_add(b),
        0b001 => a.wrapping_shl(b as u32 & 0x3F),
        0b010 => u64::from((a as i64) < (b as i64)),
        0b011 => u64::from(a < b),
        0b100 => a ^ b,
        0b101 if funct7 == funct7::ALT => ((a as i64) >> (b & 0x3F)) as u64,
        0b101 => a.wrapping_shr(b as u32 & 0x3F),
        0b110 => a | b,
        0b111 => a & b,
        _ => return Err(SimError::Config(format!("bad OP funct3 {funct3:#05b}"))),
    })
}

fn alu_reg_w(funct3: u32, funct7: u32, a: u64, b: u64) -> Result<u64, SimError> {
    let a32 = a as u32;
    let b32 = b as u32;
    let val = match funct3 {
        0b000 if funct7 == funct7::ALT => a32.wrapping_sub(b32),
        0b000 => a32.wrapping_add(b32),
        0b001 => a32.wrapping_shl(b32 & 0x1F),
        0b101 if funct7 == funct7::ALT => ((a32 as i32) >> (b32 & 0x1F)) as u32,
        0b101 => a32.wrapping_shr(b32 & 0x1F),
        _ => return Err(SimError::Config(format!("bad OP-32 funct3 {funct3:#05b}"))),
    };
    Ok((val as i32) as i64 as u64)
}

fn alu_imm(funct3: u32, funct7: u32, a: u64, imm: i64, shamt: u32) -> Result<u64, SimError> {
    Ok(match funct3 {
        0b000 => a.wrapping_add(imm as u64),
        0b001 => a.wrapping_shl(shamt),
        0b010 => u64::from((a as i64) < imm),
        0b011 => u64::from(a < imm as u64),
        0b100 => a ^ (imm as u64),
        0b101 if funct7 == funct7::ALT => ((a as i64) >> shamt) as u64,
        0b101 => a.wrapping_shr(shamt),
        0b110 => a | (imm as u64),
        0b111 => a & (imm as u64),
        _ => return Err(SimError::Config(format!("bad OP-IMM funct3 {funct3:#05b}"))),
    })
}

fn alu_imm_w(funct3: u32, funct7: u32, a: u64, imm: i64, shamt: u32) -> Result<u64, SimError> {
    let val = match funct3 {
        0b000 => (a as u32).wrapping_add(imm as u32),
        0b001 => (a as u32).wrapping_shl(shamt),
        0b101 if funct7 == funct7::ALT => ((a as u32 as i32) >> shamt) as u32,
        0b101 => (a as u32).wrapping_shr(shamt),
        _ => return Err(SimError::Config(format!("bad OP-IMM-32 funct3 {funct3:#05b}"))),
    };
    Ok((val as i32) as i64 as u64)
}

fn muldiv(funct3: u32, a: u64, b: u64) -> u64 {
    let (sa, sb) = (a as i64, b as i64);
    match funct3 {
        0b000 => sa.wrapping_mul(sb) as u64,
        0b001 => ((i128::from(sa) * i128::from(sb)) >> 64) as u64,
        0b010 => ((i128::from(sa) * i128::from(b)) >> 64) as u64,
        0b011 => ((u128::from(a) * u128::from(b)) >> 64) as u64,
        0b100 if b == 0 => u64::MAX,
        0b100 if a == i64::MIN as u64 && b == u64::MAX => a,
        0b100 => sa.wrapping_div(sb) as u64,
        0b101 if b == 0 => u64::MAX,
        0b101 => a / b,
        0b110 if b == 0 => a,
        0b110 if a == i64::MIN as u64 && b == u64::MAX => 0,
        0b110 => sa.wrapping_rem(sb) as u64,
        0b111 if b == 0 => a,
        0b111 => a % b,
        _ => unreachable!("funct3 is a 3-bit field"),
    }
}

fn muldiv_w(funct3: u32, a: u64, b: u64) -> u64 {
    let (a32, b32) = (a as u32 as i32, b as u32 as i32);
    let val = match funct3 {
        0b000 => a32.wrapping_mul(b32),
        0b100 if b32 == 0 => -1,
        0b100 if a32 == i32::MIN && b32 == -1 => a32,
        0b100 => a32.wrapping_div(b32),
        0b101 if b32 == 0 => -1,
        0b101 => ((a32 as u32) / (b32 as u32)) as i32,
        0b110 if b32 == 0 => a32,
        0b110 if a32 == i32::MIN && b32 == -1 => 0,
        0b110 => a32.wrapping_rem(b32),
        0b111 if b32 == 0 => a32,
        0b111 => ((a32 as u32) % (b32 as u32)) as i32,
        _ => 0,
    };
    (val as i64) as u64
}

fn system(hart: &mut RiscvHart, d: &crate::hart::riscv::decode::Decoded, word: u32, rs1: u64) -> Result<StepEffect, SimError> {
    if d.funct3 == 0 {
        // ECALL (csr field 0x000) / EBREAK (0x001); anything else in this
        // family is unimplemented.
        return match d.csr {
            0x000 => {
                if hart.regs.read(17) == SYS_EXIT {
                    hart.exited = true;
                    hart.exit_code = hart.regs.read(10) as i32;
                    hart.state = ThreadState::Terminate;
                    Ok(StepEffect::Local)
                } else {
                    Ok(StepEffect::Ecall)
                }
            }
            _ => Err(SimError::DecodeFault { pc: hart.pc, word }),
        };
    }

    let cycle = 0; // the live cycle counter is wired in by the caller via `hart.csrs`.
    let old = hart.csrs.read(d.csr, cycle).unwrap_or(0);
    let write_val = if d.funct3 & 0b100 != 0 {
        u64::from(d.rs1)
    } else {
        rs1
    };
    let new_val = match d.funct3 & 0b011 {
        0b001 => write_val,
        0b010 => old | write_val,
        0b011 => old & !write_val,
        _ => return Err(SimError::DecodeFault { pc: hart.pc, word }),
    };
    if let Some(sleep_cycles) = hart.csrs.write(d.csr, new_val) {
        hart.state = ThreadState::Nop { remaining: sleep_cycles as u32 };
    }
    hart.regs.write(d.rd, old);
    hart.pc += 4;
    Ok(StepEffect::Local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::SystemConfig;
    use crate::hart::riscv::csr::CsrFile;

    fn hart() -> RiscvHart {
        let sys = SystemConfig::default();
        let codec = crate::common::addr::AddressCodec::new(0, 0, 0, &sys);
        let csrs = CsrFile::new(0, 0, 0, 0, 1, &sys);
        let icache = crate::hart::icache::ICache::new(64, 2, 64);
        let mut h = RiscvHart::new(0, csrs, codec, icache);
        h.release_reset(0);
        h
    }

    #[test]
    fn addi_advances_pc_and_writes_rd() {
        let mut h = hart();
        // addi x1, x0, 5
        let _ = step(&mut h, 0x0050_0093).unwrap();
        assert_eq!(h.regs.read(1), 5);
        assert_eq!(h.pc, 4);
    }

    #[test]
    fn load_suspends_then_completes() {
        let mut h = hart();
        h.regs.write(1, 0x1000);
        // ld x2, 0(x1)
        let eff = step(&mut h, 0x0000_b103).unwrap();
        assert!(matches!(eff, StepEffect::Mem(MemOp::Read { .. })));
        assert!(!h.can_resume());
        complete(&mut h, 0xCAFE);
        assert_eq!(h.regs.read(2), 0xCAFE);
        assert_eq!(h.pc, 4);
        assert!(h.can_resume());
    }

    #[test]
    fn sleep_csr_write_parks_the_hart() {
        let mut h = hart();
        h.regs.write(1, 10);
        // csrrw x0, 0x7A5, x1
        let inst: u32 = (0x7A5 << 20) | (1 << 15) | (0b001 << 12) | opcodes::SYSTEM;
        let _ = step(&mut h, inst).unwrap();
        assert!(matches!(h.state, ThreadState::Nop { remaining: 10 }));
        assert!(!h.can_resume());
    }

    #[test]
    fn exit_ecall_terminates() {
        let mut h = hart();
        h.regs.write(17, SYS_EXIT);
        h.regs.write(10, 7);
        // ecall
        let _ = step(&mut h, 0x0000_0073).unwrap();
        assert!(h.exited);
        assert_eq!(h.exit_code, 7);
        assert!(!h.can_resume());
    }

    #[test]
    fn store_to_print_char_port_completes_locally_with_the_byte() {
        let mut h = hart();
        // lui x1, 0xFFFF0
        let _ = step(&mut h, 0xFFFF_00B7).unwrap();
        // addi x1, x1, 0x10
        let _ = step(&mut h, 0x0100_8093).unwrap();
        h.regs.write(2, 0x48);
        // sb x2, 0(x1)
        let eff = step(&mut h, 0x0020_8023).unwrap();
        assert!(matches!(eff, StepEffect::Console(ref bytes) if bytes == b"H"));
        assert!(h.can_resume());
        assert_eq!(h.pc, 12);
    }

    #[test]
    fn amoadd_issues_atomic_op() {
        let mut h = hart();
        h.regs.write(1, 0x2000);
        h.regs.write(2, 5);
        // amoadd.d x3, x2, (x1)
        let inst: u32 = (funct5::AMOADD << 27) | (0b011 << 12) | opcodes::AMO | (1 << 15) | (2 << 20) | (3 << 7);
        let eff = step(&mut h, inst).unwrap();
        match eff {
            StepEffect::Mem(MemOp::Atomic { op: AtomicOp::Add, operand, .. }) => assert_eq!(operand, 5),
            other => panic!("expected atomic add, got {other:?}"),
        }
    }
}
