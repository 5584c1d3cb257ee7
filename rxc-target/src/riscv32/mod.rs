//! `riscv32` - RV32IMFD with an ilp32d-like calling convention
//!
//! Registers x0-x31 are `PReg(0..32)`, f0-f31 are `PReg(32..64)`. Frames are
//! addressed from `sp`; the return address is kept in `ra` and saved only by
//! functions that make calls.

mod encode;
pub mod opcodes;
mod patterns;
pub mod reloc;

pub use encode::{encode, i_type, r_type, s_type};

use crate::abi::Abi;
use crate::desc::{Action, LegalOp, RegInfo, TargetDescription, TargetHooks};
use crate::frame::{align_up, FrameLayout, FrameRequest};
use crate::minst::{InstFlags, MachineInst, Operand, PReg, Reg, RegClass};
use opcodes::*;
use rxc_common::{CompilerError, Result};
use rxc_ir::IrType;
use rxc_object::MemoryLayout;

pub const ZERO: PReg = PReg(0);
pub const RA: PReg = PReg(1);
pub const SP: PReg = PReg(2);
pub const S0: PReg = PReg(8);

/// Largest frame whose every slot stays reachable with a 12-bit offset
pub const MAX_FRAME: u64 = 2032;

const fn gpr(name: &'static str) -> RegInfo {
    RegInfo {
        name,
        class: RegClass::Gpr,
    }
}

const fn fpr(name: &'static str) -> RegInfo {
    RegInfo {
        name,
        class: RegClass::Fpr,
    }
}

pub static REGISTERS: [RegInfo; 64] = [
    gpr("zero"), gpr("ra"), gpr("sp"), gpr("gp"), gpr("tp"), gpr("t0"), gpr("t1"), gpr("t2"),
    gpr("s0"), gpr("s1"), gpr("a0"), gpr("a1"), gpr("a2"), gpr("a3"), gpr("a4"), gpr("a5"),
    gpr("a6"), gpr("a7"), gpr("s2"), gpr("s3"), gpr("s4"), gpr("s5"), gpr("s6"), gpr("s7"),
    gpr("s8"), gpr("s9"), gpr("s10"), gpr("s11"), gpr("t3"), gpr("t4"), gpr("t5"), gpr("t6"),
    fpr("ft0"), fpr("ft1"), fpr("ft2"), fpr("ft3"), fpr("ft4"), fpr("ft5"), fpr("ft6"), fpr("ft7"),
    fpr("fs0"), fpr("fs1"), fpr("fa0"), fpr("fa1"), fpr("fa2"), fpr("fa3"), fpr("fa4"), fpr("fa5"),
    fpr("fa6"), fpr("fa7"), fpr("fs2"), fpr("fs3"), fpr("fs4"), fpr("fs5"), fpr("fs6"), fpr("fs7"),
    fpr("fs8"), fpr("fs9"), fpr("fs10"), fpr("fs11"), fpr("ft8"), fpr("ft9"), fpr("ft10"), fpr("ft11"),
];

const fn p(n: u16) -> PReg {
    PReg(n)
}

// temporaries first, then arguments, then callee-saved
static ALLOCATABLE_GPR: [PReg; 26] = [
    p(5), p(6), p(7), p(28), p(29), p(30), p(31),
    p(10), p(11), p(12), p(13), p(14), p(15), p(16), p(17),
    p(9), p(18), p(19), p(20), p(21), p(22), p(23), p(24), p(25), p(26), p(27),
];

static ALLOCATABLE_FPR: [PReg; 32] = [
    p(32), p(33), p(34), p(35), p(36), p(37), p(38), p(39), p(60), p(61), p(62), p(63),
    p(42), p(43), p(44), p(45), p(46), p(47), p(48), p(49),
    p(40), p(41), p(50), p(51), p(52), p(53), p(54), p(55), p(56), p(57), p(58), p(59),
];

static INT_ARGS: [PReg; 8] = [p(10), p(11), p(12), p(13), p(14), p(15), p(16), p(17)];
static FLOAT_ARGS: [PReg; 8] = [p(42), p(43), p(44), p(45), p(46), p(47), p(48), p(49)];

static CALLEE_SAVED: [PReg; 24] = [
    p(8), p(9), p(18), p(19), p(20), p(21), p(22), p(23), p(24), p(25), p(26), p(27),
    p(40), p(41), p(50), p(51), p(52), p(53), p(54), p(55), p(56), p(57), p(58), p(59),
];

static CALLER_SAVED: [PReg; 36] = [
    p(1), p(5), p(6), p(7), p(10), p(11), p(12), p(13), p(14), p(15), p(16), p(17),
    p(28), p(29), p(30), p(31),
    p(32), p(33), p(34), p(35), p(36), p(37), p(38), p(39),
    p(42), p(43), p(44), p(45), p(46), p(47), p(48), p(49),
    p(60), p(61), p(62), p(63),
];

fn legalize(op: LegalOp, ty: IrType) -> Action {
    match (op, ty) {
        (LegalOp::Select, _) => Action::Expand,
        (LegalOp::MulHU, IrType::I32) => Action::Legal,
        (LegalOp::MulHU, _) => Action::Expand,
        (LegalOp::SiToFp | LegalOp::UiToFp, IrType::I64) => Action::Expand,
        (LegalOp::FpToSi, IrType::I64) => Action::Unsupported,
        _ => Action::Legal,
    }
}

pub(crate) fn copy(class: RegClass, dst: Reg, src: Reg) -> MachineInst {
    let op = match class {
        RegClass::Gpr => MV,
        RegClass::Fpr => FMV_D,
    };
    MachineInst::new(op).def(dst).use_reg(src).flags(InstFlags::MOVE)
}

fn load(ty: IrType, dst: Reg, addr: Operand) -> MachineInst {
    let op = match ty {
        IrType::I1 | IrType::I8 => LBU,
        IrType::I16 => LHU,
        IrType::F32 => FLW,
        IrType::F64 => FLD,
        _ => LW,
    };
    MachineInst::new(op).def(dst).with(addr)
}

fn store(ty: IrType, src: Reg, addr: Operand) -> MachineInst {
    let op = match ty {
        IrType::I1 | IrType::I8 => SB,
        IrType::I16 => SH,
        IrType::F32 => FSW,
        IrType::F64 => FSD,
        _ => SW,
    };
    MachineInst::new(op).use_reg(src).with(addr)
}

fn spill_type(class: RegClass) -> IrType {
    match class {
        RegClass::Gpr => IrType::I32,
        RegClass::Fpr => IrType::F64,
    }
}

fn call(symbol: &str) -> MachineInst {
    MachineInst::new(CALL).symbol(symbol, 0, reloc::R_CALL).flags(InstFlags::CALL)
}

fn ret() -> MachineInst {
    MachineInst::new(RET).flags(InstFlags::RETURN)
}

pub(crate) fn jump(block: u32) -> MachineInst {
    MachineInst::new(J).block(block).flags(InstFlags::BRANCH | InstFlags::JUMP)
}

fn class_of(reg: PReg) -> RegClass {
    REGISTERS.get(reg.index()).map_or(RegClass::Gpr, |r| r.class)
}

/// `sp`-relative frame: outgoing arguments at the bottom, then slots, then
/// callee-saved registers and `ra` at the top
fn frame(function: &str, req: &FrameRequest) -> Result<FrameLayout> {
    let mut cursor = req.outgoing as u64;
    let mut slot_offsets = Vec::with_capacity(req.slots.len());
    for &(size, align) in &req.slots {
        cursor = align_up(cursor, align as u64);
        slot_offsets.push(cursor as i64);
        cursor += size as u64;
    }
    let mut saved = Vec::new();
    for &reg in &req.saved {
        let size = if class_of(reg) == RegClass::Fpr { 8 } else { 4 };
        cursor = align_up(cursor, size);
        saved.push((reg, cursor as i64));
        cursor += size;
    }
    if req.has_calls {
        cursor = align_up(cursor, 4);
        saved.push((RA, cursor as i64));
        cursor += 4;
    }
    let size = align_up(cursor, 16);
    if size > MAX_FRAME {
        return Err(CompilerError::FrameTooLarge {
            function: function.to_string(),
            size,
            limit: MAX_FRAME,
        });
    }
    Ok(FrameLayout {
        size,
        slot_offsets,
        base: SP,
        saved,
        incoming_args: size as i64,
        has_calls: req.has_calls,
    })
}

fn save_type(reg: PReg) -> IrType {
    spill_type(class_of(reg))
}

fn prologue(frame: &FrameLayout) -> Vec<MachineInst> {
    let mut out = Vec::new();
    if frame.size > 0 {
        out.push(MachineInst::new(ADDI).def(Reg::Phys(SP)).use_reg(Reg::Phys(SP)).imm(-(frame.size as i64)));
    }
    for &(reg, offset) in &frame.saved {
        out.push(store(save_type(reg), Reg::Phys(reg), Operand::Mem { base: Reg::Phys(SP), offset }));
    }
    out
}

fn epilogue(frame: &FrameLayout) -> Vec<MachineInst> {
    let mut out: Vec<MachineInst> = frame
        .saved
        .iter()
        .map(|&(reg, offset)| load(save_type(reg), Reg::Phys(reg), Operand::Mem { base: Reg::Phys(SP), offset }))
        .collect();
    if frame.size > 0 {
        out.push(MachineInst::new(ADDI).def(Reg::Phys(SP)).use_reg(Reg::Phys(SP)).imm(frame.size as i64));
    }
    out
}

impl TargetDescription {
    pub fn riscv32() -> TargetDescription {
        TargetDescription {
            name: "riscv32",
            version: 1,
            pointer_bits: 32,
            register_bits: 32,
            registers: &REGISTERS,
            allocatable_gpr: &ALLOCATABLE_GPR,
            allocatable_fpr: &ALLOCATABLE_FPR,
            abi: Abi {
                int_args: &INT_ARGS,
                float_args: &FLOAT_ARGS,
                int_rets: &INT_ARGS[..2],
                float_rets: &FLOAT_ARGS[..2],
                callee_saved: &CALLEE_SAVED,
                caller_saved: &CALLER_SAVED,
                stack_align: 16,
                stack_slot_size: 4,
                sp: SP,
                fp: S0,
                ra: Some(RA),
            },
            legalize,
            patterns: patterns::PATTERNS,
            hooks: TargetHooks {
                copy,
                load,
                store,
                spill_type,
                call,
                ret,
                jump,
                frame,
                prologue,
                epilogue,
            },
            opcode_names: NAMES,
            encode,
            relocations: &reloc::RELOCATIONS,
            data_reloc: reloc::R_ABS32,
            memory: MemoryLayout::flat(0x1_0000, 0x10_0000),
        }
    }
}
