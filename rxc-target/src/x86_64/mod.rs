//! `x86_64` - 64-bit x86 with SSE2 scalar floats and a System V style
//! calling convention
//!
//! `PReg(0..16)` are the general purpose registers in hardware encoding
//! order, `PReg(16..32)` are `xmm0`-`xmm15`. Frames are addressed from `rbp`;
//! `call` pushes the return address, so `rsp` is 8 modulo 16 on entry.

mod encode;
pub mod opcodes;
mod patterns;
pub mod reloc;

pub use encode::encode;

use crate::abi::Abi;
use crate::desc::{Action, LegalOp, RegInfo, TargetDescription, TargetHooks};
use crate::frame::{align_up, FrameLayout, FrameRequest};
use crate::minst::{InstFlags, MachineInst, Operand, PReg, Reg, RegClass};
use opcodes::*;
use rxc_common::{CompilerError, Result};
use rxc_ir::IrType;
use rxc_object::MemoryLayout;

pub const RAX: PReg = PReg(0);
pub const RCX: PReg = PReg(1);
pub const RDX: PReg = PReg(2);
pub const RSP: PReg = PReg(4);
pub const RBP: PReg = PReg(5);

/// Largest frame `subq $imm32, %rsp` can reserve
pub const MAX_FRAME: u64 = i32::MAX as u64;

const fn gpr(name: &'static str) -> RegInfo {
    RegInfo {
        name,
        class: RegClass::Gpr,
    }
}

const fn xmm(name: &'static str) -> RegInfo {
    RegInfo {
        name,
        class: RegClass::Fpr,
    }
}

pub static REGISTERS: [RegInfo; 32] = [
    gpr("rax"), gpr("rcx"), gpr("rdx"), gpr("rbx"), gpr("rsp"), gpr("rbp"), gpr("rsi"), gpr("rdi"),
    gpr("r8"), gpr("r9"), gpr("r10"), gpr("r11"), gpr("r12"), gpr("r13"), gpr("r14"), gpr("r15"),
    xmm("xmm0"), xmm("xmm1"), xmm("xmm2"), xmm("xmm3"), xmm("xmm4"), xmm("xmm5"), xmm("xmm6"), xmm("xmm7"),
    xmm("xmm8"), xmm("xmm9"), xmm("xmm10"), xmm("xmm11"), xmm("xmm12"), xmm("xmm13"), xmm("xmm14"), xmm("xmm15"),
];

const fn p(n: u16) -> PReg {
    PReg(n)
}

// caller-saved first
static ALLOCATABLE_GPR: [PReg; 14] = [
    p(0), p(1), p(2), p(6), p(7), p(8), p(9), p(10), p(11),
    p(3), p(12), p(13), p(14), p(15),
];

static ALLOCATABLE_FPR: [PReg; 16] = [
    p(16), p(17), p(18), p(19), p(20), p(21), p(22), p(23),
    p(24), p(25), p(26), p(27), p(28), p(29), p(30), p(31),
];

static INT_ARGS: [PReg; 6] = [p(7), p(6), p(2), p(1), p(8), p(9)];
static FLOAT_ARGS: [PReg; 8] = [p(16), p(17), p(18), p(19), p(20), p(21), p(22), p(23)];
static INT_RETS: [PReg; 2] = [p(0), p(2)];

static CALLEE_SAVED: [PReg; 5] = [p(3), p(12), p(13), p(14), p(15)];

static CALLER_SAVED: [PReg; 25] = [
    p(0), p(1), p(2), p(6), p(7), p(8), p(9), p(10), p(11),
    p(16), p(17), p(18), p(19), p(20), p(21), p(22), p(23),
    p(24), p(25), p(26), p(27), p(28), p(29), p(30), p(31),
];

fn legalize(op: LegalOp, ty: IrType) -> Action {
    match (op, ty) {
        (LegalOp::Select, ty) if ty.is_float() => Action::Expand,
        (LegalOp::MulHU, _) => Action::Expand,
        (LegalOp::UiToFp, IrType::I64) => Action::Expand,
        _ => Action::Legal,
    }
}

pub(crate) fn copy(class: RegClass, dst: Reg, src: Reg) -> MachineInst {
    let op = match class {
        RegClass::Gpr => MOV64RR,
        RegClass::Fpr => MOVAPS,
    };
    MachineInst::new(op).def(dst).use_reg(src).flags(InstFlags::MOVE)
}

fn load(ty: IrType, dst: Reg, addr: Operand) -> MachineInst {
    let op = match ty {
        IrType::I1 | IrType::I8 => MOVZX32_8RM,
        IrType::I16 => MOVZX32_16RM,
        IrType::I32 => MOV32RM,
        IrType::F32 => MOVSS_RM,
        IrType::F64 => MOVSD_RM,
        IrType::I64 | IrType::Ptr => MOV64RM,
    };
    MachineInst::new(op).def(dst).with(addr)
}

fn store(ty: IrType, src: Reg, addr: Operand) -> MachineInst {
    let op = match ty {
        IrType::I1 | IrType::I8 => MOV8MR,
        IrType::I16 => MOV16MR,
        IrType::I32 => MOV32MR,
        IrType::F32 => MOVSS_MR,
        IrType::F64 => MOVSD_MR,
        IrType::I64 | IrType::Ptr => MOV64MR,
    };
    MachineInst::new(op).use_reg(src).with(addr)
}

fn spill_type(class: RegClass) -> IrType {
    match class {
        RegClass::Gpr => IrType::I64,
        RegClass::Fpr => IrType::F64,
    }
}

fn call(symbol: &str) -> MachineInst {
    MachineInst::new(CALL).symbol(symbol, 0, reloc::R_PLT32).flags(InstFlags::CALL)
}

fn ret() -> MachineInst {
    MachineInst::new(RET).flags(InstFlags::RETURN)
}

pub(crate) fn jump(block: u32) -> MachineInst {
    MachineInst::new(JMP).block(block).flags(InstFlags::BRANCH | InstFlags::JUMP)
}

/// `rbp`-relative frame: saved registers right below the old `rbp`, slots
/// below them, outgoing arguments at the bottom next to `rsp`
fn frame(function: &str, req: &FrameRequest) -> Result<FrameLayout> {
    let mut cursor = 0u64;
    let mut saved = Vec::with_capacity(req.saved.len());
    for &reg in &req.saved {
        cursor += 8;
        saved.push((reg, -(cursor as i64)));
    }
    let mut slot_offsets = Vec::with_capacity(req.slots.len());
    for &(size, align) in &req.slots {
        cursor = align_up(cursor + size as u64, (align as u64).min(16));
        slot_offsets.push(-(cursor as i64));
    }
    let size = align_up(cursor + req.outgoing as u64, 16);
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
        base: RBP,
        saved,
        incoming_args: 16,
        has_calls: req.has_calls,
    })
}

fn prologue(frame: &FrameLayout) -> Vec<MachineInst> {
    let (rsp, rbp) = (Reg::Phys(RSP), Reg::Phys(RBP));
    let mut out = vec![
        MachineInst::new(PUSH64).use_reg(rbp),
        MachineInst::new(MOV64RR).def(rbp).use_reg(rsp),
    ];
    if frame.size > 0 {
        out.push(MachineInst::new(SUB64RI).use_def(rsp).imm(frame.size as i64));
    }
    for &(reg, offset) in &frame.saved {
        out.push(store(IrType::I64, Reg::Phys(reg), Operand::Mem { base: rbp, offset }));
    }
    out
}

fn epilogue(frame: &FrameLayout) -> Vec<MachineInst> {
    let (rsp, rbp) = (Reg::Phys(RSP), Reg::Phys(RBP));
    let mut out: Vec<MachineInst> = frame
        .saved
        .iter()
        .map(|&(reg, offset)| load(IrType::I64, Reg::Phys(reg), Operand::Mem { base: rbp, offset }))
        .collect();
    out.push(MachineInst::new(MOV64RR).def(rsp).use_reg(rbp));
    out.push(MachineInst::new(POP64).def(rbp));
    out
}

impl TargetDescription {
    pub fn x86_64() -> TargetDescription {
        TargetDescription {
            name: "x86_64",
            version: 1,
            pointer_bits: 64,
            register_bits: 64,
            registers: &REGISTERS,
            allocatable_gpr: &ALLOCATABLE_GPR,
            allocatable_fpr: &ALLOCATABLE_FPR,
            abi: Abi {
                int_args: &INT_ARGS,
                float_args: &FLOAT_ARGS,
                int_rets: &INT_RETS,
                float_rets: &FLOAT_ARGS[..2],
                callee_saved: &CALLEE_SAVED,
                caller_saved: &CALLER_SAVED,
                stack_align: 16,
                stack_slot_size: 8,
                sp: RSP,
                fp: RBP,
                ra: None,
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
            data_reloc: reloc::R_ABS64,
            memory: MemoryLayout::flat(0x40_0000, 0x10_0000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minst::CodeBuffer;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_layout() {
        let req = FrameRequest {
            slots: vec![(4, 4), (16, 16)],
            saved: vec![PReg(3), PReg(12)],
            outgoing: 8,
            has_calls: true,
        };
        let layout = frame("f", &req).unwrap();
        assert_eq!(layout.saved, vec![(PReg(3), -8), (PReg(12), -16)]);
        assert_eq!(layout.slot_offsets, vec![-20, -48]);
        assert_eq!(layout.size, 64);
        assert_eq!(layout.resolve(crate::minst::FrameIndex::IncomingArgs, 8), Some(24));
    }

    #[test]
    fn test_prologue_and_epilogue_encode() {
        let layout = frame(
            "f",
            &FrameRequest {
                slots: vec![(8, 8)],
                saved: vec![PReg(3)],
                ..FrameRequest::default()
            },
        )
        .unwrap();
        let mut buf = CodeBuffer::new();
        for inst in prologue(&layout).iter().chain(epilogue(&layout).iter()) {
            encode(inst, &mut buf).unwrap();
        }
        assert_eq!(
            buf.bytes,
            vec![
                0x55, // push %rbp
                0x48, 0x89, 0xE5, // mov %rsp, %rbp
                0x48, 0x81, 0xEC, 0x10, 0x00, 0x00, 0x00, // sub $16, %rsp
                0x48, 0x89, 0x5D, 0xF8, // mov %rbx, -8(%rbp)
                0x48, 0x8B, 0x5D, 0xF8, // mov -8(%rbp), %rbx
                0x48, 0x89, 0xEC, // mov %rbp, %rsp
                0x5D, // pop %rbp
            ]
        );
    }

    #[test]
    fn test_legalize_actions() {
        assert_eq!(legalize(LegalOp::Select, IrType::I64), Action::Legal);
        assert_eq!(legalize(LegalOp::Select, IrType::F64), Action::Expand);
        assert_eq!(legalize(LegalOp::UiToFp, IrType::I64), Action::Expand);
        assert_eq!(legalize(LegalOp::FpToSi, IrType::I64), Action::Legal);
    }

    #[test]
    fn test_register_tables_are_consistent() {
        assert_eq!(NAMES.len(), MOVSD_MR.0 as usize + 1);
        for reg in ALLOCATABLE_GPR {
            assert_eq!(REGISTERS[reg.index()].class, RegClass::Gpr);
            assert!(reg != RSP && reg != RBP);
        }
        for reg in CALLEE_SAVED {
            assert!(!CALLER_SAVED.contains(&reg));
        }
    }
}
