//! x86-64 selection patterns
//!
//! Arithmetic is two-address: the result register is first loaded with the
//! left operand by a plain register move, which the allocator usually
//! coalesces away. Shift counts travel in `cl`, division in `rdx:rax`.

use super::opcodes::*;
use super::reloc::R_PC32;
use super::{RAX, RCX, RDX};
use crate::minst::{FrameIndex, InstFlags, MachineInst, Opcode, Reg, RegClass};
use crate::pattern::{imm, Captures, Emit, NodeKind, Pat, PatternRule};
use rxc_common::{CompilerError, Result};
use rxc_ir::{BinaryOp, CastOp, FloatCC, IntCC, IrType, UnaryOp};

const ANY: &[IrType] = &[];
const I32: &[IrType] = &[IrType::I32];
const W64: &[IrType] = &[IrType::I64, IrType::Ptr];
const INT: &[IrType] = &[IrType::I1, IrType::I8, IrType::I16, IrType::I32, IrType::I64, IrType::Ptr];
const BIT: &[IrType] = &[IrType::I1];
const I8: &[IrType] = &[IrType::I8];
const I16: &[IrType] = &[IrType::I16];
const BYTE: &[IrType] = &[IrType::I1, IrType::I8];
const F32: &[IrType] = &[IrType::F32];
const F64: &[IrType] = &[IrType::F64];

const R: Pat = Pat::Reg;

const fn rule(
    name: &'static str,
    ty: &'static [IrType],
    from: &'static [IrType],
    pattern: Pat,
    cost: u32,
    opcode: Opcode,
    emit: crate::pattern::EmitFn,
) -> PatternRule {
    PatternRule {
        name,
        ty,
        from,
        pattern,
        cost,
        opcode,
        emit,
    }
}

const fn bin(op: BinaryOp, args: &'static [Pat]) -> Pat {
    Pat::Node(NodeKind::Binary(op), args)
}

const fn cast(op: CastOp) -> Pat {
    Pat::Node(NodeKind::Cast(op), &[R])
}

fn wide(ty: Option<IrType>) -> bool {
    matches!(ty, Some(IrType::I64 | IrType::Ptr))
}

pub(crate) fn int_cc(cc: IntCC) -> i64 {
    match cc {
        IntCC::Eq => cc::E,
        IntCC::Ne => cc::NE,
        IntCC::Slt => cc::L,
        IntCC::Sle => cc::LE,
        IntCC::Sgt => cc::G,
        IntCC::Sge => cc::GE,
        IntCC::Ult => cc::B,
        IntCC::Ule => cc::BE,
        IntCC::Ugt => cc::A,
        IntCC::Uge => cc::AE,
    }
}

fn copy(e: &mut dyn Emit, class: RegClass, dst: Reg, src: Reg) {
    e.push(super::copy(class, dst, src));
}

/// `dst = a; dst op= b`
fn emit_alu(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    copy(e, RegClass::for_type(c.ty), c.dst(), c.reg(0));
    e.push(MachineInst::new(op).use_def(c.dst()).use_reg(c.reg(1)));
    Ok(())
}

/// `dst = a; dst op= imm`
fn emit_alu_imm(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    copy(e, RegClass::Gpr, c.dst(), c.reg(0));
    e.push(MachineInst::new(op).use_def(c.dst()).imm(c.imm(0)));
    Ok(())
}

fn emit_unary(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    copy(e, RegClass::Gpr, c.dst(), c.reg(0));
    e.push(MachineInst::new(op).use_def(c.dst()));
    Ok(())
}

fn emit_shift(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    copy(e, RegClass::Gpr, c.dst(), c.reg(0));
    copy(e, RegClass::Gpr, Reg::Phys(RCX), c.reg(1));
    e.push(MachineInst::new(op).use_def(c.dst()).use_reg(Reg::Phys(RCX)));
    Ok(())
}

fn emit_div(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let (rax, rdx) = (Reg::Phys(RAX), Reg::Phys(RDX));
    let w64 = op == DIV64 || op == IDIV64;
    copy(e, RegClass::Gpr, rax, c.reg(0));
    if op == IDIV32 || op == IDIV64 {
        let extend = if w64 { CQO } else { CDQ };
        e.push(MachineInst::new(extend).def(rdx).use_reg(rax));
    } else {
        e.push(MachineInst::new(MOV32RI).def(rdx).imm(0));
    }
    e.push(MachineInst::new(op).use_def(rax).use_def(rdx).use_reg(c.reg(1)));
    Ok(())
}

fn emit_quotient(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    emit_div(e, c, op)?;
    copy(e, RegClass::Gpr, c.dst(), Reg::Phys(RAX));
    Ok(())
}

fn emit_remainder(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    emit_div(e, c, op)?;
    copy(e, RegClass::Gpr, c.dst(), Reg::Phys(RDX));
    Ok(())
}

fn emit_fneg(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let bits = e.new_vreg(RegClass::Gpr);
    e.push(MachineInst::new(MOVQ_RX).def(bits).use_reg(c.reg(0)));
    if c.ty == IrType::F32 {
        e.push(MachineInst::new(XOR32RI).use_def(bits).imm(i32::MIN as i64));
    } else {
        let mask = e.new_vreg(RegClass::Gpr);
        e.push(MachineInst::new(MOV64RI).def(mask).imm(i64::MIN));
        e.push(MachineInst::new(XOR64RR).use_def(bits).use_reg(mask));
    }
    e.push(MachineInst::new(MOVQ_XR).def(c.dst()).use_reg(bits));
    Ok(())
}

fn emit_iconst(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let value = c.imm(0);
    if !W64.contains(&c.ty) {
        e.push(MachineInst::new(MOV32RI).def(c.dst()).imm(value as u32 as i64));
    } else if (0..=u32::MAX as i64).contains(&value) {
        e.push(MachineInst::new(MOV32RI).def(c.dst()).imm(value));
    } else {
        e.push(MachineInst::new(MOV64RI).def(c.dst()).imm(value));
    }
    Ok(())
}

fn emit_fconst(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let bytes = if c.ty == IrType::F32 {
        (c.bits as u32).to_le_bytes().to_vec()
    } else {
        c.bits.to_le_bytes().to_vec()
    };
    let symbol = e.constant(&bytes, bytes.len() as u32);
    let addr = e.new_vreg(RegClass::Gpr);
    e.push(MachineInst::new(LEA_RIP).def(addr).symbol(&symbol, 0, R_PC32));
    e.push(MachineInst::new(op).def(c.dst()).mem(addr, 0));
    Ok(())
}

fn emit_global(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let symbol = c.symbol.as_deref().unwrap_or_default();
    e.push(MachineInst::new(op).def(c.dst()).symbol(symbol, 0, R_PC32));
    Ok(())
}

fn emit_alloca(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let slot = c.slot.ok_or_else(|| CompilerError::internal("alloca without a frame slot"))?;
    e.push(MachineInst::new(op).def(c.dst()).frame(FrameIndex::Slot(slot), 0));
    Ok(())
}

fn emit_rr(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)));
    Ok(())
}

fn emit_copy(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    copy(e, RegClass::for_type(c.ty), c.dst(), c.reg(0));
    Ok(())
}

/// i1 values only have a meaningful low bit
fn emit_zext_bit(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    copy(e, RegClass::Gpr, c.dst(), c.reg(0));
    e.push(MachineInst::new(AND32RI).use_def(c.dst()).imm(1));
    Ok(())
}

fn emit_sext_bit(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let (shl, sar, amount) = if W64.contains(&c.ty) { (SHL64RI, SAR64RI, 63) } else { (SHL32RI, SAR32RI, 31) };
    copy(e, RegClass::Gpr, c.dst(), c.reg(0));
    e.push(MachineInst::new(shl).use_def(c.dst()).imm(amount));
    e.push(MachineInst::new(sar).use_def(c.dst()).imm(amount));
    Ok(())
}

fn emit_sext(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let op = match (op, W64.contains(&c.ty)) {
        (MOVSX32_8, true) => MOVSX64_8,
        (MOVSX32_16, true) => MOVSX64_16,
        (op, _) => op,
    };
    emit_rr(e, c, op)
}

/// Unsigned 32-bit sources are zero-extended and converted as 64-bit integers
fn emit_uitofp(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let wide = e.new_vreg(RegClass::Gpr);
    e.push(MachineInst::new(MOV32RR).def(wide).use_reg(c.reg(0)));
    e.push(MachineInst::new(op).def(c.dst()).use_reg(wide));
    Ok(())
}

fn compare(e: &mut dyn Emit, c: &Captures) {
    let op = if wide(c.from) { CMP64RR } else { CMP32RR };
    e.push(MachineInst::new(op).use_reg(c.reg(0)).use_reg(c.reg(1)).flags(InstFlags::DEFS_CC));
}

fn compare_imm(e: &mut dyn Emit, c: &Captures) {
    let op = if wide(c.from) { CMP64RI } else { CMP32RI };
    e.push(MachineInst::new(op).use_reg(c.reg(0)).imm(c.imm(0)).flags(InstFlags::DEFS_CC));
}

fn setcc(e: &mut dyn Emit, dst: Reg, cc: i64) {
    e.push(MachineInst::new(SETCC).def(dst).imm(cc).flags(InstFlags::USES_CC));
}

fn emit_icmp(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    compare(e, c);
    setcc(e, c.dst(), int_cc(c.int_cc.unwrap_or(IntCC::Eq)));
    Ok(())
}

fn emit_icmp_imm(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    compare_imm(e, c);
    setcc(e, c.dst(), int_cc(c.int_cc.unwrap_or(IntCC::Eq)));
    Ok(())
}

/// `ucomis` sets CF/ZF like an unsigned compare and PF on unordered inputs;
/// `a` and `above` are false for NaN, so `<` and `<=` swap their operands
fn emit_fcmp(e: &mut dyn Emit, c: &Captures, ucomis: Opcode) -> Result<()> {
    let (a, b, dst) = (c.reg(0), c.reg(1), c.dst());
    let cmp = |x, y| MachineInst::new(ucomis).use_reg(x).use_reg(y).flags(InstFlags::DEFS_CC);
    match c.float_cc.unwrap_or(FloatCC::Eq) {
        FloatCC::Gt => {
            e.push(cmp(a, b));
            setcc(e, dst, cc::A);
        }
        FloatCC::Ge => {
            e.push(cmp(a, b));
            setcc(e, dst, cc::AE);
        }
        FloatCC::Lt => {
            e.push(cmp(b, a));
            setcc(e, dst, cc::A);
        }
        FloatCC::Le => {
            e.push(cmp(b, a));
            setcc(e, dst, cc::AE);
        }
        cond @ (FloatCC::Eq | FloatCC::Ne) => {
            let parity = e.new_vreg(RegClass::Gpr);
            e.push(cmp(a, b));
            if cond == FloatCC::Eq {
                setcc(e, dst, cc::E);
                setcc(e, parity, cc::NP);
                e.push(MachineInst::new(AND32RR).use_def(dst).use_reg(parity));
            } else {
                setcc(e, dst, cc::NE);
                setcc(e, parity, cc::P);
                e.push(MachineInst::new(OR32RR).use_def(dst).use_reg(parity));
            }
        }
    }
    Ok(())
}

fn cmov_for(ty: IrType) -> Opcode {
    if W64.contains(&ty) {
        CMOV64
    } else {
        CMOV32
    }
}

/// `select (icmp a, b), x, y`: compare, take `y`, conditionally move `x`
fn emit_select_cmp(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    compare(e, c);
    copy(e, RegClass::Gpr, c.dst(), c.reg(3));
    let cc = int_cc(c.int_cc.unwrap_or(IntCC::Ne));
    e.push(MachineInst::new(cmov_for(c.ty)).use_def(c.dst()).use_reg(c.reg(2)).imm(cc).flags(InstFlags::USES_CC));
    Ok(())
}

fn emit_select(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let bit = e.new_vreg(RegClass::Gpr);
    copy(e, RegClass::Gpr, bit, c.reg(0));
    e.push(MachineInst::new(AND32RI).use_def(bit).imm(1).flags(InstFlags::DEFS_CC));
    copy(e, RegClass::Gpr, c.dst(), c.reg(2));
    e.push(MachineInst::new(cmov_for(c.ty)).use_def(c.dst()).use_reg(c.reg(1)).imm(cc::NE).flags(InstFlags::USES_CC));
    Ok(())
}

fn emit_load(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).mem(c.reg(0), c.imm(0)));
    Ok(())
}

fn emit_store(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).use_reg(c.reg(0)).mem(c.reg(1), c.imm(0)));
    Ok(())
}

fn emit_lea(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).mem(c.reg(0), c.imm(0)));
    Ok(())
}

fn branch(e: &mut dyn Emit, c: &Captures) {
    let cc = int_cc(c.int_cc.unwrap_or(IntCC::Ne));
    e.push(MachineInst::new(JCC).imm(cc).block(c.blocks[0]).flags(InstFlags::BRANCH | InstFlags::USES_CC));
    e.push(super::jump(c.blocks[1]));
}

fn emit_branch(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    compare(e, c);
    branch(e, c);
    Ok(())
}

fn emit_branch_imm(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    compare_imm(e, c);
    branch(e, c);
    Ok(())
}

const LOAD_OFF: Pat = Pat::Node(NodeKind::Load, &[Pat::Node(NodeKind::PtrAdd, &[R, Pat::Imm(imm::simm32)])]);
const LOAD: Pat = Pat::Node(NodeKind::Load, &[R]);
const STORE_OFF: Pat = Pat::Node(NodeKind::Store, &[R, Pat::Node(NodeKind::PtrAdd, &[R, Pat::Imm(imm::simm32)])]);
const STORE: Pat = Pat::Node(NodeKind::Store, &[R, R]);
const IMM32: Pat = Pat::Imm(imm::simm32);

pub static PATTERNS: &[PatternRule] = &[
    // constants and addresses
    rule("mov.imm", ANY, ANY, Pat::Node(NodeKind::Iconst, &[]), 1, MOV32RI, emit_iconst),
    rule("fconst.ss", F32, ANY, Pat::Node(NodeKind::Fconst, &[]), 3, MOVSS_RM, emit_fconst),
    rule("fconst.sd", F64, ANY, Pat::Node(NodeKind::Fconst, &[]), 3, MOVSD_RM, emit_fconst),
    rule("lea.rip", ANY, ANY, Pat::Node(NodeKind::GlobalAddr, &[]), 1, LEA_RIP, emit_global),
    rule("lea.frame", ANY, ANY, Pat::Node(NodeKind::Alloca, &[]), 1, LEA64, emit_alloca),
    // 32-bit integer
    rule("addl$", I32, ANY, bin(BinaryOp::Add, &[R, IMM32]), 1, ADD32RI, emit_alu_imm),
    rule("subl$", I32, ANY, bin(BinaryOp::Sub, &[R, IMM32]), 1, SUB32RI, emit_alu_imm),
    rule("andl$", I32, ANY, bin(BinaryOp::And, &[R, IMM32]), 1, AND32RI, emit_alu_imm),
    rule("orl$", I32, ANY, bin(BinaryOp::Or, &[R, IMM32]), 1, OR32RI, emit_alu_imm),
    rule("xorl$", I32, ANY, bin(BinaryOp::Xor, &[R, IMM32]), 1, XOR32RI, emit_alu_imm),
    rule("shll$", I32, ANY, bin(BinaryOp::Shl, &[R, Pat::Imm(imm::shamt5)]), 1, SHL32RI, emit_alu_imm),
    rule("shrl$", I32, ANY, bin(BinaryOp::LShr, &[R, Pat::Imm(imm::shamt5)]), 1, SHR32RI, emit_alu_imm),
    rule("sarl$", I32, ANY, bin(BinaryOp::AShr, &[R, Pat::Imm(imm::shamt5)]), 1, SAR32RI, emit_alu_imm),
    rule("addl", I32, ANY, bin(BinaryOp::Add, &[R, R]), 1, ADD32RR, emit_alu),
    rule("subl", I32, ANY, bin(BinaryOp::Sub, &[R, R]), 1, SUB32RR, emit_alu),
    rule("andl", I32, ANY, bin(BinaryOp::And, &[R, R]), 1, AND32RR, emit_alu),
    rule("orl", I32, ANY, bin(BinaryOp::Or, &[R, R]), 1, OR32RR, emit_alu),
    rule("xorl", I32, ANY, bin(BinaryOp::Xor, &[R, R]), 1, XOR32RR, emit_alu),
    rule("imull", I32, ANY, bin(BinaryOp::Mul, &[R, R]), 3, IMUL32RR, emit_alu),
    rule("shll", I32, ANY, bin(BinaryOp::Shl, &[R, R]), 2, SHL32RC, emit_shift),
    rule("shrl", I32, ANY, bin(BinaryOp::LShr, &[R, R]), 2, SHR32RC, emit_shift),
    rule("sarl", I32, ANY, bin(BinaryOp::AShr, &[R, R]), 2, SAR32RC, emit_shift),
    rule("idivl", I32, ANY, bin(BinaryOp::SDiv, &[R, R]), 20, IDIV32, emit_quotient),
    rule("divl", I32, ANY, bin(BinaryOp::UDiv, &[R, R]), 20, DIV32, emit_quotient),
    rule("idivl.rem", I32, ANY, bin(BinaryOp::SRem, &[R, R]), 20, IDIV32, emit_remainder),
    rule("divl.rem", I32, ANY, bin(BinaryOp::URem, &[R, R]), 20, DIV32, emit_remainder),
    rule("negl", I32, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Neg), &[R]), 1, NEG32, emit_unary),
    rule("notl", I32, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Not), &[R]), 1, NOT32, emit_unary),
    // 64-bit integer and pointer
    rule("addq$", W64, ANY, bin(BinaryOp::Add, &[R, IMM32]), 1, ADD64RI, emit_alu_imm),
    rule("subq$", W64, ANY, bin(BinaryOp::Sub, &[R, IMM32]), 1, SUB64RI, emit_alu_imm),
    rule("andq$", W64, ANY, bin(BinaryOp::And, &[R, IMM32]), 1, AND64RI, emit_alu_imm),
    rule("orq$", W64, ANY, bin(BinaryOp::Or, &[R, IMM32]), 1, OR64RI, emit_alu_imm),
    rule("xorq$", W64, ANY, bin(BinaryOp::Xor, &[R, IMM32]), 1, XOR64RI, emit_alu_imm),
    rule("shlq$", W64, ANY, bin(BinaryOp::Shl, &[R, Pat::Imm(imm::shamt6)]), 1, SHL64RI, emit_alu_imm),
    rule("shrq$", W64, ANY, bin(BinaryOp::LShr, &[R, Pat::Imm(imm::shamt6)]), 1, SHR64RI, emit_alu_imm),
    rule("sarq$", W64, ANY, bin(BinaryOp::AShr, &[R, Pat::Imm(imm::shamt6)]), 1, SAR64RI, emit_alu_imm),
    rule("addq", W64, ANY, bin(BinaryOp::Add, &[R, R]), 1, ADD64RR, emit_alu),
    rule("subq", W64, ANY, bin(BinaryOp::Sub, &[R, R]), 1, SUB64RR, emit_alu),
    rule("andq", W64, ANY, bin(BinaryOp::And, &[R, R]), 1, AND64RR, emit_alu),
    rule("orq", W64, ANY, bin(BinaryOp::Or, &[R, R]), 1, OR64RR, emit_alu),
    rule("xorq", W64, ANY, bin(BinaryOp::Xor, &[R, R]), 1, XOR64RR, emit_alu),
    rule("imulq", W64, ANY, bin(BinaryOp::Mul, &[R, R]), 3, IMUL64RR, emit_alu),
    rule("shlq", W64, ANY, bin(BinaryOp::Shl, &[R, R]), 2, SHL64RC, emit_shift),
    rule("shrq", W64, ANY, bin(BinaryOp::LShr, &[R, R]), 2, SHR64RC, emit_shift),
    rule("sarq", W64, ANY, bin(BinaryOp::AShr, &[R, R]), 2, SAR64RC, emit_shift),
    rule("idivq", W64, ANY, bin(BinaryOp::SDiv, &[R, R]), 40, IDIV64, emit_quotient),
    rule("divq", W64, ANY, bin(BinaryOp::UDiv, &[R, R]), 40, DIV64, emit_quotient),
    rule("idivq.rem", W64, ANY, bin(BinaryOp::SRem, &[R, R]), 40, IDIV64, emit_remainder),
    rule("divq.rem", W64, ANY, bin(BinaryOp::URem, &[R, R]), 40, DIV64, emit_remainder),
    rule("negq", W64, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Neg), &[R]), 1, NEG64, emit_unary),
    rule("notq", W64, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Not), &[R]), 1, NOT64, emit_unary),
    // scalar SSE
    rule("addss", F32, ANY, bin(BinaryOp::FAdd, &[R, R]), 2, ADDSS, emit_alu),
    rule("subss", F32, ANY, bin(BinaryOp::FSub, &[R, R]), 2, SUBSS, emit_alu),
    rule("mulss", F32, ANY, bin(BinaryOp::FMul, &[R, R]), 3, MULSS, emit_alu),
    rule("divss", F32, ANY, bin(BinaryOp::FDiv, &[R, R]), 10, DIVSS, emit_alu),
    rule("addsd", F64, ANY, bin(BinaryOp::FAdd, &[R, R]), 2, ADDSD, emit_alu),
    rule("subsd", F64, ANY, bin(BinaryOp::FSub, &[R, R]), 2, SUBSD, emit_alu),
    rule("mulsd", F64, ANY, bin(BinaryOp::FMul, &[R, R]), 3, MULSD, emit_alu),
    rule("divsd", F64, ANY, bin(BinaryOp::FDiv, &[R, R]), 10, DIVSD, emit_alu),
    rule("fneg", ANY, ANY, Pat::Node(NodeKind::Unary(UnaryOp::FNeg), &[R]), 3, XOR64RR, emit_fneg),
    // compares producing 0/1
    rule("setcc$", ANY, INT, Pat::Node(NodeKind::Icmp, &[R, IMM32]), 2, SETCC, emit_icmp_imm),
    rule("setcc", ANY, INT, Pat::Node(NodeKind::Icmp, &[R, R]), 2, SETCC, emit_icmp),
    rule("ucomiss", ANY, F32, Pat::Node(NodeKind::Fcmp, &[R, R]), 2, UCOMISS, emit_fcmp),
    rule("ucomisd", ANY, F64, Pat::Node(NodeKind::Fcmp, &[R, R]), 2, UCOMISD, emit_fcmp),
    rule(
        "cmov.cmp",
        INT,
        ANY,
        Pat::Node(NodeKind::Select, &[Pat::Node(NodeKind::Icmp, &[R, R]), R, R]),
        3,
        CMOV64,
        emit_select_cmp,
    ),
    rule("cmov", INT, ANY, Pat::Node(NodeKind::Select, &[R, R, R]), 4, CMOV64, emit_select),
    // casts
    rule("zext.bit", ANY, BIT, cast(CastOp::Zext), 2, AND32RI, emit_zext_bit),
    rule("movzbl", ANY, I8, cast(CastOp::Zext), 1, MOVZX32_8, emit_rr),
    rule("movzwl", ANY, I16, cast(CastOp::Zext), 1, MOVZX32_16, emit_rr),
    rule("movl.zext", ANY, I32, cast(CastOp::Zext), 1, MOV32RR, emit_rr),
    rule("sext.bit", ANY, BIT, cast(CastOp::Sext), 3, SAR32RI, emit_sext_bit),
    rule("movsb", ANY, I8, cast(CastOp::Sext), 1, MOVSX32_8, emit_sext),
    rule("movsw", ANY, I16, cast(CastOp::Sext), 1, MOVSX32_16, emit_sext),
    rule("movslq", ANY, I32, cast(CastOp::Sext), 1, MOVSXD, emit_rr),
    rule("trunc", ANY, ANY, cast(CastOp::Trunc), 1, MOV64RR, emit_copy),
    rule("cvtsi2ssl", F32, I32, cast(CastOp::SiToFp), 2, CVTSI2SS32, emit_rr),
    rule("cvtsi2sdl", F64, I32, cast(CastOp::SiToFp), 2, CVTSI2SD32, emit_rr),
    rule("cvtsi2ssq", F32, W64, cast(CastOp::SiToFp), 2, CVTSI2SS64, emit_rr),
    rule("cvtsi2sdq", F64, W64, cast(CastOp::SiToFp), 2, CVTSI2SD64, emit_rr),
    rule("cvtui2ss", F32, I32, cast(CastOp::UiToFp), 3, CVTSI2SS64, emit_uitofp),
    rule("cvtui2sd", F64, I32, cast(CastOp::UiToFp), 3, CVTSI2SD64, emit_uitofp),
    rule("cvttss2sil", I32, F32, cast(CastOp::FpToSi), 2, CVTTSS2SI32, emit_rr),
    rule("cvttsd2sil", I32, F64, cast(CastOp::FpToSi), 2, CVTTSD2SI32, emit_rr),
    rule("cvttss2siq", W64, F32, cast(CastOp::FpToSi), 2, CVTTSS2SI64, emit_rr),
    rule("cvttsd2siq", W64, F64, cast(CastOp::FpToSi), 2, CVTTSD2SI64, emit_rr),
    rule("cvtss2sd", F64, F32, cast(CastOp::FpExt), 2, CVTSS2SD, emit_rr),
    rule("cvtsd2ss", F32, F64, cast(CastOp::FpTrunc), 2, CVTSD2SS, emit_rr),
    // memory
    rule("movzbl(m).off", BYTE, ANY, LOAD_OFF, 2, MOVZX32_8RM, emit_load),
    rule("movzwl(m).off", I16, ANY, LOAD_OFF, 2, MOVZX32_16RM, emit_load),
    rule("movl(m).off", I32, ANY, LOAD_OFF, 2, MOV32RM, emit_load),
    rule("movq(m).off", W64, ANY, LOAD_OFF, 2, MOV64RM, emit_load),
    rule("movss(m).off", F32, ANY, LOAD_OFF, 2, MOVSS_RM, emit_load),
    rule("movsd(m).off", F64, ANY, LOAD_OFF, 2, MOVSD_RM, emit_load),
    rule("movzbl(m)", BYTE, ANY, LOAD, 2, MOVZX32_8RM, emit_load),
    rule("movzwl(m)", I16, ANY, LOAD, 2, MOVZX32_16RM, emit_load),
    rule("movl(m)", I32, ANY, LOAD, 2, MOV32RM, emit_load),
    rule("movq(m)", W64, ANY, LOAD, 2, MOV64RM, emit_load),
    rule("movss(m)", F32, ANY, LOAD, 2, MOVSS_RM, emit_load),
    rule("movsd(m)", F64, ANY, LOAD, 2, MOVSD_RM, emit_load),
    rule("movb(s).off", BYTE, ANY, STORE_OFF, 2, MOV8MR, emit_store),
    rule("movw(s).off", I16, ANY, STORE_OFF, 2, MOV16MR, emit_store),
    rule("movl(s).off", I32, ANY, STORE_OFF, 2, MOV32MR, emit_store),
    rule("movq(s).off", W64, ANY, STORE_OFF, 2, MOV64MR, emit_store),
    rule("movss(s).off", F32, ANY, STORE_OFF, 2, MOVSS_MR, emit_store),
    rule("movsd(s).off", F64, ANY, STORE_OFF, 2, MOVSD_MR, emit_store),
    rule("movb(s)", BYTE, ANY, STORE, 2, MOV8MR, emit_store),
    rule("movw(s)", I16, ANY, STORE, 2, MOV16MR, emit_store),
    rule("movl(s)", I32, ANY, STORE, 2, MOV32MR, emit_store),
    rule("movq(s)", W64, ANY, STORE, 2, MOV64MR, emit_store),
    rule("movss(s)", F32, ANY, STORE, 2, MOVSS_MR, emit_store),
    rule("movsd(s)", F64, ANY, STORE, 2, MOVSD_MR, emit_store),
    rule("lea.off", ANY, ANY, Pat::Node(NodeKind::PtrAdd, &[R, IMM32]), 1, LEA64, emit_lea),
    rule("ptradd", ANY, ANY, Pat::Node(NodeKind::PtrAdd, &[R, R]), 1, ADD64RR, emit_alu),
    // control flow
    rule(
        "jcc$",
        ANY,
        ANY,
        Pat::Node(NodeKind::Branch, &[Pat::Node(NodeKind::Icmp, &[R, IMM32])]),
        1,
        JCC,
        emit_branch_imm,
    ),
    rule(
        "jcc",
        ANY,
        ANY,
        Pat::Node(NodeKind::Branch, &[Pat::Node(NodeKind::Icmp, &[R, R])]),
        1,
        JCC,
        emit_branch,
    ),
];
