//! RV32 selection patterns

use super::opcodes::*;
use super::reloc::R_PCREL_ADDR;
use crate::minst::{FrameIndex, InstFlags, MachineInst, Opcode, PReg, Reg, RegClass};
use crate::pattern::{imm, Captures, Emit, NodeKind, Pat, PatternRule};
use rxc_common::{CompilerError, Result};
use rxc_ir::{BinaryOp, CastOp, FloatCC, IntCC, IrType, UnaryOp};

const ZERO: Reg = Reg::Phys(PReg(0));

const ANY: &[IrType] = &[];
const I32: &[IrType] = &[IrType::I32];
const NARROW: &[IrType] = &[IrType::I1, IrType::I8, IrType::I16];
const F32: &[IrType] = &[IrType::F32];
const F64: &[IrType] = &[IrType::F64];
const BYTE: &[IrType] = &[IrType::I1, IrType::I8];
const HALF: &[IrType] = &[IrType::I16];
const WORD: &[IrType] = &[IrType::I32, IrType::Ptr];

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

fn neg_simm12(v: i64) -> bool {
    (-2047..=2048).contains(&v)
}

fn emit_rrr(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)).use_reg(c.reg(1)));
    Ok(())
}

fn emit_rri(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)).imm(c.imm(0)));
    Ok(())
}

fn emit_rr(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)));
    Ok(())
}

fn emit_sub_imm(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)).imm(-c.imm(0)));
    Ok(())
}

fn emit_neg(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(ZERO).use_reg(c.reg(0)));
    Ok(())
}

fn emit_not(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)).imm(-1));
    Ok(())
}

fn emit_fneg(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    e.push(MachineInst::new(op).def(c.dst()).use_reg(c.reg(0)).use_reg(c.reg(0)));
    Ok(())
}

fn emit_copy(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    e.push(super::copy(RegClass::for_type(c.ty), c.dst(), c.reg(0)));
    Ok(())
}

/// Load a 32-bit constant: `addi` when it fits 12 bits, `lui` (+ `addi`) otherwise
fn materialize(e: &mut dyn Emit, dst: Reg, value: i64) {
    let value = value as i32 as i64;
    if imm::simm12(value) {
        e.push(MachineInst::new(ADDI).def(dst).use_reg(ZERO).imm(value));
        return;
    }
    let hi = (value + 0x800) >> 12;
    let lo = value - (hi << 12);
    if lo == 0 {
        e.push(MachineInst::new(LUI).def(dst).imm(hi & 0xF_FFFF));
    } else {
        let upper = e.new_vreg(RegClass::Gpr);
        e.push(MachineInst::new(LUI).def(upper).imm(hi & 0xF_FFFF));
        e.push(MachineInst::new(ADDI).def(dst).use_reg(upper).imm(lo));
    }
}

fn emit_iconst(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    materialize(e, c.dst(), c.imm(0));
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
    e.push(MachineInst::new(LA).def(addr).symbol(&symbol, 0, R_PCREL_ADDR));
    e.push(MachineInst::new(op).def(c.dst()).mem(addr, 0));
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

fn emit_global(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let symbol = c.symbol.as_deref().unwrap_or_default();
    e.push(MachineInst::new(op).def(c.dst()).symbol(symbol, 0, R_PCREL_ADDR));
    Ok(())
}

fn emit_alloca(e: &mut dyn Emit, c: &Captures, op: Opcode) -> Result<()> {
    let slot = c.slot.ok_or_else(|| CompilerError::internal("alloca without a frame slot"))?;
    e.push(MachineInst::new(op).def(c.dst()).frame(FrameIndex::Slot(slot), 0));
    Ok(())
}

fn from_bits(c: &Captures) -> i64 {
    c.from.map_or(32, |t| t.bits(32)) as i64
}

fn emit_zext(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let bits = from_bits(c);
    if bits <= 8 {
        e.push(MachineInst::new(ANDI).def(c.dst()).use_reg(c.reg(0)).imm((1 << bits) - 1));
    } else {
        let t = e.new_vreg(RegClass::Gpr);
        e.push(MachineInst::new(SLLI).def(t).use_reg(c.reg(0)).imm(32 - bits));
        e.push(MachineInst::new(SRLI).def(c.dst()).use_reg(t).imm(32 - bits));
    }
    Ok(())
}

fn emit_sext(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let shift = 32 - from_bits(c);
    let t = e.new_vreg(RegClass::Gpr);
    e.push(MachineInst::new(SLLI).def(t).use_reg(c.reg(0)).imm(shift));
    e.push(MachineInst::new(SRAI).def(c.dst()).use_reg(t).imm(shift));
    Ok(())
}

fn emit_icmp(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    let cc = c.int_cc.unwrap_or(IntCC::Eq);
    let (a, b, dst) = (c.reg(0), c.reg(1), c.dst());
    let lt = if cc.is_signed() { SLT } else { SLTU };
    match cc {
        IntCC::Eq | IntCC::Ne => {
            let diff = e.new_vreg(RegClass::Gpr);
            e.push(MachineInst::new(SUB).def(diff).use_reg(a).use_reg(b));
            if cc == IntCC::Eq {
                e.push(MachineInst::new(SLTIU).def(dst).use_reg(diff).imm(1));
            } else {
                e.push(MachineInst::new(SLTU).def(dst).use_reg(ZERO).use_reg(diff));
            }
        }
        IntCC::Slt | IntCC::Ult => e.push(MachineInst::new(lt).def(dst).use_reg(a).use_reg(b)),
        IntCC::Sgt | IntCC::Ugt => e.push(MachineInst::new(lt).def(dst).use_reg(b).use_reg(a)),
        IntCC::Sle | IntCC::Ule | IntCC::Sge | IntCC::Uge => {
            let (x, y) = if matches!(cc, IntCC::Sle | IntCC::Ule) { (b, a) } else { (a, b) };
            let t = e.new_vreg(RegClass::Gpr);
            e.push(MachineInst::new(lt).def(t).use_reg(x).use_reg(y));
            e.push(MachineInst::new(XORI).def(dst).use_reg(t).imm(1));
        }
    }
    Ok(())
}

fn emit_fcmp(e: &mut dyn Emit, c: &Captures, feq: Opcode) -> Result<()> {
    let (flt, fle) = if feq == FEQ_S { (FLT_S, FLE_S) } else { (FLT_D, FLE_D) };
    let (a, b, dst) = (c.reg(0), c.reg(1), c.dst());
    match c.float_cc.unwrap_or(FloatCC::Eq) {
        FloatCC::Eq => e.push(MachineInst::new(feq).def(dst).use_reg(a).use_reg(b)),
        FloatCC::Ne => {
            let t = e.new_vreg(RegClass::Gpr);
            e.push(MachineInst::new(feq).def(t).use_reg(a).use_reg(b));
            e.push(MachineInst::new(XORI).def(dst).use_reg(t).imm(1));
        }
        FloatCC::Lt => e.push(MachineInst::new(flt).def(dst).use_reg(a).use_reg(b)),
        FloatCC::Le => e.push(MachineInst::new(fle).def(dst).use_reg(a).use_reg(b)),
        FloatCC::Gt => e.push(MachineInst::new(flt).def(dst).use_reg(b).use_reg(a)),
        FloatCC::Ge => e.push(MachineInst::new(fle).def(dst).use_reg(b).use_reg(a)),
    }
    Ok(())
}

/// Conditional branch to `then`, jump to `else`
fn branch(e: &mut dyn Emit, c: &Captures, a: Reg, b: Reg) {
    let (op, x, y) = match c.int_cc.unwrap_or(IntCC::Ne) {
        IntCC::Eq => (BEQ, a, b),
        IntCC::Ne => (BNE, a, b),
        IntCC::Slt => (BLT, a, b),
        IntCC::Sge => (BGE, a, b),
        IntCC::Sgt => (BLT, b, a),
        IntCC::Sle => (BGE, b, a),
        IntCC::Ult => (BLTU, a, b),
        IntCC::Uge => (BGEU, a, b),
        IntCC::Ugt => (BLTU, b, a),
        IntCC::Ule => (BGEU, b, a),
    };
    e.push(MachineInst::new(op).use_reg(x).use_reg(y).block(c.blocks[0]).flags(InstFlags::BRANCH));
    e.push(super::jump(c.blocks[1]));
}

fn emit_branch(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    branch(e, c, c.reg(0), c.reg(1));
    Ok(())
}

fn emit_branch_zero(e: &mut dyn Emit, c: &Captures, _: Opcode) -> Result<()> {
    branch(e, c, c.reg(0), ZERO);
    Ok(())
}

const LOAD_OFF: Pat = Pat::Node(NodeKind::Load, &[Pat::Node(NodeKind::PtrAdd, &[R, Pat::Imm(imm::simm12)])]);
const LOAD: Pat = Pat::Node(NodeKind::Load, &[R]);
const STORE_OFF: Pat = Pat::Node(NodeKind::Store, &[R, Pat::Node(NodeKind::PtrAdd, &[R, Pat::Imm(imm::simm12)])]);
const STORE: Pat = Pat::Node(NodeKind::Store, &[R, R]);

pub static PATTERNS: &[PatternRule] = &[
    // constants and addresses
    rule("li", ANY, ANY, Pat::Node(NodeKind::Iconst, &[]), 1, ADDI, emit_iconst),
    rule("fconst.s", F32, ANY, Pat::Node(NodeKind::Fconst, &[]), 3, FLW, emit_fconst),
    rule("fconst.d", F64, ANY, Pat::Node(NodeKind::Fconst, &[]), 3, FLD, emit_fconst),
    rule("la", ANY, ANY, Pat::Node(NodeKind::GlobalAddr, &[]), 2, LA, emit_global),
    rule("frame-addr", ANY, ANY, Pat::Node(NodeKind::Alloca, &[]), 1, ADDR, emit_alloca),
    // integer register-immediate
    rule("addi", I32, ANY, bin(BinaryOp::Add, &[R, Pat::Imm(imm::simm12)]), 1, ADDI, emit_rri),
    rule("subi", I32, ANY, bin(BinaryOp::Sub, &[R, Pat::Imm(neg_simm12)]), 1, ADDI, emit_sub_imm),
    rule("andi", I32, ANY, bin(BinaryOp::And, &[R, Pat::Imm(imm::simm12)]), 1, ANDI, emit_rri),
    rule("ori", I32, ANY, bin(BinaryOp::Or, &[R, Pat::Imm(imm::simm12)]), 1, ORI, emit_rri),
    rule("xori", I32, ANY, bin(BinaryOp::Xor, &[R, Pat::Imm(imm::simm12)]), 1, XORI, emit_rri),
    rule("slli", I32, ANY, bin(BinaryOp::Shl, &[R, Pat::Imm(imm::shamt5)]), 1, SLLI, emit_rri),
    rule("srli", I32, ANY, bin(BinaryOp::LShr, &[R, Pat::Imm(imm::shamt5)]), 1, SRLI, emit_rri),
    rule("srai", I32, ANY, bin(BinaryOp::AShr, &[R, Pat::Imm(imm::shamt5)]), 1, SRAI, emit_rri),
    // integer register-register
    rule("add", I32, ANY, bin(BinaryOp::Add, &[R, R]), 1, ADD, emit_rrr),
    rule("sub", I32, ANY, bin(BinaryOp::Sub, &[R, R]), 1, SUB, emit_rrr),
    rule("mul", I32, ANY, bin(BinaryOp::Mul, &[R, R]), 3, MUL, emit_rrr),
    rule("mulhu", I32, ANY, bin(BinaryOp::MulHU, &[R, R]), 3, MULHU, emit_rrr),
    rule("div", I32, ANY, bin(BinaryOp::SDiv, &[R, R]), 10, DIV, emit_rrr),
    rule("divu", I32, ANY, bin(BinaryOp::UDiv, &[R, R]), 10, DIVU, emit_rrr),
    rule("rem", I32, ANY, bin(BinaryOp::SRem, &[R, R]), 10, REM, emit_rrr),
    rule("remu", I32, ANY, bin(BinaryOp::URem, &[R, R]), 10, REMU, emit_rrr),
    rule("and", I32, ANY, bin(BinaryOp::And, &[R, R]), 1, AND, emit_rrr),
    rule("or", I32, ANY, bin(BinaryOp::Or, &[R, R]), 1, OR, emit_rrr),
    rule("xor", I32, ANY, bin(BinaryOp::Xor, &[R, R]), 1, XOR, emit_rrr),
    rule("sll", I32, ANY, bin(BinaryOp::Shl, &[R, R]), 1, SLL, emit_rrr),
    rule("srl", I32, ANY, bin(BinaryOp::LShr, &[R, R]), 1, SRL, emit_rrr),
    rule("sra", I32, ANY, bin(BinaryOp::AShr, &[R, R]), 1, SRA, emit_rrr),
    rule("neg", I32, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Neg), &[R]), 1, SUB, emit_neg),
    rule("not", I32, ANY, Pat::Node(NodeKind::Unary(UnaryOp::Not), &[R]), 1, XORI, emit_not),
    // floating point
    rule("fadd.s", F32, ANY, bin(BinaryOp::FAdd, &[R, R]), 2, FADD_S, emit_rrr),
    rule("fsub.s", F32, ANY, bin(BinaryOp::FSub, &[R, R]), 2, FSUB_S, emit_rrr),
    rule("fmul.s", F32, ANY, bin(BinaryOp::FMul, &[R, R]), 3, FMUL_S, emit_rrr),
    rule("fdiv.s", F32, ANY, bin(BinaryOp::FDiv, &[R, R]), 10, FDIV_S, emit_rrr),
    rule("fadd.d", F64, ANY, bin(BinaryOp::FAdd, &[R, R]), 2, FADD_D, emit_rrr),
    rule("fsub.d", F64, ANY, bin(BinaryOp::FSub, &[R, R]), 2, FSUB_D, emit_rrr),
    rule("fmul.d", F64, ANY, bin(BinaryOp::FMul, &[R, R]), 3, FMUL_D, emit_rrr),
    rule("fdiv.d", F64, ANY, bin(BinaryOp::FDiv, &[R, R]), 10, FDIV_D, emit_rrr),
    rule("fneg.s", F32, ANY, Pat::Node(NodeKind::Unary(UnaryOp::FNeg), &[R]), 1, FSGNJN_S, emit_fneg),
    rule("fneg.d", F64, ANY, Pat::Node(NodeKind::Unary(UnaryOp::FNeg), &[R]), 1, FSGNJN_D, emit_fneg),
    // compares producing 0/1
    rule("setcc", ANY, ANY, Pat::Node(NodeKind::Icmp, &[R, R]), 2, SLT, emit_icmp),
    rule("fsetcc.s", ANY, F32, Pat::Node(NodeKind::Fcmp, &[R, R]), 2, FEQ_S, emit_fcmp),
    rule("fsetcc.d", ANY, F64, Pat::Node(NodeKind::Fcmp, &[R, R]), 2, FEQ_D, emit_fcmp),
    // casts
    rule("zext", ANY, NARROW, Pat::Node(NodeKind::Cast(CastOp::Zext), &[R]), 1, ANDI, emit_zext),
    rule("sext", ANY, NARROW, Pat::Node(NodeKind::Cast(CastOp::Sext), &[R]), 2, SRAI, emit_sext),
    rule("trunc", ANY, ANY, Pat::Node(NodeKind::Cast(CastOp::Trunc), &[R]), 1, MV, emit_copy),
    rule("fcvt.s.w", F32, I32, Pat::Node(NodeKind::Cast(CastOp::SiToFp), &[R]), 2, FCVT_S_W, emit_rr),
    rule("fcvt.d.w", F64, I32, Pat::Node(NodeKind::Cast(CastOp::SiToFp), &[R]), 2, FCVT_D_W, emit_rr),
    rule("fcvt.s.wu", F32, I32, Pat::Node(NodeKind::Cast(CastOp::UiToFp), &[R]), 2, FCVT_S_WU, emit_rr),
    rule("fcvt.d.wu", F64, I32, Pat::Node(NodeKind::Cast(CastOp::UiToFp), &[R]), 2, FCVT_D_WU, emit_rr),
    rule("fcvt.w.s", I32, F32, Pat::Node(NodeKind::Cast(CastOp::FpToSi), &[R]), 2, FCVT_W_S, emit_rr),
    rule("fcvt.w.d", I32, F64, Pat::Node(NodeKind::Cast(CastOp::FpToSi), &[R]), 2, FCVT_W_D, emit_rr),
    rule("fcvt.d.s", F64, F32, Pat::Node(NodeKind::Cast(CastOp::FpExt), &[R]), 2, FCVT_D_S, emit_rr),
    rule("fcvt.s.d", F32, F64, Pat::Node(NodeKind::Cast(CastOp::FpTrunc), &[R]), 2, FCVT_S_D, emit_rr),
    // memory
    rule("lbu.off", BYTE, ANY, LOAD_OFF, 2, LBU, emit_load),
    rule("lhu.off", HALF, ANY, LOAD_OFF, 2, LHU, emit_load),
    rule("lw.off", WORD, ANY, LOAD_OFF, 2, LW, emit_load),
    rule("flw.off", F32, ANY, LOAD_OFF, 2, FLW, emit_load),
    rule("fld.off", F64, ANY, LOAD_OFF, 2, FLD, emit_load),
    rule("lbu", BYTE, ANY, LOAD, 2, LBU, emit_load),
    rule("lhu", HALF, ANY, LOAD, 2, LHU, emit_load),
    rule("lw", WORD, ANY, LOAD, 2, LW, emit_load),
    rule("flw", F32, ANY, LOAD, 2, FLW, emit_load),
    rule("fld", F64, ANY, LOAD, 2, FLD, emit_load),
    rule("sb.off", BYTE, ANY, STORE_OFF, 2, SB, emit_store),
    rule("sh.off", HALF, ANY, STORE_OFF, 2, SH, emit_store),
    rule("sw.off", WORD, ANY, STORE_OFF, 2, SW, emit_store),
    rule("fsw.off", F32, ANY, STORE_OFF, 2, FSW, emit_store),
    rule("fsd.off", F64, ANY, STORE_OFF, 2, FSD, emit_store),
    rule("sb", BYTE, ANY, STORE, 2, SB, emit_store),
    rule("sh", HALF, ANY, STORE, 2, SH, emit_store),
    rule("sw", WORD, ANY, STORE, 2, SW, emit_store),
    rule("fsw", F32, ANY, STORE, 2, FSW, emit_store),
    rule("fsd", F64, ANY, STORE, 2, FSD, emit_store),
    rule("ptradd.imm", ANY, ANY, Pat::Node(NodeKind::PtrAdd, &[R, Pat::Imm(imm::simm12)]), 1, ADDI, emit_rri),
    rule("ptradd", ANY, ANY, Pat::Node(NodeKind::PtrAdd, &[R, R]), 1, ADD, emit_rrr),
    // control flow
    rule(
        "bcc.zero",
        ANY,
        ANY,
        Pat::Node(NodeKind::Branch, &[Pat::Node(NodeKind::Icmp, &[R, Pat::Imm(imm::zero)])]),
        1,
        BNE,
        emit_branch_zero,
    ),
    rule(
        "bcc",
        ANY,
        ANY,
        Pat::Node(NodeKind::Branch, &[Pat::Node(NodeKind::Icmp, &[R, R])]),
        1,
        BNE,
        emit_branch,
    ),
];
