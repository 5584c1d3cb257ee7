//! Target-dependent operation expansion
//!
//! Asks the target what to do with each operation of `LegalOp` and expands
//! the ones marked `Expand` into simpler IR. Expansions may produce further
//! expandable operations (an unsigned conversion produces a float select),
//! so the pass iterates until nothing changes.

use super::{replace_inst, Cursor};
use rxc_common::{CompilerError, Result};
use rxc_ir::{BinaryOp, CastOp, Function, Inst, InstKind, IntCC, IrType, UnaryOp};
use rxc_target::{Action, LegalOp, TargetDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Rewritten,
    /// The block layout changed; restart the scan
    Split,
}

pub fn expand_operations(func: &mut Function, target: &TargetDescription) -> Result<()> {
    loop {
        let mut changed = false;
        for inst in func.all_insts() {
            if func.inst(inst).block.is_none() {
                continue;
            }
            match expand(func, target, inst)? {
                Outcome::Unchanged => {}
                Outcome::Rewritten => changed = true,
                Outcome::Split => {
                    changed = true;
                    break;
                }
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

fn action(target: &TargetDescription, op: LegalOp, ty: IrType) -> Result<Action> {
    match (target.legalize)(op, ty) {
        Action::Unsupported => Err(CompilerError::unsupported(target.name, format!("{} {ty}", op.name()))),
        other => Ok(other),
    }
}

fn expand(func: &mut Function, target: &TargetDescription, inst: Inst) -> Result<Outcome> {
    match func.kind(inst).clone() {
        InstKind::Select { then_val, .. } => {
            let ty = func.value_type(then_val);
            if action(target, LegalOp::Select, ty)? != Action::Expand {
                return Ok(Outcome::Unchanged);
            }
            if ty.is_int() {
                expand_select_mask(func, inst);
                Ok(Outcome::Rewritten)
            } else {
                expand_select_diamond(func, inst);
                Ok(Outcome::Split)
            }
        }
        InstKind::Binary {
            op: BinaryOp::MulHU,
            ty,
            lhs,
            rhs,
        } => {
            if action(target, LegalOp::MulHU, ty)? != Action::Expand {
                return Ok(Outcome::Unchanged);
            }
            let mut c = Cursor::at(func, inst);
            let bits = ty.bits(target.pointer_bits);
            let high = if 2 * bits <= target.register_bits {
                mulhu_widened(&mut c, ty, bits, target.register_bits, lhs, rhs)
            } else {
                mulhu_halves(&mut c, ty, bits, lhs, rhs)
            };
            replace_inst(func, inst, high);
            Ok(Outcome::Rewritten)
        }
        InstKind::Cast { op, to, arg } => {
            let from = func.value_type(arg);
            let (legal_op, ty) = match op {
                CastOp::SiToFp => (LegalOp::SiToFp, from),
                CastOp::UiToFp => (LegalOp::UiToFp, from),
                CastOp::FpToSi => (LegalOp::FpToSi, to),
                _ => return Ok(Outcome::Unchanged),
            };
            let act = (target.legalize)(legal_op, ty);
            if act == Action::Unsupported {
                return Err(CompilerError::unsupported(target.name, format!("{} {from} -> {to}", op.name())));
            }
            // 64-bit sources on 32-bit targets are converted from their halves
            if act == Action::Legal || from.bits(target.pointer_bits) > target.register_bits {
                return Ok(Outcome::Unchanged);
            }
            match op {
                CastOp::UiToFp => {
                    let result = uitofp_via_signed(&mut Cursor::at(func, inst), arg, to);
                    replace_inst(func, inst, result);
                    Ok(Outcome::Rewritten)
                }
                _ => Err(CompilerError::unsupported(target.name, format!("{} {from} -> {to}", op.name()))),
            }
        }
        _ => Ok(Outcome::Unchanged),
    }
}

/// `(then & m) | (else & !m)` with `m` all ones when the condition holds
fn expand_select_mask(func: &mut Function, inst: Inst) {
    let InstKind::Select { cond, then_val, else_val } = *func.kind(inst) else { return };
    let ty = func.value_type(then_val);
    let mut c = Cursor::at(func, inst);
    let mask = if ty == IrType::I1 {
        cond
    } else {
        let wide = c.cast(CastOp::Zext, cond, ty);
        let zero = c.iconst(ty, 0);
        c.binary(BinaryOp::Sub, zero, wide)
    };
    let inverse = c.unary(UnaryOp::Not, mask);
    let taken = c.binary(BinaryOp::And, then_val, mask);
    let other = c.binary(BinaryOp::And, else_val, inverse);
    let result = c.binary(BinaryOp::Or, taken, other);
    replace_inst(func, inst, result);
}

/// Split the block at the select and merge both values with a phi
fn expand_select_diamond(func: &mut Function, inst: Inst) {
    let InstKind::Select { cond, then_val, else_val } = *func.kind(inst) else { return };
    let Some(block) = func.inst(inst).block else { return };
    let Some(pos) = func.block_insts(block).iter().position(|&i| i == inst) else { return };
    let ty = func.value_type(then_val);
    let loc = func.inst(inst).loc.clone();

    let join = func.create_block_after(block);
    func.split_insts(block, pos + 1, join);
    for succ in func.successors(join) {
        func.rename_phi_incoming(succ, block, join);
    }
    let then_block = func.create_block_after(block);
    let phi = func.prepend_phi(join, ty, vec![(then_block, then_val), (block, else_val)]);
    let merged = func.results(phi)[0];
    replace_inst(func, inst, merged);
    func.append_inst(
        block,
        InstKind::Branch {
            cond,
            then_dest: then_block,
            else_dest: join,
        },
        loc.clone(),
    );
    func.append_inst(then_block, InstKind::Jump { dest: join }, loc);
}

/// High half from a full product in a register-wide integer
fn mulhu_widened(
    c: &mut Cursor,
    ty: IrType,
    bits: u32,
    register_bits: u32,
    lhs: rxc_ir::Value,
    rhs: rxc_ir::Value,
) -> rxc_ir::Value {
    let wide = IrType::int_of_bits(register_bits).unwrap_or(IrType::I64);
    let a = c.resize(lhs, wide, false);
    let b = c.resize(rhs, wide, false);
    let product = c.binary(BinaryOp::Mul, a, b);
    let shift = c.iconst(wide, bits as i64);
    let high = c.binary(BinaryOp::LShr, product, shift);
    c.resize(high, ty, false)
}

/// High half from the four half-width partial products
fn mulhu_halves(c: &mut Cursor, ty: IrType, bits: u32, lhs: rxc_ir::Value, rhs: rxc_ir::Value) -> rxc_ir::Value {
    let half = bits / 2;
    let mask = c.iconst(ty, ((1u64 << half) - 1) as i64);
    let shift = c.iconst(ty, half as i64);
    let a0 = c.binary(BinaryOp::And, lhs, mask);
    let a1 = c.binary(BinaryOp::LShr, lhs, shift);
    let b0 = c.binary(BinaryOp::And, rhs, mask);
    let b1 = c.binary(BinaryOp::LShr, rhs, shift);
    let p00 = c.binary(BinaryOp::Mul, a0, b0);
    let p01 = c.binary(BinaryOp::Mul, a0, b1);
    let p10 = c.binary(BinaryOp::Mul, a1, b0);
    let p11 = c.binary(BinaryOp::Mul, a1, b1);

    let carry = c.binary(BinaryOp::LShr, p00, shift);
    let p01_lo = c.binary(BinaryOp::And, p01, mask);
    let p10_lo = c.binary(BinaryOp::And, p10, mask);
    let mid = c.binary(BinaryOp::Add, carry, p01_lo);
    let mid = c.binary(BinaryOp::Add, mid, p10_lo);

    let p01_hi = c.binary(BinaryOp::LShr, p01, shift);
    let p10_hi = c.binary(BinaryOp::LShr, p10, shift);
    let mid_hi = c.binary(BinaryOp::LShr, mid, shift);
    let high = c.binary(BinaryOp::Add, p11, p01_hi);
    let high = c.binary(BinaryOp::Add, high, p10_hi);
    c.binary(BinaryOp::Add, high, mid_hi)
}

/// Unsigned conversion through the signed one: non-negative inputs convert
/// directly, the others are halved (keeping the low bit for rounding),
/// converted and doubled
fn uitofp_via_signed(c: &mut Cursor, arg: rxc_ir::Value, to: IrType) -> rxc_ir::Value {
    let ty = c.ty(arg);
    let zero = c.iconst(ty, 0);
    let one = c.iconst(ty, 1);
    let non_negative = c.icmp(IntCC::Sge, arg, zero);
    let direct = c.cast(CastOp::SiToFp, arg, to);
    let halved = c.binary(BinaryOp::LShr, arg, one);
    let low = c.binary(BinaryOp::And, arg, one);
    let odd = c.binary(BinaryOp::Or, halved, low);
    let converted = c.cast(CastOp::SiToFp, odd, to);
    let doubled = c.binary(BinaryOp::FAdd, converted, converted);
    c.select(non_negative, direct, doubled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxc_ir::{IrBuilder, Linkage, Signature};

    #[test]
    fn test_float_select_becomes_a_diamond() {
        let mut b = IrBuilder::new("m");
        let mut f = b.function(
            "pick",
            Signature::new(vec![IrType::I32, IrType::F64, IrType::F64], vec![IrType::F64]),
            Linkage::External,
        );
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let zero = f.iconst(IrType::I32, 0).unwrap();
        let cond = f.icmp(IntCC::Ne, p[0], zero).unwrap();
        let v = f.select(cond, p[1], p[2]).unwrap();
        f.ret(&[v]).unwrap();
        f.finish().unwrap();
        let mut module = b.finish();

        let target = TargetDescription::x86_64();
        expand_operations(&mut module.functions[0], &target).unwrap();
        let func = &module.functions[0];
        assert_eq!(func.blocks().len(), 3);
        assert!(func
            .all_insts()
            .iter()
            .all(|&i| !matches!(func.kind(i), InstKind::Select { .. })));
        rxc_ir::verify_function(func).unwrap();
    }

    #[test]
    fn test_unsupported_conversion_is_reported() {
        let mut b = IrBuilder::new("m");
        let mut f = b.function(
            "conv",
            Signature::new(vec![IrType::F64], vec![IrType::I64]),
            Linkage::External,
        );
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let v = f.cast(CastOp::FpToSi, p[0], IrType::I64).unwrap();
        f.ret(&[v]).unwrap();
        f.finish().unwrap();
        let mut module = b.finish();

        let err = expand_operations(&mut module.functions[0], &TargetDescription::riscv32()).unwrap_err();
        assert_eq!(
            err,
            CompilerError::unsupported("riscv32", "fptosi f64 -> i64")
        );
    }
}
