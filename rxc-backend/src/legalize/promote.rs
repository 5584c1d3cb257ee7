//! Narrow integer promotion
//!
//! Registers hold at least 32 bits and the bits above a narrow value's width
//! are unspecified, so every operation whose result depends on them is
//! redone on extended operands and truncated back.

use super::{replace_inst, Cursor};
use rxc_ir::{BinaryOp, CastOp, Function, Inst, InstKind, IrType, UnaryOp};

const PROMOTED: IrType = IrType::I32;

fn is_narrow(ty: IrType) -> bool {
    matches!(ty, IrType::I1 | IrType::I8 | IrType::I16)
}

pub fn promote_narrow(func: &mut Function) {
    for inst in func.all_insts() {
        promote(func, inst);
    }
}

fn promote(func: &mut Function, inst: Inst) {
    match func.kind(inst).clone() {
        InstKind::Binary { op, ty, lhs, rhs } if is_narrow(ty) && !op.is_float() => {
            let signed = matches!(op, BinaryOp::SDiv | BinaryOp::SRem | BinaryOp::AShr);
            let shift = matches!(op, BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr);
            let mut c = Cursor::at(func, inst);
            let a = c.resize(lhs, PROMOTED, signed);
            let b = if shift {
                let amount = c.resize(rhs, PROMOTED, false);
                let mask = c.iconst(PROMOTED, ty.bits(32) as i64 - 1);
                c.binary(BinaryOp::And, amount, mask)
            } else {
                c.resize(rhs, PROMOTED, signed)
            };
            let wide = c.binary(op, a, b);
            let result = c.resize(wide, ty, false);
            replace_inst(func, inst, result);
        }
        InstKind::Unary { op, ty, arg } if is_narrow(ty) && op != UnaryOp::FNeg => {
            let mut c = Cursor::at(func, inst);
            let a = c.resize(arg, PROMOTED, false);
            let wide = c.unary(op, a);
            let result = c.resize(wide, ty, false);
            replace_inst(func, inst, result);
        }
        InstKind::Icmp { cc, lhs, rhs } if is_narrow(func.value_type(lhs)) => {
            let mut c = Cursor::at(func, inst);
            let a = c.resize(lhs, PROMOTED, cc.is_signed());
            let b = c.resize(rhs, PROMOTED, cc.is_signed());
            let result = c.icmp(cc, a, b);
            replace_inst(func, inst, result);
        }
        InstKind::Cast { op, to, arg } => {
            let from = func.value_type(arg);
            let mut c = Cursor::at(func, inst);
            let result = match op {
                CastOp::SiToFp | CastOp::UiToFp if is_narrow(from) => {
                    let a = c.resize(arg, PROMOTED, op == CastOp::SiToFp);
                    c.cast(op, a, to)
                }
                CastOp::FpToSi if is_narrow(to) => {
                    let wide = c.cast(op, arg, PROMOTED);
                    c.resize(wide, to, false)
                }
                _ => return,
            };
            replace_inst(func, inst, result);
        }
        InstKind::Store { value, .. } if func.value_type(value) == IrType::I1 => {
            let byte = Cursor::at(func, inst).cast(CastOp::Zext, value, IrType::I8);
            if let InstKind::Store { value, .. } = &mut func.inst_mut(inst).kind {
                *value = byte;
            }
        }
        InstKind::Load { ty: IrType::I1, ptr } => {
            let mut c = Cursor::at(func, inst);
            let byte = c.value(InstKind::Load { ty: IrType::I8, ptr });
            let result = c.cast(CastOp::Trunc, byte, IrType::I1);
            replace_inst(func, inst, result);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxc_ir::{IntCC, IrBuilder, Linkage, Signature};

    #[test]
    fn test_narrow_arithmetic_runs_at_32_bits() {
        let mut b = IrBuilder::new("m");
        let mut f = b.function(
            "f",
            Signature::new(vec![IrType::I8, IrType::I8], vec![IrType::I1]),
            Linkage::External,
        );
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let sum = f.binary(BinaryOp::Add, p[0], p[1]).unwrap();
        let lt = f.icmp(IntCC::Slt, sum, p[0]).unwrap();
        f.ret(&[lt]).unwrap();
        f.finish().unwrap();
        let mut module = b.finish();

        promote_narrow(&mut module.functions[0]);
        let func = &module.functions[0];
        rxc_ir::verify_function(func).unwrap();
        for inst in func.all_insts() {
            match func.kind(inst) {
                InstKind::Binary { ty, .. } => assert_eq!(*ty, IrType::I32),
                InstKind::Icmp { lhs, .. } => assert_eq!(func.value_type(*lhs), IrType::I32),
                _ => {}
            }
        }
    }
}
