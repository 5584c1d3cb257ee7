//! 64-bit division on 32-bit targets
//!
//! Unsigned division and remainder become calls to helpers running a
//! shift-subtract loop; the signed forms divide magnitudes and fix the signs
//! afterwards. Each helper returns a single `i64` so that it fits the
//! two-register return convention once split. Helpers are added to the
//! module as internal functions and legalized like any other.

use super::Cursor;
use rxc_common::Result;
use rxc_ir::{
    BinaryOp, Block, CastOp, Function, Inst, InstKind, IntCC, IrType, Linkage, Module, Signature, Value,
};

/// Helper returning the quotient
pub const UDIV64: &str = "__rxc_udiv64";
/// Helper returning the remainder
pub const UREM64: &str = "__rxc_urem64";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quantity {
    Quotient,
    Remainder,
}

impl Quantity {
    fn helper(self) -> &'static str {
        match self {
            Quantity::Quotient => UDIV64,
            Quantity::Remainder => UREM64,
        }
    }
}

fn is_wide_division(kind: &InstKind) -> bool {
    matches!(
        kind,
        InstKind::Binary {
            op: BinaryOp::UDiv | BinaryOp::URem | BinaryOp::SDiv | BinaryOp::SRem,
            ty: IrType::I64,
            ..
        }
    )
}

/// Rewrite every 64-bit division; returns the helpers added to the module
pub fn lower_wide_division(module: &mut Module) -> Result<Vec<&'static str>> {
    let mut needed = Vec::new();
    for func in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
        for inst in func.all_insts() {
            if is_wide_division(func.kind(inst)) {
                let quantity = lower(func, inst);
                if !needed.contains(&quantity) {
                    needed.push(quantity);
                }
            }
        }
    }
    let mut added = Vec::new();
    for quantity in [Quantity::Quotient, Quantity::Remainder] {
        if needed.contains(&quantity) && module.function(quantity.helper()).is_none() {
            module.functions.push(udiv_helper(quantity));
            added.push(quantity.helper());
        }
    }
    Ok(added)
}

fn lower(func: &mut Function, inst: Inst) -> Quantity {
    let InstKind::Binary { op, lhs, rhs, .. } = *func.kind(inst) else {
        return Quantity::Quotient;
    };
    let quantity = match op {
        BinaryOp::UDiv | BinaryOp::SDiv => Quantity::Quotient,
        _ => Quantity::Remainder,
    };
    let mut c = Cursor::at(func, inst);
    let result = match op {
        BinaryOp::UDiv | BinaryOp::URem => call_helper(&mut c, quantity, lhs, rhs),
        _ => {
            let (a, sa) = magnitude(&mut c, lhs);
            let (b, sb) = magnitude(&mut c, rhs);
            let v = call_helper(&mut c, quantity, a, b);
            if op == BinaryOp::SDiv {
                let sign = c.binary(BinaryOp::Xor, sa, sb);
                apply_sign(&mut c, v, sign)
            } else {
                apply_sign(&mut c, v, sa)
            }
        }
    };
    super::replace_inst(func, inst, result);
    quantity
}

fn call_helper(c: &mut Cursor, quantity: Quantity, a: Value, b: Value) -> Value {
    let call = c.ins(InstKind::Call {
        callee: quantity.helper().to_string(),
        args: vec![a, b],
        rets: vec![IrType::I64],
    });
    c.func.results(call)[0]
}

/// `(|v|, v >> 63)`
fn magnitude(c: &mut Cursor, v: Value) -> (Value, Value) {
    let k63 = c.iconst(IrType::I64, 63);
    let sign = c.binary(BinaryOp::AShr, v, k63);
    (apply_sign(c, v, sign), sign)
}

/// Negate `v` when `sign` is all ones
fn apply_sign(c: &mut Cursor, v: Value, sign: Value) -> Value {
    let flipped = c.binary(BinaryOp::Xor, v, sign);
    c.binary(BinaryOp::Sub, flipped, sign)
}

fn emit(func: &mut Function, block: Block, kind: InstKind) -> Value {
    let inst = func.append_inst(block, kind, None);
    func.results(inst)[0]
}

fn binary(func: &mut Function, block: Block, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    let ty = func.value_type(lhs);
    emit(func, block, InstKind::Binary { op, ty, lhs, rhs })
}

/// Restoring division, one quotient bit per iteration from the top
fn udiv_helper(quantity: Quantity) -> Function {
    let (w, i32t) = (IrType::I64, IrType::I32);
    let mut f = Function::new(quantity.helper(), Signature::new(vec![w, w], vec![w]), Linkage::Internal);
    let (n, d) = (f.params()[0], f.params()[1]);
    let entry = f.create_block();
    let body = f.create_block();
    let exit = f.create_block();

    let zero = emit(&mut f, entry, InstKind::Iconst { ty: w, imm: 0 });
    let start = emit(&mut f, entry, InstKind::Iconst { ty: i32t, imm: 0 });
    f.append_inst(entry, InstKind::Jump { dest: body }, None);

    let r_phi = f.prepend_phi(body, w, Vec::new());
    let q_phi = f.prepend_phi(body, w, Vec::new());
    let i_phi = f.prepend_phi(body, i32t, Vec::new());
    let (r, q, i) = (f.results(r_phi)[0], f.results(q_phi)[0], f.results(i_phi)[0]);

    let k63 = emit(&mut f, body, InstKind::Iconst { ty: i32t, imm: 63 });
    let index = binary(&mut f, body, BinaryOp::Sub, k63, i);
    let amount = emit(&mut f, body, InstKind::Cast { op: CastOp::Zext, to: w, arg: index });
    let one = emit(&mut f, body, InstKind::Iconst { ty: w, imm: 1 });
    let shifted = binary(&mut f, body, BinaryOp::LShr, n, amount);
    let bit = binary(&mut f, body, BinaryOp::And, shifted, one);
    let top_shift = emit(&mut f, body, InstKind::Iconst { ty: w, imm: 63 });
    let top = binary(&mut f, body, BinaryOp::LShr, r, top_shift);
    let doubled = binary(&mut f, body, BinaryOp::Shl, r, one);
    let r2 = binary(&mut f, body, BinaryOp::Or, doubled, bit);
    let fits = emit(&mut f, body, InstKind::Icmp { cc: IntCC::Uge, lhs: r2, rhs: d });
    let carried = emit(&mut f, body, InstKind::Icmp { cc: IntCC::Ne, lhs: top, rhs: zero });
    let take = binary(&mut f, body, BinaryOp::Or, fits, carried);
    let reduced = binary(&mut f, body, BinaryOp::Sub, r2, d);
    let r3 = emit(
        &mut f,
        body,
        InstKind::Select {
            cond: take,
            then_val: reduced,
            else_val: r2,
        },
    );
    let q_shifted = binary(&mut f, body, BinaryOp::Shl, q, one);
    let q_bit = emit(&mut f, body, InstKind::Cast { op: CastOp::Zext, to: w, arg: take });
    let q2 = binary(&mut f, body, BinaryOp::Or, q_shifted, q_bit);
    let step = emit(&mut f, body, InstKind::Iconst { ty: i32t, imm: 1 });
    let i2 = binary(&mut f, body, BinaryOp::Add, i, step);
    let count = emit(&mut f, body, InstKind::Iconst { ty: i32t, imm: 64 });
    let done = emit(&mut f, body, InstKind::Icmp { cc: IntCC::Eq, lhs: i2, rhs: count });
    f.append_inst(
        body,
        InstKind::Branch {
            cond: done,
            then_dest: exit,
            else_dest: body,
        },
        None,
    );
    let result = match quantity {
        Quantity::Quotient => q2,
        Quantity::Remainder => r3,
    };
    f.append_inst(exit, InstKind::Return { values: vec![result] }, None);

    for (phi, initial, next) in [(i_phi, start, i2), (q_phi, zero, q2), (r_phi, zero, r3)] {
        if let InstKind::Phi { incoming, .. } = &mut f.inst_mut(phi).kind {
            *incoming = vec![(entry, initial), (body, next)];
        }
    }
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxc_ir::{verify_function, Interpreter};

    #[test]
    fn test_helpers_divide() {
        let mut module = Module::new("m");
        module.functions.push(udiv_helper(Quantity::Quotient));
        module.functions.push(udiv_helper(Quantity::Remainder));
        for func in &module.functions {
            verify_function(func).unwrap();
            assert_eq!(func.signature.returns, vec![IrType::I64]);
        }
        let mut interp = Interpreter::new(&module).unwrap();
        for (n, d) in [(100u64, 7u64), (u64::MAX, 3), (1 << 63, u64::MAX), (5, 9), (0xDEAD_BEEF_0000, 0x1_0000)] {
            assert_eq!(interp.call(UDIV64, &[n, d]).unwrap(), vec![n / d], "{n} / {d}");
            assert_eq!(interp.call(UREM64, &[n, d]).unwrap(), vec![n % d], "{n} % {d}");
        }
    }

    #[test]
    fn test_only_needed_helpers_are_added() {
        let mut b = rxc_ir::IrBuilder::new("m");
        let mut f = b.function("f", Signature::new(vec![IrType::I64, IrType::I64], vec![IrType::I64]), Linkage::External);
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let v = f.binary(BinaryOp::SRem, p[0], p[1]).unwrap();
        f.ret(&[v]).unwrap();
        f.finish().unwrap();
        let mut module = b.finish();
        assert_eq!(lower_wide_division(&mut module).unwrap(), vec![UREM64]);
        assert!(module.function(UDIV64).is_none());
        assert_eq!(lower_wide_division(&mut module).unwrap(), Vec::<&str>::new());
    }
}
