//! 64-bit integers on 32-bit targets
//!
//! Every `i64` value is replaced by a `(lo, hi)` pair of `i32` values.
//! Parameters, call arguments and results are split in place (low half
//! first), so split functions keep calling each other consistently.
//! Division has already been turned into helper calls.

use super::Cursor;
use rxc_common::{CompilerError, Result};
use rxc_ir::{
    reverse_post_order, BinaryOp, Block, CastOp, Function, Inst, InstKind, IntCC, IrType, Signature, UnaryOp, Value,
};
use std::collections::HashMap;

type Pair = (Value, Value);

const W: IrType = IrType::I32;

fn split_types(types: &[IrType]) -> Vec<IrType> {
    types
        .iter()
        .flat_map(|&ty| if ty == IrType::I64 { vec![W, W] } else { vec![ty] })
        .collect()
}

struct Splitter {
    pairs: HashMap<Value, Pair>,
    /// Original `i64` phis and their halves, filled once every value is split
    phis: Vec<(Inst, Inst, Inst)>,
}

impl Splitter {
    fn pair(&self, func: &Function, value: Value) -> Result<Pair> {
        self.pairs.get(&value).copied().ok_or_else(|| {
            CompilerError::internal(format!("64-bit value {value} in '{}' was not split", func.name))
        })
    }

    fn split_values(&self, func: &Function, values: &[Value]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(values.len());
        for &v in values {
            if func.value_type(v) == IrType::I64 {
                let (lo, hi) = self.pair(func, v)?;
                out.extend([lo, hi]);
            } else {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Map old results onto the results of their replacement
    fn map_results(&mut self, func: &mut Function, old: &[Value], new: &[Value]) {
        let mut next = new.iter().copied();
        for &v in old {
            if func.value_type(v) == IrType::I64 {
                if let (Some(lo), Some(hi)) = (next.next(), next.next()) {
                    self.pairs.insert(v, (lo, hi));
                }
            } else if let Some(n) = next.next() {
                func.replace_all_uses(v, n);
            }
        }
    }
}

fn involves_wide(func: &Function, inst: Inst) -> bool {
    let kind = func.kind(inst);
    kind.operands().iter().any(|&v| func.value_type(v) == IrType::I64)
        || func.results(inst).iter().any(|&v| func.value_type(v) == IrType::I64)
}

/// Split 64-bit parameters and results; the new parameters when anything changed
pub fn split_signature(func: &mut Function) -> Option<Vec<Value>> {
    let sig = &func.signature;
    if !sig.params.contains(&IrType::I64) && !sig.returns.contains(&IrType::I64) {
        return None;
    }
    let split = Signature::new(split_types(&sig.params), split_types(&sig.returns));
    Some(func.set_signature(split))
}

pub fn split_wide_integers(func: &mut Function) -> Result<()> {
    let mut s = Splitter {
        pairs: HashMap::new(),
        phis: Vec::new(),
    };

    let old = func.params().to_vec();
    if let Some(new) = split_signature(func) {
        s.map_results(func, &old, &new);
    }

    let order = reverse_post_order(func);
    for &block in &order {
        for phi in func.phis(block) {
            let InstKind::Phi { ty: IrType::I64, .. } = func.kind(phi) else { continue };
            let lo = func.prepend_phi(block, W, Vec::new());
            let hi = func.prepend_phi(block, W, Vec::new());
            if let Some(r) = func.result(phi) {
                let pair = (func.results(lo)[0], func.results(hi)[0]);
                s.pairs.insert(r, pair);
            }
            s.phis.push((phi, lo, hi));
        }
    }

    for &block in &order {
        for inst in func.block_insts(block).to_vec() {
            if func.kind(inst).is_phi() || !involves_wide(func, inst) {
                continue;
            }
            split_inst(func, &mut s, inst)?;
        }
    }

    for (phi, lo, hi) in std::mem::take(&mut s.phis) {
        let InstKind::Phi { incoming, .. } = func.kind(phi).clone() else { continue };
        let mut lo_in: Vec<(Block, Value)> = Vec::with_capacity(incoming.len());
        let mut hi_in: Vec<(Block, Value)> = Vec::with_capacity(incoming.len());
        for (pred, v) in incoming {
            let (l, h) = s.pair(func, v)?;
            lo_in.push((pred, l));
            hi_in.push((pred, h));
        }
        func.inst_mut(lo).kind = InstKind::Phi { ty: W, incoming: lo_in };
        func.inst_mut(hi).kind = InstKind::Phi { ty: W, incoming: hi_in };
        func.remove_inst(phi);
    }
    Ok(())
}

fn split_inst(func: &mut Function, s: &mut Splitter, inst: Inst) -> Result<()> {
    let kind = func.kind(inst).clone();
    let result = func.result(inst);
    let name = func.name.clone();
    let unexpected = |what: &str| CompilerError::internal(format!("cannot split 64-bit {what} in '{name}'"));

    // instructions whose single result is a pair
    let pair: Option<Pair> = match kind {
        InstKind::Iconst { imm, .. } => {
            let mut c = Cursor::at(func, inst);
            let lo = c.iconst(W, imm as i32 as i64);
            let hi = c.iconst(W, (imm >> 32) as i32 as i64);
            Some((lo, hi))
        }
        InstKind::Binary { op, lhs, rhs, .. } => {
            let a = s.pair(func, lhs)?;
            let b = s.pair(func, rhs)?;
            let mut c = Cursor::at(func, inst);
            Some(match op {
                BinaryOp::Add => add(&mut c, a, b),
                BinaryOp::Sub => sub(&mut c, a, b),
                BinaryOp::Mul => mul(&mut c, a, b),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => (c.binary(op, a.0, b.0), c.binary(op, a.1, b.1)),
                BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => shift(&mut c, op, a, b.0),
                _ => return Err(unexpected(op.name())),
            })
        }
        InstKind::Unary { op, arg, .. } => {
            let a = s.pair(func, arg)?;
            let mut c = Cursor::at(func, inst);
            Some(match op {
                UnaryOp::Neg => {
                    let zero = c.iconst(W, 0);
                    sub(&mut c, (zero, zero), a)
                }
                UnaryOp::Not => (c.unary(op, a.0), c.unary(op, a.1)),
                UnaryOp::FNeg => return Err(unexpected(op.name())),
            })
        }
        InstKind::Cast {
            op: op @ (CastOp::Zext | CastOp::Sext),
            arg,
            ..
        } => {
            let mut c = Cursor::at(func, inst);
            let lo = c.resize(arg, W, op == CastOp::Sext);
            let hi = if op == CastOp::Sext {
                let k = c.iconst(W, 31);
                c.binary(BinaryOp::AShr, lo, k)
            } else {
                c.iconst(W, 0)
            };
            Some((lo, hi))
        }
        InstKind::Load { ptr, .. } => {
            let mut c = Cursor::at(func, inst);
            let lo = c.value(InstKind::Load { ty: W, ptr });
            let four = c.iconst(W, 4);
            let upper = c.value(InstKind::PtrAdd { ptr, offset: four });
            let hi = c.value(InstKind::Load { ty: W, ptr: upper });
            Some((lo, hi))
        }
        InstKind::Select { cond, then_val, else_val } => {
            let t = s.pair(func, then_val)?;
            let e = s.pair(func, else_val)?;
            let mut c = Cursor::at(func, inst);
            Some((c.select(cond, t.0, e.0), c.select(cond, t.1, e.1)))
        }
        _ => None,
    };
    if let (Some(pair), Some(r)) = (pair, result) {
        s.pairs.insert(r, pair);
        func.remove_inst(inst);
        return Ok(());
    }

    match kind {
        InstKind::Icmp { cc, lhs, rhs } => {
            let a = s.pair(func, lhs)?;
            let b = s.pair(func, rhs)?;
            let flag = compare(&mut Cursor::at(func, inst), cc, a, b);
            super::replace_inst(func, inst, flag);
        }
        InstKind::Cast { op, to, arg } => {
            let a = s.pair(func, arg)?;
            let mut c = Cursor::at(func, inst);
            let value = match op {
                CastOp::Trunc => c.resize(a.0, to, false),
                CastOp::SiToFp | CastOp::UiToFp => {
                    let hi = c.cast(op, a.1, IrType::F64);
                    let lo = c.cast(CastOp::UiToFp, a.0, IrType::F64);
                    let scale = c.value(InstKind::Fconst {
                        ty: IrType::F64,
                        bits: 4294967296.0f64.to_bits(),
                    });
                    let upper = c.binary(BinaryOp::FMul, hi, scale);
                    let sum = c.binary(BinaryOp::FAdd, upper, lo);
                    if to == IrType::F32 {
                        c.cast(CastOp::FpTrunc, sum, to)
                    } else {
                        sum
                    }
                }
                _ => return Err(unexpected(op.name())),
            };
            super::replace_inst(func, inst, value);
        }
        InstKind::Store { value, ptr } => {
            let (lo, hi) = s.pair(func, value)?;
            let mut c = Cursor::at(func, inst);
            c.ins(InstKind::Store { value: lo, ptr });
            let four = c.iconst(W, 4);
            let upper = c.value(InstKind::PtrAdd { ptr, offset: four });
            c.ins(InstKind::Store { value: hi, ptr: upper });
            func.remove_inst(inst);
        }
        InstKind::PtrAdd { offset, .. } => {
            let (lo, _) = s.pair(func, offset)?;
            if let InstKind::PtrAdd { offset, .. } = &mut func.inst_mut(inst).kind {
                *offset = lo;
            }
        }
        InstKind::Call { callee, args, rets } => {
            let args = s.split_values(func, &args)?;
            let old = func.results(inst).to_vec();
            let call = Cursor::at(func, inst).ins(InstKind::Call {
                callee,
                args,
                rets: split_types(&rets),
            });
            let new = func.results(call).to_vec();
            s.map_results(func, &old, &new);
            func.remove_inst(inst);
        }
        InstKind::Return { values } => {
            let values = s.split_values(func, &values)?;
            Cursor::at(func, inst).ins(InstKind::Return { values });
            func.remove_inst(inst);
        }
        other => return Err(unexpected(&other.mnemonic())),
    }
    Ok(())
}

fn add(c: &mut Cursor, a: Pair, b: Pair) -> Pair {
    let lo = c.binary(BinaryOp::Add, a.0, b.0);
    let wrapped = c.icmp(IntCC::Ult, lo, a.0);
    let carry = c.cast(CastOp::Zext, wrapped, W);
    let hi = c.binary(BinaryOp::Add, a.1, b.1);
    (lo, c.binary(BinaryOp::Add, hi, carry))
}

fn sub(c: &mut Cursor, a: Pair, b: Pair) -> Pair {
    let lo = c.binary(BinaryOp::Sub, a.0, b.0);
    let wrapped = c.icmp(IntCC::Ult, a.0, b.0);
    let borrow = c.cast(CastOp::Zext, wrapped, W);
    let hi = c.binary(BinaryOp::Sub, a.1, b.1);
    (lo, c.binary(BinaryOp::Sub, hi, borrow))
}

fn mul(c: &mut Cursor, a: Pair, b: Pair) -> Pair {
    let lo = c.binary(BinaryOp::Mul, a.0, b.0);
    let carry = c.binary(BinaryOp::MulHU, a.0, b.0);
    let cross1 = c.binary(BinaryOp::Mul, a.0, b.1);
    let cross2 = c.binary(BinaryOp::Mul, a.1, b.0);
    let hi = c.binary(BinaryOp::Add, carry, cross1);
    (lo, c.binary(BinaryOp::Add, hi, cross2))
}

/// Shift by `amount & 63`. Amounts of 32 and more move one half into the
/// other; the bits crossing halves are shifted in two steps so no single
/// shift reaches 32.
fn shift(c: &mut Cursor, op: BinaryOp, a: Pair, amount: Value) -> Pair {
    let k63 = c.iconst(W, 63);
    let k32 = c.iconst(W, 32);
    let k31 = c.iconst(W, 31);
    let one = c.iconst(W, 1);
    let n = c.binary(BinaryOp::And, amount, k63);
    let big = c.icmp(IntCC::Uge, n, k32);
    let m = c.binary(BinaryOp::And, n, k31);
    let rest = c.binary(BinaryOp::Sub, k31, m);
    match op {
        BinaryOp::Shl => {
            let lo = c.binary(BinaryOp::Shl, a.0, m);
            let spill = c.binary(BinaryOp::LShr, a.0, one);
            let spill = c.binary(BinaryOp::LShr, spill, rest);
            let hi = c.binary(BinaryOp::Shl, a.1, m);
            let hi = c.binary(BinaryOp::Or, hi, spill);
            let zero = c.iconst(W, 0);
            (c.select(big, zero, lo), c.select(big, lo, hi))
        }
        _ => {
            let spill = c.binary(BinaryOp::Shl, a.1, one);
            let spill = c.binary(BinaryOp::Shl, spill, rest);
            let lo = c.binary(BinaryOp::LShr, a.0, m);
            let lo = c.binary(BinaryOp::Or, lo, spill);
            let hi = c.binary(op, a.1, m);
            let fill = if op == BinaryOp::AShr {
                c.binary(BinaryOp::AShr, a.1, k31)
            } else {
                c.iconst(W, 0)
            };
            (c.select(big, hi, lo), c.select(big, fill, hi))
        }
    }
}

/// Equality on both halves; orderings decided by the high halves unless
/// they are equal
fn compare(c: &mut Cursor, cc: IntCC, a: Pair, b: Pair) -> Value {
    match cc {
        IntCC::Eq | IntCC::Ne => {
            let x = c.binary(BinaryOp::Xor, a.0, b.0);
            let y = c.binary(BinaryOp::Xor, a.1, b.1);
            let diff = c.binary(BinaryOp::Or, x, y);
            let zero = c.iconst(W, 0);
            c.icmp(cc, diff, zero)
        }
        _ => {
            let (strict, low) = match cc {
                IntCC::Slt | IntCC::Sle => (IntCC::Slt, if cc == IntCC::Slt { IntCC::Ult } else { IntCC::Ule }),
                IntCC::Sgt | IntCC::Sge => (IntCC::Sgt, if cc == IntCC::Sgt { IntCC::Ugt } else { IntCC::Uge }),
                IntCC::Ult | IntCC::Ule => (IntCC::Ult, cc),
                _ => (IntCC::Ugt, cc),
            };
            let high = c.icmp(strict, a.1, b.1);
            let same = c.icmp(IntCC::Eq, a.1, b.1);
            let below = c.icmp(low, a.0, b.0);
            let tie = c.binary(BinaryOp::And, same, below);
            c.binary(BinaryOp::Or, high, tie)
        }
    }
}
