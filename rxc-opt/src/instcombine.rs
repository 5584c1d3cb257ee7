//! Instruction combining
//!
//! Local algebraic rewrites:
//! - constants move to the right-hand side of commutative operations
//! - identities (`x + 0`, `x * 1`, `x & -1`, `x >> 0`, ...) forward `x`
//! - annihilators (`x * 0`, `x & 0`) and self-cancellation (`x - x`, `x ^ x`) become constants
//! - multiplication by a power of two becomes a left shift
//! - double negation, self-comparison and phis with a single distinct input

use crate::Pass;
use log::trace;
use rxc_ir::{reverse_post_order, BinaryOp, Function, Inst, InstKind, IntCC, IrType, Value};

pub struct InstCombine;

enum Rewrite {
    /// Forward every use of the result to this value and drop the instruction
    Forward(Value),
    /// Replace the instruction in place
    Replace(InstKind),
    /// Replace in place with a binary op whose rhs is a new constant
    WithConst { op: BinaryOp, ty: IrType, lhs: Value, imm: i64 },
}

fn int_imm(func: &Function, v: Value) -> Option<i64> {
    func.const_value(v)
}

fn is_all_ones(imm: i64, ty: IrType) -> bool {
    (imm as u64) & ty.mask() == ty.mask()
}

fn combine(func: &Function, inst: Inst) -> Option<Rewrite> {
    match func.kind(inst) {
        InstKind::Binary { op, ty, lhs, rhs } => combine_binary(func, *op, *ty, *lhs, *rhs),
        InstKind::Unary { op, arg, .. } => {
            let inner = func.def_inst(*arg)?;
            match func.kind(inner) {
                InstKind::Unary { op: inner_op, arg: x, .. } if inner_op == op => Some(Rewrite::Forward(*x)),
                _ => None,
            }
        }
        InstKind::Icmp { cc, lhs, rhs } if lhs == rhs => {
            let truth = matches!(cc, IntCC::Eq | IntCC::Sle | IntCC::Sge | IntCC::Ule | IntCC::Uge);
            Some(Rewrite::Replace(InstKind::Iconst {
                ty: IrType::I1,
                imm: truth as i64,
            }))
        }
        InstKind::Icmp { cc, lhs, rhs } if func.const_value(*lhs).is_some() && func.const_value(*rhs).is_none() => {
            Some(Rewrite::Replace(InstKind::Icmp {
                cc: cc.swapped(),
                lhs: *rhs,
                rhs: *lhs,
            }))
        }
        InstKind::Phi { incoming, .. } => {
            let me = func.result(inst)?;
            let mut distinct = incoming.iter().map(|(_, v)| *v).filter(|&v| v != me);
            let first = distinct.next()?;
            if distinct.all(|v| v == first) {
                Some(Rewrite::Forward(first))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn combine_binary(func: &Function, op: BinaryOp, ty: IrType, lhs: Value, rhs: Value) -> Option<Rewrite> {
    if op.is_float() {
        return None;
    }
    // Canonicalize constants to the right
    if op.is_commutative() && int_imm(func, lhs).is_some() && int_imm(func, rhs).is_none() {
        return Some(Rewrite::Replace(InstKind::Binary { op, ty, lhs: rhs, rhs: lhs }));
    }
    let zero = || Some(Rewrite::Replace(InstKind::Iconst { ty, imm: 0 }));
    if lhs == rhs {
        match op {
            BinaryOp::Sub | BinaryOp::Xor => return zero(),
            BinaryOp::And | BinaryOp::Or => return Some(Rewrite::Forward(lhs)),
            _ => {}
        }
    }
    let c = int_imm(func, rhs)?;
    match (op, c) {
        (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor, 0) => Some(Rewrite::Forward(lhs)),
        (BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr, c) if (c as u64) % ty.bits(64) as u64 == 0 => {
            Some(Rewrite::Forward(lhs))
        }
        (BinaryOp::Mul | BinaryOp::SDiv | BinaryOp::UDiv, 1) => Some(Rewrite::Forward(lhs)),
        (BinaryOp::Mul | BinaryOp::And | BinaryOp::MulHU, 0) => zero(),
        (BinaryOp::And, c) if is_all_ones(c, ty) => Some(Rewrite::Forward(lhs)),
        (BinaryOp::Mul, c) => {
            let u = (c as u64) & ty.mask();
            if u.is_power_of_two() && u > 1 {
                Some(Rewrite::WithConst {
                    op: BinaryOp::Shl,
                    ty,
                    lhs,
                    imm: u.trailing_zeros() as i64,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

impl Pass for InstCombine {
    fn name(&self) -> &'static str {
        "instcombine"
    }

    fn description(&self) -> &'static str {
        "Applies algebraic identities and strength reduction"
    }

    fn must_run_after(&self) -> &'static [&'static str] {
        &["constfold"]
    }

    fn run_on_function(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            for block in reverse_post_order(func) {
                for inst in func.block_insts(block).to_vec() {
                    if func.inst(inst).block.is_none() {
                        continue;
                    }
                    let Some(rewrite) = combine(func, inst) else { continue };
                    trace!("instcombine {}: rewriting {}", func.name, inst);
                    match rewrite {
                        Rewrite::Forward(v) => {
                            if let Some(r) = func.result(inst) {
                                func.replace_all_uses(r, v);
                            }
                            func.remove_inst(inst);
                        }
                        Rewrite::Replace(kind) => func.inst_mut(inst).kind = kind,
                        Rewrite::WithConst { op, ty, lhs, imm } => {
                            let k = func.insert_inst_before(inst, InstKind::Iconst { ty, imm }, None);
                            let Some(rhs) = func.result(k) else { continue };
                            func.inst_mut(inst).kind = InstKind::Binary { op, ty, lhs, rhs };
                        }
                    }
                    round = true;
                }
            }
            if !round {
                break;
            }
            changed = true;
        }
        changed
    }
}
