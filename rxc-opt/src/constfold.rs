//! Constant folding
//!
//! Evaluates instructions whose operands are all constants, using the same
//! evaluation rules as the interpreter, and turns branches on constant
//! conditions into jumps. Undefined operations (division by zero) are left
//! alone.

use crate::Pass;
use log::trace;
use rxc_ir::ops::{self, imm_from_canon};
use rxc_ir::{reverse_post_order, Function, Inst, InstKind, IrType, Value};

pub struct ConstFold;

/// Canonical bits of a constant operand
enum Constant {
    Int(u64),
    Float(u64),
}

fn constant(func: &Function, v: Value) -> Option<Constant> {
    let inst = func.def_inst(v)?;
    match func.kind(inst) {
        InstKind::Iconst { ty, imm } => Some(Constant::Int(ops::canon(*imm as u64, *ty))),
        InstKind::Fconst { bits, .. } => Some(Constant::Float(*bits)),
        _ => None,
    }
}

fn int_const(func: &Function, v: Value) -> Option<u64> {
    match constant(func, v)? {
        Constant::Int(x) => Some(x),
        Constant::Float(_) => None,
    }
}

fn bits_const(func: &Function, v: Value) -> Option<u64> {
    match constant(func, v)? {
        Constant::Int(x) | Constant::Float(x) => Some(x),
    }
}

fn make_const(ty: IrType, v: u64) -> InstKind {
    if ty.is_float() {
        InstKind::Fconst { ty, bits: v }
    } else {
        InstKind::Iconst {
            ty,
            imm: imm_from_canon(v, ty),
        }
    }
}

/// Constant replacement for an instruction, if it folds
fn fold(func: &Function, inst: Inst) -> Option<InstKind> {
    match func.kind(inst) {
        InstKind::Binary { op, ty, lhs, rhs } => {
            let (a, b) = (bits_const(func, *lhs)?, bits_const(func, *rhs)?);
            let r = if op.is_float() {
                ops::eval_float_binary(*op, *ty, a, b)?
            } else {
                ops::eval_int_binary(*op, *ty, a, b)?
            };
            Some(make_const(*ty, r))
        }
        InstKind::Unary { op, ty, arg } => Some(make_const(*ty, ops::eval_unary(*op, *ty, bits_const(func, *arg)?))),
        InstKind::Icmp { cc, lhs, rhs } => {
            let ty = func.value_type(*lhs);
            let ty = if ty.is_ptr() { IrType::I64 } else { ty };
            let r = ops::eval_icmp(*cc, ty, int_const(func, *lhs)?, int_const(func, *rhs)?);
            Some(make_const(IrType::I1, r as u64))
        }
        InstKind::Fcmp { cc, lhs, rhs } => {
            let ty = func.value_type(*lhs);
            let r = ops::eval_fcmp(*cc, ty, bits_const(func, *lhs)?, bits_const(func, *rhs)?);
            Some(make_const(IrType::I1, r as u64))
        }
        InstKind::Cast { op, to, arg } => {
            let from = func.value_type(*arg);
            let r = ops::eval_cast(*op, from, *to, bits_const(func, *arg)?)?;
            Some(make_const(*to, r))
        }
        _ => None,
    }
}

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "constfold"
    }

    fn description(&self) -> &'static str {
        "Evaluates constant expressions and branches at compile time"
    }

    fn run_on_function(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            for block in reverse_post_order(func) {
                for inst in func.block_insts(block).to_vec() {
                    if let Some(kind) = fold(func, inst) {
                        trace!("constfold {}: {} folded", func.name, inst);
                        func.inst_mut(inst).kind = kind;
                        round = true;
                        continue;
                    }
                    match func.kind(inst).clone() {
                        InstKind::Select { cond, then_val, else_val } => {
                            let pick = match int_const(func, cond) {
                                Some(c) => if c != 0 { then_val } else { else_val },
                                None if then_val == else_val => then_val,
                                None => continue,
                            };
                            if let Some(r) = func.result(inst) {
                                func.replace_all_uses(r, pick);
                            }
                            func.remove_inst(inst);
                            round = true;
                        }
                        InstKind::Branch { cond, then_dest, else_dest } => {
                            let Some(c) = int_const(func, cond) else { continue };
                            let (taken, dropped) = if c != 0 { (then_dest, else_dest) } else { (else_dest, then_dest) };
                            if taken != dropped {
                                func.remove_phi_incoming(dropped, block);
                            }
                            func.inst_mut(inst).kind = InstKind::Jump { dest: taken };
                            round = true;
                        }
                        _ => {}
                    }
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
