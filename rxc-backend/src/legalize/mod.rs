//! Legalization
//!
//! Rewrites a module until every instruction has a selection pattern on the
//! target. Runs on the backend's private copy of the module, in phases:
//!
//! 1. 64-bit division on 32-bit targets becomes a call to a helper added to
//!    the module (`divmod`)
//! 2. target-specific operation expansion (`ops`)
//! 3. 64-bit integers on 32-bit targets are split into register pairs (`wide`)
//! 4. operation expansion again, for what phase 3 produced
//! 5. `i1`/`i8`/`i16` arithmetic is promoted to 32 bits (`promote`)
//! 6. branch conditions, pointer offsets and critical edges are put in the
//!    shape instruction selection expects (`shape`)

mod divmod;
mod ops;
mod promote;
mod shape;
mod wide;

use log::debug;
use rxc_common::{Result, SourceLocation};
use rxc_ir::{BinaryOp, CastOp, Function, Inst, InstKind, IntCC, IrType, Module, UnaryOp, Value};
use rxc_target::TargetDescription;

pub use divmod::{UDIV64, UREM64};

/// Legalize every defined function of `module` for `target`
pub fn legalize_module(module: &mut Module, target: &TargetDescription) -> Result<()> {
    for func in defined(module) {
        shape::remove_unreachable(func);
    }
    if target.register_bits < 64 {
        for helper in divmod::lower_wide_division(module)? {
            debug!("added {} to module '{}'", helper, module.name);
        }
        for func in module.functions.iter_mut().filter(|f| f.is_declaration()) {
            wide::split_signature(func);
        }
    }
    for func in defined(module) {
        legalize_function(func, target)?;
    }
    Ok(())
}

fn defined(module: &mut Module) -> impl Iterator<Item = &mut Function> {
    module.functions.iter_mut().filter(|f| !f.is_declaration())
}

/// Phases 2 to 6 on one function
pub fn legalize_function(func: &mut Function, target: &TargetDescription) -> Result<()> {
    ops::expand_operations(func, target)?;
    if target.register_bits < 64 {
        wide::split_wide_integers(func)?;
        ops::expand_operations(func, target)?;
    }
    promote::promote_narrow(func);
    shape::fix_pointer_offsets(func, target);
    shape::fix_branch_conditions(func);
    shape::split_critical_edges(func);
    debug!("legalized '{}' for {}: {} instructions", func.name, target.name, func.all_insts().len());
    Ok(())
}

/// Inserts instructions in front of a fixed instruction, carrying its
/// source location
pub(crate) struct Cursor<'f> {
    pub func: &'f mut Function,
    before: Inst,
    loc: Option<SourceLocation>,
}

impl<'f> Cursor<'f> {
    pub fn at(func: &'f mut Function, before: Inst) -> Self {
        let loc = func.inst(before).loc.clone();
        Self { func, before, loc }
    }

    pub fn ins(&mut self, kind: InstKind) -> Inst {
        self.func.insert_inst_before(self.before, kind, self.loc.clone())
    }

    /// Insert a single-result instruction and return the result
    pub fn value(&mut self, kind: InstKind) -> Value {
        let inst = self.ins(kind);
        self.func.results(inst)[0]
    }

    pub fn ty(&self, value: Value) -> IrType {
        self.func.value_type(value)
    }

    pub fn iconst(&mut self, ty: IrType, imm: i64) -> Value {
        self.value(InstKind::Iconst { ty, imm })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.ty(lhs);
        self.value(InstKind::Binary { op, ty, lhs, rhs })
    }

    pub fn unary(&mut self, op: UnaryOp, arg: Value) -> Value {
        let ty = self.ty(arg);
        self.value(InstKind::Unary { op, ty, arg })
    }

    pub fn icmp(&mut self, cc: IntCC, lhs: Value, rhs: Value) -> Value {
        self.value(InstKind::Icmp { cc, lhs, rhs })
    }

    pub fn cast(&mut self, op: CastOp, arg: Value, to: IrType) -> Value {
        self.value(InstKind::Cast { op, to, arg })
    }

    pub fn select(&mut self, cond: Value, then_val: Value, else_val: Value) -> Value {
        self.value(InstKind::Select {
            cond,
            then_val,
            else_val,
        })
    }

    /// Widen or narrow an integer to `to`; sign- or zero-extending
    pub fn resize(&mut self, arg: Value, to: IrType, signed: bool) -> Value {
        let from = self.ty(arg);
        let (fb, tb) = (from.bits(64), to.bits(64));
        if fb == tb {
            arg
        } else if fb < tb {
            self.cast(if signed { CastOp::Sext } else { CastOp::Zext }, arg, to)
        } else {
            self.cast(CastOp::Trunc, arg, to)
        }
    }
}

/// Replace the single result of `inst` with `value` and drop `inst`
pub(crate) fn replace_inst(func: &mut Function, inst: Inst, value: Value) {
    if let Some(old) = func.result(inst) {
        func.replace_all_uses(old, value);
    }
    func.remove_inst(inst);
}

#[cfg(test)]
mod tests;
