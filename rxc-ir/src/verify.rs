//! IR Verifier
//!
//! Checks the structural invariants every pass relies on and reports the
//! first violation. Never repairs anything.

use crate::cfg::{ControlFlowGraph, DominatorTree};
use crate::function::Function;
use crate::instructions::InstKind;
use crate::module::Module;
use crate::types::IrType;
use crate::values::{Block, Inst, Value, ValueDef};
use log::debug;
use rxc_common::{CompilerError, Result};
use std::collections::HashSet;

pub fn verify_module(module: &Module) -> Result<()> {
    let mut names = HashSet::new();
    for func in &module.functions {
        if !names.insert(func.name.as_str()) {
            return Err(CompilerError::verification(&func.name, None, None, "function defined twice"));
        }
        verify_function(func)?;
    }
    for global in &module.globals {
        if !names.insert(global.name.as_str()) {
            return Err(CompilerError::verification(&global.name, None, None, "symbol defined twice"));
        }
    }
    Ok(())
}

pub fn verify_function(func: &Function) -> Result<()> {
    if func.is_declaration() {
        return Ok(());
    }
    debug!("verifying function '{}'", func.name);
    let v = Verifier::new(func);
    v.check_structure()?;
    v.check_instructions()?;
    Ok(())
}

struct Verifier<'a> {
    func: &'a Function,
    cfg: ControlFlowGraph,
    domtree: DominatorTree,
}

impl<'a> Verifier<'a> {
    fn new(func: &'a Function) -> Self {
        let cfg = ControlFlowGraph::compute(func);
        let domtree = DominatorTree::compute(func, &cfg);
        Self { func, cfg, domtree }
    }

    fn fail(&self, block: Option<Block>, inst: Option<Inst>, message: impl Into<String>) -> CompilerError {
        CompilerError::verification(&self.func.name, block.map(|b| b.0), inst.map(|i| i.0), message)
    }

    /// Termination, successor validity, entry and phi placement
    fn check_structure(&self) -> Result<()> {
        let func = self.func;
        for (n, &ty) in func.signature.params.iter().enumerate() {
            match func.params().get(n) {
                Some(&p) if func.value_type(p) == ty => {}
                _ => return Err(self.fail(None, None, format!("parameter {n} does not match signature"))),
            }
        }
        if let Some(entry) = func.entry_block() {
            if !self.cfg.preds(entry).is_empty() {
                return Err(self.fail(Some(entry), None, "entry block has predecessors"));
            }
        }
        for &block in func.blocks() {
            let insts = func.block_insts(block);
            let Some((&last, body)) = insts.split_last() else {
                return Err(self.fail(Some(block), None, "empty block"));
            };
            if !func.kind(last).is_terminator() {
                return Err(self.fail(Some(block), Some(last), "block does not end in a terminator"));
            }
            let mut seen_non_phi = false;
            for &inst in body {
                let kind = func.kind(inst);
                if kind.is_terminator() {
                    return Err(self.fail(Some(block), Some(inst), "terminator in the middle of a block"));
                }
                if kind.is_phi() && seen_non_phi {
                    return Err(self.fail(Some(block), Some(inst), "phi after non-phi instruction"));
                }
                seen_non_phi |= !kind.is_phi();
            }
            for &inst in insts {
                if func.inst(inst).block != Some(block) {
                    return Err(self.fail(Some(block), Some(inst), "instruction has stale block link"));
                }
            }
            for succ in func.kind(last).successors() {
                if !func.is_valid_block(succ) {
                    return Err(self.fail(Some(block), Some(last), format!("branch to unknown block {succ}")));
                }
            }
        }
        Ok(())
    }

    fn check_instructions(&self) -> Result<()> {
        let func = self.func;
        for &block in func.blocks() {
            for (pos, &inst) in func.block_insts(block).iter().enumerate() {
                self.check_types(block, inst)?;
                if let InstKind::Phi { incoming, .. } = func.kind(inst) {
                    self.check_phi(block, inst, incoming)?;
                    continue;
                }
                if !self.domtree.is_reachable(block) {
                    continue;
                }
                for v in func.kind(inst).operands() {
                    self.check_dominates(v, block, pos, inst)?;
                }
            }
        }
        Ok(())
    }

    fn check_phi(&self, block: Block, inst: Inst, incoming: &[(Block, Value)]) -> Result<()> {
        let preds = self.cfg.preds(block);
        let mut covered = HashSet::new();
        for &(pred, value) in incoming {
            if !preds.contains(&pred) {
                return Err(self.fail(Some(block), Some(inst), format!("phi incoming from non-predecessor {pred}")));
            }
            if !covered.insert(pred) {
                return Err(self.fail(Some(block), Some(inst), format!("phi has two values for {pred}")));
            }
            if self.domtree.is_reachable(pred) {
                let end = self.func.block_insts(pred).len();
                self.check_dominates(value, pred, end, inst)?;
            }
        }
        if covered.len() != preds.len() {
            return Err(self.fail(Some(block), Some(inst), "phi does not cover every predecessor"));
        }
        Ok(())
    }

    /// Definition of `value` must dominate position `pos` of `block`
    fn check_dominates(&self, value: Value, block: Block, pos: usize, user: Inst) -> Result<()> {
        let func = self.func;
        if !func.is_valid_value(value) {
            return Err(self.fail(Some(block), Some(user), format!("use of undefined value {value}")));
        }
        let def_inst = match func.value_def(value) {
            ValueDef::Param(n) => {
                if func.params().get(n as usize) == Some(&value) {
                    return Ok(());
                }
                return Err(self.fail(Some(block), Some(user), format!("use of stale parameter {value}")));
            }
            ValueDef::Result(i, _) => i,
        };
        let Some(def_block) = func.inst(def_inst).block else {
            return Err(self.fail(Some(block), Some(user), format!("use of removed value {value}")));
        };
        if def_block == block {
            let def_pos = func.block_insts(block).iter().position(|&i| i == def_inst);
            return match def_pos {
                Some(p) if p < pos => Ok(()),
                _ => Err(self.fail(Some(block), Some(user), format!("{value} used before its definition"))),
            };
        }
        if self.domtree.dominates(def_block, block) {
            Ok(())
        } else {
            Err(self.fail(
                Some(block),
                Some(user),
                format!("{value} defined in {def_block} does not dominate its use"),
            ))
        }
    }

    fn check_types(&self, block: Block, inst: Inst) -> Result<()> {
        let func = self.func;
        let ty = |v: Value| {
            if func.is_valid_value(v) {
                Some(func.value_type(v))
            } else {
                None
            }
        };
        let bad = |msg: String| Err(self.fail(Some(block), Some(inst), msg));
        match func.kind(inst) {
            InstKind::Binary { op, ty: t, lhs, rhs } => {
                if ty(*lhs) != Some(*t) || ty(*rhs) != Some(*t) {
                    return bad(format!("{} operands must be {t}", op.name()));
                }
                if op.is_float() != t.is_float() || t.is_ptr() {
                    return bad(format!("{} on {t}", op.name()));
                }
            }
            InstKind::Unary { ty: t, arg, .. } => {
                if ty(*arg) != Some(*t) {
                    return bad(format!("unary operand must be {t}"));
                }
            }
            InstKind::Icmp { lhs, rhs, .. } => {
                if ty(*lhs) != ty(*rhs) || !ty(*lhs).is_some_and(IrType::is_int_like) {
                    return bad("icmp operand types".to_string());
                }
            }
            InstKind::Fcmp { lhs, rhs, .. } => {
                if ty(*lhs) != ty(*rhs) || !ty(*lhs).is_some_and(IrType::is_float) {
                    return bad("fcmp operand types".to_string());
                }
            }
            InstKind::Cast { op, to, arg } => match ty(*arg) {
                Some(from) if op.is_valid(from, *to) => {}
                _ => return bad(format!("invalid {}", op.name())),
            },
            InstKind::Select { cond, then_val, else_val } => {
                if ty(*cond) != Some(IrType::I1) || ty(*then_val) != ty(*else_val) {
                    return bad("select operand types".to_string());
                }
            }
            InstKind::Load { ptr, .. } | InstKind::Store { ptr, .. } => {
                if ty(*ptr) != Some(IrType::Ptr) {
                    return bad("memory access through non-pointer".to_string());
                }
            }
            InstKind::PtrAdd { ptr, offset } => {
                if ty(*ptr) != Some(IrType::Ptr) || !ty(*offset).is_some_and(IrType::is_int) {
                    return bad("ptradd operand types".to_string());
                }
            }
            InstKind::Phi { ty: t, incoming } => {
                if incoming.iter().any(|(_, v)| ty(*v) != Some(*t)) {
                    return bad(format!("phi incoming values must be {t}"));
                }
            }
            InstKind::Branch { cond, .. } => {
                if ty(*cond) != Some(IrType::I1) {
                    return bad("branch condition must be i1".to_string());
                }
            }
            InstKind::Return { values } => {
                let types: Vec<Option<IrType>> = values.iter().map(|v| ty(*v)).collect();
                let expected: Vec<Option<IrType>> = func.signature.returns.iter().map(|t| Some(*t)).collect();
                if types != expected {
                    return bad("return values do not match signature".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::function::Signature;
    use crate::module::Linkage;
    use crate::ops::{BinaryOp, IntCC};

    fn diamond() -> Module {
        let mut b = IrBuilder::new("m");
        let mut f = b.function("max", Signature::new(vec![IrType::I32, IrType::I32], vec![IrType::I32]), Linkage::External);
        let p = f.params();
        let entry = f.create_block();
        let left = f.create_block();
        let right = f.create_block();
        let join = f.create_block();
        f.switch_to_block(entry).unwrap();
        let c = f.icmp(IntCC::Sgt, p[0], p[1]).unwrap();
        f.branch(c, left, right).unwrap();
        f.switch_to_block(left).unwrap();
        f.jump(join).unwrap();
        f.switch_to_block(right).unwrap();
        f.jump(join).unwrap();
        f.switch_to_block(join).unwrap();
        let phi = f.phi(IrType::I32).unwrap();
        f.add_phi_incoming(phi, left, p[0]).unwrap();
        f.add_phi_incoming(phi, right, p[1]).unwrap();
        f.ret(&[phi]).unwrap();
        f.finish().unwrap();
        b.finish()
    }

    #[test]
    fn test_builder_output_verifies() {
        assert!(verify_module(&diamond()).is_ok());
    }

    #[test]
    fn test_removed_terminator_fails() {
        let mut m = diamond();
        let f = &mut m.functions[0];
        let left = f.blocks()[1];
        let term = f.terminator(left).unwrap();
        f.remove_inst(term);
        let err = verify_module(&m).unwrap_err();
        assert!(matches!(err, CompilerError::Verification { .. }), "{err}");
    }

    #[test]
    fn test_non_dominating_use_fails() {
        let mut m = diamond();
        let f = &mut m.functions[0];
        let left = f.blocks()[1];
        let join = f.blocks()[3];
        // Define a value in `left` and use it in `join`, which `left` does not dominate
        let term = f.terminator(left).unwrap();
        let c = f.insert_inst_before(term, InstKind::Iconst { ty: IrType::I32, imm: 1 }, None);
        let c = f.result(c).unwrap();
        let ret = f.terminator(join).unwrap();
        let p0 = f.params()[0];
        f.insert_inst_before(ret, InstKind::Binary { op: BinaryOp::Add, ty: IrType::I32, lhs: p0, rhs: c }, None);
        let err = verify_module(&m).unwrap_err();
        match err {
            CompilerError::Verification { message, .. } => assert!(message.contains("does not dominate"), "{message}"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_phi_missing_predecessor_fails() {
        let mut m = diamond();
        let f = &mut m.functions[0];
        let join = f.blocks()[3];
        let phi = f.phis(join)[0];
        if let InstKind::Phi { incoming, .. } = &mut f.inst_mut(phi).kind {
            incoming.pop();
        }
        assert!(verify_module(&m).is_err());
    }
}
