//! Tree covering
//!
//! `cover_block` computes, bottom-up, the cheapest rule for every node of a
//! block. `pick_roots` then walks the block backwards and decides which
//! nodes are emitted on their own: side effects, terminators, values needed
//! in a register elsewhere and the register leaves of chosen covers. The
//! remaining nodes are folded into their users.

use super::Selector;
use rxc_common::{CompilerError, Result};
use rxc_ir::{ops::sext, Block, Inst, InstKind, IrType, Value};
use rxc_target::{Captures, Pat};
use std::collections::{HashMap, HashSet};

/// Chosen rule index and total cost of the best cover of each node
pub(crate) type Covers = HashMap<Inst, (usize, u32)>;

fn selectable(kind: &InstKind) -> bool {
    !matches!(
        kind,
        InstKind::Call { .. } | InstKind::Return { .. } | InstKind::Jump { .. } | InstKind::Phi { .. } | InstKind::Unreachable
    )
}

impl Selector<'_> {
    /// Sign-extended immediate, `i1` kept as 0 or 1
    fn normalize(&self, ty: IrType, imm: i64) -> i64 {
        match ty.bits(self.target.pointer_bits) {
            1 => imm & 1,
            bits if bits >= 64 => imm,
            bits => sext(imm as u64, bits),
        }
    }

    fn imm_of(&self, value: Value) -> Option<i64> {
        match self.func.kind(self.func.def_inst(value)?) {
            InstKind::Iconst { ty, imm } => Some(self.normalize(*ty, *imm)),
            _ => None,
        }
    }

    /// Definition of `value` when it may be folded into its only user
    fn foldable(&self, value: Value, block: Block) -> Option<Inst> {
        let def = self.func.def_inst(value)?;
        let ok = self.func.inst(def).block == Some(block)
            && self.uses[value.index()] == 1
            && !self.external[value.index()]
            && self.func.kind(def).is_pure();
        ok.then_some(def)
    }

    /// `(ty, from)` a rule must accept at a root
    fn root_types(&self, inst: Inst) -> (IrType, Option<IrType>) {
        let func = self.func;
        let kind = func.kind(inst);
        let ty = match kind {
            InstKind::Store { value, .. } => func.value_type(*value),
            InstKind::Branch { cond, .. } => func.value_type(*cond),
            _ => func.result(inst).map_or(IrType::I32, |r| func.value_type(r)),
        };
        let from = match kind {
            InstKind::Branch { cond, .. } | InstKind::Select { cond, .. } => {
                let compare = func.def_inst(*cond).map(|d| func.kind(d));
                match compare {
                    Some(InstKind::Icmp { lhs, .. } | InstKind::Fcmp { lhs, .. }) => Some(func.value_type(*lhs)),
                    _ => Some(func.value_type(*cond)),
                }
            }
            _ => kind.operands().first().map(|&v| func.value_type(v)),
        };
        (ty, from)
    }

    /// Cost of matching `pat` rooted at `inst`, children included
    fn match_node(&self, pat: &Pat, inst: Inst, block: Block, covers: &Covers) -> Option<u32> {
        let Pat::Node(node, children) = pat else { return None };
        let kind = self.func.kind(inst);
        if !node.matches(kind) {
            return None;
        }
        let operands = kind.operands();
        if operands.len() != children.len() {
            return None;
        }
        let mut cost = 0;
        for (child, &v) in children.iter().zip(&operands) {
            cost += match child {
                Pat::Reg => self
                    .foldable(v, block)
                    .and_then(|d| covers.get(&d))
                    .map_or(0, |&(_, c)| c),
                Pat::Imm(pred) => {
                    if !self.imm_of(v).is_some_and(pred) {
                        return None;
                    }
                    0
                }
                Pat::Node(..) => {
                    let def = self.foldable(v, block)?;
                    self.match_node(child, def, block, covers)?
                }
            };
        }
        Some(cost)
    }

    pub(super) fn cover_block(&self, block: Block) -> Covers {
        let mut covers = Covers::new();
        for &inst in self.func.block_insts(block) {
            if !selectable(self.func.kind(inst)) {
                continue;
            }
            let (ty, from) = self.root_types(inst);
            let mut choice: Option<(usize, u32)> = None;
            for (i, rule) in self.target.patterns.iter().enumerate() {
                if !rule.accepts(ty, from) {
                    continue;
                }
                if let Some(cost) = self.match_node(&rule.pattern, inst, block, &covers) {
                    let total = rule.cost + cost;
                    if choice.map_or(true, |(_, best)| total < best) {
                        choice = Some((i, total));
                    }
                }
            }
            if let Some(choice) = choice {
                covers.insert(inst, choice);
            }
        }
        covers
    }

    fn reg_leaves(&self, pat: &Pat, inst: Inst, out: &mut Vec<Value>) {
        let Pat::Node(_, children) = pat else { return };
        for (child, v) in children.iter().zip(self.func.kind(inst).operands()) {
            match child {
                Pat::Reg => out.push(v),
                Pat::Imm(_) => {}
                Pat::Node(..) => {
                    if let Some(def) = self.func.def_inst(v) {
                        self.reg_leaves(child, def, out);
                    }
                }
            }
        }
    }

    /// Instructions emitted on their own, in block order
    pub(super) fn pick_roots(&self, block: Block, covers: &Covers) -> Vec<Inst> {
        let func = self.func;
        let mut needed: HashSet<Value> = HashSet::new();
        let mut roots = Vec::new();
        for &inst in func.block_insts(block).iter().rev() {
            let kind = func.kind(inst);
            let used = func
                .results(inst)
                .iter()
                .any(|r| self.external[r.index()] || needed.contains(r));
            if kind.is_phi() || !(used || kind.has_side_effects()) {
                continue;
            }
            roots.push(inst);
            match covers.get(&inst) {
                Some(&(rule, _)) if selectable(kind) => {
                    let mut leaves = Vec::new();
                    self.reg_leaves(&self.target.patterns[rule].pattern, inst, &mut leaves);
                    needed.extend(leaves);
                }
                _ => needed.extend(kind.operands()),
            }
        }
        roots.reverse();
        roots
    }

    fn capture(&mut self, pat: &Pat, inst: Inst, caps: &mut Captures) {
        let Pat::Node(_, children) = *pat else { return };
        let kind = self.func.kind(inst).clone();
        match &kind {
            InstKind::Iconst { ty, imm } => {
                let imm = self.normalize(*ty, *imm);
                caps.imms.push(imm);
            }
            InstKind::Fconst { bits, .. } => caps.bits = *bits,
            InstKind::Icmp { cc, .. } => caps.int_cc = Some(*cc),
            InstKind::Fcmp { cc, .. } => caps.float_cc = Some(*cc),
            InstKind::GlobalAddr { symbol } => caps.symbol = Some(symbol.clone()),
            InstKind::Alloca { .. } => caps.slot = self.slots.get(&inst).copied(),
            InstKind::Branch {
                then_dest, else_dest, ..
            } => caps.blocks = [self.block_of(*then_dest), self.block_of(*else_dest)],
            _ => {}
        }
        for (child, v) in children.iter().zip(kind.operands()) {
            match child {
                Pat::Reg => {
                    let reg = self.reg(v);
                    caps.regs.push(reg);
                }
                Pat::Imm(_) => caps.imms.push(self.imm_of(v).unwrap_or(0)),
                Pat::Node(..) => {
                    if let Some(def) = self.func.def_inst(v) {
                        self.capture(child, def, caps);
                    }
                }
            }
        }
    }

    pub(super) fn emit_cover(&mut self, inst: Inst, covers: &Covers) -> Result<()> {
        let (ty, from) = self.root_types(inst);
        let Some(&(rule, _)) = covers.get(&inst) else {
            let what = self.func.kind(inst).mnemonic();
            return Err(CompilerError::unsupported(self.target.name, format!("{what} {ty}")));
        };
        let rule = self.target.patterns[rule];
        let mut caps = Captures::new(ty);
        caps.from = from;
        if let Some(result) = self.func.result(inst) {
            caps.result = Some(self.reg(result));
        }
        self.capture(&rule.pattern, inst, &mut caps);
        let loc = self.func.inst(inst).loc.clone();
        let mut sink = self.sink(loc);
        (rule.emit)(&mut sink, &caps, rule.opcode)
    }
}
