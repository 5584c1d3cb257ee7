//! Promotion of stack slots to SSA values
//!
//! An `alloca` is promotable when its address is only ever used directly as
//! the pointer of loads and stores of one type, all in reachable blocks.
//! Phis are placed on the iterated dominance frontier of the storing blocks
//! and uses are renamed by a walk over the dominator tree. Reads before any
//! store observe zero.

use crate::Pass;
use log::{debug, trace};
use rxc_ir::{Block, ControlFlowGraph, DominatorTree, Function, Inst, InstKind, IrType, Value};
use std::collections::{HashMap, HashSet};

pub struct Mem2Reg;

struct Slot {
    alloca: Inst,
    addr: Value,
    ty: IrType,
    stores: HashSet<Block>,
}

/// Find promotable allocas and the type they are accessed with
fn find_slots(func: &Function, domtree: &DominatorTree) -> Vec<Slot> {
    let mut slots = Vec::new();
    for inst in func.all_insts() {
        if !matches!(func.kind(inst), InstKind::Alloca { .. }) {
            continue;
        }
        let Some(addr) = func.result(inst) else { continue };
        let mut ty = None;
        let mut stores = HashSet::new();
        let mut ok = func.inst(inst).block.is_some_and(|b| domtree.is_reachable(b));
        'uses: for user in func.all_insts() {
            let kind = func.kind(user);
            if !kind.operands().contains(&addr) {
                continue;
            }
            let block = func.inst(user).block;
            if !block.is_some_and(|b| domtree.is_reachable(b)) {
                ok = false;
                break 'uses;
            }
            let access = match kind {
                InstKind::Load { ty, ptr } if *ptr == addr => *ty,
                InstKind::Store { value, ptr } if *ptr == addr && *value != addr => {
                    stores.extend(block);
                    func.value_type(*value)
                }
                _ => {
                    ok = false;
                    break 'uses;
                }
            };
            if *ty.get_or_insert(access) != access {
                ok = false;
                break 'uses;
            }
        }
        if let (true, Some(ty)) = (ok, ty) {
            slots.push(Slot { alloca: inst, addr, ty, stores });
        }
    }
    slots
}

struct Renamer<'a> {
    slots: &'a [Slot],
    by_addr: HashMap<Value, usize>,
    /// Placed phi -> slot index
    phi_slot: HashMap<Inst, usize>,
    stacks: Vec<Vec<Value>>,
    zeros: HashMap<IrType, Value>,
}

impl Renamer<'_> {
    fn zero(&mut self, func: &mut Function, ty: IrType) -> Value {
        if let Some(&v) = self.zeros.get(&ty) {
            return v;
        }
        let kind = if ty.is_float() {
            InstKind::Fconst { ty, bits: 0 }
        } else {
            InstKind::Iconst { ty, imm: 0 }
        };
        let entry = func.entry_block().unwrap_or(Block(0));
        let inst = func.insert_inst_after_phis(entry, kind, None);
        let v = func.results(inst)[0];
        self.zeros.insert(ty, v);
        v
    }

    fn current(&mut self, func: &mut Function, slot: usize) -> Value {
        match self.stacks[slot].last() {
            Some(&v) => v,
            None => self.zero(func, self.slots[slot].ty),
        }
    }

    fn rename(&mut self, func: &mut Function, domtree: &DominatorTree, block: Block) {
        let mut pushed = vec![0usize; self.slots.len()];
        for inst in func.block_insts(block).to_vec() {
            if let Some(&slot) = self.phi_slot.get(&inst) {
                self.stacks[slot].push(func.results(inst)[0]);
                pushed[slot] += 1;
                continue;
            }
            match func.kind(inst).clone() {
                InstKind::Load { ptr, .. } => {
                    let Some(&slot) = self.by_addr.get(&ptr) else { continue };
                    let value = self.current(func, slot);
                    if let Some(r) = func.result(inst) {
                        func.replace_all_uses(r, value);
                    }
                    func.remove_inst(inst);
                }
                InstKind::Store { value, ptr } => {
                    let Some(&slot) = self.by_addr.get(&ptr) else { continue };
                    self.stacks[slot].push(value);
                    pushed[slot] += 1;
                    func.remove_inst(inst);
                }
                _ => {}
            }
        }
        for succ in func.successors(block) {
            for phi in func.phis(succ) {
                let Some(&slot) = self.phi_slot.get(&phi) else { continue };
                let value = self.current(func, slot);
                if let InstKind::Phi { incoming, .. } = &mut func.inst_mut(phi).kind {
                    incoming.push((block, value));
                }
            }
        }
        for child in domtree.children(block) {
            self.rename(func, domtree, child);
        }
        for (slot, n) in pushed.into_iter().enumerate() {
            let len = self.stacks[slot].len();
            self.stacks[slot].truncate(len - n);
        }
    }
}

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn description(&self) -> &'static str {
        "Promotes scalar stack slots to SSA values"
    }

    fn run_on_function(&self, func: &mut Function) -> bool {
        let Some(entry) = func.entry_block() else { return false };
        let cfg = ControlFlowGraph::compute(func);
        let domtree = DominatorTree::compute(func, &cfg);
        let slots = find_slots(func, &domtree);
        if slots.is_empty() {
            return false;
        }
        let frontiers = domtree.frontiers(&cfg);

        // Iterated dominance frontier of each slot's storing blocks
        let mut phi_slot = HashMap::new();
        for (index, slot) in slots.iter().enumerate() {
            let mut has_phi = HashSet::new();
            let mut work: Vec<Block> = slot.stores.iter().copied().collect();
            work.sort_by_key(|b| b.index());
            while let Some(block) = work.pop() {
                for &df in &frontiers[block.index()] {
                    if has_phi.insert(df) {
                        let phi = func.prepend_phi(df, slot.ty, Vec::new());
                        phi_slot.insert(phi, index);
                        if !slot.stores.contains(&df) {
                            work.push(df);
                        }
                    }
                }
            }
        }

        let mut renamer = Renamer {
            slots: &slots,
            by_addr: slots.iter().enumerate().map(|(i, s)| (s.addr, i)).collect(),
            phi_slot,
            stacks: vec![Vec::new(); slots.len()],
            zeros: HashMap::new(),
        };
        renamer.rename(func, &domtree, entry);

        // Edges from unreachable predecessors still need an input
        let phis: Vec<(Inst, usize)> = renamer.phi_slot.iter().map(|(&p, &s)| (p, s)).collect();
        for (phi, slot) in phis {
            let Some(block) = func.inst(phi).block else { continue };
            for &pred in cfg.preds(block) {
                let covered = matches!(func.kind(phi), InstKind::Phi { incoming, .. } if incoming.iter().any(|(b, _)| *b == pred));
                if !covered {
                    let zero = renamer.zero(func, slots[slot].ty);
                    if let InstKind::Phi { incoming, .. } = &mut func.inst_mut(phi).kind {
                        incoming.push((pred, zero));
                    }
                }
            }
        }

        for slot in &slots {
            trace!("mem2reg {}: promoted {}", func.name, slot.addr);
            func.remove_inst(slot.alloca);
        }
        debug!("mem2reg {}: promoted {} slot(s)", func.name, slots.len());
        true
    }
}
