//! CFG simplification
//!
//! - removes blocks unreachable from the entry (and their phi inputs)
//! - turns `branch c, X, X` into `jump X`
//! - merges a block into its sole predecessor when that predecessor jumps
//!   only to it
//! - bypasses blocks that contain nothing but a jump to a phi-free block

use crate::Pass;
use log::trace;
use rxc_ir::{reverse_post_order, ControlFlowGraph, Function, InstKind};
use std::collections::HashSet;

pub struct SimplifyCfg;

fn remove_unreachable(func: &mut Function) -> bool {
    let reachable: HashSet<_> = reverse_post_order(func).into_iter().collect();
    let dead: Vec<_> = func.blocks().iter().copied().filter(|b| !reachable.contains(b)).collect();
    if dead.is_empty() {
        return false;
    }
    for &block in &dead {
        for succ in func.successors(block) {
            func.remove_phi_incoming(succ, block);
        }
    }
    for block in dead {
        trace!("simplifycfg {}: removing unreachable {}", func.name, block);
        func.remove_block(block);
    }
    true
}

fn fold_same_target_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks().to_vec() {
        let Some(term) = func.terminator(block) else { continue };
        if let InstKind::Branch { then_dest, else_dest, .. } = func.kind(term) {
            if then_dest == else_dest {
                let dest = *then_dest;
                func.inst_mut(term).kind = InstKind::Jump { dest };
                changed = true;
            }
        }
    }
    changed
}

/// Merge `succ` into `block` when `block` ends in `jump succ` and is its only
/// predecessor
fn merge_chains(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let cfg = ControlFlowGraph::compute(func);
        let entry = func.entry_block();
        let candidate = func.blocks().iter().copied().find_map(|block| {
            let term = func.terminator(block)?;
            let InstKind::Jump { dest } = func.kind(term) else { return None };
            let succ = *dest;
            (succ != block && Some(succ) != entry && cfg.preds(succ) == [block]).then_some((block, term, succ))
        });
        let Some((block, term, succ)) = candidate else { break };
        trace!("simplifycfg {}: merging {} into {}", func.name, succ, block);

        // Single-predecessor phis are copies of their only input
        for phi in func.phis(succ) {
            let input = match func.kind(phi) {
                InstKind::Phi { incoming, .. } => incoming.first().map(|(_, v)| *v),
                _ => None,
            };
            if let (Some(input), Some(r)) = (input, func.result(phi)) {
                func.replace_all_uses(r, input);
            }
            func.remove_inst(phi);
        }
        func.remove_inst(term);
        func.split_insts(succ, 0, block);
        for next in func.successors(block) {
            func.rename_phi_incoming(next, succ, block);
        }
        func.remove_block(succ);
        changed = true;
    }
    changed
}

/// Redirect predecessors of a jump-only block straight to its target
fn bypass_empty_blocks(func: &mut Function) -> bool {
    let mut changed = false;
    let entry = func.entry_block();
    for block in func.blocks().to_vec() {
        if Some(block) == entry || !func.is_valid_block(block) {
            continue;
        }
        let insts = func.block_insts(block);
        if insts.len() != 1 {
            continue;
        }
        let InstKind::Jump { dest } = func.kind(insts[0]) else { continue };
        let target = *dest;
        if target == block || !func.phis(target).is_empty() {
            continue;
        }
        let cfg = ControlFlowGraph::compute(func);
        let preds = cfg.preds(block).to_vec();
        if preds.is_empty() {
            continue;
        }
        trace!("simplifycfg {}: bypassing {}", func.name, block);
        for pred in preds {
            func.retarget_edge(pred, block, target);
        }
        changed = true;
    }
    changed
}

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplifycfg"
    }

    fn description(&self) -> &'static str {
        "Removes unreachable blocks and merges straight-line block chains"
    }

    fn must_run_after(&self) -> &'static [&'static str] {
        &["constfold"]
    }

    fn run_on_function(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let mut round = remove_unreachable(func);
            round |= fold_same_target_branches(func);
            round |= bypass_empty_blocks(func);
            round |= remove_unreachable(func);
            round |= merge_chains(func);
            if !round {
                break;
            }
            changed = true;
        }
        changed
    }
}
