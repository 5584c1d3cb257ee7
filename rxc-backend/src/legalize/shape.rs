//! Final shaping for instruction selection
//!
//! - every block is reachable from the entry
//! - pointer offsets have the pointer width
//! - a conditional branch tests an `icmp` of its own block used nowhere else
//! - no edge leaves a multi-successor block for a block with phis, so phi
//!   copies always sit in front of an unconditional jump

use super::Cursor;
use rxc_ir::{reverse_post_order, CastOp, Function, InstKind, IntCC, IrType};
use rxc_target::TargetDescription;
use std::collections::HashSet;

pub fn remove_unreachable(func: &mut Function) {
    let reachable: HashSet<_> = reverse_post_order(func).into_iter().collect();
    let dead: Vec<_> = func.blocks().iter().copied().filter(|b| !reachable.contains(b)).collect();
    for &block in &dead {
        for succ in func.successors(block) {
            func.remove_phi_incoming(succ, block);
        }
    }
    for block in dead {
        func.remove_block(block);
    }
}

pub fn fix_pointer_offsets(func: &mut Function, target: &TargetDescription) {
    let ptr_ty = target.pointer_type();
    for inst in func.all_insts() {
        let InstKind::PtrAdd { offset, .. } = *func.kind(inst) else { continue };
        if func.value_type(offset) == ptr_ty {
            continue;
        }
        let resized = Cursor::at(func, inst).resize(offset, ptr_ty, true);
        if let InstKind::PtrAdd { offset, .. } = &mut func.inst_mut(inst).kind {
            *offset = resized;
        }
    }
}

pub fn fix_branch_conditions(func: &mut Function) {
    let uses = func.use_counts();
    for block in func.blocks().to_vec() {
        let Some(term) = func.terminator(block) else { continue };
        let InstKind::Branch { cond, then_dest, else_dest } = *func.kind(term) else { continue };
        if then_dest == else_dest {
            let loc = func.inst(term).loc.clone();
            func.remove_inst(term);
            func.append_inst(block, InstKind::Jump { dest: then_dest }, loc);
            continue;
        }
        let def = func.def_inst(cond);
        let compare = def.map(|d| func.kind(d).clone()).filter(|k| matches!(k, InstKind::Icmp { .. }));
        let local = def.and_then(|d| func.inst(d).block) == Some(block);
        if compare.is_some() && local && uses[cond.index()] == 1 {
            continue;
        }
        let mut cursor = Cursor::at(func, term);
        let new_cond = match compare {
            Some(kind) => cursor.value(kind),
            None => {
                let wide = cursor.cast(CastOp::Zext, cond, IrType::I32);
                let zero = cursor.iconst(IrType::I32, 0);
                cursor.icmp(IntCC::Ne, wide, zero)
            }
        };
        if let InstKind::Branch { cond, .. } = &mut func.inst_mut(term).kind {
            *cond = new_cond;
        }
    }
}

pub fn split_critical_edges(func: &mut Function) {
    for block in func.blocks().to_vec() {
        let succs = func.successors(block);
        if succs.len() < 2 {
            continue;
        }
        for succ in succs {
            if func.phis(succ).is_empty() {
                continue;
            }
            let edge = func.create_block_after(block);
            func.append_inst(edge, InstKind::Jump { dest: succ }, None);
            func.retarget_edge(block, succ, edge);
            func.rename_phi_incoming(succ, block, edge);
        }
    }
}
