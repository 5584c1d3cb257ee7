//! Register liveness over machine blocks
//!
//! Classic backward data flow, iterated to a fixed point. Physical and
//! virtual registers are tracked alike so precolored registers (argument
//! and result registers, call clobbers, fixed operands) interfere with the
//! virtual registers live across them.

use crate::mfunc::MachineFunction;
use rxc_target::Reg;
use std::collections::BTreeSet;

pub type RegSet = BTreeSet<Reg>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub live_in: Vec<RegSet>,
    pub live_out: Vec<RegSet>,
}

impl Liveness {
    pub fn compute(mf: &MachineFunction) -> Self {
        let n = mf.blocks.len();
        let mut gen = vec![RegSet::new(); n];
        let mut kill = vec![RegSet::new(); n];
        for (b, block) in mf.blocks.iter().enumerate() {
            for inst in &block.insts {
                for reg in inst.uses() {
                    if !kill[b].contains(&reg) {
                        gen[b].insert(reg);
                    }
                }
                kill[b].extend(inst.defs());
            }
        }

        let succs: Vec<Vec<usize>> = (0..n).map(|b| mf.successors(b)).collect();
        let mut live_in = vec![RegSet::new(); n];
        let mut live_out = vec![RegSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..n).rev() {
                let out: RegSet = succs[b].iter().flat_map(|&s| live_in[s].iter().copied()).collect();
                let mut inn = gen[b].clone();
                inn.extend(out.difference(&kill[b]).copied());
                if inn != live_in[b] || out != live_out[b] {
                    live_in[b] = inn;
                    live_out[b] = out;
                    changed = true;
                }
            }
        }
        Self { live_in, live_out }
    }
}

/// Walk every block backwards, reporting each register defined while
/// another is live (`edge(def, live)`) and each register-to-register copy
/// (`copy(dst, src)`). The source of a copy does not interfere with its
/// destination.
pub fn interferences(
    mf: &MachineFunction,
    liveness: &Liveness,
    mut edge: impl FnMut(Reg, Reg),
    mut copy: impl FnMut(Reg, Reg),
) {
    for (b, block) in mf.blocks.iter().enumerate() {
        let mut live = liveness.live_out[b].clone();
        for inst in block.insts.iter().rev() {
            let defs = inst.defs();
            if let Some((dst, src)) = inst.is_move() {
                live.remove(&src);
                copy(dst, src);
            }
            for &def in &defs {
                for &other in &live {
                    if other != def {
                        edge(def, other);
                    }
                }
                for &other in &defs {
                    if other != def {
                        edge(def, other);
                    }
                }
            }
            for def in &defs {
                live.remove(def);
            }
            live.extend(inst.uses());
        }
    }
}
