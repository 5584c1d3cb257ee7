//! Spill code insertion
//!
//! Every spilled register gets a frame slot. Each instruction touching it
//! is given a fresh temporary: loaded from the slot right before the
//! instruction when read, stored to the slot right after it when written.

use crate::mfunc::MachineFunction;
use rxc_target::{FrameIndex, Operand, Reg, RegRole, TargetDescription, VReg};
use std::collections::HashMap;

/// Rewrite `spilled` registers through stack slots; returns the slots used
pub fn insert_spill_code(mf: &mut MachineFunction, target: &TargetDescription, spilled: &[VReg]) -> Vec<u32> {
    let mut slots: HashMap<VReg, u32> = HashMap::new();
    for &vreg in spilled {
        let ty = (target.hooks.spill_type)(mf.vreg_class(vreg));
        let bytes = ty.bytes(target.pointer_bits);
        let slot = mf.new_slot(bytes, bytes);
        slots.insert(vreg, slot);
    }

    for b in 0..mf.blocks.len() {
        let insts = std::mem::take(&mut mf.blocks[b].insts);
        let mut out = Vec::with_capacity(insts.len());
        for mut inst in insts {
            // (original, temporary, read, written) in operand order
            let mut touched: Vec<(VReg, VReg, bool, bool)> = Vec::new();
            let mut roles: Vec<(VReg, RegRole)> = Vec::new();
            inst.for_each_reg_mut(|reg, role| {
                if let Reg::Virt(v) = *reg {
                    if slots.contains_key(&v) {
                        roles.push((v, role));
                    }
                }
            });
            for (v, role) in roles {
                let reads = matches!(role, RegRole::Use | RegRole::UseDef);
                let writes = matches!(role, RegRole::Def | RegRole::UseDef);
                match touched.iter_mut().find(|t| t.0 == v) {
                    Some(entry) => {
                        entry.2 |= reads;
                        entry.3 |= writes;
                    }
                    None => {
                        let temp = mf.new_vreg(mf.vreg_class(v));
                        mf.spill_temps[temp.index()] = true;
                        touched.push((v, temp, reads, writes));
                    }
                }
            }
            if touched.is_empty() {
                out.push(inst);
                continue;
            }
            inst.for_each_reg_mut(|reg, _| {
                if let Reg::Virt(v) = *reg {
                    if let Some(t) = touched.iter().find(|t| t.0 == v) {
                        *reg = Reg::Virt(t.1);
                    }
                }
            });

            let slot_of = |v: VReg| Operand::Frame {
                index: FrameIndex::Slot(slots[&v]),
                offset: 0,
            };
            for &(v, temp, reads, _) in &touched {
                if reads {
                    let ty = (target.hooks.spill_type)(mf.vreg_class(v));
                    out.push((target.hooks.load)(ty, Reg::Virt(temp), slot_of(v)).with_loc(inst.loc.clone()));
                }
            }
            let loc = inst.loc.clone();
            out.push(inst);
            for &(v, temp, _, writes) in &touched {
                if writes {
                    let ty = (target.hooks.spill_type)(mf.vreg_class(v));
                    out.push((target.hooks.store)(ty, Reg::Virt(temp), slot_of(v)).with_loc(loc.clone()));
                }
            }
        }
        mf.blocks[b].insts = out;
    }

    let mut used: Vec<u32> = slots.into_values().collect();
    used.sort_unstable();
    used
}
