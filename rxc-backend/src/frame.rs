//! Frame lowering
//!
//! Runs after register allocation. Collects the callee-saved registers the
//! function writes, asks the target for a frame layout, rewrites every
//! `Frame` operand to a base register plus offset and brackets the body
//! with the target's prologue and epilogues.

use crate::mfunc::MachineFunction;
use log::debug;
use rxc_common::{CompilerError, Result};
use rxc_target::{FrameLayout, FrameRequest, InstFlags, Operand, PReg, Reg, TargetDescription};
use std::collections::BTreeSet;

/// Callee-saved registers written by the function, in register order
pub fn saved_registers(mf: &MachineFunction, target: &TargetDescription) -> Vec<PReg> {
    let mut saved = BTreeSet::new();
    for block in &mf.blocks {
        for inst in &block.insts {
            for reg in inst.defs() {
                if let Reg::Phys(p) = reg {
                    if target.abi.is_callee_saved(p) && p != target.abi.fp {
                        saved.insert(p);
                    }
                }
            }
        }
    }
    saved.into_iter().collect()
}

pub fn lower_frame(mf: &mut MachineFunction, target: &TargetDescription) -> Result<FrameLayout> {
    let request = FrameRequest {
        slots: mf.slots.clone(),
        saved: saved_registers(mf, target),
        outgoing: mf.outgoing,
        has_calls: mf.has_calls,
    };
    let layout = (target.hooks.frame)(&mf.name, &request)?;

    let base = Reg::Phys(layout.base);
    for block in &mut mf.blocks {
        for inst in &mut block.insts {
            for op in &mut inst.operands {
                if let Operand::Frame { index, offset } = *op {
                    let offset = layout.resolve(index, offset).ok_or_else(|| {
                        CompilerError::internal(format!("'{}': frame reference {index:?} has no slot", mf.name))
                    })?;
                    *op = Operand::Mem { base, offset };
                }
            }
        }
    }

    let prologue = (target.hooks.prologue)(&layout);
    let epilogue = (target.hooks.epilogue)(&layout);
    for block in &mut mf.blocks {
        let insts = std::mem::take(&mut block.insts);
        let mut out = Vec::with_capacity(insts.len() + epilogue.len());
        for inst in insts {
            if inst.is(InstFlags::RETURN) {
                out.extend(epilogue.iter().cloned().map(|i| i.with_loc(inst.loc.clone())));
            }
            out.push(inst);
        }
        block.insts = out;
    }
    if let Some(entry) = mf.blocks.first_mut() {
        let loc = entry.insts.first().and_then(|i| i.loc.clone());
        let body = std::mem::take(&mut entry.insts);
        entry.insts = prologue.into_iter().map(|i| i.with_loc(loc.clone())).collect();
        entry.insts.extend(body);
    }

    debug!(
        "frame of '{}': {} bytes, {} slots, {} saved registers",
        mf.name,
        layout.size,
        layout.slot_offsets.len(),
        layout.saved.len()
    );
    Ok(layout)
}
