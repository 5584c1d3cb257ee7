//! Linear scan
//!
//! Instructions are numbered in layout order, two points each: uses read at
//! the even point, defs write at the odd one. Every virtual register gets
//! one interval from its first to its last live point, widened to block
//! boundaries where it is live in or out. Precolored registers are not given
//! intervals; a virtual register simply never receives a physical register
//! it interferes with.

use super::liveness::{interferences, Liveness};
use super::{ClassAllocation, SpillCosts};
use crate::mfunc::MachineFunction;
use log::trace;
use rxc_target::{PReg, Reg, RegClass, TargetDescription, VReg};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub vreg: VReg,
    pub start: usize,
    pub end: usize,
}

/// Live intervals of every virtual register, sorted by start then creation
pub fn intervals(mf: &MachineFunction, liveness: &Liveness) -> Vec<Interval> {
    let mut ranges: BTreeMap<VReg, (usize, usize)> = BTreeMap::new();
    let mut touch = |reg: Reg, point: usize| {
        if let Reg::Virt(v) = reg {
            let range = ranges.entry(v).or_insert((point, point));
            range.0 = range.0.min(point);
            range.1 = range.1.max(point);
        }
    };
    let mut point = 0;
    for (b, block) in mf.blocks.iter().enumerate() {
        if block.insts.is_empty() {
            continue;
        }
        let first = point;
        for inst in &block.insts {
            for reg in inst.uses() {
                touch(reg, point);
            }
            for reg in inst.defs() {
                touch(reg, point + 1);
            }
            point += 2;
        }
        let last = point - 1;
        for &reg in &liveness.live_in[b] {
            touch(reg, first);
        }
        for &reg in &liveness.live_out[b] {
            touch(reg, last);
        }
    }
    let mut out: Vec<Interval> = ranges
        .into_iter()
        .map(|(vreg, (start, end))| Interval { vreg, start, end })
        .collect();
    out.sort_by_key(|i| (i.start, i.vreg));
    out
}

pub fn allocate_class(
    mf: &MachineFunction,
    target: &TargetDescription,
    liveness: &Liveness,
    class: RegClass,
    costs: &SpillCosts,
) -> ClassAllocation {
    let regs = target.allocatable(class);
    let allocatable: HashSet<PReg> = regs.iter().copied().collect();

    // physical registers each virtual register must avoid
    let mut fixed: HashMap<VReg, HashSet<PReg>> = HashMap::new();
    interferences(
        mf,
        liveness,
        |a, b| match (a, b) {
            (Reg::Virt(v), Reg::Phys(p)) | (Reg::Phys(p), Reg::Virt(v)) if allocatable.contains(&p) => {
                fixed.entry(v).or_default().insert(p);
            }
            _ => {}
        },
        |_, _| {},
    );

    let temp = |v: VReg| mf.spill_temps.get(v.index()).copied().unwrap_or(false);
    let mut out = ClassAllocation::default();
    let mut active: Vec<(Interval, PReg)> = Vec::new();
    let none = HashSet::new();
    for current in intervals(mf, liveness) {
        if mf.vreg_class(current.vreg) != class || !costs.contains_key(&current.vreg) {
            continue;
        }
        active.retain(|(i, _)| i.end >= current.start);
        let avoid = fixed.get(&current.vreg).unwrap_or(&none);
        let busy: HashSet<PReg> = active.iter().map(|&(_, p)| p).collect();
        if let Some(&reg) = regs.iter().find(|r| !busy.contains(r) && !avoid.contains(r)) {
            out.colors.insert(current.vreg, reg);
            active.push((current, reg));
            continue;
        }

        // spill whichever interval ends last; temporaries only as a last resort
        let victim = active
            .iter()
            .enumerate()
            .filter(|(_, (i, p))| !avoid.contains(p) && !temp(i.vreg))
            .max_by(|(_, (a, _)), (_, (b, _))| a.end.cmp(&b.end).then(b.vreg.cmp(&a.vreg)))
            .map(|(n, &(i, p))| (n, i, p));
        match victim {
            Some((n, interval, reg)) if interval.end > current.end || temp(current.vreg) => {
                active.remove(n);
                out.colors.remove(&interval.vreg);
                out.spilled.push(interval.vreg);
                out.colors.insert(current.vreg, reg);
                active.push((current, reg));
            }
            _ => out.spilled.push(current.vreg),
        }
    }
    trace!(
        "linear scan '{}' {}: {} colored, {} spilled",
        mf.name,
        class.name(),
        out.colors.len(),
        out.spilled.len()
    );
    out
}
