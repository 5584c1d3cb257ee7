//! Register Allocation
//!
//! Maps the virtual registers of a selected function onto the target's
//! allocatable registers, one register class at a time. Registers that do
//! not fit are spilled to frame slots and allocation runs again on the
//! rewritten function until everything is coloured.
//!
//! ## Allocators
//!
//! - `irc` - iterated register coalescing (default)
//! - `linear` - linear scan over whole-function intervals
//!
//! Both read the same liveness and honour the same interference with
//! precolored registers, so `verify_allocation` checks either result.

pub mod liveness;

mod irc;
mod linear;
mod spill;

pub use linear::{intervals, Interval};
pub use liveness::Liveness;

use crate::mfunc::MachineFunction;
use log::debug;
use rxc_common::{CompilerError, Result};
use rxc_target::{InstFlags, PReg, Reg, RegClass, TargetDescription, VReg};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Gives up when spilling keeps producing new spills
const MAX_ROUNDS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    #[default]
    Irc,
    LinearScan,
}

impl AllocatorKind {
    pub fn name(self) -> &'static str {
        match self {
            AllocatorKind::Irc => "irc",
            AllocatorKind::LinearScan => "linear",
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AllocatorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "irc" => Ok(AllocatorKind::Irc),
            "linear" | "linear-scan" => Ok(AllocatorKind::LinearScan),
            other => Err(format!("unknown register allocator '{other}' (expected irc or linear)")),
        }
    }
}

/// Occurrences (uses plus defs) of every virtual register in the function
pub type SpillCosts = BTreeMap<VReg, u32>;

pub type Assignment = HashMap<VReg, PReg>;

#[derive(Debug, Clone, Default)]
pub struct ClassAllocation {
    pub colors: HashMap<VReg, PReg>,
    pub spilled: Vec<VReg>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub rounds: u32,
    /// Virtual registers sent to the stack, over all rounds
    pub spilled: usize,
    pub spill_slots: Vec<u32>,
}

pub fn spill_costs(mf: &MachineFunction) -> SpillCosts {
    let mut costs = SpillCosts::new();
    for block in &mf.blocks {
        for inst in &block.insts {
            for reg in inst.uses().into_iter().chain(inst.defs()) {
                if let Reg::Virt(v) = reg {
                    *costs.entry(v).or_insert(0) += 1;
                }
            }
        }
    }
    costs
}

/// Find a physical register for every virtual register, inserting spill
/// code into `mf` as needed. `mf` keeps its virtual registers.
pub fn assign_registers(
    mf: &mut MachineFunction,
    target: &TargetDescription,
    kind: AllocatorKind,
) -> Result<(Assignment, AllocStats)> {
    let mut stats = AllocStats::default();
    while stats.rounds < MAX_ROUNDS {
        stats.rounds += 1;
        let costs = spill_costs(mf);
        let liveness = Liveness::compute(mf);
        let mut assignment = Assignment::new();
        let mut spilled = Vec::new();
        for class in RegClass::ALL {
            if !costs.keys().any(|&v| mf.vreg_class(v) == class) {
                continue;
            }
            if target.allocatable(class).is_empty() {
                return Err(CompilerError::AllocationFailure {
                    function: mf.name.clone(),
                    class: class.name().to_string(),
                });
            }
            let result = match kind {
                AllocatorKind::Irc => irc::allocate_class(mf, target, &liveness, class, &costs),
                AllocatorKind::LinearScan => linear::allocate_class(mf, target, &liveness, class, &costs),
            };
            assignment.extend(result.colors);
            spilled.extend(result.spilled);
        }
        if spilled.is_empty() {
            return Ok((assignment, stats));
        }

        spilled.sort_unstable();
        if let Some(&temp) = spilled.iter().find(|v| mf.spill_temps.get(v.index()).copied().unwrap_or(false)) {
            return Err(CompilerError::internal(format!(
                "'{}': no register left for spill temporary %{}",
                mf.name, temp.0
            )));
        }
        debug!(
            "{} '{}' round {}: spilling {} registers",
            kind,
            mf.name,
            stats.rounds,
            spilled.len()
        );
        stats.spilled += spilled.len();
        stats.spill_slots.extend(spill::insert_spill_code(mf, target, &spilled));
    }
    Err(CompilerError::internal(format!(
        "register allocation of '{}' did not converge after {MAX_ROUNDS} rounds",
        mf.name
    )))
}

/// No two registers live at the same point may share a physical register
pub fn verify_allocation(mf: &MachineFunction, target: &TargetDescription, assignment: &Assignment) -> Result<()> {
    for block in &mf.blocks {
        for inst in &block.insts {
            for reg in inst.uses().into_iter().chain(inst.defs()) {
                if let Reg::Virt(v) = reg {
                    if !assignment.contains_key(&v) {
                        return Err(CompilerError::internal(format!(
                            "'{}': %{} has no register",
                            mf.name, v.0
                        )));
                    }
                }
            }
        }
    }

    let phys = |reg: Reg| match reg {
        Reg::Virt(v) => assignment.get(&v).copied(),
        Reg::Phys(p) => Some(p),
    };
    let liveness = Liveness::compute(mf);
    let mut conflict: Option<(Reg, Reg, PReg)> = None;
    liveness::interferences(
        mf,
        &liveness,
        |a, b| {
            if conflict.is_some() {
                return;
            }
            if let (Some(p), Some(q)) = (phys(a), phys(b)) {
                if p == q {
                    conflict = Some((a, b, p));
                }
            }
        },
        |_, _| {},
    );
    match conflict {
        Some((a, b, p)) => Err(CompilerError::internal(format!(
            "'{}': {a} and {b} are live together in {}",
            mf.name,
            target.reg_name(p)
        ))),
        None => Ok(()),
    }
}

/// Replace virtual registers by their assignment and drop copies that
/// became no-ops
pub fn rewrite_registers(mf: &mut MachineFunction, assignment: &Assignment) {
    for block in &mut mf.blocks {
        for inst in &mut block.insts {
            inst.for_each_reg_mut(|reg, _| {
                if let Reg::Virt(v) = *reg {
                    if let Some(&p) = assignment.get(&v) {
                        *reg = Reg::Phys(p);
                    }
                }
            });
        }
        block
            .insts
            .retain(|inst| !(inst.is(InstFlags::MOVE) && inst.is_move().is_some_and(|(dst, src)| dst == src)));
    }
}

/// Allocate, check and rewrite one function
pub fn allocate(mf: &mut MachineFunction, target: &TargetDescription, kind: AllocatorKind) -> Result<AllocStats> {
    let (assignment, stats) = assign_registers(mf, target, kind)?;
    verify_allocation(mf, target, &assignment)?;
    rewrite_registers(mf, &assignment);
    debug!(
        "allocated '{}' with {kind}: {} rounds, {} spilled",
        mf.name, stats.rounds, stats.spilled
    );
    Ok(stats)
}

#[cfg(test)]
mod tests;
