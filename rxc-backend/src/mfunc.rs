//! Machine functions
//!
//! The output of instruction selection and the unit the allocator, frame
//! lowering and emitter work on. Blocks are indexed in layout order; virtual
//! registers are numbered densely and carry their register class.

use rxc_ir::Linkage;
use rxc_target::{MachineInst, Reg, RegClass, TargetDescription, VReg};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineBlock {
    pub insts: Vec<MachineInst>,
}

/// Read-only bytes referenced by the function, e.g. float constants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub symbol: String,
    pub bytes: Vec<u8>,
    pub align: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineFunction {
    pub name: String,
    pub linkage: Linkage,
    pub blocks: Vec<MachineBlock>,
    /// Class of every virtual register, indexed by `VReg`
    pub vreg_classes: Vec<RegClass>,
    /// Registers created to carry spill code; never spilled again
    pub spill_temps: Vec<bool>,
    /// `(size, align)` of every frame slot
    pub slots: Vec<(u32, u32)>,
    /// Bytes of outgoing stack arguments needed by the largest call
    pub outgoing: u32,
    pub has_calls: bool,
    pub constants: Vec<PoolEntry>,
}

impl MachineFunction {
    pub fn new(name: &str, linkage: Linkage) -> Self {
        Self {
            name: name.to_string(),
            linkage,
            blocks: Vec::new(),
            vreg_classes: Vec::new(),
            spill_temps: Vec::new(),
            slots: Vec::new(),
            outgoing: 0,
            has_calls: false,
            constants: Vec::new(),
        }
    }

    pub fn new_vreg(&mut self, class: RegClass) -> VReg {
        self.vreg_classes.push(class);
        self.spill_temps.push(false);
        VReg((self.vreg_classes.len() - 1) as u32)
    }

    pub fn num_vregs(&self) -> usize {
        self.vreg_classes.len()
    }

    pub fn vreg_class(&self, vreg: VReg) -> RegClass {
        self.vreg_classes.get(vreg.index()).copied().unwrap_or(RegClass::Gpr)
    }

    pub fn new_slot(&mut self, size: u32, align: u32) -> u32 {
        self.slots.push((size, align.max(1)));
        (self.slots.len() - 1) as u32
    }

    /// Successor blocks: branch targets, plus the next block when the last
    /// instruction can fall through
    pub fn successors(&self, block: usize) -> Vec<usize> {
        let insts = &self.blocks[block].insts;
        let mut succs: Vec<usize> = Vec::new();
        for inst in insts {
            for target in inst.block_targets() {
                if !succs.contains(&(target as usize)) {
                    succs.push(target as usize);
                }
            }
        }
        let ends = insts.last().is_some_and(|i| {
            i.is(rxc_target::InstFlags::RETURN) || i.is(rxc_target::InstFlags::JUMP)
        });
        if !ends && block + 1 < self.blocks.len() && !succs.contains(&(block + 1)) {
            succs.push(block + 1);
        }
        succs
    }

    pub fn predecessors(&self) -> Vec<Vec<usize>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for b in 0..self.blocks.len() {
            for s in self.successors(b) {
                preds[s].push(b);
            }
        }
        preds
    }

    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    /// Class of any register operand
    pub fn class_of(&self, reg: Reg, target: &TargetDescription) -> RegClass {
        match reg {
            Reg::Virt(v) => self.vreg_class(v),
            Reg::Phys(p) => target.reg_class(p).unwrap_or(RegClass::Gpr),
        }
    }

    pub fn display<'a>(&'a self, target: &'a TargetDescription) -> MachineFunctionDisplay<'a> {
        MachineFunctionDisplay { func: self, target }
    }
}

pub struct MachineFunctionDisplay<'a> {
    func: &'a MachineFunction,
    target: &'a TargetDescription,
}

impl fmt::Display for MachineFunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.func.name)?;
        for (i, block) in self.func.blocks.iter().enumerate() {
            writeln!(f, ".B{i}:")?;
            for inst in &block.insts {
                writeln!(f, "    {}", inst.display(self.target.opcode_name(inst.opcode)))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxc_target::riscv32::opcodes::{ADDI, BEQ, RET};
    use rxc_target::{InstFlags, PReg};

    #[test]
    fn test_successors_include_fallthrough() {
        let mut mf = MachineFunction::new("f", Linkage::External);
        let zero = Reg::Phys(PReg(0));
        mf.blocks = vec![
            MachineBlock {
                insts: vec![MachineInst::new(BEQ).use_reg(zero).use_reg(zero).block(2).flags(InstFlags::BRANCH)],
            },
            MachineBlock {
                insts: vec![MachineInst::new(ADDI).def(zero).use_reg(zero).imm(0)],
            },
            MachineBlock {
                insts: vec![MachineInst::new(RET).flags(InstFlags::RETURN)],
            },
        ];
        assert_eq!(mf.successors(0), vec![2, 1]);
        assert_eq!(mf.successors(1), vec![2]);
        assert!(mf.successors(2).is_empty());
        assert_eq!(mf.predecessors()[2], vec![0, 1]);
    }

    #[test]
    fn test_vregs_and_slots_are_dense() {
        let mut mf = MachineFunction::new("f", Linkage::Internal);
        assert_eq!(mf.new_vreg(RegClass::Gpr), VReg(0));
        assert_eq!(mf.new_vreg(RegClass::Fpr), VReg(1));
        assert_eq!(mf.vreg_class(VReg(1)), RegClass::Fpr);
        assert_eq!(mf.new_slot(8, 0), 0);
        assert_eq!(mf.slots[0], (8, 1));
    }
}
