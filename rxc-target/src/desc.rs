//! Target descriptions
//!
//! A target is plain data: register tables, ABI, legalization actions,
//! pattern table, hooks for the few instruction shapes the generic backend
//! builds itself, an encoder, relocation kinds and a default memory map.

use crate::abi::Abi;
use crate::frame::{FrameLayout, FrameRequest};
use crate::minst::{EncodeFn, MachineInst, Opcode, Operand, PReg, Reg, RegClass};
use crate::pattern::PatternRule;
use rxc_common::Result;
use rxc_ir::IrType;
use rxc_object::{LinkTarget, MemoryLayout, RelocKindInfo};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInfo {
    pub name: &'static str,
    pub class: RegClass,
}

/// What the legalizer does with an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Legal,
    Expand,
    Unsupported,
}

/// Operations whose legality varies between targets. The accompanying type
/// is the result type, except for int-to-float casts where it is the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegalOp {
    Select,
    MulHU,
    SiToFp,
    UiToFp,
    FpToSi,
}

impl LegalOp {
    pub fn name(self) -> &'static str {
        match self {
            LegalOp::Select => "select",
            LegalOp::MulHU => "mulhu",
            LegalOp::SiToFp => "sitofp",
            LegalOp::UiToFp => "uitofp",
            LegalOp::FpToSi => "fptosi",
        }
    }
}

/// Instruction shapes the generic backend asks the target for
#[derive(Clone, Copy)]
pub struct TargetHooks {
    /// Full-register copy `dst <- src`
    pub copy: fn(RegClass, Reg, Reg) -> MachineInst,
    /// Typed load from a `Mem` or `Frame` operand
    pub load: fn(IrType, Reg, Operand) -> MachineInst,
    /// Typed store to a `Mem` or `Frame` operand
    pub store: fn(IrType, Reg, Operand) -> MachineInst,
    /// Type used to spill a whole register of the class
    pub spill_type: fn(RegClass) -> IrType,
    pub call: fn(&str) -> MachineInst,
    pub ret: fn() -> MachineInst,
    pub jump: fn(u32) -> MachineInst,
    pub frame: fn(&str, &FrameRequest) -> Result<FrameLayout>,
    pub prologue: fn(&FrameLayout) -> Vec<MachineInst>,
    pub epilogue: fn(&FrameLayout) -> Vec<MachineInst>,
}

pub struct TargetDescription {
    pub name: &'static str,
    pub version: u16,
    pub pointer_bits: u32,
    /// Widest integer held in one general purpose register
    pub register_bits: u32,
    /// Indexed by `PReg`
    pub registers: &'static [RegInfo],
    /// Allocation order per class
    pub allocatable_gpr: &'static [PReg],
    pub allocatable_fpr: &'static [PReg],
    pub abi: Abi,
    pub legalize: fn(LegalOp, IrType) -> Action,
    pub patterns: &'static [PatternRule],
    pub hooks: TargetHooks,
    pub opcode_names: &'static [&'static str],
    pub encode: EncodeFn,
    pub relocations: &'static [RelocKindInfo],
    /// Relocation kind of pointer-sized data words
    pub data_reloc: u16,
    pub memory: MemoryLayout,
}

impl TargetDescription {
    pub fn allocatable(&self, class: RegClass) -> &'static [PReg] {
        match class {
            RegClass::Gpr => self.allocatable_gpr,
            RegClass::Fpr => self.allocatable_fpr,
        }
    }

    pub fn reg_class(&self, reg: PReg) -> Option<RegClass> {
        self.registers.get(reg.index()).map(|r| r.class)
    }

    pub fn reg_name(&self, reg: PReg) -> &'static str {
        self.registers.get(reg.index()).map_or("?", |r| r.name)
    }

    pub fn opcode_name(&self, opcode: Opcode) -> &'static str {
        self.opcode_names.get(opcode.0 as usize).copied().unwrap_or("?")
    }

    /// Smallest integer width arithmetic is performed at
    pub fn min_int_bits(&self) -> u32 {
        32
    }

    pub fn pointer_type(&self) -> IrType {
        IrType::int_of_bits(self.pointer_bits).unwrap_or(IrType::I64)
    }

    pub fn link_target(&self) -> LinkTarget {
        LinkTarget {
            arch: self.name.to_string(),
            relocations: self.relocations,
            memory: self.memory.clone(),
        }
    }
}

impl fmt::Debug for TargetDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescription")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("pointer_bits", &self.pointer_bits)
            .field("patterns", &self.patterns.len())
            .finish()
    }
}
