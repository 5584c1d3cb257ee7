//! RXC Target Descriptions
//!
//! Everything the backend knows about a machine is data in a
//! `TargetDescription`: register file, calling convention, legalization
//! actions, selection patterns, frame layout, instruction encoder and
//! relocation kinds. Adding a target means adding one module here.
//!
//! ## Architecture
//!
//! - `minst` - Machine instructions, registers, code buffers
//! - `pattern` - Tree patterns driving instruction selection
//! - `abi` - Argument and result assignment
//! - `frame` - Stack frame requests and layouts
//! - `desc` - The target description itself
//! - `riscv32` - RV32IMFD
//! - `x86_64` - x86-64 with SSE2

pub mod abi;
pub mod desc;
pub mod frame;
pub mod minst;
pub mod pattern;
pub mod riscv32;
pub mod x86_64;

pub use abi::{Abi, ArgAssignment, ArgLoc};
pub use desc::{Action, LegalOp, RegInfo, TargetDescription, TargetHooks};
pub use frame::{FrameLayout, FrameRequest};
pub use minst::{
    CodeBuffer, EncodeError, FixupTarget, FrameIndex, InstFlags, MachineInst, Opcode, Operand, PReg, Reg, RegClass,
    RegRole, VReg,
};
pub use pattern::{Captures, Emit, NodeKind, Pat, PatternRule};

/// Names accepted by `target_by_name`
pub const TARGET_NAMES: &[&str] = &["riscv32", "x86_64"];

pub fn target_by_name(name: &str) -> Option<TargetDescription> {
    match name {
        "riscv32" | "rv32" => Some(TargetDescription::riscv32()),
        "x86_64" | "x86-64" | "amd64" => Some(TargetDescription::x86_64()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxc_ir::IrType;

    #[test]
    fn test_lookup_by_name() {
        for name in TARGET_NAMES {
            assert_eq!(target_by_name(name).map(|t| t.name), Some(*name));
        }
        assert_eq!(target_by_name("x86-64").map(|t| t.pointer_bits), Some(64));
        assert!(target_by_name("mips").is_none());
    }

    #[test]
    fn test_pattern_opcodes_have_names() {
        for target in TARGET_NAMES.iter().filter_map(|n| target_by_name(n)) {
            for rule in target.patterns {
                assert_ne!(target.opcode_name(rule.opcode), "?", "{} on {}", rule.name, target.name);
            }
        }
    }

    #[test]
    fn test_spill_and_copy_hooks_agree_on_class() {
        for target in TARGET_NAMES.iter().filter_map(|n| target_by_name(n)) {
            for class in RegClass::ALL {
                let reg = target.allocatable(class)[0];
                assert_eq!(target.reg_class(reg), Some(class));
                assert_eq!(RegClass::for_type((target.hooks.spill_type)(class)), class);
                let copy = (target.hooks.copy)(class, Reg::Phys(reg), Reg::Phys(reg));
                assert!(copy.is_move().is_some());
            }
            assert_eq!(target.pointer_type(), IrType::int_of_bits(target.pointer_bits).unwrap());
        }
    }

    #[test]
    fn test_abi_assigns_registers_then_stack() {
        let target = TargetDescription::x86_64();
        let types = vec![IrType::I64; 8];
        let assignment = target.abi.assign_args(&types, 64);
        assert_eq!(assignment.locs[0], ArgLoc::Reg(PReg(7)));
        assert_eq!(assignment.locs[6], ArgLoc::Stack(0));
        assert_eq!(assignment.locs[7], ArgLoc::Stack(8));
        assert_eq!(assignment.stack_size, 16);
    }
}
