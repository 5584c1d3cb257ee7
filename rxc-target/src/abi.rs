//! Calling conventions
//!
//! Arguments and results are assigned in order: integers and pointers take
//! the next free integer register, floats the next free float register, and
//! whatever does not fit goes to the stack in slots of at least
//! `stack_slot_size` bytes, naturally aligned.

use crate::minst::{PReg, RegClass};
use rxc_ir::IrType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLoc {
    Reg(PReg),
    /// Byte offset from the start of the stack argument area
    Stack(u32),
}

#[derive(Debug, Clone)]
pub struct Abi {
    pub int_args: &'static [PReg],
    pub float_args: &'static [PReg],
    pub int_rets: &'static [PReg],
    pub float_rets: &'static [PReg],
    pub callee_saved: &'static [PReg],
    pub caller_saved: &'static [PReg],
    /// Stack pointer alignment at call sites
    pub stack_align: u32,
    pub stack_slot_size: u32,
    pub sp: PReg,
    pub fp: PReg,
    /// Link register, when calls do not push the return address
    pub ra: Option<PReg>,
}

/// Placement of a call's arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgAssignment {
    pub locs: Vec<ArgLoc>,
    /// Bytes of stack argument area, rounded to the stack alignment
    pub stack_size: u32,
}

impl Abi {
    pub fn assign_args(&self, types: &[IrType], pointer_bits: u32) -> ArgAssignment {
        let (mut next_int, mut next_float, mut stack) = (0usize, 0usize, 0u32);
        let mut locs = Vec::with_capacity(types.len());
        for &ty in types {
            let (regs, next) = match RegClass::for_type(ty) {
                RegClass::Gpr => (self.int_args, &mut next_int),
                RegClass::Fpr => (self.float_args, &mut next_float),
            };
            if let Some(&reg) = regs.get(*next) {
                *next += 1;
                locs.push(ArgLoc::Reg(reg));
            } else {
                let size = ty.bytes(pointer_bits).max(self.stack_slot_size);
                stack = stack.div_ceil(size) * size;
                locs.push(ArgLoc::Stack(stack));
                stack += size;
            }
        }
        let align = self.stack_align.max(1);
        ArgAssignment {
            locs,
            stack_size: stack.div_ceil(align) * align,
        }
    }

    /// Result registers; `None` when the results do not fit
    pub fn assign_rets(&self, types: &[IrType]) -> Option<Vec<PReg>> {
        let (mut next_int, mut next_float) = (0usize, 0usize);
        types
            .iter()
            .map(|&ty| match RegClass::for_type(ty) {
                RegClass::Gpr => {
                    next_int += 1;
                    self.int_rets.get(next_int - 1).copied()
                }
                RegClass::Fpr => {
                    next_float += 1;
                    self.float_rets.get(next_float - 1).copied()
                }
            })
            .collect()
    }

    pub fn is_callee_saved(&self, reg: PReg) -> bool {
        self.callee_saved.contains(&reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ABI: Abi = Abi {
        int_args: &[PReg(10), PReg(11)],
        float_args: &[PReg(42)],
        int_rets: &[PReg(10), PReg(11)],
        float_rets: &[PReg(42)],
        callee_saved: &[PReg(9)],
        caller_saved: &[PReg(5)],
        stack_align: 16,
        stack_slot_size: 4,
        sp: PReg(2),
        fp: PReg(8),
        ra: Some(PReg(1)),
    };

    #[test]
    fn test_overflow_arguments_go_to_the_stack() {
        let types = [IrType::I32, IrType::F64, IrType::I32, IrType::I32, IrType::F64, IrType::I8];
        let got = ABI.assign_args(&types, 32);
        assert_eq!(
            got.locs,
            vec![
                ArgLoc::Reg(PReg(10)),
                ArgLoc::Reg(PReg(42)),
                ArgLoc::Reg(PReg(11)),
                ArgLoc::Stack(0),
                ArgLoc::Stack(8),
                ArgLoc::Stack(16),
            ]
        );
        assert_eq!(got.stack_size, 32);
    }

    #[test]
    fn test_results_must_fit_registers() {
        assert_eq!(ABI.assign_rets(&[IrType::I32, IrType::I32]), Some(vec![PReg(10), PReg(11)]));
        assert_eq!(ABI.assign_rets(&[IrType::F32, IrType::F32]), None);
    }
}
