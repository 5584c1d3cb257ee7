//! RXC - Reference Simulators
//!
//! Executes linked images for the shipped targets, one instruction at a
//! time, so that compiled code can be checked against the IR interpreter.
//! Each simulator implements exactly the instructions its target's encoder
//! produces; anything else is an illegal instruction.
//!
//! `Simulator::call` runs one function under the target calling
//! convention: arguments go where the ABI puts them, the return address is
//! a sentinel outside every segment, and on return the callee-saved
//! registers and the stack pointer must be as the caller left them.

pub mod error;
pub mod memory;
pub mod riscv32;
pub mod x86_64;

pub use error::SimError;
pub use memory::{Memory, STACK_SIZE, STACK_TOP};
pub use riscv32::Rv32Vm;
pub use x86_64::X86Vm;

use log::debug;
use rxc_ir::{IrType, Signature};
use rxc_object::Image;
use rxc_target::{target_by_name, ArgLoc, PReg, TargetDescription};
use std::collections::HashMap;

/// Where simulated calls return to
pub const RETURN_ADDRESS: u64 = 0xFFFF_FFF0;

pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// Upper half of a float register holding an `f32`
const NAN_BOX: u64 = 0xFFFF_FFFF_0000_0000;

/// Architectural state of one simulated processor
pub trait Machine {
    fn pc(&self) -> u64;
    fn set_pc(&mut self, pc: u64);
    /// Register by target register number, zero-extended
    fn reg(&self, reg: PReg) -> u64;
    fn set_reg(&mut self, reg: PReg, value: u64);
    fn memory(&self) -> &Memory;
    fn memory_mut(&mut self) -> &mut Memory;
    /// Execute the instruction at `pc`
    fn step(&mut self) -> Result<(), SimError>;
}

pub struct Simulator {
    target: TargetDescription,
    machine: Box<dyn Machine>,
    symbols: HashMap<String, u64>,
    step_limit: u64,
    steps: u64,
}

impl Simulator {
    pub fn new(image: &Image) -> Result<Self, SimError> {
        let target = target_by_name(&image.arch).ok_or_else(|| SimError::UnknownArch(image.arch.clone()))?;
        let memory = Memory::from_image(image);
        let machine: Box<dyn Machine> = match target.name {
            "riscv32" => Box::new(Rv32Vm::new(memory)),
            "x86_64" => Box::new(X86Vm::new(memory)),
            other => return Err(SimError::UnknownArch(other.to_string())),
        };
        Ok(Self {
            target,
            machine,
            symbols: image.symbols.iter().map(|s| (s.name.clone(), s.addr)).collect(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        })
    }

    pub fn set_step_limit(&mut self, limit: u64) {
        self.step_limit = limit;
    }

    /// Instructions executed by the last call
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    pub fn memory(&self) -> &Memory {
        self.machine.memory()
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        self.machine.memory_mut()
    }

    /// Register-sized pieces of `types`; `i64` is a (low, high) pair on
    /// 32-bit targets
    fn pieces(&self, types: &[IrType]) -> Vec<IrType> {
        let split = self.target.register_bits < 64;
        types
            .iter()
            .flat_map(|&ty| {
                if split && ty == IrType::I64 {
                    vec![IrType::I32, IrType::I32]
                } else {
                    vec![ty]
                }
            })
            .collect()
    }

    fn split_values(&self, types: &[IrType], values: &[u64]) -> Vec<u64> {
        let split = self.target.register_bits < 64;
        types
            .iter()
            .zip(values)
            .flat_map(|(&ty, &v)| {
                if split && ty == IrType::I64 {
                    vec![v & 0xFFFF_FFFF, v >> 32]
                } else {
                    vec![v]
                }
            })
            .collect()
    }

    /// Call `name` with raw argument values (integers zero-extended, floats
    /// as their bit patterns) and return its results the same way
    pub fn call(&mut self, name: &str, sig: &Signature, args: &[u64]) -> Result<Vec<u64>, SimError> {
        let entry = self.symbol(name).ok_or_else(|| SimError::UnknownSymbol(name.to_string()))?;
        if args.len() != sig.params.len() {
            return Err(SimError::Arity {
                expected: sig.params.len(),
                got: args.len(),
            });
        }
        let pointer_bits = self.target.pointer_bits;
        let abi = self.target.abi.clone();

        let arg_types = self.pieces(&sig.params);
        let arg_values = self.split_values(&sig.params, args);
        let assignment = abi.assign_args(&arg_types, pointer_bits);
        let ret_types = self.pieces(&sig.returns);
        let ret_regs = abi
            .assign_rets(&ret_types)
            .ok_or_else(|| SimError::Signature(name.to_string()))?;

        let mut sp = STACK_TOP - assignment.stack_size as u64;
        for ((&ty, &value), loc) in arg_types.iter().zip(&arg_values).zip(&assignment.locs) {
            let value = if ty == IrType::F32 { value | NAN_BOX } else { value };
            match *loc {
                ArgLoc::Reg(reg) => self.machine.set_reg(reg, value),
                ArgLoc::Stack(offset) => {
                    let size = ty.bytes(pointer_bits) as u64;
                    self.machine.memory_mut().store(sp + offset as u64, value, size)?;
                }
            }
        }
        match abi.ra {
            Some(ra) => self.machine.set_reg(ra, RETURN_ADDRESS),
            None => {
                sp -= (pointer_bits / 8) as u64;
                let size = (pointer_bits / 8) as u64;
                self.machine.memory_mut().store(sp, RETURN_ADDRESS, size)?;
            }
        }
        self.machine.set_reg(abi.sp, sp);
        let expected_sp = self.machine.reg(abi.sp) + if abi.ra.is_none() { (pointer_bits / 8) as u64 } else { 0 };

        let mut preserved = Vec::with_capacity(abi.callee_saved.len());
        for (i, &reg) in abi.callee_saved.iter().enumerate() {
            self.machine.set_reg(reg, 0x5EED_0000 + i as u64);
            preserved.push((reg, self.machine.reg(reg)));
        }

        debug!("sim: calling '{name}' at {entry:#x} with {args:x?}");
        self.machine.set_pc(entry);
        self.steps = 0;
        while self.machine.pc() != RETURN_ADDRESS {
            if self.steps >= self.step_limit {
                return Err(SimError::StepLimit(self.step_limit));
            }
            self.machine.step()?;
            self.steps += 1;
        }
        debug!("sim: '{name}' returned after {} instructions", self.steps);

        for (reg, value) in preserved {
            if self.machine.reg(reg) != value {
                return Err(SimError::Clobbered {
                    function: name.to_string(),
                    register: self.target.reg_name(reg).to_string(),
                });
            }
        }
        if self.machine.reg(abi.sp) != expected_sp {
            return Err(SimError::Clobbered {
                function: name.to_string(),
                register: self.target.reg_name(abi.sp).to_string(),
            });
        }

        let raw: Vec<u64> = ret_types
            .iter()
            .zip(&ret_regs)
            .map(|(&ty, &reg)| self.machine.reg(reg) & ty.mask())
            .collect();
        let mut results = Vec::with_capacity(sig.returns.len());
        let mut it = raw.into_iter();
        for &ty in &sig.returns {
            let lo = it.next().unwrap_or(0);
            if self.target.register_bits < 64 && ty == IrType::I64 {
                let hi = it.next().unwrap_or(0);
                results.push(lo | hi << 32);
            } else {
                results.push(lo);
            }
        }
        Ok(results)
    }
}

