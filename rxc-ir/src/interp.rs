//! Reference IR interpreter
//!
//! Executes a module directly. Used as the semantic oracle that compiled code
//! is checked against. Values are raw 64-bit patterns: integers in canonical
//! zero-extended form, floats as IEEE bits, pointers as byte addresses.

use crate::function::Function;
use crate::instructions::InstKind;
use crate::module::{DataItem, GlobalInit, Module};
use crate::ops::{self, canon};
use crate::types::IrType;
use crate::values::{Block, Value};
use log::trace;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("undefined behaviour in '{function}': {message}")]
    UndefinedBehavior { function: String, message: String },

    #[error("memory access out of bounds at {addr:#x} ({size} bytes)")]
    OutOfBounds { addr: u64, size: u64 },

    #[error("stack overflow")]
    StackOverflow,

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("wrong number of arguments for '{function}': expected {expected}, got {got}")]
    Arity { function: String, expected: usize, got: usize },
}

const GLOBAL_BASE: u64 = 0x1000;
const MEMORY_SIZE: usize = 1 << 20;
const MAX_CALL_DEPTH: usize = 512;

pub struct Interpreter<'m> {
    module: &'m Module,
    memory: Vec<u8>,
    symbols: HashMap<String, u64>,
    pointer_bits: u32,
    stack_top: u64,
    stack_limit: u64,
    steps: u64,
    step_limit: u64,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Result<Self, InterpError> {
        Self::with_pointer_bits(module, 64)
    }

    /// Interpreter whose in-memory pointers are `pointer_bits` wide
    pub fn with_pointer_bits(module: &'m Module, pointer_bits: u32) -> Result<Self, InterpError> {
        let mut interp = Self {
            module,
            memory: vec![0; MEMORY_SIZE],
            symbols: HashMap::new(),
            pointer_bits,
            stack_top: MEMORY_SIZE as u64,
            stack_limit: 0,
            steps: 0,
            step_limit: 50_000_000,
            depth: 0,
        };
        interp.layout_globals()?;
        Ok(interp)
    }

    pub fn set_step_limit(&mut self, limit: u64) {
        self.step_limit = limit;
    }

    fn layout_globals(&mut self) -> Result<(), InterpError> {
        let module = self.module;
        let mut addr = GLOBAL_BASE;
        for global in &module.globals {
            let align = global.align.max(1) as u64;
            addr = addr.div_ceil(align) * align;
            self.symbols.insert(global.name.clone(), addr);
            addr += global.size(self.pointer_bits).max(1);
        }
        // Functions get distinct fake addresses so their address can be taken
        for (n, func) in module.functions.iter().enumerate() {
            self.symbols.insert(func.name.clone(), 0xF000_0000 + n as u64 * 16);
        }
        self.stack_limit = addr.div_ceil(16) * 16 + 4096;
        for global in &module.globals {
            let mut at = self.symbols.get(&global.name).copied().unwrap_or(GLOBAL_BASE);
            let GlobalInit::Data(items) = &global.init else { continue };
            for item in items {
                match item {
                    DataItem::Bytes(bytes) => {
                        self.write_bytes(at, bytes)?;
                        at += bytes.len() as u64;
                    }
                    DataItem::Int { ty, value } => {
                        let size = ty.bytes(self.pointer_bits) as u64;
                        self.store(at, *value as u64, size)?;
                        at += size;
                    }
                    DataItem::Float { ty, bits } => {
                        let size = ty.bytes(self.pointer_bits) as u64;
                        self.store(at, *bits, size)?;
                        at += size;
                    }
                    DataItem::SymbolAddr { symbol, addend } => {
                        let base = *self
                            .symbols
                            .get(symbol)
                            .ok_or_else(|| InterpError::UnknownSymbol(symbol.clone()))?;
                        let size = (self.pointer_bits / 8) as u64;
                        self.store(at, base.wrapping_add(*addend as u64), size)?;
                        at += size;
                    }
                    DataItem::Zero(n) => at += n,
                }
            }
        }
        Ok(())
    }

    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn check(&self, addr: u64, size: u64) -> Result<usize, InterpError> {
        if addr < GLOBAL_BASE || addr.checked_add(size).map_or(true, |end| end > self.memory.len() as u64) {
            return Err(InterpError::OutOfBounds { addr, size });
        }
        Ok(addr as usize)
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), InterpError> {
        let at = self.check(addr, bytes.len() as u64)?;
        self.memory[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&self, addr: u64, len: u64) -> Result<&[u8], InterpError> {
        let at = self.check(addr, len)?;
        Ok(&self.memory[at..at + len as usize])
    }

    fn store(&mut self, addr: u64, value: u64, size: u64) -> Result<(), InterpError> {
        let bytes = value.to_le_bytes();
        self.write_bytes(addr, &bytes[..size as usize])
    }

    fn load(&self, addr: u64, size: u64) -> Result<u64, InterpError> {
        let bytes = self.read_bytes(addr, size)?;
        let mut buf = [0u8; 8];
        buf[..size as usize].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Call a function by name with raw argument values
    pub fn call(&mut self, name: &str, args: &[u64]) -> Result<Vec<u64>, InterpError> {
        let module = self.module;
        let func = module
            .function(name)
            .filter(|f| !f.is_declaration())
            .ok_or_else(|| InterpError::UnknownFunction(name.to_string()))?;
        if func.params().len() != args.len() {
            return Err(InterpError::Arity {
                function: name.to_string(),
                expected: func.params().len(),
                got: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(InterpError::StackOverflow);
        }
        self.depth += 1;
        let saved_top = self.stack_top;
        let result = self.run(func, args);
        self.stack_top = saved_top;
        self.depth -= 1;
        result
    }

    fn ub(func: &Function, message: impl Into<String>) -> InterpError {
        InterpError::UndefinedBehavior {
            function: func.name.clone(),
            message: message.into(),
        }
    }

    fn run(&mut self, func: &'m Function, args: &[u64]) -> Result<Vec<u64>, InterpError> {
        let mut env: HashMap<Value, u64> = HashMap::new();
        for (&p, &a) in func.params().iter().zip(args) {
            env.insert(p, canon_for(func.value_type(p), a));
        }
        let get = |env: &HashMap<Value, u64>, v: Value| -> Result<u64, InterpError> {
            env.get(&v)
                .copied()
                .ok_or_else(|| Self::ub(func, format!("read of unset value {v}")))
        };

        let mut block = func.entry_block().ok_or_else(|| Self::ub(func, "no body"))?;
        let mut prev: Option<Block> = None;
        loop {
            // Phis read their inputs simultaneously
            let phis = func.phis(block);
            let mut phi_values = Vec::with_capacity(phis.len());
            for &phi in &phis {
                if let InstKind::Phi { incoming, .. } = func.kind(phi) {
                    let from = prev.ok_or_else(|| Self::ub(func, "phi in entry block"))?;
                    let (_, v) = incoming
                        .iter()
                        .find(|(b, _)| *b == from)
                        .ok_or_else(|| Self::ub(func, format!("phi has no value for {from}")))?;
                    phi_values.push(get(&env, *v)?);
                }
            }
            for (&phi, value) in phis.iter().zip(phi_values) {
                if let Some(r) = func.result(phi) {
                    env.insert(r, value);
                }
            }

            for &inst in &func.block_insts(block)[phis.len()..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit(self.step_limit));
                }
                let kind = func.kind(inst);
                trace!("interp {}: {} {}", func.name, inst, kind.mnemonic());
                let result: Option<u64> = match kind {
                    InstKind::Iconst { ty, imm } => Some(canon(*imm as u64, *ty)),
                    InstKind::Fconst { bits, .. } => Some(*bits),
                    InstKind::Binary { op, ty, lhs, rhs } => {
                        let (a, b) = (get(&env, *lhs)?, get(&env, *rhs)?);
                        let r = if op.is_float() {
                            ops::eval_float_binary(*op, *ty, a, b)
                        } else {
                            ops::eval_int_binary(*op, *ty, a, b)
                        };
                        Some(r.ok_or_else(|| Self::ub(func, format!("{} of {a:#x} and {b:#x}", op.name())))?)
                    }
                    InstKind::Unary { op, ty, arg } => Some(ops::eval_unary(*op, *ty, get(&env, *arg)?)),
                    InstKind::Icmp { cc, lhs, rhs } => {
                        let ty = func.value_type(*lhs);
                        let ty = if ty.is_ptr() { IrType::I64 } else { ty };
                        Some(ops::eval_icmp(*cc, ty, get(&env, *lhs)?, get(&env, *rhs)?) as u64)
                    }
                    InstKind::Fcmp { cc, lhs, rhs } => {
                        let ty = func.value_type(*lhs);
                        Some(ops::eval_fcmp(*cc, ty, get(&env, *lhs)?, get(&env, *rhs)?) as u64)
                    }
                    InstKind::Cast { op, to, arg } => {
                        let from = func.value_type(*arg);
                        let r = ops::eval_cast(*op, from, *to, get(&env, *arg)?)
                            .ok_or_else(|| Self::ub(func, format!("{} out of range", op.name())))?;
                        Some(r)
                    }
                    InstKind::Select { cond, then_val, else_val } => {
                        if get(&env, *cond)? != 0 {
                            Some(get(&env, *then_val)?)
                        } else {
                            Some(get(&env, *else_val)?)
                        }
                    }
                    InstKind::Alloca { size, align } => {
                        let align = (*align).max(1) as u64;
                        let top = self.stack_top.checked_sub(*size as u64).ok_or(InterpError::StackOverflow)?;
                        let top = top / align * align;
                        if top < self.stack_limit {
                            return Err(InterpError::StackOverflow);
                        }
                        self.stack_top = top;
                        Some(top)
                    }
                    InstKind::Load { ty, ptr } => {
                        let addr = get(&env, *ptr)?;
                        let v = self.load(addr, ty.bytes(self.pointer_bits) as u64)?;
                        Some(v)
                    }
                    InstKind::Store { value, ptr } => {
                        let addr = get(&env, *ptr)?;
                        let ty = func.value_type(*value);
                        let v = get(&env, *value)?;
                        self.store(addr, v, ty.bytes(self.pointer_bits) as u64)?;
                        None
                    }
                    InstKind::PtrAdd { ptr, offset } => {
                        let base = get(&env, *ptr)?;
                        let off_ty = func.value_type(*offset);
                        let off = ops::sext(get(&env, *offset)?, off_ty.bits(64));
                        Some(canon_for(IrType::Ptr, base.wrapping_add(off as u64)) & self.pointer_mask())
                    }
                    InstKind::GlobalAddr { symbol } => Some(
                        *self
                            .symbols
                            .get(symbol)
                            .ok_or_else(|| InterpError::UnknownSymbol(symbol.clone()))?,
                    ),
                    InstKind::Call { callee, args, .. } => {
                        let values = args.iter().map(|&a| get(&env, a)).collect::<Result<Vec<_>, _>>()?;
                        let rets = self.call(callee, &values)?;
                        for (&r, v) in func.results(inst).iter().zip(rets) {
                            env.insert(r, v);
                        }
                        None
                    }
                    InstKind::Phi { .. } => return Err(Self::ub(func, "phi after non-phi")),
                    InstKind::Jump { dest } => {
                        prev = Some(block);
                        block = *dest;
                        None
                    }
                    InstKind::Branch { cond, then_dest, else_dest } => {
                        prev = Some(block);
                        block = if get(&env, *cond)? != 0 { *then_dest } else { *else_dest };
                        None
                    }
                    InstKind::Return { values } => {
                        return values.iter().map(|&v| get(&env, v)).collect();
                    }
                    InstKind::Unreachable => return Err(Self::ub(func, "reached unreachable")),
                };
                if let (Some(v), Some(r)) = (result, func.result(inst)) {
                    env.insert(r, v);
                }
            }
        }
    }

    fn pointer_mask(&self) -> u64 {
        if self.pointer_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.pointer_bits) - 1
        }
    }
}

fn canon_for(ty: IrType, v: u64) -> u64 {
    if ty.is_int() {
        canon(v, ty)
    } else if ty == IrType::F32 {
        v & 0xFFFF_FFFF
    } else {
        v
    }
}
