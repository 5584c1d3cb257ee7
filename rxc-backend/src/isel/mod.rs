//! Instruction Selection
//!
//! Turns a legalized IR function into a `MachineFunction` over virtual
//! registers. Machine block `n` is the `n`-th IR block in layout order.
//!
//! Within a block, the selector covers expression trees with the target's
//! pattern rules (`cover`): every pure single-use value computed in the same
//! block may be folded into its user, and a dynamic program picks the
//! cheapest rule for every node. Calls, returns, jumps and phis follow the
//! target ABI and are lowered directly (`abi`).

mod abi;
mod cover;

use crate::mfunc::{MachineFunction, PoolEntry};
use log::trace;
use rxc_common::{Result, SourceLocation};
use rxc_ir::{Block, Function, Inst, InstKind, Value};
use rxc_target::{Emit, MachineInst, Reg, RegClass, TargetDescription};
use std::collections::HashMap;

/// Select machine instructions for one legalized function
pub fn select_function(func: &Function, target: &TargetDescription) -> Result<MachineFunction> {
    let mut selector = Selector::new(func, target);
    selector.run()?;
    trace!(
        "selected '{}': {} blocks, {} instructions, {} vregs",
        func.name,
        selector.mf.blocks.len(),
        selector.mf.inst_count(),
        selector.mf.num_vregs()
    );
    Ok(selector.mf)
}

pub(crate) struct Selector<'a> {
    func: &'a Function,
    target: &'a TargetDescription,
    mf: MachineFunction,
    block_index: HashMap<Block, u32>,
    value_regs: HashMap<Value, Reg>,
    slots: HashMap<Inst, u32>,
    uses: Vec<u32>,
    /// Values some other block, phi, call or return reads from a register
    external: Vec<bool>,
    /// Block being selected
    current: Option<Block>,
}

impl<'a> Selector<'a> {
    fn new(func: &'a Function, target: &'a TargetDescription) -> Self {
        let mut mf = MachineFunction::new(&func.name, func.linkage);
        let block_index = func
            .blocks()
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i as u32))
            .collect();
        mf.blocks = vec![Default::default(); func.blocks().len()];

        let mut slots = HashMap::new();
        for inst in func.all_insts() {
            if let InstKind::Alloca { size, align } = *func.kind(inst) {
                slots.insert(inst, mf.new_slot(size, align));
            }
        }

        let mut external = vec![false; func.value_count()];
        for inst in func.all_insts() {
            let block = func.inst(inst).block;
            let direct = matches!(
                func.kind(inst),
                InstKind::Phi { .. } | InstKind::Call { .. } | InstKind::Return { .. }
            );
            for v in func.kind(inst).operands() {
                if direct || func.def_block(v) != block {
                    external[v.index()] = true;
                }
            }
        }

        Self {
            func,
            target,
            mf,
            block_index,
            value_regs: HashMap::new(),
            slots,
            uses: func.use_counts(),
            external,
            current: None,
        }
    }

    fn run(&mut self) -> Result<()> {
        for (i, &block) in self.func.blocks().iter().enumerate() {
            self.current = Some(block);
            if i == 0 {
                self.lower_params()?;
            }
            self.select_block(block)?;
        }
        Ok(())
    }

    fn block_of(&self, block: Block) -> u32 {
        self.block_index.get(&block).copied().unwrap_or(0)
    }

    /// Virtual register holding an IR value, created on first request
    fn reg(&mut self, value: Value) -> Reg {
        if let Some(&reg) = self.value_regs.get(&value) {
            return reg;
        }
        let class = RegClass::for_type(self.func.value_type(value));
        let reg = Reg::Virt(self.mf.new_vreg(class));
        self.value_regs.insert(value, reg);
        reg
    }

    fn sink(&mut self, loc: Option<SourceLocation>) -> Sink<'_> {
        let block = self.current.map_or(0, |b| self.block_of(b)) as usize;
        Sink {
            mf: &mut self.mf,
            block,
            loc,
        }
    }

    fn select_block(&mut self, block: Block) -> Result<()> {
        let best = self.cover_block(block);
        let roots = self.pick_roots(block, &best);
        for inst in roots {
            match self.func.kind(inst) {
                InstKind::Call { .. } => self.lower_call(inst)?,
                InstKind::Return { .. } => self.lower_return(inst)?,
                InstKind::Jump { dest } => self.lower_jump(inst, *dest)?,
                InstKind::Unreachable => {
                    let loc = self.func.inst(inst).loc.clone();
                    let ret = (self.target.hooks.ret)();
                    self.sink(loc).push(ret);
                }
                InstKind::Phi { .. } => {}
                _ => self.emit_cover(inst, &best)?,
            }
        }
        Ok(())
    }
}

/// `Emit` implementation appending to one machine block
pub(crate) struct Sink<'m> {
    mf: &'m mut MachineFunction,
    block: usize,
    loc: Option<SourceLocation>,
}

impl Emit for Sink<'_> {
    fn new_vreg(&mut self, class: RegClass) -> Reg {
        Reg::Virt(self.mf.new_vreg(class))
    }

    fn push(&mut self, mut inst: MachineInst) {
        inst.loc = self.loc.clone();
        self.mf.blocks[self.block].insts.push(inst);
    }

    fn constant(&mut self, bytes: &[u8], align: u32) -> String {
        if let Some(entry) = self.mf.constants.iter().find(|c| c.bytes == bytes && c.align == align) {
            return entry.symbol.clone();
        }
        let symbol = format!("{}.cst{}", self.mf.name, self.mf.constants.len());
        self.mf.constants.push(PoolEntry {
            symbol: symbol.clone(),
            bytes: bytes.to_vec(),
            align,
        });
        symbol
    }
}

#[cfg(test)]
mod tests;
