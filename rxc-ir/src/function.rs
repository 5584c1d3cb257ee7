//! IR Function
//!
//! A function owns three arenas (values, instructions, blocks) and a block
//! layout. Removing an instruction or block detaches it; handles are never
//! reused, so stale handles stay harmless.

use crate::instructions::{InstData, InstKind};
use crate::module::Linkage;
use crate::types::IrType;
use crate::values::{Block, Inst, Value, ValueData, ValueDef};
use rxc_common::SourceLocation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<IrType>,
    pub returns: Vec<IrType>,
}

impl Signature {
    pub fn new(params: Vec<IrType>, returns: Vec<IrType>) -> Self {
        Self { params, returns }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockData {
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub linkage: Linkage,
    params: Vec<Value>,
    values: Vec<ValueData>,
    insts: Vec<InstData>,
    blocks: Vec<BlockData>,
    layout: Vec<Block>,
}

impl Function {
    pub fn new(name: &str, signature: Signature, linkage: Linkage) -> Self {
        let mut func = Self {
            name: name.to_string(),
            signature: Signature::default(),
            linkage,
            params: Vec::new(),
            values: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
        };
        func.set_signature(signature);
        func
    }

    /// Replace the signature, allocating fresh parameter values. Uses of the
    /// previous parameters are left for the caller to rewrite.
    pub fn set_signature(&mut self, signature: Signature) -> Vec<Value> {
        self.params = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, &ty)| self.new_value(ty, ValueDef::Param(i as u32)))
            .collect();
        self.signature = signature;
        self.params.clone()
    }

    /// A function without blocks only declares an external symbol
    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.layout.first().copied()
    }

    /// Blocks in layout order
    pub fn blocks(&self) -> &[Block] {
        &self.layout
    }

    pub fn is_valid_block(&self, block: Block) -> bool {
        self.layout.contains(&block)
    }

    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block.index()].insts
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst.index()]
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst.index()]
    }

    pub fn kind(&self, inst: Inst) -> &InstKind {
        &self.insts[inst.index()].kind
    }

    pub fn results(&self, inst: Inst) -> &[Value] {
        &self.insts[inst.index()].results
    }

    /// First result of an instruction, if it produces one
    pub fn result(&self, inst: Inst) -> Option<Value> {
        self.insts[inst.index()].results.first().copied()
    }

    pub fn value_type(&self, value: Value) -> IrType {
        self.values[value.index()].ty
    }

    pub fn value_def(&self, value: Value) -> ValueDef {
        self.values[value.index()].def
    }

    pub fn is_valid_value(&self, value: Value) -> bool {
        value.index() < self.values.len()
    }

    /// Defining instruction of a value, `None` for parameters
    pub fn def_inst(&self, value: Value) -> Option<Inst> {
        match self.value_def(value) {
            ValueDef::Result(inst, _) => Some(inst),
            ValueDef::Param(_) => None,
        }
    }

    /// Block containing the definition; parameters belong to the entry block
    pub fn def_block(&self, value: Value) -> Option<Block> {
        match self.value_def(value) {
            ValueDef::Result(inst, _) => self.insts[inst.index()].block,
            ValueDef::Param(_) => self.entry_block(),
        }
    }

    /// Integer constant behind a value, if it is defined by `iconst`
    pub fn const_value(&self, value: Value) -> Option<i64> {
        match self.def_inst(value).map(|i| self.kind(i)) {
            Some(InstKind::Iconst { imm, .. }) => Some(*imm),
            _ => None,
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = *self.blocks[block.index()].insts.last()?;
        self.kind(last).is_terminator().then_some(last)
    }

    pub fn successors(&self, block: Block) -> Vec<Block> {
        self.terminator(block)
            .map(|t| self.kind(t).successors())
            .unwrap_or_default()
    }

    /// Leading phi instructions of a block
    pub fn phis(&self, block: Block) -> Vec<Inst> {
        self.block_insts(block)
            .iter()
            .copied()
            .take_while(|&i| self.kind(i).is_phi())
            .collect()
    }

    /// Create a new block at the end of the layout
    pub fn create_block(&mut self) -> Block {
        let block = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        self.layout.push(block);
        block
    }

    /// Create a new block placed right after `after` in the layout
    pub fn create_block_after(&mut self, after: Block) -> Block {
        let block = Block(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        let pos = self
            .layout
            .iter()
            .position(|&b| b == after)
            .map(|p| p + 1)
            .unwrap_or(self.layout.len());
        self.layout.insert(pos, block);
        block
    }

    /// Detach a block and all its instructions
    pub fn remove_block(&mut self, block: Block) {
        self.layout.retain(|&b| b != block);
        for inst in std::mem::take(&mut self.blocks[block.index()].insts) {
            self.insts[inst.index()].block = None;
        }
    }

    fn new_value(&mut self, ty: IrType, def: ValueDef) -> Value {
        let value = Value(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        value
    }

    /// Result types an instruction kind produces
    pub fn result_types(&self, kind: &InstKind) -> Vec<IrType> {
        match kind {
            InstKind::Iconst { ty, .. }
            | InstKind::Fconst { ty, .. }
            | InstKind::Binary { ty, .. }
            | InstKind::Unary { ty, .. }
            | InstKind::Load { ty, .. }
            | InstKind::Phi { ty, .. } => vec![*ty],
            InstKind::Icmp { .. } | InstKind::Fcmp { .. } => vec![IrType::I1],
            InstKind::Cast { to, .. } => vec![*to],
            InstKind::Select { then_val, .. } => vec![self.value_type(*then_val)],
            InstKind::Alloca { .. } | InstKind::PtrAdd { .. } | InstKind::GlobalAddr { .. } => vec![IrType::Ptr],
            InstKind::Call { rets, .. } => rets.clone(),
            InstKind::Store { .. }
            | InstKind::Jump { .. }
            | InstKind::Branch { .. }
            | InstKind::Return { .. }
            | InstKind::Unreachable => Vec::new(),
        }
    }

    fn make_inst(&mut self, kind: InstKind, block: Block, loc: Option<SourceLocation>) -> Inst {
        let inst = Inst(self.insts.len() as u32);
        let types = self.result_types(&kind);
        let results = types
            .into_iter()
            .enumerate()
            .map(|(n, ty)| self.new_value(ty, ValueDef::Result(inst, n as u32)))
            .collect();
        self.insts.push(InstData {
            kind,
            results,
            block: Some(block),
            loc,
        });
        inst
    }

    pub fn append_inst(&mut self, block: Block, kind: InstKind, loc: Option<SourceLocation>) -> Inst {
        let inst = self.make_inst(kind, block, loc);
        self.blocks[block.index()].insts.push(inst);
        inst
    }

    /// Insert a new instruction immediately before `before`
    pub fn insert_inst_before(&mut self, before: Inst, kind: InstKind, loc: Option<SourceLocation>) -> Inst {
        let block = self.insts[before.index()]
            .block
            .unwrap_or_else(|| self.entry_block().unwrap_or(Block(0)));
        let inst = self.make_inst(kind, block, loc);
        let list = &mut self.blocks[block.index()].insts;
        let pos = list.iter().position(|&i| i == before).unwrap_or(list.len());
        list.insert(pos, inst);
        inst
    }

    /// Insert a new instruction at the start of a block, after its phis
    pub fn insert_inst_after_phis(&mut self, block: Block, kind: InstKind, loc: Option<SourceLocation>) -> Inst {
        let pos = self.phis(block).len();
        let inst = self.make_inst(kind, block, loc);
        self.blocks[block.index()].insts.insert(pos, inst);
        inst
    }

    /// Insert a phi at the start of a block
    pub fn prepend_phi(&mut self, block: Block, ty: IrType, incoming: Vec<(Block, Value)>) -> Inst {
        let inst = self.make_inst(InstKind::Phi { ty, incoming }, block, None);
        self.blocks[block.index()].insts.insert(0, inst);
        inst
    }

    /// Detach an instruction from its block
    pub fn remove_inst(&mut self, inst: Inst) {
        if let Some(block) = self.insts[inst.index()].block.take() {
            self.blocks[block.index()].insts.retain(|&i| i != inst);
        }
    }

    /// Move the instructions from position `at` onwards out of `block` and
    /// append them to `into`
    pub fn split_insts(&mut self, block: Block, at: usize, into: Block) {
        let tail: Vec<Inst> = self.blocks[block.index()].insts.split_off(at);
        for &inst in &tail {
            self.insts[inst.index()].block = Some(into);
        }
        self.blocks[into.index()].insts.extend(tail);
    }

    /// Replace every use of `old` with `new`. Returns whether anything changed.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) -> bool {
        if old == new {
            return false;
        }
        let mut changed = false;
        for &block in &self.layout {
            for &inst in &self.blocks[block.index()].insts {
                for operand in self.insts[inst.index()].kind.operands_mut() {
                    if *operand == old {
                        *operand = new;
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Redirect successor edges of the terminator of `block` from `old` to `new`
    pub fn retarget_edge(&mut self, block: Block, old: Block, new: Block) {
        if let Some(term) = self.terminator(block) {
            for dest in self.insts[term.index()].kind.successors_mut() {
                if *dest == old {
                    *dest = new;
                }
            }
        }
    }

    /// Drop the incoming entries of `block`'s phis that come from `pred`
    pub fn remove_phi_incoming(&mut self, block: Block, pred: Block) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming, .. } = &mut self.insts[phi.index()].kind {
                incoming.retain(|(b, _)| *b != pred);
            }
        }
    }

    /// Rename `old` to `new` in the incoming blocks of `block`'s phis
    pub fn rename_phi_incoming(&mut self, block: Block, old: Block, new: Block) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming, .. } = &mut self.insts[phi.index()].kind {
                for (b, _) in incoming.iter_mut() {
                    if *b == old {
                        *b = new;
                    }
                }
            }
        }
    }

    /// Number of uses of every value, indexed by value
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.values.len()];
        for &block in &self.layout {
            for &inst in self.block_insts(block) {
                for v in self.kind(inst).operands() {
                    counts[v.index()] += 1;
                }
            }
        }
        counts
    }

    /// All attached instructions in layout order
    pub fn all_insts(&self) -> Vec<Inst> {
        self.layout
            .iter()
            .flat_map(|&b| self.blocks[b.index()].insts.iter().copied())
            .collect()
    }
}
