//! IR Builder
//!
//! Front-end facing construction API. `IrBuilder` owns the module being
//! built; `FunctionBuilder` appends typed instructions to the current block
//! and rejects anything it can already prove malformed: undefined operands,
//! operands whose definition does not dominate the insertion point in the
//! CFG built so far, type mismatches, appends after a terminator and branches
//! to foreign blocks.

use crate::cfg::{ControlFlowGraph, DominatorTree};
use crate::function::{Function, Signature};
use crate::instructions::InstKind;
use crate::module::{GlobalVariable, Linkage, Module};
use crate::ops::{BinaryOp, CastOp, FloatCC, IntCC, UnaryOp};
use crate::types::IrType;
use crate::values::{Block, Inst, Value, ValueDef};
use log::trace;
use rxc_common::{CompilerError, Result, SourceLocation};

pub struct IrBuilder {
    module: Module,
}

impl IrBuilder {
    pub fn new(module_name: &str) -> Self {
        Self {
            module: Module::new(module_name),
        }
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> Result<()> {
        if self.module.global(&global.name).is_some() || self.module.function(&global.name).is_some() {
            return Err(CompilerError::malformed(
                &global.name,
                format!("symbol '{}' defined twice in module", global.name),
            ));
        }
        self.module.add_global(global);
        Ok(())
    }

    /// Declare an external function without a body
    pub fn declare_function(&mut self, name: &str, signature: Signature) {
        if self.module.function(name).is_none() {
            self.module
                .functions
                .push(Function::new(name, signature, Linkage::External));
        }
    }

    /// Start building a function body; the function joins the module when
    /// `FunctionBuilder::finish` succeeds.
    pub fn function(&mut self, name: &str, signature: Signature, linkage: Linkage) -> FunctionBuilder<'_> {
        FunctionBuilder {
            module: &mut self.module,
            func: Function::new(name, signature, linkage),
            current: None,
            loc: None,
            domtree: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(self) -> Module {
        self.module
    }
}

pub struct FunctionBuilder<'a> {
    module: &'a mut Module,
    func: Function,
    current: Option<Block>,
    loc: Option<SourceLocation>,
    /// Dominators of the partial CFG; dropped whenever an edge is added
    domtree: Option<DominatorTree>,
}

impl FunctionBuilder<'_> {
    pub fn params(&self) -> Vec<Value> {
        self.func.params().to_vec()
    }

    pub fn create_block(&mut self) -> Block {
        self.func.create_block()
    }

    pub fn switch_to_block(&mut self, block: Block) -> Result<()> {
        if !self.func.is_valid_block(block) {
            return Err(self.error(format!("{block} does not belong to this function")));
        }
        self.current = Some(block);
        Ok(())
    }

    pub fn current_block(&self) -> Option<Block> {
        self.current
    }

    /// Source location attached to subsequently appended instructions
    pub fn set_location(&mut self, loc: Option<SourceLocation>) {
        self.loc = loc;
    }

    pub fn value_type(&self, value: Value) -> IrType {
        self.func.value_type(value)
    }

    fn error(&self, message: String) -> CompilerError {
        CompilerError::malformed(&self.func.name, message)
    }

    fn insertion_block(&self) -> Result<Block> {
        let block = self
            .current
            .ok_or_else(|| self.error("no current block".to_string()))?;
        if self.func.terminator(block).is_some() {
            return Err(self.error(format!("{block} already has a terminator")));
        }
        Ok(block)
    }

    fn dominators(&mut self) -> &DominatorTree {
        let func = &self.func;
        self.domtree.get_or_insert_with(|| {
            let cfg = ControlFlowGraph::compute(func);
            DominatorTree::compute(func, &cfg)
        })
    }

    /// The operand must exist and its definition must dominate the end of
    /// `at` in the CFG known so far.
    fn check_available(&mut self, value: Value, at: Block) -> Result<()> {
        if !self.func.is_valid_value(value) {
            return Err(self.error(format!("operand {value} is not defined")));
        }
        let def_block = match self.func.value_def(value) {
            ValueDef::Param(_) => return Ok(()),
            ValueDef::Result(inst, _) => self
                .func
                .inst(inst)
                .block
                .ok_or_else(|| self.error(format!("operand {value} was removed")))?,
        };
        if def_block == at {
            return Ok(());
        }
        if self.dominators().dominates(def_block, at) {
            Ok(())
        } else {
            Err(self.error(format!("operand {value} defined in {def_block} does not dominate {at}")))
        }
    }

    fn expect_type(&self, value: Value, ty: IrType, what: &str) -> Result<()> {
        let actual = self.func.value_type(value);
        if actual != ty {
            return Err(self.error(format!("{what}: expected {ty}, found {value}: {actual}")));
        }
        Ok(())
    }

    fn push(&mut self, kind: InstKind) -> Result<Inst> {
        let block = self.insertion_block()?;
        for v in kind.operands() {
            self.check_available(v, block)?;
        }
        if kind.is_terminator() {
            for succ in kind.successors() {
                if !self.func.is_valid_block(succ) {
                    return Err(self.error(format!("branch target {succ} does not belong to this function")));
                }
            }
            self.domtree = None;
        }
        trace!("build {}: {} in {}", self.func.name, kind.mnemonic(), block);
        Ok(self.func.append_inst(block, kind, self.loc.clone()))
    }

    fn push_value(&mut self, kind: InstKind) -> Result<Value> {
        let inst = self.push(kind)?;
        self.func
            .result(inst)
            .ok_or_else(|| CompilerError::internal("instruction without result"))
    }

    pub fn iconst(&mut self, ty: IrType, imm: i64) -> Result<Value> {
        if !ty.is_int_like() {
            return Err(self.error(format!("iconst of non-integer type {ty}")));
        }
        self.push_value(InstKind::Iconst { ty, imm })
    }

    pub fn fconst(&mut self, ty: IrType, value: f64) -> Result<Value> {
        let bits = match ty {
            IrType::F32 => (value as f32).to_bits() as u64,
            IrType::F64 => value.to_bits(),
            _ => return Err(self.error(format!("fconst of non-float type {ty}"))),
        };
        self.push_value(InstKind::Fconst { ty, bits })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
        let ty = self.func.value_type(lhs);
        self.expect_type(rhs, ty, op.name())?;
        let ok = if op.is_float() { ty.is_float() } else { ty.is_int() };
        if !ok {
            return Err(self.error(format!("{} does not accept operands of type {ty}", op.name())));
        }
        self.push_value(InstKind::Binary { op, ty, lhs, rhs })
    }

    pub fn unary(&mut self, op: UnaryOp, arg: Value) -> Result<Value> {
        let ty = self.func.value_type(arg);
        let ok = match op {
            UnaryOp::FNeg => ty.is_float(),
            _ => ty.is_int(),
        };
        if !ok {
            return Err(self.error(format!("{} does not accept type {ty}", op.name())));
        }
        self.push_value(InstKind::Unary { op, ty, arg })
    }

    pub fn icmp(&mut self, cc: IntCC, lhs: Value, rhs: Value) -> Result<Value> {
        let ty = self.func.value_type(lhs);
        self.expect_type(rhs, ty, "icmp")?;
        if !ty.is_int_like() {
            return Err(self.error(format!("icmp of type {ty}")));
        }
        self.push_value(InstKind::Icmp { cc, lhs, rhs })
    }

    pub fn fcmp(&mut self, cc: FloatCC, lhs: Value, rhs: Value) -> Result<Value> {
        let ty = self.func.value_type(lhs);
        self.expect_type(rhs, ty, "fcmp")?;
        if !ty.is_float() {
            return Err(self.error(format!("fcmp of type {ty}")));
        }
        self.push_value(InstKind::Fcmp { cc, lhs, rhs })
    }

    pub fn cast(&mut self, op: CastOp, arg: Value, to: IrType) -> Result<Value> {
        let from = self.func.value_type(arg);
        if !op.is_valid(from, to) {
            return Err(self.error(format!("invalid cast {} {from} to {to}", op.name())));
        }
        self.push_value(InstKind::Cast { op, to, arg })
    }

    pub fn select(&mut self, cond: Value, then_val: Value, else_val: Value) -> Result<Value> {
        self.expect_type(cond, IrType::I1, "select condition")?;
        let ty = self.func.value_type(then_val);
        self.expect_type(else_val, ty, "select")?;
        self.push_value(InstKind::Select { cond, then_val, else_val })
    }

    pub fn alloca(&mut self, size: u32, align: u32) -> Result<Value> {
        if size == 0 || !align.is_power_of_two() {
            return Err(self.error(format!("alloca of size {size} align {align}")));
        }
        self.push_value(InstKind::Alloca { size, align })
    }

    pub fn load(&mut self, ty: IrType, ptr: Value) -> Result<Value> {
        self.expect_type(ptr, IrType::Ptr, "load address")?;
        self.push_value(InstKind::Load { ty, ptr })
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<()> {
        self.expect_type(ptr, IrType::Ptr, "store address")?;
        self.push(InstKind::Store { value, ptr }).map(|_| ())
    }

    pub fn ptradd(&mut self, ptr: Value, offset: Value) -> Result<Value> {
        self.expect_type(ptr, IrType::Ptr, "ptradd base")?;
        if !self.func.value_type(offset).is_int() {
            return Err(self.error("ptradd offset must be an integer".to_string()));
        }
        self.push_value(InstKind::PtrAdd { ptr, offset })
    }

    pub fn global_addr(&mut self, symbol: &str) -> Result<Value> {
        self.push_value(InstKind::GlobalAddr {
            symbol: symbol.to_string(),
        })
    }

    pub fn call(&mut self, callee: &str, args: &[Value], rets: &[IrType]) -> Result<Vec<Value>> {
        let inst = self.push(InstKind::Call {
            callee: callee.to_string(),
            args: args.to_vec(),
            rets: rets.to_vec(),
        })?;
        Ok(self.func.results(inst).to_vec())
    }

    /// Create a phi without incoming edges; fill it with `add_phi_incoming`
    /// once the predecessors exist.
    pub fn phi(&mut self, ty: IrType) -> Result<Value> {
        let block = self.insertion_block()?;
        if self
            .func
            .block_insts(block)
            .iter()
            .any(|&i| !self.func.kind(i).is_phi())
        {
            return Err(self.error(format!("phi must precede other instructions of {block}")));
        }
        self.push_value(InstKind::Phi {
            ty,
            incoming: Vec::new(),
        })
    }

    pub fn add_phi_incoming(&mut self, phi: Value, pred: Block, value: Value) -> Result<()> {
        let inst = self
            .func
            .def_inst(phi)
            .filter(|&i| self.func.kind(i).is_phi())
            .ok_or_else(|| self.error(format!("{phi} is not a phi")))?;
        let ty = self.func.value_type(phi);
        self.expect_type(value, ty, "phi incoming")?;
        if !self.func.is_valid_block(pred) {
            return Err(self.error(format!("{pred} does not belong to this function")));
        }
        self.check_available(value, pred)?;
        let function = self.func.name.clone();
        if let InstKind::Phi { incoming, .. } = &mut self.func.inst_mut(inst).kind {
            if incoming.iter().any(|(b, _)| *b == pred) {
                return Err(CompilerError::malformed(
                    function,
                    format!("{phi} already has an incoming value for {pred}"),
                ));
            }
            incoming.push((pred, value));
        }
        Ok(())
    }

    pub fn jump(&mut self, dest: Block) -> Result<()> {
        self.push(InstKind::Jump { dest }).map(|_| ())
    }

    pub fn branch(&mut self, cond: Value, then_dest: Block, else_dest: Block) -> Result<()> {
        self.expect_type(cond, IrType::I1, "branch condition")?;
        self.push(InstKind::Branch {
            cond,
            then_dest,
            else_dest,
        })
        .map(|_| ())
    }

    pub fn ret(&mut self, values: &[Value]) -> Result<()> {
        let returns = self.func.signature.returns.clone();
        if returns.len() != values.len() {
            return Err(self.error(format!(
                "return of {} values from function returning {}",
                values.len(),
                returns.len()
            )));
        }
        for (&v, &ty) in values.iter().zip(&returns) {
            self.expect_type(v, ty, "return value")?;
        }
        self.push(InstKind::Return {
            values: values.to_vec(),
        })
        .map(|_| ())
    }

    pub fn unreachable(&mut self) -> Result<()> {
        self.push(InstKind::Unreachable).map(|_| ())
    }

    /// Seal the function: every block must end in exactly one terminator.
    pub fn finish(self) -> Result<()> {
        if self.func.is_declaration() {
            return Err(self.error("function body has no blocks".to_string()));
        }
        for &block in self.func.blocks() {
            if self.func.terminator(block).is_none() {
                return Err(self.error(format!("{block} is not terminated")));
            }
        }
        if self
            .module
            .functions
            .iter()
            .any(|f| f.name == self.func.name && !f.is_declaration())
        {
            return Err(self.error("function defined twice in module".to_string()));
        }
        let name = self.func.name.clone();
        self.module.functions.retain(|f| f.name != name);
        self.module.functions.push(self.func);
        Ok(())
    }
}
