//! Textual form of the IR, used for `--print-ir` and test diagnostics

use crate::function::Function;
use crate::instructions::InstKind;
use crate::module::{GlobalInit, Linkage, Module};
use crate::values::Inst;
use std::fmt;

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => write!(f, "external"),
            Linkage::Internal => write!(f, "internal"),
            Linkage::Weak => write!(f, "weak"),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for g in &self.globals {
            let kind = if g.constant { "constant" } else { "global" };
            match &g.init {
                GlobalInit::Zeroed(size) => writeln!(f, "{kind} {} @{} = zeroed {size}", g.linkage, g.name)?,
                GlobalInit::Data(items) => writeln!(f, "{kind} {} @{} = {:?}", g.linkage, g.name, items)?,
            }
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params()
            .iter()
            .map(|&p| format!("{p}: {}", self.value_type(p)))
            .collect();
        let rets: Vec<String> = self.signature.returns.iter().map(|t| t.to_string()).collect();
        let decl = if self.is_declaration() { "declare" } else { "function" };
        write!(f, "{decl} {} @{}({})", self.linkage, self.name, params.join(", "))?;
        if !rets.is_empty() {
            write!(f, " -> {}", rets.join(", "))?;
        }
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for &block in self.blocks() {
            writeln!(f, "{block}:")?;
            for &inst in self.block_insts(block) {
                writeln!(f, "    {}", InstDisplay { func: self, inst })?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Display adapter for one instruction in its function
pub struct InstDisplay<'a> {
    pub func: &'a Function,
    pub inst: Inst,
}

impl fmt::Display for InstDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        let results = func.results(self.inst);
        if !results.is_empty() {
            let names: Vec<String> = results.iter().map(|r| r.to_string()).collect();
            write!(f, "{} = ", names.join(", "))?;
        }
        let list = |vs: &[crate::values::Value]| vs.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
        match func.kind(self.inst) {
            InstKind::Iconst { ty, imm } => write!(f, "iconst.{ty} {imm}"),
            InstKind::Fconst { ty, bits } => write!(f, "fconst.{ty} {bits:#x}"),
            InstKind::Binary { op, ty, lhs, rhs } => write!(f, "{op}.{ty} {lhs}, {rhs}"),
            InstKind::Unary { op, ty, arg } => write!(f, "{}.{ty} {arg}", op.name()),
            InstKind::Icmp { cc, lhs, rhs } => write!(f, "icmp {} {lhs}, {rhs}", cc.name()),
            InstKind::Fcmp { cc, lhs, rhs } => write!(f, "fcmp {} {lhs}, {rhs}", cc.name()),
            InstKind::Cast { op, to, arg } => write!(f, "{op} {arg} to {to}"),
            InstKind::Select { cond, then_val, else_val } => write!(f, "select {cond}, {then_val}, {else_val}"),
            InstKind::Alloca { size, align } => write!(f, "alloca {size}, align {align}"),
            InstKind::Load { ty, ptr } => write!(f, "load.{ty} {ptr}"),
            InstKind::Store { value, ptr } => write!(f, "store {value}, {ptr}"),
            InstKind::PtrAdd { ptr, offset } => write!(f, "ptradd {ptr}, {offset}"),
            InstKind::GlobalAddr { symbol } => write!(f, "globaladdr @{symbol}"),
            InstKind::Call { callee, args, .. } => write!(f, "call @{callee}({})", list(args)),
            InstKind::Phi { ty, incoming } => {
                let parts: Vec<String> = incoming.iter().map(|(b, v)| format!("[{b}: {v}]")).collect();
                write!(f, "phi.{ty} {}", parts.join(", "))
            }
            InstKind::Jump { dest } => write!(f, "jump {dest}"),
            InstKind::Branch { cond, then_dest, else_dest } => write!(f, "branch {cond}, {then_dest}, {else_dest}"),
            InstKind::Return { values } => {
                if values.is_empty() {
                    write!(f, "return")
                } else {
                    write!(f, "return {}", list(values))
                }
            }
            InstKind::Unreachable => write!(f, "unreachable"),
        }
    }
}
