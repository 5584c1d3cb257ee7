//! IR Instructions
//!
//! Every instruction refers to its operands by `Value` handle. Results are
//! allocated by the owning function when the instruction is inserted.

use crate::ops::{BinaryOp, CastOp, FloatCC, IntCC, UnaryOp};
use crate::types::IrType;
use crate::values::{Block, Value};
use rxc_common::SourceLocation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    Iconst {
        ty: IrType,
        imm: i64,
    },
    /// Float constant given by its IEEE bit pattern
    Fconst {
        ty: IrType,
        bits: u64,
    },
    Binary {
        op: BinaryOp,
        ty: IrType,
        lhs: Value,
        rhs: Value,
    },
    Unary {
        op: UnaryOp,
        ty: IrType,
        arg: Value,
    },
    Icmp {
        cc: IntCC,
        lhs: Value,
        rhs: Value,
    },
    Fcmp {
        cc: FloatCC,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        to: IrType,
        arg: Value,
    },
    Select {
        cond: Value,
        then_val: Value,
        else_val: Value,
    },
    /// Fixed-size stack allocation living for the whole function
    Alloca {
        size: u32,
        align: u32,
    },
    Load {
        ty: IrType,
        ptr: Value,
    },
    Store {
        value: Value,
        ptr: Value,
    },
    PtrAdd {
        ptr: Value,
        offset: Value,
    },
    GlobalAddr {
        symbol: String,
    },
    Call {
        callee: String,
        args: Vec<Value>,
        rets: Vec<IrType>,
    },
    Phi {
        ty: IrType,
        incoming: Vec<(Block, Value)>,
    },
    Jump {
        dest: Block,
    },
    Branch {
        cond: Value,
        then_dest: Block,
        else_dest: Block,
    },
    Return {
        values: Vec<Value>,
    },
    Unreachable,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jump { .. } | InstKind::Branch { .. } | InstKind::Return { .. } | InstKind::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Instructions that must be kept even when their results are unused
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstKind::Store { .. } | InstKind::Call { .. } => true,
            InstKind::Binary { op, .. } => op.can_trap(),
            k => k.is_terminator(),
        }
    }

    /// Pure computations that may be folded, duplicated or moved within a block
    pub fn is_pure(&self) -> bool {
        !self.has_side_effects()
            && !matches!(self, InstKind::Load { .. } | InstKind::Alloca { .. } | InstKind::Phi { .. })
    }

    pub fn successors(&self) -> Vec<Block> {
        match self {
            InstKind::Jump { dest } => vec![*dest],
            InstKind::Branch { then_dest, else_dest, .. } => {
                if then_dest == else_dest {
                    vec![*then_dest]
                } else {
                    vec![*then_dest, *else_dest]
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn successors_mut(&mut self) -> Vec<&mut Block> {
        match self {
            InstKind::Jump { dest } => vec![dest],
            InstKind::Branch { then_dest, else_dest, .. } => vec![then_dest, else_dest],
            _ => Vec::new(),
        }
    }

    /// Operand values in a fixed order. For phis these are the incoming
    /// values in incoming order.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::Alloca { .. }
            | InstKind::GlobalAddr { .. }
            | InstKind::Jump { .. }
            | InstKind::Unreachable => Vec::new(),
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } | InstKind::Fcmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            InstKind::Unary { arg, .. } | InstKind::Cast { arg, .. } => vec![*arg],
            InstKind::Select { cond, then_val, else_val } => vec![*cond, *then_val, *else_val],
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { value, ptr } => vec![*value, *ptr],
            InstKind::PtrAdd { ptr, offset } => vec![*ptr, *offset],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
            InstKind::Branch { cond, .. } => vec![*cond],
            InstKind::Return { values } => values.clone(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Iconst { .. }
            | InstKind::Fconst { .. }
            | InstKind::Alloca { .. }
            | InstKind::GlobalAddr { .. }
            | InstKind::Jump { .. }
            | InstKind::Unreachable => Vec::new(),
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } | InstKind::Fcmp { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            InstKind::Unary { arg, .. } | InstKind::Cast { arg, .. } => vec![arg],
            InstKind::Select { cond, then_val, else_val } => vec![cond, then_val, else_val],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::PtrAdd { ptr, offset } => vec![ptr, offset],
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::Phi { incoming, .. } => incoming.iter_mut().map(|(_, v)| v).collect(),
            InstKind::Branch { cond, .. } => vec![cond],
            InstKind::Return { values } => values.iter_mut().collect(),
        }
    }

    /// Short mnemonic used in diagnostics
    pub fn mnemonic(&self) -> String {
        match self {
            InstKind::Iconst { .. } => "iconst".to_string(),
            InstKind::Fconst { .. } => "fconst".to_string(),
            InstKind::Binary { op, .. } => op.name().to_string(),
            InstKind::Unary { op, .. } => op.name().to_string(),
            InstKind::Icmp { cc, .. } => format!("icmp {}", cc.name()),
            InstKind::Fcmp { cc, .. } => format!("fcmp {}", cc.name()),
            InstKind::Cast { op, .. } => op.name().to_string(),
            InstKind::Select { .. } => "select".to_string(),
            InstKind::Alloca { .. } => "alloca".to_string(),
            InstKind::Load { .. } => "load".to_string(),
            InstKind::Store { .. } => "store".to_string(),
            InstKind::PtrAdd { .. } => "ptradd".to_string(),
            InstKind::GlobalAddr { .. } => "globaladdr".to_string(),
            InstKind::Call { .. } => "call".to_string(),
            InstKind::Phi { .. } => "phi".to_string(),
            InstKind::Jump { .. } => "jump".to_string(),
            InstKind::Branch { .. } => "branch".to_string(),
            InstKind::Return { .. } => "return".to_string(),
            InstKind::Unreachable => "unreachable".to_string(),
        }
    }
}

/// An instruction as stored in its function's arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstData {
    pub kind: InstKind,
    pub results: Vec<Value>,
    /// Containing block; `None` once the instruction has been removed
    pub block: Option<Block>,
    pub loc: Option<SourceLocation>,
}
