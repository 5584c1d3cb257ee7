//! Selection pattern tables
//!
//! A target lists `PatternRule`s: a tree pattern over IR nodes, a cost and an
//! emitter. The selector covers each IR tree bottom-up with the cheapest
//! combination of rules; earlier rules win ties.

use crate::minst::{MachineInst, Opcode, Reg, RegClass};
use rxc_common::Result;
use rxc_ir::{BinaryOp, CastOp, FloatCC, InstKind, IntCC, IrType, UnaryOp};

/// IR node shapes a pattern can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Iconst,
    Fconst,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Icmp,
    Fcmp,
    Cast(CastOp),
    Select,
    Load,
    Store,
    PtrAdd,
    GlobalAddr,
    Alloca,
    Branch,
}

impl NodeKind {
    pub fn matches(self, kind: &InstKind) -> bool {
        match (self, kind) {
            (NodeKind::Iconst, InstKind::Iconst { .. })
            | (NodeKind::Fconst, InstKind::Fconst { .. })
            | (NodeKind::Icmp, InstKind::Icmp { .. })
            | (NodeKind::Fcmp, InstKind::Fcmp { .. })
            | (NodeKind::Select, InstKind::Select { .. })
            | (NodeKind::Load, InstKind::Load { .. })
            | (NodeKind::Store, InstKind::Store { .. })
            | (NodeKind::PtrAdd, InstKind::PtrAdd { .. })
            | (NodeKind::GlobalAddr, InstKind::GlobalAddr { .. })
            | (NodeKind::Alloca, InstKind::Alloca { .. })
            | (NodeKind::Branch, InstKind::Branch { .. }) => true,
            (NodeKind::Binary(a), InstKind::Binary { op, .. }) => a == *op,
            (NodeKind::Unary(a), InstKind::Unary { op, .. }) => a == *op,
            (NodeKind::Cast(a), InstKind::Cast { op, .. }) => a == *op,
            _ => false,
        }
    }
}

/// Tree pattern. Children follow the IR operand order.
#[derive(Debug, Clone, Copy)]
pub enum Pat {
    /// Any value, evaluated into a register
    Reg,
    /// An `iconst` whose value satisfies the predicate
    Imm(fn(i64) -> bool),
    Node(NodeKind, &'static [Pat]),
}

/// Whatever a matched tree hands to the rule's emitter
#[derive(Debug, Clone, PartialEq)]
pub struct Captures {
    /// Result type of the root, stored type for stores, condition type for branches
    pub ty: IrType,
    /// Type of the first operand of the root (of the compare for branches)
    pub from: Option<IrType>,
    pub result: Option<Reg>,
    /// `Reg` leaves in pattern pre-order
    pub regs: Vec<Reg>,
    /// `Imm` leaves in pattern pre-order, sign-extended
    pub imms: Vec<i64>,
    pub int_cc: Option<IntCC>,
    pub float_cc: Option<FloatCC>,
    /// Branch destinations (then, else) as machine block indices
    pub blocks: [u32; 2],
    pub symbol: Option<String>,
    /// Bit pattern of a float constant
    pub bits: u64,
    /// Frame slot of an alloca
    pub slot: Option<u32>,
}

impl Captures {
    pub fn new(ty: IrType) -> Self {
        Self {
            ty,
            from: None,
            result: None,
            regs: Vec::new(),
            imms: Vec::new(),
            int_cc: None,
            float_cc: None,
            blocks: [0; 2],
            symbol: None,
            bits: 0,
            slot: None,
        }
    }

    /// Result register; selection always provides one for value-producing roots
    pub fn dst(&self) -> Reg {
        self.result.unwrap_or(Reg::Virt(crate::minst::VReg(u32::MAX)))
    }

    pub fn reg(&self, n: usize) -> Reg {
        self.regs.get(n).copied().unwrap_or(Reg::Virt(crate::minst::VReg(u32::MAX)))
    }

    pub fn imm(&self, n: usize) -> i64 {
        self.imms.get(n).copied().unwrap_or(0)
    }
}

/// Sink for the instructions a rule produces
pub trait Emit {
    fn new_vreg(&mut self, class: RegClass) -> Reg;
    fn push(&mut self, inst: MachineInst);
    /// Place `bytes` in the function's constant pool; returns its symbol
    fn constant(&mut self, bytes: &[u8], align: u32) -> String;
}

pub type EmitFn = fn(&mut dyn Emit, &Captures, Opcode) -> Result<()>;

#[derive(Clone, Copy)]
pub struct PatternRule {
    pub name: &'static str,
    /// Accepted root types; empty accepts any
    pub ty: &'static [IrType],
    /// Accepted first-operand types; empty accepts any
    pub from: &'static [IrType],
    pub pattern: Pat,
    pub cost: u32,
    pub opcode: Opcode,
    pub emit: EmitFn,
}

impl PatternRule {
    pub fn accepts(&self, ty: IrType, from: Option<IrType>) -> bool {
        let ty_ok = self.ty.is_empty() || self.ty.contains(&ty);
        let from_ok = self.from.is_empty() || from.is_some_and(|f| self.from.contains(&f));
        ty_ok && from_ok
    }
}

impl std::fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("cost", &self.cost)
            .field("opcode", &self.opcode)
            .finish()
    }
}

/// Immediate predicates shared by pattern tables
pub mod imm {
    pub fn any(_: i64) -> bool {
        true
    }

    pub fn simm12(v: i64) -> bool {
        (-2048..2048).contains(&v)
    }

    pub fn simm32(v: i64) -> bool {
        i32::try_from(v).is_ok()
    }

    pub fn shamt5(v: i64) -> bool {
        (0..32).contains(&v)
    }

    pub fn shamt6(v: i64) -> bool {
        (0..64).contains(&v)
    }

    pub fn zero(v: i64) -> bool {
        v == 0
    }
}
