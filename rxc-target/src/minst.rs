//! Machine Instructions
//!
//! The post-selection instruction form shared by every target. Opcodes are
//! target-defined numbers; operands carry enough structure (register roles,
//! frame slots, block and symbol references) for register allocation, frame
//! lowering and encoding to work without knowing the instruction set.

use rxc_common::SourceLocation;
use rxc_ir::IrType;
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u16);

/// Virtual register, unique within a machine function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl VReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Physical register number as listed in the target's register table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PReg(pub u16);

impl PReg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    Virt(VReg),
    Phys(PReg),
}

impl Reg {
    pub fn as_virt(self) -> Option<VReg> {
        match self {
            Reg::Virt(v) => Some(v),
            Reg::Phys(_) => None,
        }
    }

    pub fn as_phys(self) -> Option<PReg> {
        match self {
            Reg::Phys(p) => Some(p),
            Reg::Virt(_) => None,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Virt(v) => write!(f, "%{}", v.0),
            Reg::Phys(p) => write!(f, "$r{}", p.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegClass {
    Gpr,
    Fpr,
}

impl RegClass {
    pub const ALL: [RegClass; 2] = [RegClass::Gpr, RegClass::Fpr];

    /// Class holding values of an IR type
    pub fn for_type(ty: IrType) -> RegClass {
        if ty.is_float() {
            RegClass::Fpr
        } else {
            RegClass::Gpr
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RegClass::Gpr => "gpr",
            RegClass::Fpr => "fpr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegRole {
    Def,
    Use,
    /// Read and written by the same slot (two-address forms)
    UseDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameIndex {
    /// Stack slot allocated for an alloca or a spill
    Slot(u32),
    /// Arguments passed on the stack by the caller
    IncomingArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg { reg: Reg, role: RegRole },
    Imm(i64),
    Mem { base: Reg, offset: i64 },
    /// Frame reference; rewritten to `Mem` once the frame is laid out
    Frame { index: FrameIndex, offset: i64 },
    /// Machine block of the current function
    Block(u32),
    /// External reference becoming one relocation of the given kind
    Symbol { name: String, addend: i64, kind: u16 },
}

/// Side-effect flags of a machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct InstFlags(pub u8);

impl InstFlags {
    pub const NONE: InstFlags = InstFlags(0);
    pub const DEFS_CC: InstFlags = InstFlags(1);
    pub const USES_CC: InstFlags = InstFlags(2);
    pub const CALL: InstFlags = InstFlags(4);
    pub const RETURN: InstFlags = InstFlags(8);
    pub const BRANCH: InstFlags = InstFlags(16);
    pub const MOVE: InstFlags = InstFlags(32);
    /// Unconditional jump; dropped when it targets the next block
    pub const JUMP: InstFlags = InstFlags(64);

    pub fn contains(self, other: InstFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InstFlags {
    type Output = InstFlags;

    fn bitor(self, rhs: InstFlags) -> InstFlags {
        InstFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInst {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub flags: InstFlags,
    /// Physical registers read without an operand slot (call arguments,
    /// returned values)
    pub implicit_uses: Vec<PReg>,
    /// Physical registers overwritten as a side effect
    pub clobbers: Vec<PReg>,
    pub loc: Option<SourceLocation>,
}

impl MachineInst {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
            flags: InstFlags::NONE,
            implicit_uses: Vec::new(),
            clobbers: Vec::new(),
            loc: None,
        }
    }

    pub fn with(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn def(self, reg: Reg) -> Self {
        self.with(Operand::Reg { reg, role: RegRole::Def })
    }

    pub fn use_reg(self, reg: Reg) -> Self {
        self.with(Operand::Reg { reg, role: RegRole::Use })
    }

    pub fn use_def(self, reg: Reg) -> Self {
        self.with(Operand::Reg { reg, role: RegRole::UseDef })
    }

    pub fn imm(self, value: i64) -> Self {
        self.with(Operand::Imm(value))
    }

    pub fn mem(self, base: Reg, offset: i64) -> Self {
        self.with(Operand::Mem { base, offset })
    }

    pub fn frame(self, index: FrameIndex, offset: i64) -> Self {
        self.with(Operand::Frame { index, offset })
    }

    pub fn block(self, block: u32) -> Self {
        self.with(Operand::Block(block))
    }

    pub fn symbol(self, name: &str, addend: i64, kind: u16) -> Self {
        self.with(Operand::Symbol {
            name: name.to_string(),
            addend,
            kind,
        })
    }

    pub fn flags(mut self, flags: InstFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn with_loc(mut self, loc: Option<SourceLocation>) -> Self {
        self.loc = loc;
        self
    }

    pub fn is(&self, flags: InstFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Registers written, clobbers included
    pub fn defs(&self) -> Vec<Reg> {
        let mut out: Vec<Reg> = self
            .operands
            .iter()
            .filter_map(|op| match op {
                Operand::Reg { reg, role: RegRole::Def | RegRole::UseDef } => Some(*reg),
                _ => None,
            })
            .collect();
        out.extend(self.clobbers.iter().map(|&p| Reg::Phys(p)));
        out
    }

    /// Registers read, memory bases and implicit uses included
    pub fn uses(&self) -> Vec<Reg> {
        let mut out: Vec<Reg> = self
            .operands
            .iter()
            .filter_map(|op| match op {
                Operand::Reg { reg, role: RegRole::Use | RegRole::UseDef } => Some(*reg),
                Operand::Mem { base, .. } => Some(*base),
                _ => None,
            })
            .collect();
        out.extend(self.implicit_uses.iter().map(|&p| Reg::Phys(p)));
        out
    }

    /// `(dst, src)` of a register-to-register copy
    pub fn is_move(&self) -> Option<(Reg, Reg)> {
        if !self.is(InstFlags::MOVE) {
            return None;
        }
        match self.operands.as_slice() {
            [Operand::Reg { reg: dst, role: RegRole::Def }, Operand::Reg { reg: src, role: RegRole::Use }] => {
                Some((*dst, *src))
            }
            _ => None,
        }
    }

    /// Visit every register slot, memory bases included
    pub fn for_each_reg_mut(&mut self, mut f: impl FnMut(&mut Reg, RegRole)) {
        for op in &mut self.operands {
            match op {
                Operand::Reg { reg, role } => f(reg, *role),
                Operand::Mem { base, .. } => f(base, RegRole::Use),
                _ => {}
            }
        }
    }

    pub fn block_targets(&self) -> Vec<u32> {
        self.operands
            .iter()
            .filter_map(|op| match op {
                Operand::Block(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    /// Register operand at slot `n`
    pub fn reg(&self, n: usize) -> Option<Reg> {
        match self.operands.get(n)? {
            Operand::Reg { reg, .. } => Some(*reg),
            _ => None,
        }
    }

    /// Render with a target-provided mnemonic
    pub fn display<'a>(&'a self, mnemonic: &'a str) -> MachineInstDisplay<'a> {
        MachineInstDisplay { inst: self, mnemonic }
    }
}

pub struct MachineInstDisplay<'a> {
    inst: &'a MachineInst,
    mnemonic: &'a str,
}

impl fmt::Display for MachineInstDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.inst.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            match op {
                Operand::Reg { reg, .. } => write!(f, "{reg}")?,
                Operand::Imm(v) => write!(f, "{v}")?,
                Operand::Mem { base, offset } => write!(f, "{offset}({base})")?,
                Operand::Frame { index: FrameIndex::Slot(s), offset } => write!(f, "slot{s}+{offset}")?,
                Operand::Frame { index: FrameIndex::IncomingArgs, offset } => write!(f, "args+{offset}")?,
                Operand::Block(b) => write!(f, ".B{b}")?,
                Operand::Symbol { name, addend, .. } if *addend != 0 => write!(f, "{name}{addend:+}")?,
                Operand::Symbol { name, .. } => write!(f, "{name}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixupTarget {
    Block(u32),
    Symbol(String),
}

/// A field left for the emitter (blocks) or the linker (symbols) to patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    /// Offset of the patched field in the function's code
    pub offset: u64,
    pub target: FixupTarget,
    /// Relocation kind code of the target
    pub kind: u16,
    pub addend: i64,
}

#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    pub bytes: Vec<u8>,
    pub fixups: Vec<Fixup>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn put_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn fixup(&mut self, offset: u64, target: FixupTarget, kind: u16, addend: i64) {
        self.fixups.push(Fixup {
            offset,
            target,
            kind,
            addend,
        });
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("{mnemonic}: unexpected operands")]
    BadOperands { mnemonic: &'static str },

    #[error("{mnemonic}: virtual register {reg} reached the encoder")]
    VirtualRegister { mnemonic: &'static str, reg: u32 },

    #[error("{mnemonic}: immediate {value} out of range")]
    ImmediateRange { mnemonic: &'static str, value: i64 },
}

pub type EncodeFn = fn(&MachineInst, &mut CodeBuffer) -> Result<(), EncodeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defs_and_uses() {
        let v = |n| Reg::Virt(VReg(n));
        let inst = MachineInst::new(Opcode(1))
            .use_def(v(0))
            .use_reg(v(1))
            .mem(v(2), 8)
            .flags(InstFlags::DEFS_CC);
        assert_eq!(inst.defs(), vec![v(0)]);
        assert_eq!(inst.uses(), vec![v(0), v(1), v(2)]);
        assert!(inst.is(InstFlags::DEFS_CC));
        assert_eq!(inst.is_move(), None);

        let mut call = MachineInst::new(Opcode(2)).symbol("f", 0, 4).flags(InstFlags::CALL);
        call.implicit_uses.push(PReg(10));
        call.clobbers.push(PReg(1));
        assert_eq!(call.defs(), vec![Reg::Phys(PReg(1))]);
        assert_eq!(call.uses(), vec![Reg::Phys(PReg(10))]);
    }

    #[test]
    fn test_move_detection_and_display() {
        let mv = MachineInst::new(Opcode(3))
            .def(Reg::Virt(VReg(4)))
            .use_reg(Reg::Phys(PReg(2)))
            .flags(InstFlags::MOVE);
        assert_eq!(mv.is_move(), Some((Reg::Virt(VReg(4)), Reg::Phys(PReg(2)))));
        assert_eq!(mv.display("mv").to_string(), "mv %4, $r2");
    }
}
