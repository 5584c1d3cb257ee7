//! IR Type System
//! 
//! A small fixed set of primitive types. Integers carry only a width;
//! signedness is a property of the operations that consume them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IrType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Address-sized pointer; its width is decided by the target
    Ptr,
}

impl IrType {
    pub fn is_int(self) -> bool {
        matches!(self, IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_ptr(self) -> bool {
        self == IrType::Ptr
    }

    /// Integer or pointer: lives in a general purpose register
    pub fn is_int_like(self) -> bool {
        self.is_int() || self.is_ptr()
    }

    /// Bit width; pointers report the width passed in by the caller
    pub fn bits(self, pointer_bits: u32) -> u32 {
        match self {
            IrType::I1 => 1,
            IrType::I8 => 8,
            IrType::I16 => 16,
            IrType::I32 | IrType::F32 => 32,
            IrType::I64 | IrType::F64 => 64,
            IrType::Ptr => pointer_bits,
        }
    }

    /// Size in memory in bytes
    pub fn bytes(self, pointer_bits: u32) -> u32 {
        self.bits(pointer_bits).div_ceil(8)
    }

    /// Integer type of the given width, if one exists
    pub fn int_of_bits(bits: u32) -> Option<IrType> {
        match bits {
            1 => Some(IrType::I1),
            8 => Some(IrType::I8),
            16 => Some(IrType::I16),
            32 => Some(IrType::I32),
            64 => Some(IrType::I64),
            _ => None,
        }
    }

    /// Mask covering the value bits of an integer type
    pub fn mask(self) -> u64 {
        match self.bits(64) {
            64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I16 => "i16",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::F32 => "f32",
            IrType::F64 => "f64",
            IrType::Ptr => "ptr",
        };
        write!(f, "{s}")
    }
}
