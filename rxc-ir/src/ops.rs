//! IR Operations
//!
//! Operation kinds and their evaluation rules. The interpreter and the
//! constant folder both evaluate through these functions so that folding can
//! never disagree with execution.
//!
//! Integer values are handled in canonical form: a `u64` holding the value
//! zero-extended from its type width.

use crate::types::IrType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// High half of the unsigned double-width product
    MulHU,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    pub fn is_float(self) -> bool {
        matches!(self, BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv)
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::MulHU
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::FAdd
                | BinaryOp::FMul
        )
    }

    /// Operations whose result is undefined for some operands
    pub fn can_trap(self) -> bool {
        matches!(self, BinaryOp::SDiv | BinaryOp::UDiv | BinaryOp::SRem | BinaryOp::URem)
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::MulHU => "mulhu",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    FNeg,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::FNeg => "fneg",
        }
    }
}

/// Integer comparison condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntCC {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntCC {
    pub fn is_signed(self) -> bool {
        matches!(self, IntCC::Slt | IntCC::Sle | IntCC::Sgt | IntCC::Sge)
    }

    /// Condition with operands exchanged: `a cc b == b cc.swapped() a`
    pub fn swapped(self) -> IntCC {
        match self {
            IntCC::Eq => IntCC::Eq,
            IntCC::Ne => IntCC::Ne,
            IntCC::Slt => IntCC::Sgt,
            IntCC::Sle => IntCC::Sge,
            IntCC::Sgt => IntCC::Slt,
            IntCC::Sge => IntCC::Sle,
            IntCC::Ult => IntCC::Ugt,
            IntCC::Ule => IntCC::Uge,
            IntCC::Ugt => IntCC::Ult,
            IntCC::Uge => IntCC::Ule,
        }
    }

    /// Logical negation: `!(a cc b) == a cc.inverted() b`
    pub fn inverted(self) -> IntCC {
        match self {
            IntCC::Eq => IntCC::Ne,
            IntCC::Ne => IntCC::Eq,
            IntCC::Slt => IntCC::Sge,
            IntCC::Sle => IntCC::Sgt,
            IntCC::Sgt => IntCC::Sle,
            IntCC::Sge => IntCC::Slt,
            IntCC::Ult => IntCC::Uge,
            IntCC::Ule => IntCC::Ugt,
            IntCC::Ugt => IntCC::Ule,
            IntCC::Uge => IntCC::Ult,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntCC::Eq => "eq",
            IntCC::Ne => "ne",
            IntCC::Slt => "slt",
            IntCC::Sle => "sle",
            IntCC::Sgt => "sgt",
            IntCC::Sge => "sge",
            IntCC::Ult => "ult",
            IntCC::Ule => "ule",
            IntCC::Ugt => "ugt",
            IntCC::Uge => "uge",
        }
    }
}

/// Float comparison condition. `Ne` is true for unordered operands, every
/// other condition is false for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatCC {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FloatCC {
    pub fn name(self) -> &'static str {
        match self {
            FloatCC::Eq => "eq",
            FloatCC::Ne => "ne",
            FloatCC::Lt => "lt",
            FloatCC::Le => "le",
            FloatCC::Gt => "gt",
            FloatCC::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    Zext,
    Sext,
    Trunc,
    SiToFp,
    UiToFp,
    FpToSi,
    FpExt,
    FpTrunc,
}

impl CastOp {
    pub fn name(self) -> &'static str {
        match self {
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::Trunc => "trunc",
            CastOp::SiToFp => "sitofp",
            CastOp::UiToFp => "uitofp",
            CastOp::FpToSi => "fptosi",
            CastOp::FpExt => "fpext",
            CastOp::FpTrunc => "fptrunc",
        }
    }

    /// Whether a cast from `from` to `to` is well-typed
    pub fn is_valid(self, from: IrType, to: IrType) -> bool {
        let fb = from.bits(64);
        let tb = to.bits(64);
        match self {
            CastOp::Zext | CastOp::Sext => from.is_int() && to.is_int() && fb < tb,
            CastOp::Trunc => from.is_int() && to.is_int() && fb > tb,
            CastOp::SiToFp | CastOp::UiToFp => from.is_int() && to.is_float(),
            CastOp::FpToSi => from.is_float() && to.is_int(),
            CastOp::FpExt => from == IrType::F32 && to == IrType::F64,
            CastOp::FpTrunc => from == IrType::F64 && to == IrType::F32,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sign-extend the low `bits` of `v` to 64 bits
pub fn sext(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

/// Immediate as stored in `iconst`: sign-extended from the type width,
/// except `i1` which stays 0 or 1
pub fn imm_from_canon(v: u64, ty: IrType) -> i64 {
    match ty.bits(64) {
        1 => (v & 1) as i64,
        bits => sext(v, bits),
    }
}

/// Truncate to the canonical form of `ty`
pub fn canon(v: u64, ty: IrType) -> u64 {
    v & ty.mask()
}

/// Evaluate an integer binary operation on canonical operands.
/// Returns `None` where the result is undefined (division by zero, signed
/// overflow of division).
pub fn eval_int_binary(op: BinaryOp, ty: IrType, a: u64, b: u64) -> Option<u64> {
    let bits = ty.bits(64);
    let (sa, sb) = (sext(a, bits), sext(b, bits));
    let amount = (b % bits as u64) as u32;
    let r = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::MulHU => ((a as u128 * b as u128) >> bits) as u64,
        BinaryOp::UDiv => a.checked_div(b)?,
        BinaryOp::URem => a.checked_rem(b)?,
        BinaryOp::SDiv => {
            if sb == 0 || (sa == sext(1u64 << (bits - 1), bits) && sb == -1) {
                return None;
            }
            (sa / sb) as u64
        }
        BinaryOp::SRem => {
            if sb == 0 || (sa == sext(1u64 << (bits - 1), bits) && sb == -1) {
                return None;
            }
            (sa % sb) as u64
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.checked_shl(amount).unwrap_or(0),
        BinaryOp::LShr => a.checked_shr(amount).unwrap_or(0),
        BinaryOp::AShr => (sa >> amount) as u64,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => return None,
    };
    Some(canon(r, ty))
}

/// Evaluate a float binary operation on raw bit patterns
pub fn eval_float_binary(op: BinaryOp, ty: IrType, a: u64, b: u64) -> Option<u64> {
    match ty {
        IrType::F32 => {
            let (x, y) = (f32::from_bits(a as u32), f32::from_bits(b as u32));
            let r = match op {
                BinaryOp::FAdd => x + y,
                BinaryOp::FSub => x - y,
                BinaryOp::FMul => x * y,
                BinaryOp::FDiv => x / y,
                _ => return None,
            };
            Some(r.to_bits() as u64)
        }
        IrType::F64 => {
            let (x, y) = (f64::from_bits(a), f64::from_bits(b));
            let r = match op {
                BinaryOp::FAdd => x + y,
                BinaryOp::FSub => x - y,
                BinaryOp::FMul => x * y,
                BinaryOp::FDiv => x / y,
                _ => return None,
            };
            Some(r.to_bits())
        }
        _ => None,
    }
}

pub fn eval_unary(op: UnaryOp, ty: IrType, a: u64) -> u64 {
    match op {
        UnaryOp::Neg => canon(a.wrapping_neg(), ty),
        UnaryOp::Not => canon(!a, ty),
        UnaryOp::FNeg => match ty {
            IrType::F32 => a ^ 0x8000_0000,
            _ => a ^ 0x8000_0000_0000_0000,
        },
    }
}

pub fn eval_icmp(cc: IntCC, ty: IrType, a: u64, b: u64) -> bool {
    let bits = ty.bits(64);
    let (sa, sb) = (sext(a, bits), sext(b, bits));
    match cc {
        IntCC::Eq => a == b,
        IntCC::Ne => a != b,
        IntCC::Slt => sa < sb,
        IntCC::Sle => sa <= sb,
        IntCC::Sgt => sa > sb,
        IntCC::Sge => sa >= sb,
        IntCC::Ult => a < b,
        IntCC::Ule => a <= b,
        IntCC::Ugt => a > b,
        IntCC::Uge => a >= b,
    }
}

pub fn eval_fcmp(cc: FloatCC, ty: IrType, a: u64, b: u64) -> bool {
    let (x, y) = match ty {
        IrType::F32 => (f32::from_bits(a as u32) as f64, f32::from_bits(b as u32) as f64),
        _ => (f64::from_bits(a), f64::from_bits(b)),
    };
    match cc {
        FloatCC::Eq => x == y,
        FloatCC::Ne => x != y,
        FloatCC::Lt => x < y,
        FloatCC::Le => x <= y,
        FloatCC::Gt => x > y,
        FloatCC::Ge => x >= y,
    }
}

/// Evaluate a cast. Returns `None` for float-to-int conversions that do not
/// fit the destination.
pub fn eval_cast(op: CastOp, from: IrType, to: IrType, a: u64) -> Option<u64> {
    let fb = from.bits(64);
    let as_f64 = |v: u64| match from {
        IrType::F32 => f32::from_bits(v as u32) as f64,
        _ => f64::from_bits(v),
    };
    let from_f64 = |x: f64| match to {
        IrType::F32 => (x as f32).to_bits() as u64,
        _ => x.to_bits(),
    };
    let r = match op {
        CastOp::Zext => a,
        CastOp::Sext => canon(sext(a, fb) as u64, to),
        CastOp::Trunc => canon(a, to),
        CastOp::SiToFp => match to {
            IrType::F32 => (sext(a, fb) as f32).to_bits() as u64,
            _ => (sext(a, fb) as f64).to_bits(),
        },
        CastOp::UiToFp => match to {
            IrType::F32 => (a as f32).to_bits() as u64,
            _ => (a as f64).to_bits(),
        },
        CastOp::FpToSi => {
            let x = as_f64(a).trunc();
            let tb = to.bits(64);
            let lo = -(2f64.powi(tb as i32 - 1));
            let hi = 2f64.powi(tb as i32 - 1);
            if x.is_nan() || x < lo || x >= hi {
                return None;
            }
            canon(x as i64 as u64, to)
        }
        CastOp::FpExt => (f32::from_bits(a as u32) as f64).to_bits(),
        CastOp::FpTrunc => from_f64(f64::from_bits(a)),
    };
    Some(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_add() {
        assert_eq!(eval_int_binary(BinaryOp::Add, IrType::I32, 0xFFFF_FFFF, 1), Some(0));
        assert_eq!(eval_int_binary(BinaryOp::Add, IrType::I8, 0x7F, 1), Some(0x80));
    }

    #[test]
    fn test_signed_division() {
        let minus_seven = canon((-7i64) as u64, IrType::I32);
        let r = eval_int_binary(BinaryOp::SDiv, IrType::I32, minus_seven, 2).unwrap();
        assert_eq!(sext(r, 32), -3);
        let r = eval_int_binary(BinaryOp::SRem, IrType::I32, minus_seven, 2).unwrap();
        assert_eq!(sext(r, 32), -1);
        assert_eq!(eval_int_binary(BinaryOp::UDiv, IrType::I32, 1, 0), None);
        assert_eq!(eval_int_binary(BinaryOp::SDiv, IrType::I32, 0x8000_0000, 0xFFFF_FFFF), None);
    }

    #[test]
    fn test_shift_amount_is_modulo_width() {
        assert_eq!(eval_int_binary(BinaryOp::Shl, IrType::I32, 1, 33), Some(2));
        assert_eq!(eval_int_binary(BinaryOp::AShr, IrType::I8, 0x80, 7), Some(0xFF));
        assert_eq!(eval_int_binary(BinaryOp::LShr, IrType::I64, u64::MAX, 63), Some(1));
    }

    #[test]
    fn test_mulhu() {
        assert_eq!(
            eval_int_binary(BinaryOp::MulHU, IrType::I32, 0xFFFF_FFFF, 0xFFFF_FFFF),
            Some(0xFFFF_FFFE)
        );
    }

    #[test]
    fn test_icmp_signedness() {
        assert!(eval_icmp(IntCC::Slt, IrType::I32, 0xFFFF_FFFF, 0));
        assert!(!eval_icmp(IntCC::Ult, IrType::I32, 0xFFFF_FFFF, 0));
    }

    #[test]
    fn test_unordered_compare() {
        let nan = f64::NAN.to_bits();
        assert!(eval_fcmp(FloatCC::Ne, IrType::F64, nan, nan));
        assert!(!eval_fcmp(FloatCC::Eq, IrType::F64, nan, nan));
        assert!(!eval_fcmp(FloatCC::Lt, IrType::F64, nan, 0));
    }

    #[test]
    fn test_casts() {
        assert_eq!(eval_cast(CastOp::Sext, IrType::I8, IrType::I32, 0xFF), Some(0xFFFF_FFFF));
        assert_eq!(eval_cast(CastOp::Trunc, IrType::I64, IrType::I16, 0x1234_5678), Some(0x5678));
        let two = 2.0f64.to_bits();
        assert_eq!(eval_cast(CastOp::FpToSi, IrType::F64, IrType::I32, two), Some(2));
        assert_eq!(eval_cast(CastOp::FpToSi, IrType::F64, IrType::I8, 1e9f64.to_bits()), None);
    }
}
