//! RV32 relocation kinds
//!
//! Instruction-field relocations patch immediates in place and keep every
//! other bit of the instruction. `CALL` and `PCREL_ADDR` cover an `auipc`
//! followed by an I-type instruction and split the offset into `hi20`/`lo12`.

use rxc_object::reloc::field::{decode_abs32, encode_abs32, read_u32, write_u32};
use rxc_object::RelocKindInfo;

pub const R_ABS32: u16 = 1;
pub const R_BRANCH: u16 = 2;
pub const R_JAL: u16 = 3;
pub const R_CALL: u16 = 4;
pub const R_PCREL_ADDR: u16 = 5;

fn encode_branch(field: &mut [u8], value: i64) -> bool {
    if value & 1 != 0 || !(-4096..4096).contains(&value) {
        return false;
    }
    let v = value as u32;
    let insn = read_u32(field) & 0x01FF_F07F;
    let imm = ((v >> 12) & 1) << 31 | ((v >> 5) & 0x3F) << 25 | ((v >> 1) & 0xF) << 8 | ((v >> 11) & 1) << 7;
    write_u32(field, insn | imm);
    true
}

pub(crate) fn branch_offset(insn: u32) -> i64 {
    let imm = ((insn >> 31) & 1) << 12 | ((insn >> 7) & 1) << 11 | ((insn >> 25) & 0x3F) << 5 | ((insn >> 8) & 0xF) << 1;
    (((imm << 19) as i32) >> 19) as i64
}

fn decode_branch(field: &[u8]) -> i64 {
    branch_offset(read_u32(field))
}

fn encode_jal(field: &mut [u8], value: i64) -> bool {
    if value & 1 != 0 || !(-(1 << 20)..(1 << 20)).contains(&value) {
        return false;
    }
    let v = value as u32;
    let insn = read_u32(field) & 0x0000_0FFF;
    let imm = ((v >> 20) & 1) << 31 | ((v >> 1) & 0x3FF) << 21 | ((v >> 11) & 1) << 20 | ((v >> 12) & 0xFF) << 12;
    write_u32(field, insn | imm);
    true
}

pub(crate) fn jal_offset(insn: u32) -> i64 {
    let imm = ((insn >> 31) & 1) << 20 | ((insn >> 12) & 0xFF) << 12 | ((insn >> 20) & 1) << 11 | ((insn >> 21) & 0x3FF) << 1;
    (((imm << 11) as i32) >> 11) as i64
}

fn decode_jal(field: &[u8]) -> i64 {
    jal_offset(read_u32(field))
}

/// Split a 32-bit offset into the `auipc` and I-type immediates
pub fn split_hi_lo(value: i64) -> Option<(i64, i64)> {
    let hi = (value + 0x800) >> 12;
    if !(-(1 << 19)..(1 << 19)).contains(&hi) {
        return None;
    }
    Some((hi, value - (hi << 12)))
}

fn encode_pair(field: &mut [u8], value: i64) -> bool {
    let Some((hi, lo)) = split_hi_lo(value) else {
        return false;
    };
    if field.len() < 8 {
        return false;
    }
    let (upper, lower) = field.split_at_mut(4);
    let auipc = read_u32(upper) & 0x0000_0FFF;
    write_u32(upper, auipc | ((hi as u32) & 0xF_FFFF) << 12);
    let itype = read_u32(lower) & 0x000F_FFFF;
    write_u32(lower, itype | ((lo as u32) & 0xFFF) << 20);
    true
}

fn decode_pair(field: &[u8]) -> i64 {
    let hi = (read_u32(field) & 0xFFFF_F000) as i32 as i64;
    let lo = ((read_u32(&field[4.min(field.len())..]) as i32) >> 20) as i64;
    hi + lo
}

pub static RELOCATIONS: [RelocKindInfo; 5] = [
    RelocKindInfo {
        code: R_ABS32,
        name: "R_RV_32",
        pc_relative: false,
        size: 4,
        encode: encode_abs32,
        decode: decode_abs32,
    },
    RelocKindInfo {
        code: R_BRANCH,
        name: "R_RV_BRANCH",
        pc_relative: true,
        size: 4,
        encode: encode_branch,
        decode: decode_branch,
    },
    RelocKindInfo {
        code: R_JAL,
        name: "R_RV_JAL",
        pc_relative: true,
        size: 4,
        encode: encode_jal,
        decode: decode_jal,
    },
    RelocKindInfo {
        code: R_CALL,
        name: "R_RV_CALL",
        pc_relative: true,
        size: 8,
        encode: encode_pair,
        decode: decode_pair,
    },
    RelocKindInfo {
        code: R_PCREL_ADDR,
        name: "R_RV_PCREL_ADDR",
        pc_relative: true,
        size: 8,
        encode: encode_pair,
        decode: decode_pair,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind(code: u16) -> &'static RelocKindInfo {
        RELOCATIONS.iter().find(|k| k.code == code).unwrap()
    }

    #[test]
    fn test_branch_field_keeps_registers() {
        // beq a0, a1, 0
        let mut insn = 0x00B5_0063u32.to_le_bytes();
        assert!((kind(R_BRANCH).encode)(&mut insn, -8));
        assert_eq!((kind(R_BRANCH).decode)(&insn), -8);
        assert_eq!(u32::from_le_bytes(insn) & 0x01FF_F07F, 0x00B5_0063);
        assert!(!(kind(R_BRANCH).encode)(&mut insn, 4096));
        assert!(!(kind(R_BRANCH).encode)(&mut insn, 3));
    }

    #[test]
    fn test_jal_round_trip() {
        let mut insn = 0x0000_006Fu32.to_le_bytes();
        for value in [2048, -2, 0xF_FFFE, -(1 << 20)] {
            assert!((kind(R_JAL).encode)(&mut insn, value));
            assert_eq!((kind(R_JAL).decode)(&insn), value);
        }
    }

    #[test]
    fn test_hi_lo_pairs_round_trip() {
        // auipc ra, 0; jalr ra, 0(ra)
        let mut pair = [0u8; 8];
        pair[..4].copy_from_slice(&0x0000_0097u32.to_le_bytes());
        pair[4..].copy_from_slice(&0x0000_80E7u32.to_le_bytes());
        for value in [0x800, 0x7FF, -0x801, 0x1234_5678, -0x1000_0000] {
            assert!((kind(R_CALL).encode)(&mut pair, value));
            assert_eq!((kind(R_CALL).decode)(&pair), value);
        }
        assert_eq!(split_hi_lo(0x800), Some((1, -0x800)));
        assert!(!(kind(R_PCREL_ADDR).encode)(&mut pair, 1 << 40));
    }
}
