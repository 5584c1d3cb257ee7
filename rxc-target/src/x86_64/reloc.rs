//! x86-64 relocation kinds. Every field is a plain little-endian word.

use rxc_object::reloc::field::{decode_abs32, decode_abs64, decode_i32, encode_abs32, encode_abs64, encode_i32};
use rxc_object::RelocKindInfo;

pub const R_ABS64: u16 = 1;
pub const R_ABS32: u16 = 2;
pub const R_PC32: u16 = 3;
pub const R_PLT32: u16 = 4;

pub static RELOCATIONS: [RelocKindInfo; 4] = [
    RelocKindInfo {
        code: R_ABS64,
        name: "R_X86_64_64",
        pc_relative: false,
        size: 8,
        encode: encode_abs64,
        decode: decode_abs64,
    },
    RelocKindInfo {
        code: R_ABS32,
        name: "R_X86_64_32",
        pc_relative: false,
        size: 4,
        encode: encode_abs32,
        decode: decode_abs32,
    },
    RelocKindInfo {
        code: R_PC32,
        name: "R_X86_64_PC32",
        pc_relative: true,
        size: 4,
        encode: encode_i32,
        decode: decode_i32,
    },
    RelocKindInfo {
        code: R_PLT32,
        name: "R_X86_64_PLT32",
        pc_relative: true,
        size: 4,
        encode: encode_i32,
        decode: decode_i32,
    },
];
