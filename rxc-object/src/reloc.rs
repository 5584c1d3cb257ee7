//! Relocation kinds
//!
//! Targets describe each of their relocation kinds as data: a code stored in
//! object files, whether the value is relative to the patch site, how many
//! bytes it patches, and a codec for the instruction or data field. The
//! linker computes `S + A` (minus `P` when PC-relative) and hands the value
//! to the field encoder.

use std::fmt;

#[derive(Clone, Copy)]
pub struct RelocKindInfo {
    pub code: u16,
    pub name: &'static str,
    pub pc_relative: bool,
    /// Bytes covered by the patched field
    pub size: u64,
    /// Patch `value` into `field`; `false` when it does not fit
    pub encode: fn(field: &mut [u8], value: i64) -> bool,
    /// Value currently held by `field`
    pub decode: fn(field: &[u8]) -> i64,
}

impl RelocKindInfo {
    /// Relocation formula: `S + A`, or `S + A - P` when PC-relative
    pub fn compute(&self, symbol: u64, addend: i64, place: u64) -> i64 {
        let value = (symbol as i64).wrapping_add(addend);
        if self.pc_relative {
            value.wrapping_sub(place as i64)
        } else {
            value
        }
    }
}

impl fmt::Debug for RelocKindInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelocKindInfo")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("pc_relative", &self.pc_relative)
            .field("size", &self.size)
            .finish()
    }
}

impl PartialEq for RelocKindInfo {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.name == other.name
    }
}

pub fn lookup(kinds: &[RelocKindInfo], code: u16) -> Option<&RelocKindInfo> {
    kinds.iter().find(|k| k.code == code)
}

/// Field codecs shared by data relocations
pub mod field {
    fn read<const N: usize>(field: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        let n = field.len().min(N);
        out[..n].copy_from_slice(&field[..n]);
        out
    }

    pub fn read_u32(field: &[u8]) -> u32 {
        u32::from_le_bytes(read(field))
    }

    pub fn write_u32(field: &mut [u8], v: u32) {
        for (dst, src) in field.iter_mut().zip(v.to_le_bytes()) {
            *dst = src;
        }
    }

    /// 32-bit absolute address: any value representable as `u32` or `i32`
    pub fn encode_abs32(field: &mut [u8], value: i64) -> bool {
        if value < i32::MIN as i64 || value > u32::MAX as i64 {
            return false;
        }
        write_u32(field, value as u32);
        true
    }

    pub fn decode_abs32(field: &[u8]) -> i64 {
        read_u32(field) as i64
    }

    /// 32-bit signed field
    pub fn encode_i32(field: &mut [u8], value: i64) -> bool {
        match i32::try_from(value) {
            Ok(v) => {
                write_u32(field, v as u32);
                true
            }
            Err(_) => false,
        }
    }

    pub fn decode_i32(field: &[u8]) -> i64 {
        read_u32(field) as i32 as i64
    }

    pub fn encode_abs64(field: &mut [u8], value: i64) -> bool {
        for (dst, src) in field.iter_mut().zip(value.to_le_bytes()) {
            *dst = src;
        }
        true
    }

    pub fn decode_abs64(field: &[u8]) -> i64 {
        i64::from_le_bytes(read(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PC32: RelocKindInfo = RelocKindInfo {
        code: 2,
        name: "PC32",
        pc_relative: true,
        size: 4,
        encode: field::encode_i32,
        decode: field::decode_i32,
    };

    #[test]
    fn test_formula_and_field_round_trip() {
        let value = PC32.compute(0x1000, -4, 0x2000);
        assert_eq!(value, -0x1004);
        let mut bytes = [0xAAu8; 4];
        assert!((PC32.encode)(&mut bytes, value));
        assert_eq!((PC32.decode)(&bytes), value);
        assert!(!(PC32.encode)(&mut bytes, 1 << 40));
    }

    #[test]
    fn test_abs32_accepts_unsigned_and_negative() {
        let mut bytes = [0u8; 4];
        assert!(field::encode_abs32(&mut bytes, 0xFFFF_0000));
        assert_eq!(field::decode_abs32(&bytes), 0xFFFF_0000);
        assert!(field::encode_abs32(&mut bytes, -1));
        assert!(!field::encode_abs32(&mut bytes, 0x1_0000_0000));
    }
}
