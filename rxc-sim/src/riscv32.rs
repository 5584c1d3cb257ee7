//! RV32IMFD processor model
//!
//! Integer registers are `PReg(0..32)`, float registers `PReg(32..64)`.
//! Single-precision values are NaN-boxed in the 64-bit float registers.

use crate::error::SimError;
use crate::memory::Memory;
use crate::Machine;
use log::trace;
use rxc_target::PReg;

const NAN_BOX: u64 = 0xFFFF_FFFF_0000_0000;

fn bits(word: u32, hi: u32, lo: u32) -> u32 {
    (word >> lo) & ((1 << (hi - lo + 1)) - 1)
}

fn imm_i(word: u32) -> u32 {
    ((word as i32) >> 20) as u32
}

fn imm_s(word: u32) -> u32 {
    (((word as i32) >> 25) << 5) as u32 | bits(word, 11, 7)
}

fn imm_b(word: u32) -> u32 {
    (((word as i32) >> 31) << 12) as u32 | bits(word, 7, 7) << 11 | bits(word, 30, 25) << 5 | bits(word, 11, 8) << 1
}

fn imm_j(word: u32) -> u32 {
    (((word as i32) >> 31) << 20) as u32 | bits(word, 19, 12) << 12 | bits(word, 20, 20) << 11 | bits(word, 30, 21) << 1
}

/// Float-to-int conversion with RISC-V saturation (NaN gives the maximum)
fn f64_to_i32(v: f64) -> u32 {
    if v.is_nan() {
        i32::MAX as u32
    } else {
        v as i32 as u32
    }
}

pub struct Rv32Vm {
    pub x: [u32; 32],
    pub f: [u64; 32],
    pub pc: u32,
    pub memory: Memory,
}

impl Rv32Vm {
    pub fn new(memory: Memory) -> Self {
        Self {
            x: [0; 32],
            f: [0; 32],
            pc: 0,
            memory,
        }
    }

    fn set_x(&mut self, rd: usize, value: u32) {
        if rd != 0 {
            self.x[rd] = value;
        }
    }

    fn f32(&self, r: usize) -> f32 {
        f32::from_bits(self.f[r] as u32)
    }

    fn f64(&self, r: usize) -> f64 {
        f64::from_bits(self.f[r])
    }

    fn set_f32(&mut self, r: usize, v: f32) {
        self.f[r] = NAN_BOX | v.to_bits() as u64;
    }

    fn set_f64(&mut self, r: usize, v: f64) {
        self.f[r] = v.to_bits();
    }

    /// OP: base integer ALU plus the M extension
    fn op(f3: u32, f7: u32, a: u32, b: u32) -> Option<u32> {
        let (sa, sb) = (a as i32, b as i32);
        Some(match (f7, f3) {
            (0x00, 0) => a.wrapping_add(b),
            (0x20, 0) => a.wrapping_sub(b),
            (0x00, 1) => a << (b & 31),
            (0x00, 2) => (sa < sb) as u32,
            (0x00, 3) => (a < b) as u32,
            (0x00, 4) => a ^ b,
            (0x00, 5) => a >> (b & 31),
            (0x20, 5) => (sa >> (b & 31)) as u32,
            (0x00, 6) => a | b,
            (0x00, 7) => a & b,
            (0x01, 0) => a.wrapping_mul(b),
            (0x01, 1) => ((sa as i64 * sb as i64) >> 32) as u32,
            (0x01, 2) => ((sa as i64 * b as i64) >> 32) as u32,
            (0x01, 3) => ((a as u64 * b as u64) >> 32) as u32,
            (0x01, 4) => match b {
                0 => u32::MAX,
                _ => sa.wrapping_div(sb) as u32,
            },
            (0x01, 5) => a.checked_div(b).unwrap_or(u32::MAX),
            (0x01, 6) => match b {
                0 => a,
                _ => sa.wrapping_rem(sb) as u32,
            },
            (0x01, 7) => a.checked_rem(b).unwrap_or(a),
            _ => return None,
        })
    }

    fn op_imm(f3: u32, f7: u32, a: u32, imm: u32) -> Option<u32> {
        let shamt = imm & 31;
        Some(match f3 {
            0 => a.wrapping_add(imm),
            1 if f7 == 0 => a << shamt,
            2 => ((a as i32) < (imm as i32)) as u32,
            3 => (a < imm) as u32,
            4 => a ^ imm,
            5 if f7 == 0 => a >> shamt,
            5 if f7 == 0x20 => ((a as i32) >> shamt) as u32,
            6 => a | imm,
            7 => a & imm,
            _ => return None,
        })
    }

    /// OP-FP; `None` for encodings outside the supported subset
    fn op_fp(&mut self, word: u32) -> Option<()> {
        let rd = bits(word, 11, 7) as usize;
        let rs1 = bits(word, 19, 15) as usize;
        let rs2 = bits(word, 24, 20) as usize;
        let f3 = bits(word, 14, 12);
        match bits(word, 31, 25) {
            f7 @ (0x00 | 0x04 | 0x08 | 0x0C) => {
                let (a, b) = (self.f32(rs1), self.f32(rs2));
                let r = match f7 {
                    0x00 => a + b,
                    0x04 => a - b,
                    0x08 => a * b,
                    _ => a / b,
                };
                self.set_f32(rd, r);
            }
            f7 @ (0x01 | 0x05 | 0x09 | 0x0D) => {
                let (a, b) = (self.f64(rs1), self.f64(rs2));
                let r = match f7 {
                    0x01 => a + b,
                    0x05 => a - b,
                    0x09 => a * b,
                    _ => a / b,
                };
                self.set_f64(rd, r);
            }
            0x10 => {
                let (a, b) = (self.f[rs1] as u32, self.f[rs2] as u32);
                let sign = match f3 {
                    0 => b,
                    1 => !b,
                    2 => a ^ b,
                    _ => return None,
                } & 0x8000_0000;
                self.f[rd] = NAN_BOX | (a & 0x7FFF_FFFF | sign) as u64;
            }
            0x11 => {
                let (a, b) = (self.f[rs1], self.f[rs2]);
                let sign = match f3 {
                    0 => b,
                    1 => !b,
                    2 => a ^ b,
                    _ => return None,
                } & (1 << 63);
                self.f[rd] = a & !(1 << 63) | sign;
            }
            f7 @ (0x50 | 0x51) => {
                let (a, b) = if f7 == 0x50 {
                    (self.f32(rs1) as f64, self.f32(rs2) as f64)
                } else {
                    (self.f64(rs1), self.f64(rs2))
                };
                let r = match f3 {
                    0 => a <= b,
                    1 => a < b,
                    2 => a == b,
                    _ => return None,
                };
                self.set_x(rd, r as u32);
            }
            f7 @ (0x60 | 0x61) => {
                let v = if f7 == 0x60 { self.f32(rs1) as f64 } else { self.f64(rs1) };
                let r = match rs2 {
                    0 => f64_to_i32(v),
                    1 if v.is_nan() => u32::MAX,
                    1 => v as u32,
                    _ => return None,
                };
                self.set_x(rd, r);
            }
            f7 @ (0x68 | 0x69) => {
                let a = self.x[rs1];
                match (f7, rs2) {
                    (0x68, 0) => self.set_f32(rd, a as i32 as f32),
                    (0x68, 1) => self.set_f32(rd, a as f32),
                    (0x69, 0) => self.set_f64(rd, a as i32 as f64),
                    (0x69, 1) => self.set_f64(rd, a as f64),
                    _ => return None,
                }
            }
            0x20 if rs2 == 1 => self.set_f32(rd, self.f64(rs1) as f32),
            0x21 if rs2 == 0 => self.set_f64(rd, self.f32(rs1) as f64),
            0x70 if f3 == 0 && rs2 == 0 => self.set_x(rd, self.f[rs1] as u32),
            0x78 if f3 == 0 && rs2 == 0 => self.f[rd] = NAN_BOX | self.x[rs1] as u64,
            _ => return None,
        }
        Some(())
    }
}

impl Machine for Rv32Vm {
    fn pc(&self) -> u64 {
        self.pc as u64
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc as u32;
    }

    fn reg(&self, reg: PReg) -> u64 {
        match reg.index() {
            r @ 0..=31 => self.x[r] as u64,
            r => self.f[(r - 32) & 31],
        }
    }

    fn set_reg(&mut self, reg: PReg, value: u64) {
        match reg.index() {
            r @ 0..=31 => self.set_x(r, value as u32),
            r => self.f[(r - 32) & 31] = value,
        }
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn step(&mut self) -> Result<(), SimError> {
        let pc = self.pc;
        let word = self.memory.load(pc as u64, 4)? as u32;
        let illegal = || SimError::illegal(pc as u64, &word.to_le_bytes());
        trace!("rv32 {pc:#010x}: {word:08x}");

        let rd = bits(word, 11, 7) as usize;
        let rs1 = bits(word, 19, 15) as usize;
        let rs2 = bits(word, 24, 20) as usize;
        let f3 = bits(word, 14, 12);
        let f7 = bits(word, 31, 25);
        let mut next = pc.wrapping_add(4);

        match word & 0x7F {
            0x37 => self.set_x(rd, word & 0xFFFF_F000),
            0x17 => self.set_x(rd, pc.wrapping_add(word & 0xFFFF_F000)),
            0x6F => {
                self.set_x(rd, next);
                next = pc.wrapping_add(imm_j(word));
            }
            0x67 if f3 == 0 => {
                let target = self.x[rs1].wrapping_add(imm_i(word)) & !1;
                self.set_x(rd, next);
                next = target;
            }
            0x63 => {
                let (a, b) = (self.x[rs1], self.x[rs2]);
                let taken = match f3 {
                    0 => a == b,
                    1 => a != b,
                    4 => (a as i32) < (b as i32),
                    5 => (a as i32) >= (b as i32),
                    6 => a < b,
                    7 => a >= b,
                    _ => return Err(illegal()),
                };
                if taken {
                    next = pc.wrapping_add(imm_b(word));
                }
            }
            0x03 => {
                let addr = self.x[rs1].wrapping_add(imm_i(word)) as u64;
                let value = match f3 {
                    0 => self.memory.load(addr, 1)? as u8 as i8 as i32 as u32,
                    1 => self.memory.load(addr, 2)? as u16 as i16 as i32 as u32,
                    2 => self.memory.load(addr, 4)? as u32,
                    4 => self.memory.load(addr, 1)? as u32,
                    5 => self.memory.load(addr, 2)? as u32,
                    _ => return Err(illegal()),
                };
                self.set_x(rd, value);
            }
            0x23 => {
                let addr = self.x[rs1].wrapping_add(imm_s(word)) as u64;
                let size = match f3 {
                    0 => 1,
                    1 => 2,
                    2 => 4,
                    _ => return Err(illegal()),
                };
                self.memory.store(addr, self.x[rs2] as u64, size)?;
            }
            0x13 => {
                let value = Self::op_imm(f3, f7, self.x[rs1], imm_i(word)).ok_or_else(illegal)?;
                self.set_x(rd, value);
            }
            0x33 => {
                let value = Self::op(f3, f7, self.x[rs1], self.x[rs2]).ok_or_else(illegal)?;
                self.set_x(rd, value);
            }
            0x07 => {
                let addr = self.x[rs1].wrapping_add(imm_i(word)) as u64;
                self.f[rd] = match f3 {
                    2 => NAN_BOX | self.memory.load(addr, 4)?,
                    3 => self.memory.load(addr, 8)?,
                    _ => return Err(illegal()),
                };
            }
            0x27 => {
                let addr = self.x[rs1].wrapping_add(imm_s(word)) as u64;
                match f3 {
                    2 => self.memory.store(addr, self.f[rs2], 4)?,
                    3 => self.memory.store(addr, self.f[rs2], 8)?,
                    _ => return Err(illegal()),
                }
            }
            0x53 => self.op_fp(word).ok_or_else(illegal)?,
            _ => return Err(illegal()),
        }
        self.pc = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxc_target::riscv32::{i_type, r_type, s_type};

    const BASE: u64 = 0x1000;

    fn machine(words: &[u32]) -> Rv32Vm {
        let mut memory = Memory::new();
        let code = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        memory.map(".text", BASE, code, false);
        memory.map("ram", 0x8000, vec![0; 64], true);
        let mut vm = Rv32Vm::new(memory);
        vm.pc = BASE as u32;
        vm
    }

    fn run(vm: &mut Rv32Vm, steps: usize) {
        for _ in 0..steps {
            vm.step().unwrap();
        }
    }

    #[test]
    fn test_integer_division_edge_cases() {
        // div a0, a1, a2; rem a3, a1, a2; divu a4, a1, a2
        let mut vm = machine(&[
            r_type(0x33, 10, 4, 11, 12, 1),
            r_type(0x33, 13, 6, 11, 12, 1),
            r_type(0x33, 14, 5, 11, 12, 1),
        ]);
        vm.x[11] = 7;
        vm.x[12] = 0;
        run(&mut vm, 3);
        assert_eq!((vm.x[10], vm.x[13], vm.x[14]), (u32::MAX, 7, u32::MAX));

        let mut vm = vm_with_overflow();
        run(&mut vm, 2);
        assert_eq!((vm.x[10], vm.x[13]), (0x8000_0000, 0));
    }

    fn vm_with_overflow() -> Rv32Vm {
        let mut vm = machine(&[r_type(0x33, 10, 4, 11, 12, 1), r_type(0x33, 13, 6, 11, 12, 1)]);
        vm.x[11] = 0x8000_0000;
        vm.x[12] = u32::MAX;
        vm
    }

    #[test]
    fn test_loads_sign_extend_and_x0_stays_zero() {
        // li t0, 0x8000; li t1, -2; sb t1, 3(t0); lb a0, 3(t0); lbu a1, 3(t0); addi x0, x0, 5
        let mut vm = machine(&[
            0x0000_82B7,
            i_type(0x13, 6, 0, 0, -2),
            s_type(0x23, 0, 5, 6, 3),
            i_type(0x03, 10, 0, 5, 3),
            i_type(0x03, 11, 4, 5, 3),
            i_type(0x13, 0, 0, 0, 5),
        ]);
        run(&mut vm, 6);
        assert_eq!((vm.x[10], vm.x[11], vm.x[0]), (0xFFFF_FFFE, 0xFE, 0));
    }

    #[test]
    fn test_float_conversions_saturate() {
        // fcvt.w.d a0, fa0 (rtz); fcvt.d.w fa1, a1
        let mut vm = machine(&[r_type(0x53, 10, 1, 10, 0, 0x61), r_type(0x53, 11, 0, 11, 0, 0x69)]);
        vm.f[10] = (-2.75f64).to_bits();
        vm.x[11] = (-3i32) as u32;
        run(&mut vm, 2);
        assert_eq!(vm.x[10] as i32, -2);
        assert_eq!(f64::from_bits(vm.f[11]), -3.0);

        assert_eq!(f64_to_i32(f64::NAN), i32::MAX as u32);
        assert_eq!(f64_to_i32(1e12), i32::MAX as u32);
    }

    #[test]
    fn test_unknown_encoding_is_illegal() {
        let mut vm = machine(&[0xFFFF_FFFF]);
        assert!(matches!(vm.step(), Err(SimError::IllegalInstruction { pc: BASE, .. })));
    }
}
