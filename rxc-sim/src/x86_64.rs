//! x86-64 processor model
//!
//! General purpose registers are `PReg(0..16)` in hardware order, xmm
//! registers `PReg(16..32)`; only the low 64 bits of an xmm register are
//! modelled. The decoder accepts the legacy prefixes 66/F2/F3, one REX byte
//! and the one- and two-byte opcodes the backend emits.

use crate::error::SimError;
use crate::memory::Memory;
use crate::Machine;
use log::trace;
use rxc_target::PReg;

const RSP: usize = 4;
const MAX_INST_LEN: u64 = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub cf: bool,
    pub zf: bool,
    pub sf: bool,
    pub of: bool,
    pub pf: bool,
}

#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(usize),
    Mem {
        base: Option<usize>,
        index: Option<(usize, u64)>,
        disp: i64,
    },
    Rip(i64),
}

/// Cursor over the bytes of one instruction
struct Decoder {
    bytes: [u8; MAX_INST_LEN as usize],
    len: usize,
    pos: usize,
    pc: u64,
}

impl Decoder {
    fn illegal(&self) -> SimError {
        SimError::illegal(self.pc, &self.bytes[..self.pos.min(self.len)])
    }

    fn peek(&self) -> Result<u8, SimError> {
        self.bytes[..self.len].get(self.pos).copied().ok_or_else(|| self.illegal())
    }

    fn u8(&mut self) -> Result<u8, SimError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn le(&mut self, n: usize) -> Result<u64, SimError> {
        let mut v = 0u64;
        for i in 0..n {
            v |= (self.u8()? as u64) << (8 * i);
        }
        Ok(v)
    }

    fn i8(&mut self) -> Result<i64, SimError> {
        Ok(self.u8()? as i8 as i64)
    }

    fn i32(&mut self) -> Result<i64, SimError> {
        Ok(self.le(4)? as u32 as i32 as i64)
    }

    fn next_pc(&self) -> u64 {
        self.pc.wrapping_add(self.pos as u64)
    }

    /// ModRM (and SIB and displacement); returns the reg field and r/m
    fn modrm(&mut self, rex: u8) -> Result<(usize, Rm), SimError> {
        let m = self.u8()?;
        let mode = m >> 6;
        let reg = ((m >> 3 & 7) | (rex & 4) << 1) as usize;
        let rm = m & 7;
        if mode == 3 {
            return Ok((reg, Rm::Reg((rm | (rex & 1) << 3) as usize)));
        }
        let (base, index) = if rm == 4 {
            let sib = self.u8()?;
            let idx = ((sib >> 3 & 7) | (rex & 2) << 2) as usize;
            let index = (idx != RSP).then_some((idx, 1u64 << (sib >> 6)));
            let b = sib & 7;
            let base = if b == 5 && mode == 0 {
                None
            } else {
                Some((b | (rex & 1) << 3) as usize)
            };
            (base, index)
        } else if rm == 5 && mode == 0 {
            return Ok((reg, Rm::Rip(self.i32()?)));
        } else {
            (Some((rm | (rex & 1) << 3) as usize), None)
        };
        let disp = match mode {
            0 if base.is_none() => self.i32()?,
            0 => 0,
            1 => self.i8()?,
            _ => self.i32()?,
        };
        Ok((reg, Rm::Mem { base, index, disp }))
    }
}

/// Where execution continues after an instruction
enum Flow {
    Next,
    Jump(u64),
}

fn mask(size: u64) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1 << (size * 8)) - 1
    }
}

fn sign_bit(size: u64) -> u64 {
    1 << (size * 8 - 1)
}

fn sign_extend(v: u64, size: u64) -> i64 {
    let shift = 64 - size * 8;
    ((v << shift) as i64) >> shift
}

pub struct X86Vm {
    pub gpr: [u64; 16],
    pub xmm: [u64; 16],
    pub rip: u64,
    pub flags: Flags,
    pub memory: Memory,
}

impl X86Vm {
    pub fn new(memory: Memory) -> Self {
        Self {
            gpr: [0; 16],
            xmm: [0; 16],
            rip: 0,
            flags: Flags::default(),
            memory,
        }
    }

    /// Register operand of `size` bytes; without REX, byte registers 4-7
    /// are `ah`..`bh`
    fn read_gpr(&self, r: usize, size: u64, rex: u8) -> u64 {
        if size == 1 && rex == 0 && (4..8).contains(&r) {
            return self.gpr[r - 4] >> 8 & 0xFF;
        }
        self.gpr[r] & mask(size)
    }

    /// 32-bit writes zero the upper half, narrower ones merge
    fn write_gpr(&mut self, r: usize, size: u64, value: u64, rex: u8) {
        match size {
            8 => self.gpr[r] = value,
            4 => self.gpr[r] = value & 0xFFFF_FFFF,
            1 if rex == 0 && (4..8).contains(&r) => {
                let r = r - 4;
                self.gpr[r] = self.gpr[r] & !0xFF00 | (value & 0xFF) << 8;
            }
            _ => self.gpr[r] = self.gpr[r] & !mask(size) | value & mask(size),
        }
    }

    fn address(&self, rm: Rm, next: u64) -> Option<u64> {
        match rm {
            Rm::Reg(_) => None,
            Rm::Mem { base, index, disp } => {
                let base = base.map_or(0, |b| self.gpr[b]);
                let index = index.map_or(0, |(i, scale)| self.gpr[i].wrapping_mul(scale));
                Some(base.wrapping_add(index).wrapping_add(disp as u64))
            }
            Rm::Rip(disp) => Some(next.wrapping_add(disp as u64)),
        }
    }

    fn read_rm(&self, rm: Rm, size: u64, rex: u8, next: u64) -> Result<Option<u64>, SimError> {
        match rm {
            Rm::Reg(r) => Ok(Some(self.read_gpr(r, size, rex))),
            _ => match self.address(rm, next) {
                Some(addr) => self.memory.load(addr, size).map(Some),
                None => Ok(None),
            },
        }
    }

    fn write_rm(&mut self, rm: Rm, size: u64, value: u64, rex: u8, next: u64) -> Result<Option<()>, SimError> {
        match rm {
            Rm::Reg(r) => {
                self.write_gpr(r, size, value, rex);
                Ok(Some(()))
            }
            _ => match self.address(rm, next) {
                Some(addr) => self.memory.store(addr, value, size).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Low `size` bytes of an xmm register or memory operand
    fn read_xmm_rm(&self, rm: Rm, size: u64, next: u64) -> Result<Option<u64>, SimError> {
        match rm {
            Rm::Reg(r) => Ok(Some(self.xmm[r] & mask(size))),
            _ => match self.address(rm, next) {
                Some(addr) => self.memory.load(addr, size).map(Some),
                None => Ok(None),
            },
        }
    }

    fn push(&mut self, value: u64) -> Result<(), SimError> {
        self.gpr[RSP] = self.gpr[RSP].wrapping_sub(8);
        self.memory.store(self.gpr[RSP], value, 8)
    }

    fn pop(&mut self) -> Result<u64, SimError> {
        let value = self.memory.load(self.gpr[RSP], 8)?;
        self.gpr[RSP] = self.gpr[RSP].wrapping_add(8);
        Ok(value)
    }

    fn set_result_flags(&mut self, r: u64, size: u64) {
        self.flags.zf = r & mask(size) == 0;
        self.flags.sf = r & sign_bit(size) != 0;
        self.flags.pf = (r as u8).count_ones() % 2 == 0;
    }

    /// Two-operand ALU group, indexed by the /digit of 81
    fn alu(&mut self, kind: usize, a: u64, b: u64, size: u64) -> Option<u64> {
        let m = mask(size);
        let (a, b) = (a & m, b & m);
        let r = match kind {
            0 => {
                let r = a.wrapping_add(b) & m;
                self.flags.cf = r < a;
                self.flags.of = (a ^ r) & (b ^ r) & sign_bit(size) != 0;
                r
            }
            5 | 7 => {
                let r = a.wrapping_sub(b) & m;
                self.flags.cf = a < b;
                self.flags.of = (a ^ b) & (a ^ r) & sign_bit(size) != 0;
                r
            }
            1 | 4 | 6 => {
                self.flags.cf = false;
                self.flags.of = false;
                match kind {
                    1 => a | b,
                    4 => a & b,
                    _ => a ^ b,
                }
            }
            _ => return None,
        };
        self.set_result_flags(r, size);
        Some(r)
    }

    fn condition(&self, cc: u8) -> bool {
        let f = self.flags;
        let base = match cc >> 1 {
            0 => f.of,
            1 => f.cf,
            2 => f.zf,
            3 => f.cf || f.zf,
            4 => f.sf,
            5 => f.pf,
            6 => f.sf != f.of,
            _ => f.zf || f.sf != f.of,
        };
        base != (cc & 1 != 0)
    }

    fn ucomis(&mut self, a: f64, b: f64) {
        let (zf, pf, cf) = if a.is_nan() || b.is_nan() {
            (true, true, true)
        } else if a < b {
            (false, false, true)
        } else if a == b {
            (true, false, false)
        } else {
            (false, false, false)
        };
        self.flags = Flags {
            cf,
            zf,
            sf: false,
            of: false,
            pf,
        };
    }

    fn divide(&mut self, signed: bool, divisor: u64, size: u64, pc: u64) -> Result<(), SimError> {
        let fault = SimError::DivideError { pc };
        if divisor & mask(size) == 0 {
            return Err(fault);
        }
        let (rax, rdx) = (self.gpr[0], self.gpr[2]);
        let (q, r) = if size == 8 {
            if signed {
                let n = ((rdx as u128) << 64 | rax as u128) as i128;
                let d = divisor as i64 as i128;
                let q = n / d;
                if q < i64::MIN as i128 || q > i64::MAX as i128 {
                    return Err(fault);
                }
                (q as u64, (n % d) as u64)
            } else {
                let n = (rdx as u128) << 64 | rax as u128;
                let d = divisor as u128;
                let q = n / d;
                if q > u64::MAX as u128 {
                    return Err(fault);
                }
                (q as u64, (n % d) as u64)
            }
        } else if signed {
            let n = ((rdx & 0xFFFF_FFFF) << 32 | rax & 0xFFFF_FFFF) as i64;
            let d = divisor as u32 as i32 as i64;
            let q = n / d;
            if q < i32::MIN as i64 || q > i32::MAX as i64 {
                return Err(fault);
            }
            (q as u64, (n % d) as u64)
        } else {
            let n = (rdx & 0xFFFF_FFFF) << 32 | rax & 0xFFFF_FFFF;
            let d = divisor & 0xFFFF_FFFF;
            let q = n / d;
            if q > u32::MAX as u64 {
                return Err(fault);
            }
            (q, n % d)
        };
        self.write_gpr(0, size, q, 1);
        self.write_gpr(2, size, r, 1);
        Ok(())
    }

    /// Truncating float-to-int with the "integer indefinite" result on
    /// NaN or overflow
    fn truncate(v: f64, size: u64) -> u64 {
        let indefinite = sign_bit(size);
        if v.is_nan() {
            return indefinite;
        }
        let t = v.trunc();
        if size == 8 {
            if t >= -9.223_372_036_854_776e18 && t < 9.223_372_036_854_776e18 {
                t as i64 as u64
            } else {
                indefinite
            }
        } else if t >= i32::MIN as f64 && t <= i32::MAX as f64 {
            t as i32 as u32 as u64
        } else {
            indefinite
        }
    }

    fn two_byte(&mut self, d: &mut Decoder, rex: u8, opsize: bool, rep: Option<u8>) -> Result<Flow, SimError> {
        let w = rex & 8 != 0;
        let size = if w { 8 } else { 4 };
        let op = d.u8()?;
        match op {
            0xAF => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let b = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let a = self.read_gpr(reg, size, rex);
                let wide = sign_extend(a, size) as i128 * sign_extend(b, size) as i128;
                let r = (wide as u64) & mask(size);
                let overflow = wide != sign_extend(r, size) as i128;
                self.write_gpr(reg, size, r, rex);
                self.flags.cf = overflow;
                self.flags.of = overflow;
            }
            0xB6 | 0xB7 | 0xBE | 0xBF => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let src = if op & 1 == 0 { 1 } else { 2 };
                let v = self.read_rm(rm, src, rex, next)?.ok_or_else(|| d.illegal())?;
                let v = if op >= 0xBE { sign_extend(v, src) as u64 } else { v };
                self.write_gpr(reg, size, v & mask(size), rex);
            }
            0x80..=0x8F => {
                let rel = d.i32()?;
                if self.condition(op & 15) {
                    return Ok(Flow::Jump(d.next_pc().wrapping_add(rel as u64)));
                }
            }
            0x90..=0x9F => {
                let (_, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.condition(op & 15) as u64;
                self.write_rm(rm, 1, v, rex, next)?.ok_or_else(|| d.illegal())?;
            }
            0x40..=0x4F => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let v = if self.condition(op & 15) { v } else { self.gpr[reg] };
                self.write_gpr(reg, size, v, rex);
            }
            0x58 | 0x5C | 0x59 | 0x5E | 0x5A if rep.is_some() => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let single = rep == Some(0xF3);
                let b = self
                    .read_xmm_rm(rm, if single { 4 } else { 8 }, next)?
                    .ok_or_else(|| d.illegal())?;
                let a = self.xmm[reg];
                if single {
                    let (x, y) = (f32::from_bits(a as u32), f32::from_bits(b as u32));
                    let r = match op {
                        0x58 => x + y,
                        0x5C => x - y,
                        0x59 => x * y,
                        0x5E => x / y,
                        _ => {
                            self.xmm[reg] = (y as f64).to_bits();
                            return Ok(Flow::Next);
                        }
                    };
                    self.xmm[reg] = a & !0xFFFF_FFFF | r.to_bits() as u64;
                } else {
                    let (x, y) = (f64::from_bits(a), f64::from_bits(b));
                    let r = match op {
                        0x58 => x + y,
                        0x5C => x - y,
                        0x59 => x * y,
                        0x5E => x / y,
                        _ => {
                            self.xmm[reg] = a & !0xFFFF_FFFF | (y as f32).to_bits() as u64;
                            return Ok(Flow::Next);
                        }
                    };
                    self.xmm[reg] = r.to_bits();
                }
            }
            0x2A if rep.is_some() => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let v = sign_extend(v, size);
                self.xmm[reg] = if rep == Some(0xF3) {
                    self.xmm[reg] & !0xFFFF_FFFF | (v as f32).to_bits() as u64
                } else {
                    (v as f64).to_bits()
                };
            }
            0x2C if rep.is_some() => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = if rep == Some(0xF3) {
                    let bits = self.read_xmm_rm(rm, 4, next)?.ok_or_else(|| d.illegal())?;
                    f32::from_bits(bits as u32) as f64
                } else {
                    let bits = self.read_xmm_rm(rm, 8, next)?.ok_or_else(|| d.illegal())?;
                    f64::from_bits(bits)
                };
                self.write_gpr(reg, size, Self::truncate(v, size), rex);
            }
            0x2E => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let (a, b) = if opsize {
                    let b = self.read_xmm_rm(rm, 8, next)?.ok_or_else(|| d.illegal())?;
                    (f64::from_bits(self.xmm[reg]), f64::from_bits(b))
                } else {
                    let b = self.read_xmm_rm(rm, 4, next)?.ok_or_else(|| d.illegal())?;
                    (
                        f32::from_bits(self.xmm[reg] as u32) as f64,
                        f32::from_bits(b as u32) as f64,
                    )
                };
                self.ucomis(a, b);
            }
            0x28 => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                self.xmm[reg] = self.read_xmm_rm(rm, 8, next)?.ok_or_else(|| d.illegal())?;
            }
            0x10 | 0x11 if rep.is_some() => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let single = rep == Some(0xF3);
                let len = if single { 4 } else { 8 };
                match (op, rm) {
                    (0x10, Rm::Reg(src)) if single => {
                        self.xmm[reg] = self.xmm[reg] & !0xFFFF_FFFF | self.xmm[src] & 0xFFFF_FFFF;
                    }
                    (0x10, Rm::Reg(src)) => self.xmm[reg] = self.xmm[src],
                    (0x10, _) => {
                        self.xmm[reg] = self.read_xmm_rm(rm, len, next)?.ok_or_else(|| d.illegal())?;
                    }
                    (_, Rm::Reg(dst)) if single => {
                        self.xmm[dst] = self.xmm[dst] & !0xFFFF_FFFF | self.xmm[reg] & 0xFFFF_FFFF;
                    }
                    (_, Rm::Reg(dst)) => self.xmm[dst] = self.xmm[reg],
                    _ => {
                        let addr = self.address(rm, next).ok_or_else(|| d.illegal())?;
                        self.memory.store(addr, self.xmm[reg], len)?;
                    }
                }
            }
            0x6E if opsize => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                self.xmm[reg] = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
            }
            0x7E if opsize => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.xmm[reg] & mask(size);
                self.write_rm(rm, size, v, rex, next)?.ok_or_else(|| d.illegal())?;
            }
            _ => return Err(d.illegal()),
        }
        Ok(Flow::Next)
    }
}

impl Machine for X86Vm {
    fn pc(&self) -> u64 {
        self.rip
    }

    fn set_pc(&mut self, pc: u64) {
        self.rip = pc;
    }

    fn reg(&self, reg: PReg) -> u64 {
        match reg.index() {
            r @ 0..=15 => self.gpr[r],
            r => self.xmm[r & 15],
        }
    }

    fn set_reg(&mut self, reg: PReg, value: u64) {
        match reg.index() {
            r @ 0..=15 => self.gpr[r] = value,
            r => self.xmm[r & 15] = value,
        }
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn step(&mut self) -> Result<(), SimError> {
        let fetched = self.memory.fetch(self.rip, MAX_INST_LEN)?;
        let mut d = Decoder {
            bytes: [0; MAX_INST_LEN as usize],
            len: fetched.len(),
            pos: 0,
            pc: self.rip,
        };
        d.bytes[..fetched.len()].copy_from_slice(fetched);

        let (mut opsize, mut rep) = (false, None);
        loop {
            match d.peek()? {
                0x66 => opsize = true,
                b @ (0xF2 | 0xF3) => rep = Some(b),
                _ => break,
            }
            d.pos += 1;
        }
        let rex = if (0x40..=0x4F).contains(&d.peek()?) { d.u8()? } else { 0 };
        let w = rex & 8 != 0;
        let size = if w {
            8
        } else if opsize {
            2
        } else {
            4
        };
        let op = d.u8()?;

        let flow = match op {
            0x01 | 0x09 | 0x21 | 0x29 | 0x31 | 0x39 => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let a = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let b = self.read_gpr(reg, size, rex);
                let kind = (op >> 3) as usize;
                let r = self.alu(kind, a, b, size).ok_or_else(|| d.illegal())?;
                if kind != 7 {
                    self.write_rm(rm, size, r, rex, next)?.ok_or_else(|| d.illegal())?;
                }
                Flow::Next
            }
            0x81 => {
                let (digit, rm) = d.modrm(rex)?;
                let imm = d.i32()? as u64;
                let next = d.next_pc();
                let a = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let r = self.alu(digit & 7, a, imm, size).ok_or_else(|| d.illegal())?;
                if digit & 7 != 7 {
                    self.write_rm(rm, size, r, rex, next)?.ok_or_else(|| d.illegal())?;
                }
                Flow::Next
            }
            0xC1 | 0xD3 => {
                let (digit, rm) = d.modrm(rex)?;
                let count = if op == 0xC1 { d.u8()? } else { self.gpr[1] as u8 };
                let next = d.next_pc();
                let count = (count & if w { 63 } else { 31 }) as u32;
                let a = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                let (r, carry) = match digit & 7 {
                    4 => (a << count, count > 0 && a >> (size as u32 * 8 - count) & 1 != 0),
                    5 => (a >> count, count > 0 && a >> (count - 1) & 1 != 0),
                    7 => {
                        let s = sign_extend(a, size);
                        ((s >> count) as u64, count > 0 && (s >> (count - 1)) & 1 != 0)
                    }
                    _ => return Err(d.illegal()),
                };
                let r = r & mask(size);
                if count > 0 {
                    self.flags.cf = carry;
                    self.set_result_flags(r, size);
                }
                self.write_rm(rm, size, r, rex, next)?.ok_or_else(|| d.illegal())?;
                Flow::Next
            }
            0x89 => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_gpr(reg, size, rex);
                self.write_rm(rm, size, v, rex, next)?.ok_or_else(|| d.illegal())?;
                Flow::Next
            }
            0x88 => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_gpr(reg, 1, rex);
                self.write_rm(rm, 1, v, rex, next)?.ok_or_else(|| d.illegal())?;
                Flow::Next
            }
            0x8B => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                self.write_gpr(reg, size, v, rex);
                Flow::Next
            }
            0x8D => {
                let (reg, rm) = d.modrm(rex)?;
                let addr = self.address(rm, d.next_pc()).ok_or_else(|| d.illegal())?;
                self.write_gpr(reg, size, addr & mask(size), rex);
                Flow::Next
            }
            0x63 => {
                let (reg, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let v = self.read_rm(rm, 4, rex, next)?.ok_or_else(|| d.illegal())?;
                self.write_gpr(reg, size, sign_extend(v, 4) as u64, rex);
                Flow::Next
            }
            0x99 => {
                let sign = self.gpr[0] & sign_bit(size) != 0;
                self.write_gpr(2, size, if sign { u64::MAX } else { 0 }, rex);
                Flow::Next
            }
            0xB8..=0xBF => {
                let r = ((op - 0xB8) | (rex & 1) << 3) as usize;
                let imm = if w { d.le(8)? } else { d.le(4)? };
                self.write_gpr(r, if w { 8 } else { 4 }, imm, rex);
                Flow::Next
            }
            0xF7 => {
                let (digit, rm) = d.modrm(rex)?;
                let next = d.next_pc();
                let a = self.read_rm(rm, size, rex, next)?.ok_or_else(|| d.illegal())?;
                match digit & 7 {
                    2 => {
                        self.write_rm(rm, size, !a & mask(size), rex, next)?;
                    }
                    3 => {
                        let r = self.alu(5, 0, a, size).ok_or_else(|| d.illegal())?;
                        self.flags.cf = a != 0;
                        self.write_rm(rm, size, r, rex, next)?;
                    }
                    6 => self.divide(false, a, size, d.pc)?,
                    7 => self.divide(true, a, size, d.pc)?,
                    _ => return Err(d.illegal()),
                }
                Flow::Next
            }
            0x50..=0x57 => {
                let r = ((op - 0x50) | (rex & 1) << 3) as usize;
                self.push(self.gpr[r])?;
                Flow::Next
            }
            0x58..=0x5F => {
                let r = ((op - 0x58) | (rex & 1) << 3) as usize;
                self.gpr[r] = self.pop()?;
                Flow::Next
            }
            0xC3 => Flow::Jump(self.pop()?),
            0xE8 => {
                let rel = d.i32()?;
                let next = d.next_pc();
                self.push(next)?;
                Flow::Jump(next.wrapping_add(rel as u64))
            }
            0xE9 => {
                let rel = d.i32()?;
                Flow::Jump(d.next_pc().wrapping_add(rel as u64))
            }
            0x0F => self.two_byte(&mut d, rex, opsize, rep)?,
            _ => return Err(d.illegal()),
        };
        trace!(
            "x86 {:#010x}: {:02x?}",
            d.pc,
            &d.bytes[..d.pos]
        );
        self.rip = match flow {
            Flow::Next => d.next_pc(),
            Flow::Jump(target) => target,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: u64 = 0x40_0000;

    fn machine(code: &[u8]) -> X86Vm {
        let mut memory = Memory::new();
        memory.map(".text", BASE, code.to_vec(), false);
        memory.map("stack", 0x7000, vec![0; 0x100], true);
        let mut vm = X86Vm::new(memory);
        vm.rip = BASE;
        vm.gpr[RSP] = 0x7100;
        vm
    }

    fn run(vm: &mut X86Vm, steps: usize) {
        for _ in 0..steps {
            vm.step().unwrap();
        }
    }

    #[test]
    fn test_32_bit_writes_zero_extend() {
        // movq $-1, %rax ; addl $1, %eax
        let mut vm = machine(&[
            0x48, 0xB8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x81, 0xC0, 0x01, 0x00, 0x00, 0x00,
        ]);
        run(&mut vm, 2);
        assert_eq!(vm.gpr[0], 0);
        assert!(vm.flags.zf && vm.flags.cf);
    }

    #[test]
    fn test_compare_and_setcc() {
        // cmpl %esi, %edi ; setl %al ; movzbl %al, %eax
        let mut vm = machine(&[0x39, 0xF7, 0x40, 0x0F, 0x9C, 0xC0, 0x40, 0x0F, 0xB6, 0xC0]);
        vm.gpr[7] = (-5i64) as u64;
        vm.gpr[6] = 3;
        vm.gpr[0] = 0xFFFF_FFFF_FFFF_FF00;
        run(&mut vm, 3);
        assert_eq!(vm.gpr[0], 1);
    }

    #[test]
    fn test_signed_division_and_fault() {
        // cdq ; idivl %ecx
        let mut vm = machine(&[0x99, 0xF7, 0xF9]);
        vm.gpr[0] = (-7i32) as u32 as u64;
        vm.gpr[1] = 2;
        run(&mut vm, 2);
        assert_eq!((vm.gpr[0] as u32 as i32, vm.gpr[2] as u32 as i32), (-3, -1));

        let mut vm = machine(&[0x99, 0xF7, 0xF9]);
        vm.gpr[0] = 0x8000_0000;
        vm.gpr[1] = 0xFFFF_FFFF;
        vm.step().unwrap();
        assert_eq!(vm.step(), Err(SimError::DivideError { pc: BASE + 1 }));
    }

    #[test]
    fn test_call_and_ret_use_the_stack() {
        // call +1 ; ret ; ret
        let mut vm = machine(&[0xE8, 0x01, 0x00, 0x00, 0x00, 0xC3, 0xC3]);
        vm.step().unwrap();
        assert_eq!(vm.rip, BASE + 6);
        assert_eq!(vm.memory.load(0x70F8, 8).unwrap(), BASE + 5);
        vm.step().unwrap();
        assert_eq!((vm.rip, vm.gpr[RSP]), (BASE + 5, 0x7100));
    }

    #[test]
    fn test_sse_arithmetic_and_unordered_compare() {
        // addsd %xmm1, %xmm0 ; ucomisd %xmm2, %xmm0 ; cvttsd2si %xmm0, %rax
        let mut vm = machine(&[
            0xF2, 0x0F, 0x58, 0xC1, 0x66, 0x0F, 0x2E, 0xC2, 0xF2, 0x48, 0x0F, 0x2C, 0xC0,
        ]);
        vm.xmm[0] = 1.5f64.to_bits();
        vm.xmm[1] = 2.25f64.to_bits();
        vm.xmm[2] = f64::NAN.to_bits();
        run(&mut vm, 3);
        assert_eq!(f64::from_bits(vm.xmm[0]), 3.75);
        assert!(vm.flags.pf && vm.flags.zf && vm.flags.cf);
        assert_eq!(vm.gpr[0], 3);
        assert_eq!(X86Vm::truncate(f64::NAN, 4), 0x8000_0000);
    }

    #[test]
    fn test_unknown_opcode_is_illegal() {
        let mut vm = machine(&[0x0F, 0x0B]);
        assert!(matches!(vm.step(), Err(SimError::IllegalInstruction { pc: BASE, .. })));
    }
}
