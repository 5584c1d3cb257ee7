//! x86-64 instruction encoder
//!
//! Emits legacy prefix, REX, opcode, ModRM/SIB and displacement. Memory
//! operands are always `[base + disp]`; byte registers always get a REX
//! prefix so that encodings 4-7 name `spl`..`dil`.

use super::opcodes::*;
use super::reloc::R_PC32;
use crate::minst::{CodeBuffer, EncodeError, FixupTarget, MachineInst, Opcode, Operand, Reg};

fn mnemonic(op: Opcode) -> &'static str {
    NAMES.get(op.0 as usize).copied().unwrap_or("?")
}

#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(u8),
    Mem { base: u8, disp: i32 },
}

/// Encoding request for one ModRM-form instruction
struct Form<'a> {
    prefix: Option<u8>,
    w: bool,
    force_rex: bool,
    opcode: &'a [u8],
    reg: u8,
    rm: Rm,
}

fn form(prefix: Option<u8>, w: bool, opcode: &[u8], reg: u8, rm: Rm) -> Form<'_> {
    Form {
        prefix,
        w,
        force_rex: false,
        opcode,
        reg,
        rm,
    }
}

fn emit(buf: &mut CodeBuffer, f: Form<'_>) {
    if let Some(prefix) = f.prefix {
        buf.put_u8(prefix);
    }
    let b = match f.rm {
        Rm::Reg(r) => r,
        Rm::Mem { base, .. } => base,
    };
    if f.w || f.force_rex || f.reg >= 8 || b >= 8 {
        buf.put_u8(0x40 | (f.w as u8) << 3 | (f.reg >> 3 & 1) << 2 | (b >> 3 & 1));
    }
    buf.bytes.extend_from_slice(f.opcode);
    let reg = (f.reg & 7) << 3;
    match f.rm {
        Rm::Reg(r) => buf.put_u8(0xC0 | reg | (r & 7)),
        Rm::Mem { base, disp } => {
            let low = base & 7;
            let (modbits, disp8) = if disp == 0 && low != 5 {
                (0x00, None)
            } else if let Ok(d) = i8::try_from(disp) {
                (0x40, Some(d))
            } else {
                (0x80, None)
            };
            buf.put_u8(modbits | reg | low);
            if low == 4 {
                buf.put_u8(0x24);
            }
            match (modbits, disp8) {
                (0x40, Some(d)) => buf.put_u8(d as u8),
                (0x80, _) => buf.put_u32(disp as u32),
                _ => {}
            }
        }
    }
}

struct Operands<'a> {
    inst: &'a MachineInst,
    mnemonic: &'static str,
}

impl Operands<'_> {
    fn bad(&self) -> EncodeError {
        EncodeError::BadOperands { mnemonic: self.mnemonic }
    }

    fn phys(&self, reg: Reg) -> Result<u8, EncodeError> {
        match reg {
            Reg::Phys(p) => Ok((p.0 & 15) as u8),
            Reg::Virt(v) => Err(EncodeError::VirtualRegister {
                mnemonic: self.mnemonic,
                reg: v.0,
            }),
        }
    }

    fn reg(&self, n: usize) -> Result<u8, EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Reg { reg, .. }) => self.phys(*reg),
            _ => Err(self.bad()),
        }
    }

    fn imm(&self, n: usize) -> Result<i64, EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Imm(v)) => Ok(*v),
            _ => Err(self.bad()),
        }
    }

    fn imm32(&self, n: usize) -> Result<u32, EncodeError> {
        let v = self.imm(n)?;
        if v >= i32::MIN as i64 && v <= u32::MAX as i64 {
            Ok(v as u32)
        } else {
            Err(EncodeError::ImmediateRange {
                mnemonic: self.mnemonic,
                value: v,
            })
        }
    }

    fn simm32(&self, n: usize) -> Result<u32, EncodeError> {
        let v = self.imm(n)?;
        i32::try_from(v).map(|v| v as u32).map_err(|_| EncodeError::ImmediateRange {
            mnemonic: self.mnemonic,
            value: v,
        })
    }

    fn mem(&self, n: usize) -> Result<Rm, EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Mem { base, offset }) => {
                let disp = i32::try_from(*offset).map_err(|_| EncodeError::ImmediateRange {
                    mnemonic: self.mnemonic,
                    value: *offset,
                })?;
                Ok(Rm::Mem {
                    base: self.phys(*base)?,
                    disp,
                })
            }
            _ => Err(self.bad()),
        }
    }

    fn block(&self, n: usize) -> Result<u32, EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Block(b)) => Ok(*b),
            _ => Err(self.bad()),
        }
    }

    fn symbol(&self, n: usize) -> Result<(&str, i64, u16), EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Symbol { name, addend, kind }) => Ok((name, *addend, *kind)),
            _ => Err(self.bad()),
        }
    }

    fn cc(&self, n: usize) -> Result<u8, EncodeError> {
        let v = self.imm(n)?;
        if (0..16).contains(&v) {
            Ok(v as u8)
        } else {
            Err(self.bad())
        }
    }
}

/// `(opcode byte, /digit of the immediate form)` of two-operand ALU operations
fn alu(op: Opcode) -> Option<(u8, u8, bool, bool)> {
    // (rr opcode, ri digit, 64-bit, immediate form)
    Some(match op {
        ADD32RR => (0x01, 0, false, false),
        ADD64RR => (0x01, 0, true, false),
        OR32RR => (0x09, 1, false, false),
        OR64RR => (0x09, 1, true, false),
        AND32RR => (0x21, 4, false, false),
        AND64RR => (0x21, 4, true, false),
        SUB32RR => (0x29, 5, false, false),
        SUB64RR => (0x29, 5, true, false),
        XOR32RR => (0x31, 6, false, false),
        XOR64RR => (0x31, 6, true, false),
        CMP32RR => (0x39, 7, false, false),
        CMP64RR => (0x39, 7, true, false),
        ADD32RI => (0x81, 0, false, true),
        ADD64RI => (0x81, 0, true, true),
        OR32RI => (0x81, 1, false, true),
        OR64RI => (0x81, 1, true, true),
        AND32RI => (0x81, 4, false, true),
        AND64RI => (0x81, 4, true, true),
        SUB32RI => (0x81, 5, false, true),
        SUB64RI => (0x81, 5, true, true),
        XOR32RI => (0x81, 6, false, true),
        XOR64RI => (0x81, 6, true, true),
        CMP32RI => (0x81, 7, false, true),
        CMP64RI => (0x81, 7, true, true),
        _ => return None,
    })
}

/// `(/digit, 64-bit, by immediate)` of shifts
fn shift(op: Opcode) -> Option<(u8, bool, bool)> {
    Some(match op {
        SHL32RC => (4, false, false),
        SHL64RC => (4, true, false),
        SHR32RC => (5, false, false),
        SHR64RC => (5, true, false),
        SAR32RC => (7, false, false),
        SAR64RC => (7, true, false),
        SHL32RI => (4, false, true),
        SHL64RI => (4, true, true),
        SHR32RI => (5, false, true),
        SHR64RI => (5, true, true),
        SAR32RI => (7, false, true),
        SAR64RI => (7, true, true),
        _ => return None,
    })
}

/// `(prefix, opcode)` of scalar SSE arithmetic
fn sse(op: Opcode) -> Option<(u8, u8)> {
    Some(match op {
        ADDSS => (0xF3, 0x58),
        ADDSD => (0xF2, 0x58),
        SUBSS => (0xF3, 0x5C),
        SUBSD => (0xF2, 0x5C),
        MULSS => (0xF3, 0x59),
        MULSD => (0xF2, 0x59),
        DIVSS => (0xF3, 0x5E),
        DIVSD => (0xF2, 0x5E),
        CVTSS2SD => (0xF3, 0x5A),
        CVTSD2SS => (0xF2, 0x5A),
        _ => return None,
    })
}

pub fn encode(inst: &MachineInst, buf: &mut CodeBuffer) -> Result<(), EncodeError> {
    let op = inst.opcode;
    let ops = Operands {
        inst,
        mnemonic: mnemonic(op),
    };
    if let Some((opcode, digit, w, with_imm)) = alu(op) {
        let dst = ops.reg(0)?;
        if with_imm {
            let imm = ops.simm32(1)?;
            emit(buf, form(None, w, &[opcode], digit, Rm::Reg(dst)));
            buf.put_u32(imm);
        } else {
            emit(buf, form(None, w, &[opcode], ops.reg(1)?, Rm::Reg(dst)));
        }
        return Ok(());
    }
    if let Some((digit, w, with_imm)) = shift(op) {
        let dst = ops.reg(0)?;
        if with_imm {
            let amount = ops.imm(1)?;
            if !(0..64).contains(&amount) {
                return Err(EncodeError::ImmediateRange {
                    mnemonic: ops.mnemonic,
                    value: amount,
                });
            }
            emit(buf, form(None, w, &[0xC1], digit, Rm::Reg(dst)));
            buf.put_u8(amount as u8);
        } else {
            if ops.reg(1)? != 1 {
                return Err(ops.bad());
            }
            emit(buf, form(None, w, &[0xD3], digit, Rm::Reg(dst)));
        }
        return Ok(());
    }
    if let Some((prefix, opcode)) = sse(op) {
        emit(buf, form(Some(prefix), false, &[0x0F, opcode], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        return Ok(());
    }

    match op {
        MOV32RR | MOV64RR => emit(buf, form(None, op == MOV64RR, &[0x89], ops.reg(1)?, Rm::Reg(ops.reg(0)?))),
        MOV32RI => {
            let dst = ops.reg(0)?;
            let imm = ops.imm32(1)?;
            if dst >= 8 {
                buf.put_u8(0x41);
            }
            buf.put_u8(0xB8 + (dst & 7));
            buf.put_u32(imm);
        }
        MOV64RI => {
            let dst = ops.reg(0)?;
            let imm = ops.imm(1)?;
            buf.put_u8(0x48 | (dst >> 3 & 1));
            buf.put_u8(0xB8 + (dst & 7));
            buf.put_u64(imm as u64);
        }
        IMUL32RR | IMUL64RR => {
            emit(buf, form(None, op == IMUL64RR, &[0x0F, 0xAF], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        }
        NEG32 | NEG64 => emit(buf, form(None, op == NEG64, &[0xF7], 3, Rm::Reg(ops.reg(0)?))),
        NOT32 | NOT64 => emit(buf, form(None, op == NOT64, &[0xF7], 2, Rm::Reg(ops.reg(0)?))),
        CDQ => buf.put_u8(0x99),
        CQO => {
            buf.put_u8(0x48);
            buf.put_u8(0x99);
        }
        DIV32 | DIV64 | IDIV32 | IDIV64 => {
            let digit = if op == DIV32 || op == DIV64 { 6 } else { 7 };
            let w = op == DIV64 || op == IDIV64;
            emit(buf, form(None, w, &[0xF7], digit, Rm::Reg(ops.reg(2)?)));
        }
        MOVZX32_8 | MOVZX32_16 | MOVSX32_8 | MOVSX32_16 | MOVSX64_8 | MOVSX64_16 => {
            let (opcode, w) = match op {
                MOVZX32_8 => (0xB6, false),
                MOVZX32_16 => (0xB7, false),
                MOVSX32_8 => (0xBE, false),
                MOVSX32_16 => (0xBF, false),
                MOVSX64_8 => (0xBE, true),
                _ => (0xBF, true),
            };
            emit(
                buf,
                Form {
                    force_rex: opcode == 0xB6 || opcode == 0xBE,
                    ..form(None, w, &[0x0F, opcode], ops.reg(0)?, Rm::Reg(ops.reg(1)?))
                },
            );
        }
        MOVSXD => emit(buf, form(None, true, &[0x63], ops.reg(0)?, Rm::Reg(ops.reg(1)?))),
        MOVZX32_8RM | MOVZX32_16RM | MOV32RM | MOV64RM | LEA64 => {
            let (opcode, w): (&[u8], bool) = match op {
                MOVZX32_8RM => (&[0x0F, 0xB6], false),
                MOVZX32_16RM => (&[0x0F, 0xB7], false),
                MOV32RM => (&[0x8B], false),
                MOV64RM => (&[0x8B], true),
                _ => (&[0x8D], true),
            };
            emit(buf, form(None, w, opcode, ops.reg(0)?, ops.mem(1)?));
        }
        MOV8MR | MOV16MR | MOV32MR | MOV64MR => {
            let (prefix, opcode, w) = match op {
                MOV8MR => (None, 0x88, false),
                MOV16MR => (Some(0x66), 0x89, false),
                MOV32MR => (None, 0x89, false),
                _ => (None, 0x89, true),
            };
            emit(
                buf,
                Form {
                    force_rex: op == MOV8MR,
                    ..form(prefix, w, &[opcode], ops.reg(0)?, ops.mem(1)?)
                },
            );
        }
        MOVSS_RM | MOVSD_RM | MOVSS_MR | MOVSD_MR => {
            let prefix = if op == MOVSS_RM || op == MOVSS_MR { 0xF3 } else { 0xF2 };
            let opcode = if op == MOVSS_RM || op == MOVSD_RM { 0x10 } else { 0x11 };
            emit(buf, form(Some(prefix), false, &[0x0F, opcode], ops.reg(0)?, ops.mem(1)?));
        }
        LEA_RIP => {
            let dst = ops.reg(0)?;
            let (name, addend, kind) = ops.symbol(1)?;
            buf.put_u8(0x48 | (dst >> 3 & 1) << 2);
            buf.put_u8(0x8D);
            buf.put_u8((dst & 7) << 3 | 0x05);
            buf.fixup(buf.offset(), FixupTarget::Symbol(name.to_string()), kind, addend - 4);
            buf.put_u32(0);
        }
        SETCC => {
            let dst = ops.reg(0)?;
            let cc = ops.cc(1)?;
            emit(
                buf,
                Form {
                    force_rex: true,
                    ..form(None, false, &[0x0F, 0x90 + cc], 0, Rm::Reg(dst))
                },
            );
            emit(
                buf,
                Form {
                    force_rex: true,
                    ..form(None, false, &[0x0F, 0xB6], dst, Rm::Reg(dst))
                },
            );
        }
        CMOV32 | CMOV64 => {
            let cc = ops.cc(2)?;
            emit(buf, form(None, op == CMOV64, &[0x0F, 0x40 + cc], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        }
        JCC => {
            let cc = ops.cc(0)?;
            buf.put_u8(0x0F);
            buf.put_u8(0x80 + cc);
            buf.fixup(buf.offset(), FixupTarget::Block(ops.block(1)?), R_PC32, -4);
            buf.put_u32(0);
        }
        JMP => {
            buf.put_u8(0xE9);
            buf.fixup(buf.offset(), FixupTarget::Block(ops.block(0)?), R_PC32, -4);
            buf.put_u32(0);
        }
        CALL => {
            let (name, addend, kind) = ops.symbol(0)?;
            buf.put_u8(0xE8);
            buf.fixup(buf.offset(), FixupTarget::Symbol(name.to_string()), kind, addend - 4);
            buf.put_u32(0);
        }
        RET => buf.put_u8(0xC3),
        PUSH64 | POP64 => {
            let r = ops.reg(0)?;
            if r >= 8 {
                buf.put_u8(0x41);
            }
            buf.put_u8(if op == PUSH64 { 0x50 } else { 0x58 } + (r & 7));
        }
        UCOMISS | UCOMISD => {
            let prefix = (op == UCOMISD).then_some(0x66);
            emit(buf, form(prefix, false, &[0x0F, 0x2E], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        }
        CVTSI2SS32 | CVTSI2SS64 | CVTSI2SD32 | CVTSI2SD64 => {
            let prefix = if op == CVTSI2SS32 || op == CVTSI2SS64 { 0xF3 } else { 0xF2 };
            let w = op == CVTSI2SS64 || op == CVTSI2SD64;
            emit(buf, form(Some(prefix), w, &[0x0F, 0x2A], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        }
        CVTTSS2SI32 | CVTTSS2SI64 | CVTTSD2SI32 | CVTTSD2SI64 => {
            let prefix = if op == CVTTSS2SI32 || op == CVTTSS2SI64 { 0xF3 } else { 0xF2 };
            let w = op == CVTTSS2SI64 || op == CVTTSD2SI64;
            emit(buf, form(Some(prefix), w, &[0x0F, 0x2C], ops.reg(0)?, Rm::Reg(ops.reg(1)?)));
        }
        MOVAPS => emit(buf, form(None, false, &[0x0F, 0x28], ops.reg(0)?, Rm::Reg(ops.reg(1)?))),
        MOVQ_XR => emit(buf, form(Some(0x66), true, &[0x0F, 0x6E], ops.reg(0)?, Rm::Reg(ops.reg(1)?))),
        MOVQ_RX => emit(buf, form(Some(0x66), true, &[0x0F, 0x7E], ops.reg(1)?, Rm::Reg(ops.reg(0)?))),
        _ => return Err(EncodeError::UnknownOpcode(op.0)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minst::PReg;
    use crate::x86_64::reloc::R_PLT32;
    use pretty_assertions::assert_eq;

    fn r(n: u16) -> Reg {
        Reg::Phys(PReg(n))
    }

    fn bytes(inst: MachineInst) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        encode(&inst, &mut buf).unwrap();
        buf.bytes
    }

    #[test]
    fn test_known_encodings() {
        // addl %esi, %edi
        assert_eq!(bytes(MachineInst::new(ADD32RR).use_def(r(7)).use_reg(r(6))), vec![0x01, 0xF7]);
        // movq %rdi, %rax
        assert_eq!(bytes(MachineInst::new(MOV64RR).def(r(0)).use_reg(r(7))), vec![0x48, 0x89, 0xF8]);
        // addq %r8, %r9
        assert_eq!(bytes(MachineInst::new(ADD64RR).use_def(r(9)).use_reg(r(8))), vec![0x4D, 0x01, 0xC1]);
        // movl 8(%rsp), %eax
        assert_eq!(bytes(MachineInst::new(MOV32RM).def(r(0)).mem(r(4), 8)), vec![0x8B, 0x44, 0x24, 0x08]);
        // movq %rbx, -8(%rbp)
        assert_eq!(bytes(MachineInst::new(MOV64MR).use_reg(r(3)).mem(r(5), -8)), vec![0x48, 0x89, 0x5D, 0xF8]);
        // subq $32, %rsp
        assert_eq!(
            bytes(MachineInst::new(SUB64RI).use_def(r(4)).imm(32)),
            vec![0x48, 0x81, 0xEC, 0x20, 0x00, 0x00, 0x00]
        );
        // idivl %ecx
        assert_eq!(bytes(MachineInst::new(IDIV32).use_def(r(0)).use_def(r(2)).use_reg(r(1))), vec![0xF7, 0xF9]);
        // pushq %rbp ; popq %r12 ; ret
        assert_eq!(bytes(MachineInst::new(PUSH64).use_reg(r(5))), vec![0x55]);
        assert_eq!(bytes(MachineInst::new(POP64).def(r(12))), vec![0x41, 0x5C]);
        assert_eq!(bytes(MachineInst::new(RET)), vec![0xC3]);
        // addsd %xmm1, %xmm0
        assert_eq!(bytes(MachineInst::new(ADDSD).use_def(r(16)).use_reg(r(17))), vec![0xF2, 0x0F, 0x58, 0xC1]);
        // sete %al ; movzbl %al, %eax
        assert_eq!(
            bytes(MachineInst::new(SETCC).def(r(0)).imm(cc::E)),
            vec![0x40, 0x0F, 0x94, 0xC0, 0x40, 0x0F, 0xB6, 0xC0]
        );
    }

    #[test]
    fn test_pc_relative_fixups() {
        let mut buf = CodeBuffer::new();
        encode(&MachineInst::new(CALL).symbol("add", 0, R_PLT32), &mut buf).unwrap();
        encode(&MachineInst::new(JCC).imm(cc::L).block(2), &mut buf).unwrap();
        assert_eq!(buf.bytes.len(), 5 + 6);
        assert_eq!(buf.fixups[0].offset, 1);
        assert_eq!(buf.fixups[0].addend, -4);
        assert_eq!(buf.fixups[1].offset, 7);
        assert_eq!(buf.fixups[1].target, FixupTarget::Block(2));
    }
}
