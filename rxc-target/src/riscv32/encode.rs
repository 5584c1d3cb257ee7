//! RV32 instruction encoder
//!
//! Expects physical registers and resolved frame references. Block targets
//! and symbols are left as zero immediates with a fixup of the matching
//! relocation kind.

use super::opcodes::*;
use super::reloc::{R_BRANCH, R_JAL};
use crate::minst::{CodeBuffer, EncodeError, FixupTarget, MachineInst, Opcode, Operand, Reg};

const OP_LUI: u32 = 0x37;
const OP_AUIPC: u32 = 0x17;
const OP_JAL: u32 = 0x6F;
const OP_JALR: u32 = 0x67;
const OP_BRANCH: u32 = 0x63;
const OP_LOAD: u32 = 0x03;
const OP_STORE: u32 = 0x23;
const OP_IMM: u32 = 0x13;
const OP_REG: u32 = 0x33;
const OP_LOAD_FP: u32 = 0x07;
const OP_STORE_FP: u32 = 0x27;
const OP_FP: u32 = 0x53;

/// Round-toward-zero, used by float-to-int conversions
const RM_RTZ: u32 = 1;
const RM_RNE: u32 = 0;

const RA: u32 = 1;

fn mnemonic(op: Opcode) -> &'static str {
    NAMES.get(op.0 as usize).copied().unwrap_or("?")
}

pub fn r_type(opcode: u32, rd: u32, f3: u32, rs1: u32, rs2: u32, f7: u32) -> u32 {
    f7 << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | rd << 7 | opcode
}

pub fn i_type(opcode: u32, rd: u32, f3: u32, rs1: u32, imm: i64) -> u32 {
    ((imm as u32) & 0xFFF) << 20 | rs1 << 15 | f3 << 12 | rd << 7 | opcode
}

pub fn s_type(opcode: u32, f3: u32, rs1: u32, rs2: u32, imm: i64) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | f3 << 12 | (imm & 0x1F) << 7 | opcode
}

struct Operands<'a> {
    inst: &'a MachineInst,
    mnemonic: &'static str,
}

impl Operands<'_> {
    fn bad(&self) -> EncodeError {
        EncodeError::BadOperands { mnemonic: self.mnemonic }
    }

    fn phys(&self, reg: Reg) -> Result<u32, EncodeError> {
        match reg {
            Reg::Phys(p) => Ok(p.0 as u32 & 31),
            Reg::Virt(v) => Err(EncodeError::VirtualRegister {
                mnemonic: self.mnemonic,
                reg: v.0,
            }),
        }
    }

    fn reg(&self, n: usize) -> Result<u32, EncodeError> {
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

    fn mem(&self, n: usize) -> Result<(u32, i64), EncodeError> {
        match self.inst.operands.get(n) {
            Some(Operand::Mem { base, offset }) => Ok((self.phys(*base)?, self.simm12(*offset)?)),
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

    fn simm12(&self, value: i64) -> Result<i64, EncodeError> {
        if (-2048..2048).contains(&value) {
            Ok(value)
        } else {
            Err(EncodeError::ImmediateRange {
                mnemonic: self.mnemonic,
                value,
            })
        }
    }

    fn range(&self, value: i64, lo: i64, hi: i64) -> Result<i64, EncodeError> {
        if (lo..=hi).contains(&value) {
            Ok(value)
        } else {
            Err(EncodeError::ImmediateRange {
                mnemonic: self.mnemonic,
                value,
            })
        }
    }
}

/// `(funct3, funct7)` of register-register integer operations
fn alu_reg(op: Opcode) -> Option<(u32, u32)> {
    Some(match op {
        ADD => (0, 0),
        SUB => (0, 0x20),
        SLL => (1, 0),
        SLT => (2, 0),
        SLTU => (3, 0),
        XOR => (4, 0),
        SRL => (5, 0),
        SRA => (5, 0x20),
        OR => (6, 0),
        AND => (7, 0),
        MUL => (0, 1),
        MULH => (1, 1),
        MULHSU => (2, 1),
        MULHU => (3, 1),
        DIV => (4, 1),
        DIVU => (5, 1),
        REM => (6, 1),
        REMU => (7, 1),
        _ => return None,
    })
}

/// `(funct7, funct3)` of float register-register operations
fn fp_reg(op: Opcode) -> Option<(u32, u32)> {
    Some(match op {
        FADD_S => (0x00, RM_RNE),
        FADD_D => (0x01, RM_RNE),
        FSUB_S => (0x04, RM_RNE),
        FSUB_D => (0x05, RM_RNE),
        FMUL_S => (0x08, RM_RNE),
        FMUL_D => (0x09, RM_RNE),
        FDIV_S => (0x0C, RM_RNE),
        FDIV_D => (0x0D, RM_RNE),
        FSGNJ_S => (0x10, 0),
        FSGNJN_S => (0x10, 1),
        FSGNJ_D => (0x11, 0),
        FSGNJN_D => (0x11, 1),
        FLE_S => (0x50, 0),
        FLT_S => (0x50, 1),
        FEQ_S => (0x50, 2),
        FLE_D => (0x51, 0),
        FLT_D => (0x51, 1),
        FEQ_D => (0x51, 2),
        _ => return None,
    })
}

/// `(funct7, rs2 selector, rounding mode)` of single-source float operations
fn fp_unary(op: Opcode) -> Option<(u32, u32, u32)> {
    Some(match op {
        FCVT_W_S => (0x60, 0, RM_RTZ),
        FCVT_W_D => (0x61, 0, RM_RTZ),
        FCVT_S_W => (0x68, 0, RM_RNE),
        FCVT_S_WU => (0x68, 1, RM_RNE),
        FCVT_D_W => (0x69, 0, RM_RNE),
        FCVT_D_WU => (0x69, 1, RM_RNE),
        FCVT_S_D => (0x20, 1, RM_RNE),
        FCVT_D_S => (0x21, 0, RM_RNE),
        FMV_X_W => (0x70, 0, 0),
        FMV_W_X => (0x78, 0, 0),
        _ => return None,
    })
}

pub fn encode(inst: &MachineInst, buf: &mut CodeBuffer) -> Result<(), EncodeError> {
    let op = inst.opcode;
    let ops = Operands {
        inst,
        mnemonic: mnemonic(op),
    };
    if let Some((f3, f7)) = alu_reg(op) {
        buf.put_u32(r_type(OP_REG, ops.reg(0)?, f3, ops.reg(1)?, ops.reg(2)?, f7));
        return Ok(());
    }
    if let Some((f7, f3)) = fp_reg(op) {
        buf.put_u32(r_type(OP_FP, ops.reg(0)?, f3, ops.reg(1)?, ops.reg(2)?, f7));
        return Ok(());
    }
    if let Some((f7, rs2, rm)) = fp_unary(op) {
        buf.put_u32(r_type(OP_FP, ops.reg(0)?, rm, ops.reg(1)?, rs2, f7));
        return Ok(());
    }
    let word = match op {
        ADDI | SLTI | SLTIU | XORI | ORI | ANDI => {
            let f3 = match op {
                ADDI => 0,
                SLTI => 2,
                SLTIU => 3,
                XORI => 4,
                ORI => 6,
                _ => 7,
            };
            i_type(OP_IMM, ops.reg(0)?, f3, ops.reg(1)?, ops.simm12(ops.imm(2)?)?)
        }
        SLLI | SRLI | SRAI => {
            let (f3, f7) = match op {
                SLLI => (1, 0),
                SRLI => (5, 0),
                _ => (5, 0x20),
            };
            let shamt = ops.range(ops.imm(2)?, 0, 31)? as u32;
            r_type(OP_IMM, ops.reg(0)?, f3, ops.reg(1)?, shamt, f7)
        }
        LB | LH | LW | LBU | LHU | FLW | FLD => {
            let (opcode, f3) = match op {
                LB => (OP_LOAD, 0),
                LH => (OP_LOAD, 1),
                LW => (OP_LOAD, 2),
                LBU => (OP_LOAD, 4),
                LHU => (OP_LOAD, 5),
                FLW => (OP_LOAD_FP, 2),
                _ => (OP_LOAD_FP, 3),
            };
            let (base, offset) = ops.mem(1)?;
            i_type(opcode, ops.reg(0)?, f3, base, offset)
        }
        SB | SH | SW | FSW | FSD => {
            let (opcode, f3) = match op {
                SB => (OP_STORE, 0),
                SH => (OP_STORE, 1),
                SW => (OP_STORE, 2),
                FSW => (OP_STORE_FP, 2),
                _ => (OP_STORE_FP, 3),
            };
            let (base, offset) = ops.mem(1)?;
            s_type(opcode, f3, base, ops.reg(0)?, offset)
        }
        BEQ | BNE | BLT | BGE | BLTU | BGEU => {
            let f3 = match op {
                BEQ => 0,
                BNE => 1,
                BLT => 4,
                BGE => 5,
                BLTU => 6,
                _ => 7,
            };
            buf.fixup(buf.offset(), FixupTarget::Block(ops.block(2)?), R_BRANCH, 0);
            r_type(OP_BRANCH, 0, f3, ops.reg(0)?, ops.reg(1)?, 0)
        }
        LUI | AUIPC => {
            let opcode = if op == LUI { OP_LUI } else { OP_AUIPC };
            let hi = ops.range(ops.imm(1)?, 0, 0xF_FFFF)? as u32;
            hi << 12 | ops.reg(0)? << 7 | opcode
        }
        JALR => i_type(OP_JALR, ops.reg(0)?, 0, ops.reg(1)?, ops.simm12(ops.imm(2)?)?),
        MV => i_type(OP_IMM, ops.reg(0)?, 0, ops.reg(1)?, 0),
        FMV_D => {
            let rs = ops.reg(1)?;
            r_type(OP_FP, ops.reg(0)?, 0, rs, rs, 0x11)
        }
        ADDR => {
            let (base, offset) = ops.mem(1)?;
            i_type(OP_IMM, ops.reg(0)?, 0, base, offset)
        }
        J => {
            buf.fixup(buf.offset(), FixupTarget::Block(ops.block(0)?), R_JAL, 0);
            OP_JAL
        }
        RET => i_type(OP_JALR, 0, 0, RA, 0),
        CALL => {
            let (name, addend, kind) = ops.symbol(0)?;
            buf.fixup(buf.offset(), FixupTarget::Symbol(name.to_string()), kind, addend);
            buf.put_u32(RA << 7 | OP_AUIPC);
            i_type(OP_JALR, RA, 0, RA, 0)
        }
        LA => {
            let rd = ops.reg(0)?;
            let (name, addend, kind) = ops.symbol(1)?;
            buf.fixup(buf.offset(), FixupTarget::Symbol(name.to_string()), kind, addend);
            buf.put_u32(rd << 7 | OP_AUIPC);
            i_type(OP_IMM, rd, 0, rd, 0)
        }
        _ => return Err(EncodeError::UnknownOpcode(op.0)),
    };
    buf.put_u32(word);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minst::PReg;
    use crate::riscv32::reloc::R_CALL;
    use pretty_assertions::assert_eq;

    fn x(n: u16) -> Reg {
        Reg::Phys(PReg(n))
    }

    fn word(inst: MachineInst) -> u32 {
        let mut buf = CodeBuffer::new();
        encode(&inst, &mut buf).unwrap();
        u32::from_le_bytes(buf.bytes[..4].try_into().unwrap())
    }

    #[test]
    fn test_known_encodings() {
        // add a0, a0, a1
        assert_eq!(word(MachineInst::new(ADD).def(x(10)).use_reg(x(10)).use_reg(x(11))), 0x00B5_0533);
        // addi sp, sp, -16
        assert_eq!(word(MachineInst::new(ADDI).def(x(2)).use_reg(x(2)).imm(-16)), 0xFF01_0113);
        // sw ra, 12(sp)
        assert_eq!(word(MachineInst::new(SW).use_reg(x(1)).mem(x(2), 12)), 0x0011_2623);
        // lw ra, 12(sp)
        assert_eq!(word(MachineInst::new(LW).def(x(1)).mem(x(2), 12)), 0x00C1_2083);
        // mul a0, a0, a1
        assert_eq!(word(MachineInst::new(MUL).def(x(10)).use_reg(x(10)).use_reg(x(11))), 0x02B5_0533);
        // ret
        assert_eq!(word(MachineInst::new(RET)), 0x0000_8067);
        // lui a0, 0x12345
        assert_eq!(word(MachineInst::new(LUI).def(x(10)).imm(0x12345)), 0x1234_5537);
        // fadd.d fa0, fa0, fa1
        assert_eq!(word(MachineInst::new(FADD_D).def(x(42)).use_reg(x(42)).use_reg(x(43))), 0x02B5_0553);
    }

    #[test]
    fn test_references_become_fixups() {
        let mut buf = CodeBuffer::new();
        encode(&MachineInst::new(ADDI).def(x(10)).use_reg(x(0)).imm(1), &mut buf).unwrap();
        encode(&MachineInst::new(CALL).symbol("add", 0, R_CALL), &mut buf).unwrap();
        encode(&MachineInst::new(BEQ).use_reg(x(10)).use_reg(x(0)).block(3), &mut buf).unwrap();
        assert_eq!(buf.bytes.len(), 16);
        assert_eq!(buf.fixups.len(), 2);
        assert_eq!(buf.fixups[0].offset, 4);
        assert_eq!(buf.fixups[0].target, FixupTarget::Symbol("add".to_string()));
        assert_eq!(buf.fixups[1].offset, 12);
        assert_eq!(buf.fixups[1].target, FixupTarget::Block(3));
    }

    #[test]
    fn test_range_and_register_errors() {
        let mut buf = CodeBuffer::new();
        let err = encode(&MachineInst::new(ADDI).def(x(10)).use_reg(x(10)).imm(4096), &mut buf).unwrap_err();
        assert_eq!(err, EncodeError::ImmediateRange { mnemonic: "addi", value: 4096 });
        let virt = MachineInst::new(ADD).def(Reg::Virt(crate::minst::VReg(7))).use_reg(x(1)).use_reg(x(1));
        assert!(matches!(encode(&virt, &mut buf), Err(EncodeError::VirtualRegister { reg: 7, .. })));
    }
}
