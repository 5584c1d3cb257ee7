//! RV32IMFD opcodes plus the pseudo-instructions the backend emits

use crate::minst::Opcode;

macro_rules! opcodes {
    ($($name:ident = $mnemonic:literal,)*) => {
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[repr(u16)]
        enum Op {
            $($name,)*
        }

        $(pub const $name: Opcode = Opcode(Op::$name as u16);)*

        pub const NAMES: &[&str] = &[$($mnemonic,)*];
    };
}

opcodes! {
    LUI = "lui",
    AUIPC = "auipc",
    JALR = "jalr",
    BEQ = "beq",
    BNE = "bne",
    BLT = "blt",
    BGE = "bge",
    BLTU = "bltu",
    BGEU = "bgeu",
    LB = "lb",
    LH = "lh",
    LW = "lw",
    LBU = "lbu",
    LHU = "lhu",
    SB = "sb",
    SH = "sh",
    SW = "sw",
    ADDI = "addi",
    SLTI = "slti",
    SLTIU = "sltiu",
    XORI = "xori",
    ORI = "ori",
    ANDI = "andi",
    SLLI = "slli",
    SRLI = "srli",
    SRAI = "srai",
    ADD = "add",
    SUB = "sub",
    SLL = "sll",
    SLT = "slt",
    SLTU = "sltu",
    XOR = "xor",
    SRL = "srl",
    SRA = "sra",
    OR = "or",
    AND = "and",
    MUL = "mul",
    MULH = "mulh",
    MULHSU = "mulhsu",
    MULHU = "mulhu",
    DIV = "div",
    DIVU = "divu",
    REM = "rem",
    REMU = "remu",
    FLW = "flw",
    FSW = "fsw",
    FLD = "fld",
    FSD = "fsd",
    FADD_S = "fadd.s",
    FSUB_S = "fsub.s",
    FMUL_S = "fmul.s",
    FDIV_S = "fdiv.s",
    FADD_D = "fadd.d",
    FSUB_D = "fsub.d",
    FMUL_D = "fmul.d",
    FDIV_D = "fdiv.d",
    FSGNJ_S = "fsgnj.s",
    FSGNJN_S = "fsgnjn.s",
    FSGNJ_D = "fsgnj.d",
    FSGNJN_D = "fsgnjn.d",
    FEQ_S = "feq.s",
    FLT_S = "flt.s",
    FLE_S = "fle.s",
    FEQ_D = "feq.d",
    FLT_D = "flt.d",
    FLE_D = "fle.d",
    FCVT_W_S = "fcvt.w.s",
    FCVT_W_D = "fcvt.w.d",
    FCVT_S_W = "fcvt.s.w",
    FCVT_S_WU = "fcvt.s.wu",
    FCVT_D_W = "fcvt.d.w",
    FCVT_D_WU = "fcvt.d.wu",
    FCVT_S_D = "fcvt.s.d",
    FCVT_D_S = "fcvt.d.s",
    FMV_X_W = "fmv.x.w",
    FMV_W_X = "fmv.w.x",
    // pseudo-instructions
    MV = "mv",
    FMV_D = "fmv.d",
    J = "j",
    CALL = "call",
    RET = "ret",
    LA = "la",
    ADDR = "addr",
}
