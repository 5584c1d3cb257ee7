//! x86-64 opcodes. Integer operations come in 32- and 64-bit flavours;
//! suffixes name the operand forms (R register, I immediate, M memory).

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
    MOV32RR = "movl",
    MOV64RR = "movq",
    MOV32RI = "movl$",
    MOV64RI = "movabsq",
    ADD32RR = "addl",
    ADD64RR = "addq",
    SUB32RR = "subl",
    SUB64RR = "subq",
    AND32RR = "andl",
    AND64RR = "andq",
    OR32RR = "orl",
    OR64RR = "orq",
    XOR32RR = "xorl",
    XOR64RR = "xorq",
    CMP32RR = "cmpl",
    CMP64RR = "cmpq",
    ADD32RI = "addl$",
    ADD64RI = "addq$",
    SUB32RI = "subl$",
    SUB64RI = "subq$",
    AND32RI = "andl$",
    AND64RI = "andq$",
    OR32RI = "orl$",
    OR64RI = "orq$",
    XOR32RI = "xorl$",
    XOR64RI = "xorq$",
    CMP32RI = "cmpl$",
    CMP64RI = "cmpq$",
    IMUL32RR = "imull",
    IMUL64RR = "imulq",
    NEG32 = "negl",
    NEG64 = "negq",
    NOT32 = "notl",
    NOT64 = "notq",
    SHL32RC = "shll",
    SHL64RC = "shlq",
    SHR32RC = "shrl",
    SHR64RC = "shrq",
    SAR32RC = "sarl",
    SAR64RC = "sarq",
    SHL32RI = "shll$",
    SHL64RI = "shlq$",
    SHR32RI = "shrl$",
    SHR64RI = "shrq$",
    SAR32RI = "sarl$",
    SAR64RI = "sarq$",
    CDQ = "cltd",
    CQO = "cqto",
    DIV32 = "divl",
    DIV64 = "divq",
    IDIV32 = "idivl",
    IDIV64 = "idivq",
    MOVZX32_8 = "movzbl",
    MOVZX32_16 = "movzwl",
    MOVSX32_8 = "movsbl",
    MOVSX32_16 = "movswl",
    MOVSX64_8 = "movsbq",
    MOVSX64_16 = "movswq",
    MOVSXD = "movslq",
    MOVZX32_8RM = "movzbl(m)",
    MOVZX32_16RM = "movzwl(m)",
    MOV32RM = "movl(m)",
    MOV64RM = "movq(m)",
    MOV8MR = "movb(s)",
    MOV16MR = "movw(s)",
    MOV32MR = "movl(s)",
    MOV64MR = "movq(s)",
    LEA64 = "leaq",
    LEA_RIP = "leaq(rip)",
    SETCC = "setcc",
    CMOV32 = "cmovl",
    CMOV64 = "cmovq",
    JCC = "jcc",
    JMP = "jmp",
    CALL = "call",
    RET = "ret",
    PUSH64 = "pushq",
    POP64 = "popq",
    ADDSS = "addss",
    ADDSD = "addsd",
    SUBSS = "subss",
    SUBSD = "subsd",
    MULSS = "mulss",
    MULSD = "mulsd",
    DIVSS = "divss",
    DIVSD = "divsd",
    UCOMISS = "ucomiss",
    UCOMISD = "ucomisd",
    CVTSI2SS32 = "cvtsi2ssl",
    CVTSI2SS64 = "cvtsi2ssq",
    CVTSI2SD32 = "cvtsi2sdl",
    CVTSI2SD64 = "cvtsi2sdq",
    CVTTSS2SI32 = "cvttss2sil",
    CVTTSS2SI64 = "cvttss2siq",
    CVTTSD2SI32 = "cvttsd2sil",
    CVTTSD2SI64 = "cvttsd2siq",
    CVTSS2SD = "cvtss2sd",
    CVTSD2SS = "cvtsd2ss",
    MOVAPS = "movaps",
    MOVQ_XR = "movq(x<-r)",
    MOVQ_RX = "movq(r<-x)",
    MOVSS_RM = "movss(m)",
    MOVSD_RM = "movsd(m)",
    MOVSS_MR = "movss(s)",
    MOVSD_MR = "movsd(s)",
}

/// Condition code nibbles shared by `jcc`, `setcc` and `cmovcc`
pub mod cc {
    pub const B: i64 = 0x2;
    pub const AE: i64 = 0x3;
    pub const E: i64 = 0x4;
    pub const NE: i64 = 0x5;
    pub const BE: i64 = 0x6;
    pub const A: i64 = 0x7;
    pub const P: i64 = 0xA;
    pub const NP: i64 = 0xB;
    pub const L: i64 = 0xC;
    pub const GE: i64 = 0xD;
    pub const LE: i64 = 0xE;
    pub const G: i64 = 0xF;
}
