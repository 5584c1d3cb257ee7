use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("no simulator for architecture '{0}'")]
    UnknownArch(String),

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("wrong number of arguments: expected {expected}, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("arguments or results of '{0}' do not fit the calling convention")]
    Signature(String),

    #[error("illegal instruction {bytes} at {pc:#x}")]
    IllegalInstruction { pc: u64, bytes: String },

    #[error("memory fault at {addr:#x} ({size} bytes, {access})")]
    MemoryFault { addr: u64, size: u64, access: &'static str },

    #[error("integer division fault at {pc:#x}")]
    DivideError { pc: u64 },

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("'{function}' did not preserve {register}")]
    Clobbered { function: String, register: String },
}

impl SimError {
    pub fn illegal(pc: u64, bytes: &[u8]) -> Self {
        let bytes = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
        SimError::IllegalInstruction { pc, bytes }
    }
}
