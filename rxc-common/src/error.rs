//! Error handling for the RXC toolchain
//!
//! Every failure of the compilation pipeline is fatal for the unit being
//! processed and is reported with the identity of the offending function,
//! block or instruction. Linker failures live next to the linker in
//! `rxc-object`.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the compilation pipeline
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Main compiler error type covering IR construction through emission
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompilerError {
    /// Builder rejected an instruction: undefined or non-dominating operand,
    /// append after a terminator, mismatched types...
    #[error("Malformed IR in '{function}': {message}")]
    MalformedIR { function: String, message: String },

    /// Verifier found a broken invariant; names the first violation
    #[error("Verification failed in '{function}' at {location}: {message}")]
    Verification {
        function: String,
        location: IrLocation,
        message: String,
    },

    /// The target cannot lower a legal IR construct
    #[error("Unsupported operation on target '{target}': {op}")]
    UnsupportedOperation { target: String, op: String },

    #[error("Register allocation failed in '{function}': no allocatable registers in class '{class}'")]
    AllocationFailure { function: String, class: String },

    #[error("Stack frame of '{function}' too large: {size} bytes (limit {limit})")]
    FrameTooLarge { function: String, size: u64, limit: u64 },

    #[error("Encoding error in '{function}': {message}")]
    Encoding { function: String, message: String },

    #[error("Pass '{pass}' must run after '{dependency}'")]
    PipelineOrder { pass: String, dependency: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Internal compiler error: {message}")]
    Internal { message: String },
}

/// Position inside a function used in verifier reports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrLocation {
    pub block: Option<u32>,
    pub inst: Option<u32>,
}

impl fmt::Display for IrLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.block, self.inst) {
            (Some(b), Some(i)) => write!(f, "bb{b}/inst{i}"),
            (Some(b), None) => write!(f, "bb{b}"),
            (None, Some(i)) => write!(f, "inst{i}"),
            (None, None) => write!(f, "<function>"),
        }
    }
}

impl CompilerError {
    pub fn malformed(function: impl Into<String>, message: impl Into<String>) -> Self {
        CompilerError::MalformedIR {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn verification(
        function: impl Into<String>,
        block: Option<u32>,
        inst: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        CompilerError::Verification {
            function: function.into(),
            location: IrLocation { block, inst },
            message: message.into(),
        }
    }

    pub fn unsupported(target: impl Into<String>, op: impl Into<String>) -> Self {
        CompilerError::UnsupportedOperation {
            target: target.into(),
            op: op.into(),
        }
    }

    pub fn encoding(function: impl Into<String>, message: impl Into<String>) -> Self {
        CompilerError::Encoding {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompilerError::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CompilerError {
    fn from(err: std::io::Error) -> Self {
        CompilerError::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_verification_message_names_location() {
        let err = CompilerError::verification("main", Some(2), Some(7), "use not dominated by def");
        assert_eq!(
            err.to_string(),
            "Verification failed in 'main' at bb2/inst7: use not dominated by def"
        );
    }

    #[test]
    fn test_unsupported_operation_message() {
        let err = CompilerError::unsupported("riscv32", "fptosi f64 -> i64");
        assert_eq!(
            err.to_string(),
            "Unsupported operation on target 'riscv32': fptosi f64 -> i64"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CompilerError = io.into();
        assert!(matches!(err, CompilerError::Io { .. }));
    }
}
