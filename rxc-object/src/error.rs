//! Errors for object I/O and linking

use thiserror::Error;

/// A malformed binary container
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("bad magic: expected {expected:?}")]
    BadMagic { expected: &'static str },

    #[error("unsupported {container} version {version}")]
    UnsupportedVersion { container: &'static str, version: u16 },

    #[error("unexpected end of data at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("invalid {what} {value} at offset {offset}")]
    InvalidValue { what: &'static str, value: u64, offset: usize },

    #[error("{what} does not fit the container format")]
    TooLarge { what: String },

    #[error("trailing {count} bytes after end of {container}")]
    TrailingBytes { container: &'static str, count: usize },

    #[error("inconsistent object: {0}")]
    Inconsistent(String),
}

/// Linker failures. Every variant names the symbol, section or input that
/// caused it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("duplicate symbol '{name}': defined in {first} and {second}")]
    DuplicateSymbol { name: String, first: String, second: String },

    #[error("undefined symbol '{name}' referenced by {referenced_by}")]
    UndefinedSymbol { name: String, referenced_by: String },

    #[error("relocation {kind} against '{symbol}' at {input}+{offset:#x} overflows: value {value:#x}")]
    RelocationOverflow {
        symbol: String,
        kind: &'static str,
        value: i64,
        input: String,
        offset: u64,
    },

    #[error("architecture mismatch in {input}: expected {expected}, found {found}")]
    ArchMismatch { input: String, expected: String, found: String },

    #[error("unknown relocation kind {kind} in {input}")]
    UnknownRelocation { input: String, kind: u16 },

    #[error("invalid object {input}: {message}")]
    InvalidObject { input: String, message: String },

    #[error("layout of section {section} failed: {message}")]
    LayoutOverflow { section: String, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

impl LinkError {
    pub fn invalid(input: &str, message: impl Into<String>) -> Self {
        LinkError::InvalidObject {
            input: input.to_string(),
            message: message.into(),
        }
    }

    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        LinkError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = LinkError::DuplicateSymbol {
            name: "add".to_string(),
            first: "a.rxo".to_string(),
            second: "b.rxo".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate symbol 'add': defined in a.rxo and b.rxo");

        let err = FormatError::Truncated { offset: 12, needed: 4 };
        assert!(err.to_string().contains("offset 12"));
    }
}
