//! RXC - Common Types and Utilities
//! 
//! This crate contains the error taxonomy shared by every stage of the
//! IR → machine code → linked image pipeline, and the source locations
//! that travel with instructions as debug line metadata.

pub mod error;
pub mod source_loc;

pub use error::{CompilerError, Result};
pub use source_loc::SourceLocation;
