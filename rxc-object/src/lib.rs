//! RXC Object Format
//!
//! Relocatable object files, archives of objects, linked images and the
//! linker that turns the former into the latter. Targets plug in through
//! data only: their relocation kinds (`RelocKindInfo`) and a default memory
//! layout.
//!
//! ## Architecture
//!
//! - `object` - Sections, symbols, relocations, line tables
//! - `binary` - Little-endian container encoding of objects
//! - `archive` - Ordered collections of named objects
//! - `reloc` - Relocation kind descriptions and field codecs
//! - `layout` - Memory regions for image layout
//! - `image` - Linked images and their on-disk form
//! - `atomic` - Temporary-file-and-rename writes shared with the driver
//! - `linker` - Collect, resolve, layout, relocate, emit

pub mod archive;
pub mod atomic;
pub mod binary;
pub mod error;
pub mod image;
pub mod layout;
pub mod linker;
pub mod object;
pub mod reloc;

pub use archive::{Archive, ArchiveMember};
pub use atomic::write_atomic;
pub use error::{FormatError, LinkError};
pub use image::{AppliedRelocation, Image, ImageLine, ImageSection, ImageSymbol};
pub use layout::{MemoryLayout, MemoryRegion};
pub use linker::{LinkInput, LinkOptions, LinkTarget, Linker};
pub use object::{LineEntry, ObjectFile, Relocation, Section, SectionKind, Symbol, SymbolBinding, SymbolKind};
pub use reloc::RelocKindInfo;
