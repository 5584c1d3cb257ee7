//! Relocatable object files
//!
//! An object owns sections, a symbol table, relocations against those symbols
//! and a line table. Section and symbol references are indices into the
//! owning object's tables.

use crate::error::FormatError;
use rxc_common::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OBJECT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Text,
    Rodata,
    Data,
    Bss,
}

impl SectionKind {
    /// Order of output sections in a linked image
    pub const ALL: [SectionKind; 4] = [SectionKind::Text, SectionKind::Rodata, SectionKind::Data, SectionKind::Bss];

    pub fn code(self) -> u8 {
        match self {
            SectionKind::Text => 0,
            SectionKind::Rodata => 1,
            SectionKind::Data => 2,
            SectionKind::Bss => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Conventional output section name
    pub fn section_name(self) -> &'static str {
        match self {
            SectionKind::Text => ".text",
            SectionKind::Rodata => ".rodata",
            SectionKind::Data => ".data",
            SectionKind::Bss => ".bss",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionKind::Text => "text",
            SectionKind::Rodata => "rodata",
            SectionKind::Data => "data",
            SectionKind::Bss => "bss",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub align: u32,
    /// Contents; always empty for bss
    pub data: Vec<u8>,
    /// Size of a bss section
    pub bss_size: u64,
}

impl Section {
    pub fn new(name: &str, kind: SectionKind, align: u32) -> Self {
        Self {
            name: name.to_string(),
            kind,
            align: align.max(1),
            data: Vec::new(),
            bss_size: 0,
        }
    }

    pub fn size(&self) -> u64 {
        match self.kind {
            SectionKind::Bss => self.bss_size,
            _ => self.data.len() as u64,
        }
    }

    /// Pad the contents (or the bss size) up to `align`
    pub fn align_to(&mut self, align: u32) {
        let align = align.max(1) as u64;
        self.align = self.align.max(align as u32);
        let size = self.size().div_ceil(align) * align;
        match self.kind {
            SectionKind::Bss => self.bss_size = size,
            _ => self.data.resize(size as usize, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
}

impl SymbolBinding {
    pub fn code(self) -> u8 {
        match self {
            SymbolBinding::Local => 0,
            SymbolBinding::Global => 1,
            SymbolBinding::Weak => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SymbolBinding::Local),
            1 => Some(SymbolBinding::Global),
            2 => Some(SymbolBinding::Weak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Func,
    Object,
    NoType,
}

impl SymbolKind {
    pub fn code(self) -> u8 {
        match self {
            SymbolKind::Func => 0,
            SymbolKind::Object => 1,
            SymbolKind::NoType => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SymbolKind::Func),
            1 => Some(SymbolKind::Object),
            2 => Some(SymbolKind::NoType),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
    /// Defining section, `None` when undefined
    pub section: Option<u32>,
    pub offset: u64,
    pub size: u64,
}

impl Symbol {
    pub fn undefined(name: &str) -> Self {
        Self {
            name: name.to_string(),
            binding: SymbolBinding::Global,
            kind: SymbolKind::NoType,
            section: None,
            offset: 0,
            size: 0,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.section.is_some()
    }

    /// Visible to other objects
    pub fn is_external(&self) -> bool {
        self.binding != SymbolBinding::Local
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub section: u32,
    pub offset: u64,
    pub symbol: u32,
    /// Target-specific relocation kind code
    pub kind: u16,
    pub addend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub section: u32,
    pub offset: u64,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFile {
    pub arch: String,
    pub version: u16,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
    pub lines: Vec<LineEntry>,
}

impl ObjectFile {
    pub fn new(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            version: OBJECT_VERSION,
            sections: Vec::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn add_section(&mut self, section: Section) -> u32 {
        self.sections.push(section);
        (self.sections.len() - 1) as u32
    }

    pub fn section_index(&self, name: &str) -> Option<u32> {
        self.sections.iter().position(|s| s.name == name).map(|i| i as u32)
    }

    /// Index of the named section, creating it when missing
    pub fn section_or_create(&mut self, name: &str, kind: SectionKind, align: u32) -> u32 {
        match self.section_index(name) {
            Some(i) => i,
            None => self.add_section(Section::new(name, kind, align)),
        }
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> u32 {
        self.symbols.push(symbol);
        (self.symbols.len() - 1) as u32
    }

    pub fn symbol_index(&self, name: &str) -> Option<u32> {
        self.symbols.iter().position(|s| s.name == name).map(|i| i as u32)
    }

    /// Index of a symbol for `name`, adding an undefined global reference
    /// if the object does not mention it yet
    pub fn reference(&mut self, name: &str) -> u32 {
        match self.symbol_index(name) {
            Some(i) => i,
            None => self.add_symbol(Symbol::undefined(name)),
        }
    }

    /// Define `name` in a section, turning an earlier undefined reference
    /// into the definition
    pub fn define(&mut self, name: &str, binding: SymbolBinding, kind: SymbolKind, section: u32, offset: u64, size: u64) -> u32 {
        let symbol = Symbol {
            name: name.to_string(),
            binding,
            kind,
            section: Some(section),
            offset,
            size,
        };
        match self.symbols.iter().position(|s| s.name == name && !s.is_defined()) {
            Some(i) => {
                self.symbols[i] = symbol;
                i as u32
            }
            None => self.add_symbol(symbol),
        }
    }

    pub fn add_relocation(&mut self, relocation: Relocation) {
        self.relocations.push(relocation);
    }

    /// Globally visible definitions, in symbol table order
    pub fn exported(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| s.is_defined() && s.is_external())
    }

    /// Undefined references, in symbol table order
    pub fn imported(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(|s| !s.is_defined())
    }

    /// Structural consistency: indices in range and relocation sites inside
    /// their section
    pub fn validate(&self, patch_width: impl Fn(u16) -> Option<u64>) -> Result<(), FormatError> {
        let nsections = self.sections.len() as u32;
        for sym in &self.symbols {
            if let Some(section) = sym.section {
                let Some(sec) = self.sections.get(section as usize) else {
                    return Err(FormatError::Inconsistent(format!("symbol '{}' in missing section {section}", sym.name)));
                };
                if sym.offset > sec.size() {
                    return Err(FormatError::Inconsistent(format!("symbol '{}' lies past the end of {}", sym.name, sec.name)));
                }
            }
        }
        for (i, rel) in self.relocations.iter().enumerate() {
            if rel.section >= nsections {
                return Err(FormatError::Inconsistent(format!("relocation {i} in missing section {}", rel.section)));
            }
            if rel.symbol as usize >= self.symbols.len() {
                return Err(FormatError::Inconsistent(format!("relocation {i} against missing symbol {}", rel.symbol)));
            }
            let sec = &self.sections[rel.section as usize];
            if sec.kind == SectionKind::Bss {
                return Err(FormatError::Inconsistent(format!("relocation {i} in bss section {}", sec.name)));
            }
            let width = patch_width(rel.kind).unwrap_or(0);
            if rel.offset.checked_add(width).map_or(true, |end| end > sec.size()) {
                return Err(FormatError::Inconsistent(format!(
                    "relocation {i} at {:#x} (+{width}) exceeds section {} of {} bytes",
                    rel.offset,
                    sec.name,
                    sec.size()
                )));
            }
        }
        for line in &self.lines {
            let Some(sec) = self.sections.get(line.section as usize) else {
                return Err(FormatError::Inconsistent(format!("line entry in missing section {}", line.section)));
            };
            if line.offset > sec.size() {
                return Err(FormatError::Inconsistent(format!(
                    "line entry at {:#x} lies past the end of {}",
                    line.offset, sec.name
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
