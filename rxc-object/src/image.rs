//! Linked images
//!
//! ```text
//! "RXIM" u16 version str arch u8 has_entry u64 entry
//! u32 nsections { str name, u8 kind, u64 addr, u64 size, [bytes if kind != bss] }
//! u32 nsymbols  { str name, u64 addr }
//! u32 nlines    { u64 addr, str file, u32 line, u32 column }
//! ```
//!
//! Applied relocations are kept for inspection but are not part of the
//! container.

use crate::atomic::write_atomic;
use crate::binary::{section_kind, Reader, Writer};
use crate::error::{FormatError, LinkError};
use crate::object::SectionKind;
use rxc_common::SourceLocation;
use std::fs;
use std::path::Path;

pub const IMAGE_MAGIC: &[u8; 4] = b"RXIM";
pub const IMAGE_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSection {
    pub name: String,
    pub kind: SectionKind,
    pub addr: u64,
    /// Contents; empty for bss
    pub data: Vec<u8>,
    pub size: u64,
}

impl ImageSection {
    pub fn contains(&self, addr: u64) -> bool {
        addr.checked_sub(self.addr).is_some_and(|offset| offset < self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSymbol {
    pub name: String,
    pub addr: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLine {
    pub addr: u64,
    pub loc: SourceLocation,
}

/// One relocation as the linker applied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRelocation {
    pub place: u64,
    pub kind: &'static str,
    pub symbol: String,
    pub symbol_addr: u64,
    pub addend: i64,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub arch: String,
    pub entry: Option<u64>,
    pub sections: Vec<ImageSection>,
    pub symbols: Vec<ImageSymbol>,
    pub lines: Vec<ImageLine>,
    pub relocations: Vec<AppliedRelocation>,
}

impl Image {
    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.iter().find(|s| s.name == name).map(|s| s.addr)
    }

    pub fn section(&self, name: &str) -> Option<&ImageSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Source location of the code at `addr`
    pub fn line_for(&self, addr: u64) -> Option<&SourceLocation> {
        self.lines.iter().take_while(|l| l.addr <= addr).last().map(|l| &l.loc)
    }

    /// Bytes at `addr`, if they lie inside a loaded (non-bss) section
    pub fn read(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let sec = self.sections.iter().find(|s| s.kind != SectionKind::Bss && s.contains(addr))?;
        let start = (addr - sec.addr) as usize;
        sec.data.get(start..start.checked_add(len)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new();
        w.bytes(IMAGE_MAGIC);
        w.u16(IMAGE_VERSION);
        w.str(&self.arch)?;
        w.u8(self.entry.is_some() as u8);
        w.u64(self.entry.unwrap_or(0));

        w.count(self.sections.len(), "sections")?;
        for sec in &self.sections {
            w.str(&sec.name)?;
            w.u8(sec.kind.code());
            w.u64(sec.addr);
            w.u64(sec.size);
            if sec.kind != SectionKind::Bss {
                w.bytes(&sec.data);
            }
        }

        w.count(self.symbols.len(), "symbols")?;
        for sym in &self.symbols {
            w.str(&sym.name)?;
            w.u64(sym.addr);
        }

        w.count(self.lines.len(), "line entries")?;
        for line in &self.lines {
            w.u64(line.addr);
            w.str(&line.loc.filename)?;
            w.u32(line.loc.line);
            w.u32(line.loc.column);
        }
        Ok(w.finish())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        r.magic(IMAGE_MAGIC, "RXIM")?;
        let version = r.u16()?;
        if version != IMAGE_VERSION {
            return Err(FormatError::UnsupportedVersion { container: "image", version });
        }
        let arch = r.str()?;
        let has_entry = r.u8()? != 0;
        let entry = r.u64()?;

        let n = r.count(2 + 1 + 8 + 8)?;
        let mut sections = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r.str()?;
            let kind = section_kind(&mut r)?;
            let addr = r.u64()?;
            let size = r.u64()?;
            let data = if kind == SectionKind::Bss {
                Vec::new()
            } else {
                r.take(size as usize)?.to_vec()
            };
            sections.push(ImageSection { name, kind, addr, data, size });
        }

        let n = r.count(2 + 8)?;
        let mut symbols = Vec::with_capacity(n);
        for _ in 0..n {
            symbols.push(ImageSymbol {
                name: r.str()?,
                addr: r.u64()?,
            });
        }

        let n = r.count(8 + 2 + 4 + 4)?;
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            let addr = r.u64()?;
            let filename = r.str()?;
            let line = r.u32()?;
            let column = r.u32()?;
            lines.push(ImageLine {
                addr,
                loc: SourceLocation { filename, line, column },
            });
        }
        r.expect_end("image")?;

        Ok(Image {
            arch,
            entry: has_entry.then_some(entry),
            sections,
            symbols,
            lines,
            relocations: Vec::new(),
        })
    }

    /// Write the image through a temporary file renamed into place, so a
    /// reader never observes a partial image
    pub fn write_to(&self, path: &Path) -> Result<(), LinkError> {
        let bytes = self.to_bytes().map_err(|e| LinkError::LayoutOverflow {
            section: "image".to_string(),
            message: e.to_string(),
        })?;
        write_atomic(path, &bytes).map_err(|e| LinkError::io(path, e))
    }

    pub fn read_from(path: &Path) -> Result<Self, LinkError> {
        let bytes = fs::read(path).map_err(|e| LinkError::io(path, e))?;
        Image::from_bytes(&bytes).map_err(|e| LinkError::invalid(&path.display().to_string(), e.to_string()))
    }
}
