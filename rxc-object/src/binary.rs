//! Little-endian binary containers
//!
//! Strings are a `u16` byte length followed by UTF-8. The object layout is:
//!
//! ```text
//! "RXOF" u16 version str arch
//! u32 nsections { str name, u8 kind, u32 align, u64 size, [bytes if kind != bss] }
//! u32 nsymbols  { str name, u8 binding, u8 kind, u32 section (0xFFFF_FFFF = undefined), u64 offset, u64 size }
//! u32 nrelocs   { u32 section, u64 offset, u32 symbol, u16 kind, i64 addend }
//! u32 nlines    { u32 section, u64 offset, str file, u32 line, u32 column }
//! ```

use crate::error::FormatError;
use crate::object::{LineEntry, ObjectFile, Relocation, Section, SectionKind, Symbol, SymbolBinding, SymbolKind, OBJECT_VERSION};
use rxc_common::SourceLocation;

pub const OBJECT_MAGIC: &[u8; 4] = b"RXOF";
const UNDEFINED_SECTION: u32 = 0xFFFF_FFFF;

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn str(&mut self, s: &str) -> Result<(), FormatError> {
        let len = u16::try_from(s.len()).map_err(|_| FormatError::TooLarge {
            what: format!("string of {} bytes", s.len()),
        })?;
        self.u16(len);
        self.bytes(s.as_bytes());
        Ok(())
    }

    pub fn count(&mut self, n: usize, what: &str) -> Result<(), FormatError> {
        let n = u32::try_from(n).map_err(|_| FormatError::TooLarge {
            what: format!("{n} {what}"),
        })?;
        self.u32(n);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn magic(&mut self, expected: &'static [u8], name: &'static str) -> Result<(), FormatError> {
        let start = self.pos;
        match self.take(expected.len()) {
            Ok(found) if found == expected => Ok(()),
            _ => {
                self.pos = start;
                Err(FormatError::BadMagic { expected: name })
            }
        }
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn str(&mut self) -> Result<String, FormatError> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8 { offset })
    }

    /// A length prefix whose items take at least `min_item` bytes each,
    /// rejected early when the data cannot hold that many
    pub fn count(&mut self, min_item: usize) -> Result<usize, FormatError> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_item) > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: n.saturating_mul(min_item) - self.remaining(),
            });
        }
        Ok(n)
    }

    pub fn expect_end(&self, container: &'static str) -> Result<(), FormatError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(FormatError::TrailingBytes { container, count }),
        }
    }
}

pub(crate) fn section_kind(r: &mut Reader<'_>) -> Result<SectionKind, FormatError> {
    let offset = r.position();
    let code = r.u8()?;
    SectionKind::from_code(code).ok_or(FormatError::InvalidValue {
        what: "section kind",
        value: code as u64,
        offset,
    })
}

impl ObjectFile {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new();
        w.bytes(OBJECT_MAGIC);
        w.u16(self.version);
        w.str(&self.arch)?;

        w.count(self.sections.len(), "sections")?;
        for sec in &self.sections {
            w.str(&sec.name)?;
            w.u8(sec.kind.code());
            w.u32(sec.align);
            w.u64(sec.size());
            if sec.kind != SectionKind::Bss {
                w.bytes(&sec.data);
            }
        }

        w.count(self.symbols.len(), "symbols")?;
        for sym in &self.symbols {
            w.str(&sym.name)?;
            w.u8(sym.binding.code());
            w.u8(sym.kind.code());
            w.u32(sym.section.unwrap_or(UNDEFINED_SECTION));
            w.u64(sym.offset);
            w.u64(sym.size);
        }

        w.count(self.relocations.len(), "relocations")?;
        for rel in &self.relocations {
            w.u32(rel.section);
            w.u64(rel.offset);
            w.u32(rel.symbol);
            w.u16(rel.kind);
            w.i64(rel.addend);
        }

        w.count(self.lines.len(), "line entries")?;
        for line in &self.lines {
            w.u32(line.section);
            w.u64(line.offset);
            w.str(&line.loc.filename)?;
            w.u32(line.loc.line);
            w.u32(line.loc.column);
        }
        Ok(w.finish())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        let obj = Self::read(&mut r)?;
        r.expect_end("object")?;
        Ok(obj)
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        r.magic(OBJECT_MAGIC, "RXOF")?;
        let version = r.u16()?;
        if version != OBJECT_VERSION {
            return Err(FormatError::UnsupportedVersion { container: "object", version });
        }
        let arch = r.str()?;

        let n = r.count(2 + 1 + 4 + 8)?;
        let mut sections = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r.str()?;
            let kind = section_kind(r)?;
            let align = r.u32()?;
            let size = r.u64()?;
            let mut sec = Section::new(&name, kind, align);
            if kind == SectionKind::Bss {
                sec.bss_size = size;
            } else {
                let len = usize::try_from(size).map_err(|_| FormatError::TooLarge {
                    what: format!("section {name} of {size} bytes"),
                })?;
                sec.data = r.take(len)?.to_vec();
            }
            sections.push(sec);
        }

        let n = r.count(2 + 1 + 1 + 4 + 8 + 8)?;
        let mut symbols = Vec::with_capacity(n);
        for _ in 0..n {
            let name = r.str()?;
            let offset = r.position();
            let binding = r.u8()?;
            let binding = SymbolBinding::from_code(binding).ok_or(FormatError::InvalidValue {
                what: "symbol binding",
                value: binding as u64,
                offset,
            })?;
            let kind = r.u8()?;
            let kind = SymbolKind::from_code(kind).ok_or(FormatError::InvalidValue {
                what: "symbol kind",
                value: kind as u64,
                offset: offset + 1,
            })?;
            let section = match r.u32()? {
                UNDEFINED_SECTION => None,
                s => Some(s),
            };
            symbols.push(Symbol {
                name,
                binding,
                kind,
                section,
                offset: r.u64()?,
                size: r.u64()?,
            });
        }

        let n = r.count(4 + 8 + 4 + 2 + 8)?;
        let mut relocations = Vec::with_capacity(n);
        for _ in 0..n {
            relocations.push(Relocation {
                section: r.u32()?,
                offset: r.u64()?,
                symbol: r.u32()?,
                kind: r.u16()?,
                addend: r.i64()?,
            });
        }

        let n = r.count(4 + 8 + 2 + 4 + 4)?;
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            let section = r.u32()?;
            let offset = r.u64()?;
            let filename = r.str()?;
            let line = r.u32()?;
            let column = r.u32()?;
            lines.push(LineEntry {
                section,
                offset,
                loc: SourceLocation { filename, line, column },
            });
        }

        Ok(ObjectFile {
            arch,
            version,
            sections,
            symbols,
            relocations,
            lines,
        })
    }
}
