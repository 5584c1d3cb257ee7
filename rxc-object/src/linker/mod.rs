//! Linker
//!
//! Collect → Resolve → Layout → Relocate → Emit. Inputs are processed in
//! declaration order and every table is ordered, so identical inputs always
//! produce byte-identical images.

mod relocate;
mod resolve;

pub use resolve::{Definition, SymbolTable};

use crate::archive::Archive;
use crate::error::LinkError;
use crate::image::{Image, ImageLine, ImageSection, ImageSymbol};
use crate::layout::MemoryLayout;
use crate::object::{ObjectFile, SectionKind};
use crate::reloc::{self, RelocKindInfo};
use log::{debug, info};
use relocate::{apply_relocations, PendingRelocation};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// What the linker needs to know about a target
#[derive(Debug, Clone)]
pub struct LinkTarget {
    pub arch: String,
    pub relocations: &'static [RelocKindInfo],
    pub memory: MemoryLayout,
}

#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Entry symbol; when unset `_start` is used if defined
    pub entry: Option<String>,
    /// Replaces the target's default memory layout
    pub memory_layout: Option<MemoryLayout>,
    /// Apply relocations of different output sections concurrently
    pub parallel: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            entry: None,
            memory_layout: None,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LinkInput {
    Object { name: String, object: ObjectFile },
    Archive { name: String, archive: Archive },
}

impl LinkInput {
    pub fn name(&self) -> &str {
        match self {
            LinkInput::Object { name, .. } | LinkInput::Archive { name, .. } => name,
        }
    }

    /// Read an object or archive file, telling them apart by magic
    pub fn from_path(path: &Path) -> Result<Self, LinkError> {
        let bytes = fs::read(path).map_err(|e| LinkError::io(path, e))?;
        let name = path.display().to_string();
        if Archive::is_archive(&bytes) {
            let archive = Archive::from_bytes(&bytes).map_err(|e| LinkError::invalid(&name, e.to_string()))?;
            Ok(LinkInput::Archive { name, archive })
        } else {
            let object = ObjectFile::from_bytes(&bytes).map_err(|e| LinkError::invalid(&name, e.to_string()))?;
            Ok(LinkInput::Object { name, object })
        }
    }
}

/// An object taking part in the link
#[derive(Debug, Clone)]
pub struct LoadedObject {
    pub name: String,
    pub object: ObjectFile,
}

/// Placement of one output section
struct OutputSection {
    kind: SectionKind,
    addr: u64,
    size: u64,
    align: u64,
    data: Vec<u8>,
}

pub struct Linker<'t> {
    target: &'t LinkTarget,
    options: LinkOptions,
}

/// `None` when rounding up leaves the address space
fn align_up(value: u64, align: u64) -> Option<u64> {
    let align = align.max(1);
    value.div_ceil(align).checked_mul(align)
}

fn overflow(kind: SectionKind, input: &str) -> LinkError {
    LinkError::LayoutOverflow {
        section: kind.section_name().to_string(),
        message: format!("{input} makes it exceed the address space"),
    }
}

impl<'t> Linker<'t> {
    pub fn new(target: &'t LinkTarget, options: LinkOptions) -> Self {
        Self { target, options }
    }

    pub fn link_files(&self, paths: &[&Path]) -> Result<Image, LinkError> {
        let inputs = paths.iter().map(|p| LinkInput::from_path(p)).collect::<Result<Vec<_>, _>>()?;
        self.link(inputs)
    }

    pub fn link(&self, inputs: Vec<LinkInput>) -> Result<Image, LinkError> {
        self.collect(&inputs)?;
        let (objects, table) = resolve::resolve(inputs)?;
        info!("link: {} object(s), {} global symbol(s)", objects.len(), table.defined.len());

        // Layout: (object, section) -> offset inside its output section
        let mut outputs: Vec<OutputSection> = SectionKind::ALL
            .iter()
            .map(|&kind| OutputSection {
                kind,
                addr: 0,
                size: 0,
                align: 1,
                data: Vec::new(),
            })
            .collect();
        let mut placement: Vec<Vec<u64>> = Vec::with_capacity(objects.len());
        for obj in &objects {
            let mut offsets = Vec::with_capacity(obj.object.sections.len());
            for sec in &obj.object.sections {
                let out = &mut outputs[sec.kind.code() as usize];
                let align = sec.align.max(1) as u64;
                let offset = align_up(out.size, align).ok_or_else(|| overflow(sec.kind, &obj.name))?;
                out.align = out.align.max(align);
                out.size = offset.checked_add(sec.size()).ok_or_else(|| overflow(sec.kind, &obj.name))?;
                if sec.kind != SectionKind::Bss {
                    out.data.resize(offset as usize, 0);
                    out.data.extend_from_slice(&sec.data);
                }
                offsets.push(offset);
            }
            placement.push(offsets);
        }
        self.assign_addresses(&mut outputs)?;
        let bases: Vec<u64> = outputs.iter().map(|o| o.addr).collect();

        let section_addr = |obj: usize, sec: u32| -> u64 {
            let kind = objects[obj].object.sections[sec as usize].kind;
            bases[kind.code() as usize] + placement[obj][sec as usize]
        };
        let symbol_addr = |obj: usize, index: u32| -> u64 {
            let sym = &objects[obj].object.symbols[index as usize];
            match sym.section {
                Some(sec) if !sym.is_external() => section_addr(obj, sec) + sym.offset,
                _ => match table.defined.get(&sym.name) {
                    Some(def) => {
                        let d = &objects[def.object].object.symbols[def.symbol as usize];
                        d.section.map_or(0, |sec| section_addr(def.object, sec) + d.offset)
                    }
                    // weak reference left undefined
                    None => 0,
                },
            }
        };

        // Relocate: gather per output section, then patch
        let mut pending: Vec<Vec<PendingRelocation>> = vec![Vec::new(); outputs.len()];
        for (o, obj) in objects.iter().enumerate() {
            for rel in &obj.object.relocations {
                let info = reloc::lookup(self.target.relocations, rel.kind).ok_or_else(|| LinkError::UnknownRelocation {
                    input: obj.name.clone(),
                    kind: rel.kind,
                })?;
                let kind = obj.object.sections[rel.section as usize].kind;
                let out_offset = placement[o][rel.section as usize] + rel.offset;
                pending[kind.code() as usize].push(PendingRelocation {
                    info: *info,
                    offset: out_offset,
                    place: bases[kind.code() as usize] + out_offset,
                    symbol: obj.object.symbols[rel.symbol as usize].name.clone(),
                    symbol_addr: symbol_addr(o, rel.symbol),
                    addend: rel.addend,
                    input: obj.name.clone(),
                    input_offset: rel.offset,
                });
            }
        }
        let mut datas: Vec<Vec<u8>> = outputs.iter_mut().map(|o| std::mem::take(&mut o.data)).collect();
        let applied = apply_relocations(&mut datas, &pending, self.options.parallel)?;
        for (out, data) in outputs.iter_mut().zip(datas) {
            out.data = data;
        }
        debug!("link: applied {} relocation(s)", applied.len());

        // Emit
        let mut symbols: Vec<ImageSymbol> = table
            .defined
            .iter()
            .map(|(name, def)| {
                let d = &objects[def.object].object.symbols[def.symbol as usize];
                ImageSymbol {
                    name: name.clone(),
                    addr: d.section.map_or(0, |sec| section_addr(def.object, sec) + d.offset),
                }
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));

        let mut lines: Vec<ImageLine> = objects
            .iter()
            .enumerate()
            .flat_map(|(o, obj)| obj.object.lines.iter().map(move |l| (o, l)))
            .map(|(o, l)| ImageLine {
                addr: section_addr(o, l.section) + l.offset,
                loc: l.loc.clone(),
            })
            .collect();
        lines.sort_by_key(|l| l.addr);

        let entry = match &self.options.entry {
            Some(name) => Some(symbols.iter().find(|s| &s.name == name).map(|s| s.addr).ok_or_else(|| {
                LinkError::UndefinedSymbol {
                    name: name.clone(),
                    referenced_by: "entry point".to_string(),
                }
            })?),
            None => symbols.iter().find(|s| s.name == "_start").map(|s| s.addr),
        };

        let sections = outputs
            .into_iter()
            .filter(|o| o.size > 0)
            .map(|o| ImageSection {
                name: o.kind.section_name().to_string(),
                kind: o.kind,
                addr: o.addr,
                data: o.data,
                size: o.size,
            })
            .collect();

        Ok(Image {
            arch: self.target.arch.clone(),
            entry,
            sections,
            symbols,
            lines,
            relocations: applied,
        })
    }

    /// Reject inputs built for another architecture or structurally broken
    fn collect(&self, inputs: &[LinkInput]) -> Result<(), LinkError> {
        let width = |code: u16| reloc::lookup(self.target.relocations, code).map(|k| k.size);
        let check = |name: &str, obj: &ObjectFile| -> Result<(), LinkError> {
            if obj.arch != self.target.arch {
                return Err(LinkError::ArchMismatch {
                    input: name.to_string(),
                    expected: self.target.arch.clone(),
                    found: obj.arch.clone(),
                });
            }
            obj.validate(width).map_err(|e| LinkError::invalid(name, e.to_string()))
        };
        for input in inputs {
            match input {
                LinkInput::Object { name, object } => check(name, object)?,
                LinkInput::Archive { name, archive } => {
                    for m in &archive.members {
                        check(&format!("{}({})", name, m.name), &m.object)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Place output sections into memory regions, in output order
    fn assign_addresses(&self, outputs: &mut [OutputSection]) -> Result<(), LinkError> {
        let layout = self.options.memory_layout.as_ref().unwrap_or(&self.target.memory);
        let mut cursors: BTreeMap<usize, u64> = BTreeMap::new();
        for out in outputs.iter_mut().filter(|o| o.size > 0) {
            let name = out.kind.section_name();
            let region_index = layout.region_for(out.kind).ok_or_else(|| LinkError::LayoutOverflow {
                section: name.to_string(),
                message: "no memory region accepts it".to_string(),
            })?;
            let region = &layout.regions[region_index];
            let cursor = cursors.entry(region_index).or_insert(region.origin);
            let addr = align_up(*cursor, out.align).ok_or_else(|| overflow(out.kind, "alignment"))?;
            let end = addr.checked_add(out.size).filter(|&e| e <= region.end()).ok_or_else(|| LinkError::LayoutOverflow {
                section: name.to_string(),
                message: format!(
                    "{} bytes at {addr:#x} do not fit region '{}' ({:#x}..{:#x})",
                    out.size,
                    region.name,
                    region.origin,
                    region.end()
                ),
            })?;
            debug!("link: {} at {:#x} ({} bytes) in '{}'", name, addr, out.size, region.name);
            out.addr = addr;
            *cursor = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
