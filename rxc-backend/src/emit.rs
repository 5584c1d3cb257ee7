//! Code emission
//!
//! Encodes finished machine functions and lays them, their constant pools
//! and the module's globals out in an object file. Branches inside a
//! function are resolved here; every reference to a symbol is left to the
//! linker as exactly one relocation.

use crate::mfunc::{MachineFunction, PoolEntry};
use log::{debug, trace};
use rxc_common::{CompilerError, Result, SourceLocation};
use rxc_ir::{DataItem, GlobalInit, GlobalVariable, Linkage, Module};
use rxc_object::reloc::lookup;
use rxc_object::{LineEntry, ObjectFile, Relocation, SectionKind, SymbolBinding, SymbolKind};
use rxc_target::{CodeBuffer, FixupTarget, InstFlags, TargetDescription};

/// Functions start on this boundary in `.text`
const FUNCTION_ALIGN: u32 = 4;

/// A reference from a function's code to a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub offset: u64,
    pub symbol: String,
    pub kind: u16,
    pub addend: i64,
}

/// Machine code of one function with its branches resolved
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFunction {
    pub name: String,
    pub linkage: Linkage,
    pub code: Vec<u8>,
    pub symbol_refs: Vec<SymbolRef>,
    pub lines: Vec<(u64, SourceLocation)>,
    pub constants: Vec<PoolEntry>,
}

fn binding(linkage: Linkage) -> SymbolBinding {
    match linkage {
        Linkage::External => SymbolBinding::Global,
        Linkage::Internal => SymbolBinding::Local,
        Linkage::Weak => SymbolBinding::Weak,
    }
}

/// A jump to the block laid out right after it
fn falls_through(mf: &MachineFunction, block: usize, inst: usize) -> bool {
    let insts = &mf.blocks[block].insts;
    let i = &insts[inst];
    inst + 1 == insts.len() && i.is(InstFlags::JUMP) && i.block_targets() == [block as u32 + 1]
}

pub fn encode_function(mf: &MachineFunction, target: &TargetDescription) -> Result<EncodedFunction> {
    let mut buf = CodeBuffer::new();
    let mut block_offsets = Vec::with_capacity(mf.blocks.len());
    let mut lines: Vec<(u64, SourceLocation)> = Vec::new();

    for (b, block) in mf.blocks.iter().enumerate() {
        block_offsets.push(buf.offset());
        for (i, inst) in block.insts.iter().enumerate() {
            if falls_through(mf, b, i) {
                continue;
            }
            if let Some(loc) = &inst.loc {
                if lines.last().map_or(true, |(_, last)| last != loc) {
                    lines.push((buf.offset(), loc.clone()));
                }
            }
            trace!("{:#06x}: {}", buf.offset(), inst.display(target.opcode_name(inst.opcode)));
            (target.encode)(inst, &mut buf)
                .map_err(|e| CompilerError::encoding(&mf.name, format!("block {b}: {e}")))?;
        }
    }

    let CodeBuffer { mut bytes, fixups } = buf;
    let mut symbol_refs = Vec::new();
    for fixup in fixups {
        match fixup.target {
            FixupTarget::Block(block) => {
                let kind = lookup(target.relocations, fixup.kind).ok_or_else(|| {
                    CompilerError::encoding(&mf.name, format!("unknown relocation kind {}", fixup.kind))
                })?;
                let dest = *block_offsets.get(block as usize).ok_or_else(|| {
                    CompilerError::encoding(&mf.name, format!("branch to missing block {block}"))
                })?;
                let value = kind.compute(dest, fixup.addend, fixup.offset);
                let start = fixup.offset as usize;
                let field = bytes
                    .get_mut(start..start + kind.size as usize)
                    .ok_or_else(|| CompilerError::internal(format!("'{}': fixup past end of code", mf.name)))?;
                if !(kind.encode)(field, value) {
                    return Err(CompilerError::encoding(
                        &mf.name,
                        format!("{} to block {block} out of range ({value})", kind.name),
                    ));
                }
            }
            FixupTarget::Symbol(symbol) => symbol_refs.push(SymbolRef {
                offset: fixup.offset,
                symbol,
                kind: fixup.kind,
                addend: fixup.addend,
            }),
        }
    }

    debug!(
        "encoded '{}': {} bytes, {} relocations",
        mf.name,
        bytes.len(),
        symbol_refs.len()
    );
    Ok(EncodedFunction {
        name: mf.name.clone(),
        linkage: mf.linkage,
        code: bytes,
        symbol_refs,
        lines,
        constants: mf.constants.clone(),
    })
}

fn emit_global(obj: &mut ObjectFile, global: &GlobalVariable, target: &TargetDescription) {
    let kind = match (&global.init, global.constant) {
        (GlobalInit::Zeroed(_), false) => SectionKind::Bss,
        (_, true) => SectionKind::Rodata,
        (GlobalInit::Data(_), false) => SectionKind::Data,
    };
    let section = obj.section_or_create(kind.section_name(), kind, global.align);
    obj.sections[section as usize].align_to(global.align);
    let start = obj.sections[section as usize].size();
    let size = global.size(target.pointer_bits);

    match &global.init {
        GlobalInit::Zeroed(n) if kind == SectionKind::Bss => obj.sections[section as usize].bss_size += n,
        GlobalInit::Zeroed(n) => {
            let data = &mut obj.sections[section as usize].data;
            data.resize(data.len() + *n as usize, 0);
        }
        GlobalInit::Data(items) => {
            let pointer_bytes = (target.pointer_bits / 8) as usize;
            for item in items {
                let at = obj.sections[section as usize].size();
                match item {
                    DataItem::Bytes(bytes) => obj.sections[section as usize].data.extend_from_slice(bytes),
                    DataItem::Int { ty, value } => {
                        let n = ty.bytes(target.pointer_bits) as usize;
                        obj.sections[section as usize].data.extend_from_slice(&value.to_le_bytes()[..n]);
                    }
                    DataItem::Float { ty, bits } => {
                        let n = ty.bytes(target.pointer_bits) as usize;
                        obj.sections[section as usize].data.extend_from_slice(&bits.to_le_bytes()[..n]);
                    }
                    DataItem::SymbolAddr { symbol, addend } => {
                        let data = &mut obj.sections[section as usize].data;
                        data.resize(data.len() + pointer_bytes, 0);
                        let symbol = obj.reference(symbol);
                        obj.add_relocation(Relocation {
                            section,
                            offset: at,
                            symbol,
                            kind: target.data_reloc,
                            addend: *addend,
                        });
                    }
                    DataItem::Zero(n) => {
                        let data = &mut obj.sections[section as usize].data;
                        data.resize(data.len() + *n as usize, 0);
                    }
                }
            }
        }
    }
    obj.define(&global.name, binding(global.linkage), SymbolKind::Object, section, start, size);
}

fn emit_constant(obj: &mut ObjectFile, entry: &PoolEntry) {
    let section = obj.section_or_create(".rodata", SectionKind::Rodata, entry.align);
    let rodata = &mut obj.sections[section as usize];
    rodata.align_to(entry.align);
    let offset = rodata.size();
    rodata.data.extend_from_slice(&entry.bytes);
    obj.define(
        &entry.symbol,
        SymbolBinding::Local,
        SymbolKind::Object,
        section,
        offset,
        entry.bytes.len() as u64,
    );
}

/// Lay out encoded functions, in the order given, then globals
pub fn emit_object(module: &Module, functions: &[EncodedFunction], target: &TargetDescription) -> Result<ObjectFile> {
    let mut obj = ObjectFile::new(target.name);
    for func in functions {
        let text = obj.section_or_create(".text", SectionKind::Text, FUNCTION_ALIGN);
        let section = &mut obj.sections[text as usize];
        section.align_to(FUNCTION_ALIGN);
        let base = section.size();
        section.data.extend_from_slice(&func.code);

        obj.define(
            &func.name,
            binding(func.linkage),
            SymbolKind::Func,
            text,
            base,
            func.code.len() as u64,
        );
        for r in &func.symbol_refs {
            let symbol = obj.reference(&r.symbol);
            obj.add_relocation(Relocation {
                section: text,
                offset: base + r.offset,
                symbol,
                kind: r.kind,
                addend: r.addend,
            });
        }
        obj.lines.extend(func.lines.iter().map(|(offset, loc)| LineEntry {
            section: text,
            offset: base + offset,
            loc: loc.clone(),
        }));
    }
    for entry in functions.iter().flat_map(|f| &f.constants) {
        emit_constant(&mut obj, entry);
    }
    for global in &module.globals {
        emit_global(&mut obj, global, target);
    }

    obj.validate(|code| lookup(target.relocations, code).map(|k| k.size))
        .map_err(|e| CompilerError::internal(format!("emitted object for '{}' is malformed: {e}", module.name)))?;
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfunc::MachineBlock;
    use pretty_assertions::assert_eq;
    use rxc_ir::IrType;
    use rxc_target::riscv32::opcodes::{ADDI, BNE, RET};
    use rxc_target::riscv32::reloc::{R_BRANCH, R_CALL, R_JAL};
    use rxc_target::{MachineInst, PReg, Reg};

    const A0: Reg = Reg::Phys(PReg(10));
    const ZERO: Reg = Reg::Phys(PReg(0));

    fn function(blocks: Vec<Vec<MachineInst>>) -> MachineFunction {
        let mut mf = MachineFunction::new("f", Linkage::External);
        mf.blocks = blocks.into_iter().map(|insts| MachineBlock { insts }).collect();
        mf
    }

    #[test]
    fn test_fallthrough_jumps_are_dropped_and_branches_patched() {
        let target = TargetDescription::riscv32();
        let jump = target.hooks.jump;
        let mf = function(vec![
            vec![
                MachineInst::new(BNE).use_reg(A0).use_reg(ZERO).block(2).flags(InstFlags::BRANCH),
                jump(1),
            ],
            vec![MachineInst::new(ADDI).def(A0).use_reg(A0).imm(1), jump(2)],
            vec![MachineInst::new(RET).flags(InstFlags::RETURN)],
        ]);
        let encoded = encode_function(&mf, &target).unwrap();
        assert_eq!(encoded.code.len(), 12);
        assert!(encoded.symbol_refs.is_empty());

        let branch = lookup(target.relocations, R_BRANCH).unwrap();
        assert_eq!((branch.decode)(&encoded.code[0..4]), 8);
        assert_eq!(&encoded.code[8..12], &0x0000_8067u32.to_le_bytes());
    }

    #[test]
    fn test_backward_jumps_are_kept() {
        let target = TargetDescription::riscv32();
        let jump = target.hooks.jump;
        let mf = function(vec![
            vec![MachineInst::new(ADDI).def(A0).use_reg(A0).imm(1), jump(0)],
        ]);
        let encoded = encode_function(&mf, &target).unwrap();
        assert_eq!(encoded.code.len(), 8);
        let jal = lookup(target.relocations, R_JAL).unwrap();
        assert_eq!((jal.decode)(&encoded.code[4..8]), -4);
    }

    #[test]
    fn test_symbol_references_become_relocations() {
        let target = TargetDescription::riscv32();
        let loc = SourceLocation::new("f.c", 3, 5);
        let mut caller = function(vec![vec![
            (target.hooks.call)("g").with_loc(Some(loc.clone())),
            MachineInst::new(RET).flags(InstFlags::RETURN).with_loc(Some(loc.clone())),
        ]]);
        caller.name = "main".to_string();
        let leaf = function(vec![vec![MachineInst::new(RET).flags(InstFlags::RETURN)]]);
        let encoded = vec![
            encode_function(&leaf, &target).unwrap(),
            encode_function(&caller, &target).unwrap(),
        ];
        assert_eq!(encoded[1].lines, vec![(0, loc.clone())]);

        let obj = emit_object(&Module::new("m"), &encoded, &target).unwrap();
        assert_eq!(obj.sections.len(), 1);
        assert_eq!(obj.sections[0].data.len(), 4 + 12);
        assert_eq!(obj.relocations.len(), 1);
        let reloc = &obj.relocations[0];
        assert_eq!((reloc.offset, reloc.kind, reloc.addend), (4, R_CALL, 0));
        assert_eq!(obj.symbols[reloc.symbol as usize].name, "g");
        assert!(!obj.symbols[reloc.symbol as usize].is_defined());

        let main = &obj.symbols[obj.symbol_index("main").unwrap() as usize];
        assert_eq!((main.offset, main.size, main.kind), (4, 12, SymbolKind::Func));
        assert_eq!(obj.lines[0].offset, 4);
        assert_eq!(obj.imported().count(), 1);
    }

    #[test]
    fn test_globals_land_in_their_sections() {
        let target = TargetDescription::riscv32();
        let mut module = Module::new("m");
        module.add_global(GlobalVariable {
            name: "counter".to_string(),
            linkage: Linkage::Internal,
            init: GlobalInit::Zeroed(12),
            align: 4,
            constant: false,
        });
        module.add_global(GlobalVariable {
            name: "table".to_string(),
            linkage: Linkage::External,
            init: GlobalInit::Data(vec![
                DataItem::Int {
                    ty: IrType::I16,
                    value: 0x0102,
                },
                DataItem::Zero(2),
                DataItem::SymbolAddr {
                    symbol: "counter".to_string(),
                    addend: 8,
                },
            ]),
            align: 4,
            constant: false,
        });
        module.add_global(GlobalVariable {
            name: "pi".to_string(),
            linkage: Linkage::Weak,
            init: GlobalInit::Data(vec![DataItem::Float {
                ty: IrType::F32,
                bits: 3.5f32.to_bits() as u64,
            }]),
            align: 4,
            constant: true,
        });

        let obj = emit_object(&module, &[], &target).unwrap();
        let section = |name: &str| &obj.sections[obj.section_index(name).unwrap() as usize];
        assert_eq!(section(".bss").size(), 12);
        assert_eq!(section(".data").data, vec![2, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(section(".rodata").data, 3.5f32.to_le_bytes().to_vec());

        assert_eq!(obj.relocations.len(), 1);
        let reloc = &obj.relocations[0];
        assert_eq!((reloc.offset, reloc.kind, reloc.addend), (4, target.data_reloc, 8));
        let counter = &obj.symbols[reloc.symbol as usize];
        assert_eq!(counter.name, "counter");
        assert_eq!(counter.binding, SymbolBinding::Local);

        let pi = &obj.symbols[obj.symbol_index("pi").unwrap() as usize];
        assert_eq!((pi.binding, pi.size), (SymbolBinding::Weak, 4));
    }
}
