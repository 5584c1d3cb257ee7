use super::*;
use crate::object::{Relocation, Section, SymbolBinding, SymbolKind};
use crate::reloc::field;
use pretty_assertions::assert_eq;

const ABS32: u16 = 1;
const PC32: u16 = 2;
const ABS8: u16 = 3;

fn encode_u8(field: &mut [u8], value: i64) -> bool {
    match u8::try_from(value) {
        Ok(v) => {
            field[0] = v;
            true
        }
        Err(_) => false,
    }
}

fn decode_u8(field: &[u8]) -> i64 {
    field[0] as i64
}

static KINDS: [RelocKindInfo; 3] = [
    RelocKindInfo {
        code: ABS32,
        name: "ABS32",
        pc_relative: false,
        size: 4,
        encode: field::encode_abs32,
        decode: field::decode_abs32,
    },
    RelocKindInfo {
        code: PC32,
        name: "PC32",
        pc_relative: true,
        size: 4,
        encode: field::encode_i32,
        decode: field::decode_i32,
    },
    RelocKindInfo {
        code: ABS8,
        name: "ABS8",
        pc_relative: false,
        size: 1,
        encode: encode_u8,
        decode: decode_u8,
    },
];

fn target() -> LinkTarget {
    LinkTarget {
        arch: "test32".to_string(),
        relocations: &KINDS,
        memory: MemoryLayout::flat(0x1000, 0x10000),
    }
}

/// An object defining `defs` as 8-byte functions, each referencing the
/// names in `refs` with a PC32 relocation at offset 4
fn object(defs: &[(&str, SymbolBinding)], refs: &[&str]) -> ObjectFile {
    let mut obj = ObjectFile::new("test32");
    let text = obj.add_section(Section::new(".text", SectionKind::Text, 4));
    for (i, (name, binding)) in defs.iter().enumerate() {
        obj.sections[text as usize].data.extend_from_slice(&[0x90; 8]);
        obj.define(name, *binding, SymbolKind::Func, text, (i * 8) as u64, 8);
    }
    if defs.is_empty() {
        obj.sections[text as usize].data.extend_from_slice(&[0x90; 8]);
    }
    for name in refs {
        let symbol = obj.reference(name);
        obj.add_relocation(Relocation {
            section: text,
            offset: 4,
            symbol,
            kind: PC32,
            addend: -4,
        });
    }
    obj
}

fn input(name: &str, object: ObjectFile) -> LinkInput {
    LinkInput::Object {
        name: name.to_string(),
        object,
    }
}

fn link(inputs: Vec<LinkInput>) -> Result<Image, LinkError> {
    Linker::new(&target(), LinkOptions::default()).link(inputs)
}

#[test]
fn test_two_objects_resolve_one_call() {
    let main = object(&[("main", SymbolBinding::Global)], &["add"]);
    let add = object(&[("add", SymbolBinding::Global)], &[]);
    let image = link(vec![input("main.rxo", main), input("add.rxo", add)]).unwrap();

    assert_eq!(image.relocations.len(), 1);
    let r = &image.relocations[0];
    let add_addr = image.symbol("add").unwrap();
    assert_eq!(add_addr, 0x1008);
    assert_eq!(r.symbol, "add");
    assert_eq!(r.place, 0x1004);
    assert_eq!(r.value, add_addr as i64 - 4 - 0x1004);
    let patched = image.read(r.place, 4).unwrap();
    assert_eq!(field::decode_i32(patched), r.value);
    // decoding recovers S + A
    assert_eq!(field::decode_i32(patched) + r.place as i64, add_addr as i64 + r.addend);
}

#[test]
fn test_duplicate_strong_definitions() {
    let a = object(&[("f", SymbolBinding::Global)], &[]);
    let b = object(&[("f", SymbolBinding::Global)], &[]);
    let err = link(vec![input("a.rxo", a), input("b.rxo", b)]).unwrap_err();
    assert_eq!(
        err,
        LinkError::DuplicateSymbol {
            name: "f".to_string(),
            first: "a.rxo".to_string(),
            second: "b.rxo".to_string(),
        }
    );
}

#[test]
fn test_weak_yields_to_strong_and_first_weak_wins() {
    let weak1 = object(&[("f", SymbolBinding::Weak)], &[]);
    let weak2 = object(&[("f", SymbolBinding::Weak), ("g", SymbolBinding::Global)], &[]);
    let image = link(vec![input("w1", weak1.clone()), input("w2", weak2.clone())]).unwrap();
    assert_eq!(image.symbol("f"), Some(0x1000));

    let strong = object(&[("f", SymbolBinding::Global)], &[]);
    let image = link(vec![input("w1", weak1), input("w2", weak2), input("s", strong)]).unwrap();
    assert_eq!(image.symbol("f"), Some(0x1000 + 8 + 16));
}

#[test]
fn test_undefined_symbols() {
    let main = object(&[("main", SymbolBinding::Global)], &["missing"]);
    let err = link(vec![input("main.rxo", main)]).unwrap_err();
    assert_eq!(
        err,
        LinkError::UndefinedSymbol {
            name: "missing".to_string(),
            referenced_by: "main.rxo".to_string(),
        }
    );

    let mut weak_ref = ObjectFile::new("test32");
    let data = weak_ref.add_section(Section::new(".data", SectionKind::Data, 4));
    weak_ref.sections[data as usize].data = vec![0xFF; 4];
    let sym = weak_ref.reference("optional_hook");
    weak_ref.symbols[sym as usize].binding = SymbolBinding::Weak;
    weak_ref.add_relocation(Relocation {
        section: data,
        offset: 0,
        symbol: sym,
        kind: ABS32,
        addend: 0,
    });
    let image = link(vec![input("hook.rxo", weak_ref)]).unwrap();
    let addr = image.section(".data").unwrap().addr;
    assert_eq!(image.read(addr, 4), Some(&[0u8, 0, 0, 0][..]));
}

#[test]
fn test_archive_pulls_only_needed_members() {
    let main = object(&[("main", SymbolBinding::Global)], &["f"]);
    let mut lib = Archive::new();
    lib.add("unused.rxo", object(&[("h", SymbolBinding::Global)], &[]));
    lib.add("g.rxo", object(&[("g", SymbolBinding::Global)], &[]));
    lib.add("f.rxo", object(&[("f", SymbolBinding::Global)], &["g"]));

    let image = link(vec![
        input("main.rxo", main),
        LinkInput::Archive {
            name: "libx.rxa".to_string(),
            archive: lib,
        },
    ])
    .unwrap();
    assert!(image.symbol("f").is_some());
    assert!(image.symbol("g").is_some(), "transitive dependency pulled");
    assert_eq!(image.symbol("h"), None);
    assert_eq!(image.section(".text").unwrap().size, 8 * 3);
}

#[test]
fn test_archive_group_across_archives() {
    // libb needs liba, which comes earlier on the command line
    let main = object(&[("main", SymbolBinding::Global)], &["b"]);
    let mut liba = Archive::new();
    liba.add("a.rxo", object(&[("a", SymbolBinding::Global)], &[]));
    let mut libb = Archive::new();
    libb.add("b.rxo", object(&[("b", SymbolBinding::Global)], &["a"]));
    let image = link(vec![
        input("main.rxo", main),
        LinkInput::Archive {
            name: "liba.rxa".to_string(),
            archive: liba,
        },
        LinkInput::Archive {
            name: "libb.rxa".to_string(),
            archive: libb,
        },
    ])
    .unwrap();
    assert!(image.symbol("a").is_some());
}

#[test]
fn test_relocation_overflow() {
    let mut obj = object(&[("main", SymbolBinding::Global)], &[]);
    let sym = obj.symbol_index("main").unwrap();
    obj.add_relocation(Relocation {
        section: 0,
        offset: 0,
        symbol: sym,
        kind: ABS8,
        addend: 0,
    });
    let err = link(vec![input("small.rxo", obj)]).unwrap_err();
    assert!(matches!(
        err,
        LinkError::RelocationOverflow { kind: "ABS8", value: 0x1000, .. }
    ));
}

#[test]
fn test_collect_rejects_bad_inputs() {
    let mut other = object(&[("main", SymbolBinding::Global)], &[]);
    other.arch = "x86_64".to_string();
    assert!(matches!(link(vec![input("x.rxo", other)]).unwrap_err(), LinkError::ArchMismatch { .. }));

    let mut unknown = object(&[("main", SymbolBinding::Global)], &["main"]);
    unknown.relocations[0].kind = 99;
    assert_eq!(
        link(vec![input("u.rxo", unknown)]).unwrap_err(),
        LinkError::UnknownRelocation {
            input: "u.rxo".to_string(),
            kind: 99,
        }
    );
}

#[test]
fn test_layout_regions_and_overflow() {
    let mut obj = object(&[("main", SymbolBinding::Global)], &[]);
    let data = obj.add_section(Section::new(".data", SectionKind::Data, 16));
    obj.sections[data as usize].data = vec![7; 4];
    let layout = MemoryLayout::from_json(
        r#"{ "regions": [
            { "name": "rom", "origin": 0, "length": 64, "kinds": ["text", "rodata"] },
            { "name": "ram", "origin": 1024, "length": 64, "kinds": ["data", "bss"] }
        ] }"#,
    )
    .unwrap();
    let options = LinkOptions {
        memory_layout: Some(layout.clone()),
        entry: Some("main".to_string()),
        ..LinkOptions::default()
    };
    let image = Linker::new(&target(), options).link(vec![input("m.rxo", obj.clone())]).unwrap();
    assert_eq!(image.section(".text").unwrap().addr, 0);
    assert_eq!(image.section(".data").unwrap().addr, 1024);
    assert_eq!(image.entry, Some(0));

    obj.sections[data as usize].data = vec![0; 65];
    let options = LinkOptions {
        memory_layout: Some(layout),
        ..LinkOptions::default()
    };
    let err = Linker::new(&target(), options).link(vec![input("m.rxo", obj)]).unwrap_err();
    assert!(matches!(err, LinkError::LayoutOverflow { section, .. } if section == ".data"));
}

#[test]
fn test_link_is_deterministic() {
    let build = || {
        vec![
            input("main.rxo", object(&[("main", SymbolBinding::Global)], &["add", "sub"])),
            input("math.rxo", object(&[("add", SymbolBinding::Global), ("sub", SymbolBinding::Global)], &[])),
        ]
    };
    let first = link(build()).unwrap().to_bytes().unwrap();
    let second = link(build()).unwrap().to_bytes().unwrap();
    assert_eq!(first, second);

    let sequential = LinkOptions {
        parallel: false,
        ..LinkOptions::default()
    };
    let third = Linker::new(&target(), sequential).link(build()).unwrap().to_bytes().unwrap();
    assert_eq!(first, third);
}

#[test]
fn test_sizes_that_wrap_are_layout_overflow() {
    let mut obj = object(&[("main", SymbolBinding::Global)], &[]);
    for name in [".bss.a", ".bss.b"] {
        let bss = obj.add_section(Section::new(name, SectionKind::Bss, 8));
        obj.sections[bss as usize].bss_size = u64::MAX - 2;
    }
    let err = link(vec![input("huge.rxo", obj)]).unwrap_err();
    assert!(matches!(err, LinkError::LayoutOverflow { ref section, .. } if section == ".bss"), "{err}");

    let mut obj = object(&[("main", SymbolBinding::Global)], &[]);
    let bss = obj.add_section(Section::new(".bss", SectionKind::Bss, 8));
    obj.sections[bss as usize].bss_size = u64::MAX - 2;
    let err = link(vec![input("big.rxo", obj)]).unwrap_err();
    assert!(matches!(err, LinkError::LayoutOverflow { .. }), "{err}");
}

#[test]
fn test_relocation_at_wrapping_offset_is_invalid() {
    let mut obj = object(&[("main", SymbolBinding::Global)], &["main"]);
    obj.relocations[0].offset = u64::MAX - 1;
    let err = link(vec![input("bad.rxo", obj)]).unwrap_err();
    assert!(matches!(err, LinkError::InvalidObject { .. }), "{err}");
}
