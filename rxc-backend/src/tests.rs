use super::*;
use pretty_assertions::assert_eq;
use rxc_common::{CompilerError, SourceLocation};
use rxc_ir::{BinaryOp, IrBuilder, IrType, Linkage, Signature};
use rxc_object::{SectionKind, SymbolBinding, SymbolKind};

fn add_module() -> Module {
    let mut b = IrBuilder::new("add");
    let mut f = b.function(
        "add",
        Signature::new(vec![IrType::I32, IrType::I32], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    f.set_location(Some(SourceLocation::new("add.c", 2, 12)));
    let sum = f.binary(BinaryOp::Add, p[0], p[1]).unwrap();
    f.ret(&[sum]).unwrap();
    f.finish().unwrap();
    b.finish()
}

/// `main` calls `twice(add(a, b))`; `add` lives elsewhere
fn caller_module() -> Module {
    let mut b = IrBuilder::new("main");
    let sig = Signature::new(vec![IrType::I32, IrType::I32], vec![IrType::I32]);
    b.declare_function("add", sig.clone());

    let mut f = b.function("twice", Signature::new(vec![IrType::I32], vec![IrType::I32]), Linkage::Internal);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let d = f.binary(BinaryOp::Add, p[0], p[0]).unwrap();
    f.ret(&[d]).unwrap();
    f.finish().unwrap();

    let mut f = b.function("main", sig, Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let s = f.call("add", &[p[0], p[1]], &[IrType::I32]).unwrap();
    let t = f.call("twice", &[s[0]], &[IrType::I32]).unwrap();
    f.ret(&[t[0]]).unwrap();
    f.finish().unwrap();
    b.finish()
}

fn text(obj: &ObjectFile) -> &[u8] {
    &obj.sections[obj.section_index(".text").unwrap() as usize].data
}

#[test]
fn test_add_compiles_for_both_targets() {
    let module = add_module();
    let options = CompileOptions::default();
    let rv = compile_module(&module, &TargetDescription::riscv32(), &options).unwrap();
    let x86 = compile_module(&module, &TargetDescription::x86_64(), &options).unwrap();

    assert_eq!((rv.arch.as_str(), x86.arch.as_str()), ("riscv32", "x86_64"));
    assert_ne!(text(&rv), text(&x86));
    for obj in [&rv, &x86] {
        assert!(obj.relocations.is_empty());
        let add = &obj.symbols[obj.symbol_index("add").unwrap() as usize];
        assert_eq!((add.binding, add.kind, add.offset), (SymbolBinding::Global, SymbolKind::Func, 0));
        assert_eq!(add.size, text(obj).len() as u64);
        assert_eq!(obj.lines[0].loc.line, 2);
        assert_eq!(obj.sections[0].kind, SectionKind::Text);
    }
    assert_eq!(text(&rv).len() % 4, 0);
    assert_eq!(*text(&x86).last().unwrap(), 0xC3);
}

#[test]
fn test_each_call_is_one_relocation() {
    let target = TargetDescription::riscv32();
    let obj = compile_module(&caller_module(), &target, &CompileOptions::default()).unwrap();
    let to = |name: &str| {
        obj.relocations
            .iter()
            .filter(|r| obj.symbols[r.symbol as usize].name == name)
            .count()
    };
    assert_eq!((to("add"), to("twice")), (1, 1));
    assert_eq!(obj.imported().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["add"]);
    let twice = &obj.symbols[obj.symbol_index("twice").unwrap() as usize];
    assert_eq!(twice.binding, SymbolBinding::Local);
}

#[test]
fn test_parallel_and_serial_compilation_agree() {
    let module = caller_module();
    for target in [TargetDescription::riscv32(), TargetDescription::x86_64()] {
        for allocator in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
            let serial = CompileOptions {
                allocator,
                parallel: false,
                ..Default::default()
            };
            let parallel = CompileOptions {
                parallel: true,
                ..serial.clone()
            };
            let a = compile_module(&module, &target, &serial).unwrap();
            let b = compile_module(&module, &target, &parallel).unwrap();
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_oversized_frame_fails_compilation() {
    let mut b = IrBuilder::new("big");
    let mut f = b.function("big", Signature::new(vec![], vec![IrType::I32]), Linkage::External);
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let buf = f.alloca(4096, 4).unwrap();
    let zero = f.iconst(IrType::I32, 0).unwrap();
    f.store(zero, buf).unwrap();
    let v = f.load(IrType::I32, buf).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let options = CompileOptions {
        opt_level: 0,
        ..Default::default()
    };
    let err = compile_module(&module, &TargetDescription::riscv32(), &options).unwrap_err();
    assert!(matches!(err, CompilerError::FrameTooLarge { ref function, .. } if function == "big"));
    compile_module(&module, &TargetDescription::x86_64(), &options).unwrap();
}

#[test]
fn test_wide_division_compiles_for_riscv32() {
    let target = TargetDescription::riscv32();
    for (op, helper) in [
        (BinaryOp::UDiv, legalize::UDIV64),
        (BinaryOp::URem, legalize::UREM64),
        (BinaryOp::SDiv, legalize::UDIV64),
        (BinaryOp::SRem, legalize::UREM64),
    ] {
        let mut b = IrBuilder::new("div");
        let sig = Signature::new(vec![IrType::I64, IrType::I64], vec![IrType::I64]);
        let mut f = b.function("div", sig, Linkage::External);
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let q = f.binary(op, p[0], p[1]).unwrap();
        f.ret(&[q]).unwrap();
        f.finish().unwrap();
        let module = b.finish();

        for allocator in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
            let options = CompileOptions {
                allocator,
                ..Default::default()
            };
            let obj = compile_module(&module, &target, &options).unwrap();
            let sym = &obj.symbols[obj.symbol_index(helper).unwrap() as usize];
            assert!(sym.is_defined());
            assert_eq!(sym.binding, SymbolBinding::Local);
            assert_eq!(obj.imported().count(), 0);
        }
    }
}
