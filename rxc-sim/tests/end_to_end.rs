//! Compile, link and run: the simulators must agree with the IR interpreter

use pretty_assertions::assert_eq;
use rxc_backend::{compile_module, AllocatorKind, CompileOptions};
use rxc_common::CompilerError;
use rxc_ir::{
    BinaryOp, CastOp, DataItem, FloatCC, GlobalInit, GlobalVariable, IntCC, Interpreter, IrBuilder, IrType, Linkage,
    Module, Signature,
};
use rxc_object::{Archive, Image, LinkInput, LinkOptions, Linker, ObjectFile};
use rxc_sim::{SimError, Simulator};
use rxc_target::TargetDescription;

fn targets() -> [TargetDescription; 2] {
    [TargetDescription::riscv32(), TargetDescription::x86_64()]
}

fn compile(module: &Module, target: &TargetDescription, allocator: AllocatorKind) -> ObjectFile {
    let options = CompileOptions {
        allocator,
        ..Default::default()
    };
    compile_module(module, target, &options).unwrap()
}

fn link(target: &TargetDescription, objects: Vec<(&str, ObjectFile)>) -> Image {
    let inputs = objects
        .into_iter()
        .map(|(name, object)| LinkInput::Object {
            name: name.to_string(),
            object,
        })
        .collect();
    Linker::new(&target.link_target(), LinkOptions::default())
        .link(inputs)
        .unwrap()
}

fn i32_sig(params: usize) -> Signature {
    Signature::new(vec![IrType::I32; params], vec![IrType::I32])
}

fn add_module() -> Module {
    let mut b = IrBuilder::new("lib");
    let mut f = b.function("add", i32_sig(2), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let sum = f.binary(BinaryOp::Add, p[0], p[1]).unwrap();
    f.ret(&[sum]).unwrap();
    f.finish().unwrap();
    b.finish()
}

/// `main(a, b) = twice(add(a, b))` with `add` defined elsewhere
fn main_module() -> Module {
    let mut b = IrBuilder::new("main");
    b.declare_function("add", i32_sig(2));

    let mut f = b.function("twice", i32_sig(1), Linkage::Internal);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let d = f.binary(BinaryOp::Add, p[0], p[0]).unwrap();
    f.ret(&[d]).unwrap();
    f.finish().unwrap();

    let mut f = b.function("main", i32_sig(2), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let s = f.call("add", &[p[0], p[1]], &[IrType::I32]).unwrap();
    let t = f.call("twice", &[s[0]], &[IrType::I32]).unwrap();
    f.ret(&[t[0]]).unwrap();
    f.finish().unwrap();
    b.finish()
}

#[test]
fn test_add_runs_on_both_targets() {
    for target in targets() {
        let image = link(&target, vec![("add.o", compile(&add_module(), &target, AllocatorKind::Irc))]);
        let mut sim = Simulator::new(&image).unwrap();
        let sig = i32_sig(2);
        assert_eq!(sim.call("add", &sig, &[2, 3]).unwrap(), vec![5], "{}", target.name);
        assert_eq!(sim.call("add", &sig, &[0x7FFF_FFFF, 1]).unwrap(), vec![0x8000_0000]);
        assert_eq!(sim.call("add", &sig, &[0xFFFF_FFFF, 1]).unwrap(), vec![0]);
    }
}

#[test]
fn test_two_objects_link_with_one_relocation_per_call() {
    for target in targets() {
        let image = link(
            &target,
            vec![
                ("main.o", compile(&main_module(), &target, AllocatorKind::Irc)),
                ("lib.o", compile(&add_module(), &target, AllocatorKind::Irc)),
            ],
        );
        let to_add: Vec<_> = image.relocations.iter().filter(|r| r.symbol == "add").collect();
        assert_eq!(to_add.len(), 1, "{}", target.name);
        assert_eq!(to_add[0].symbol_addr, image.symbol("add").unwrap());

        let mut sim = Simulator::new(&image).unwrap();
        assert_eq!(sim.call("main", &i32_sig(2), &[3, 4]).unwrap(), vec![14]);
    }
}

#[test]
fn test_archive_members_are_pulled_on_demand() {
    let target = TargetDescription::riscv32();

    // defines `unused`, which needs a symbol nobody provides
    let mut b = IrBuilder::new("unused");
    b.declare_function("missing", i32_sig(0));
    let mut f = b.function("unused", i32_sig(0), Linkage::External);
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.call("missing", &[], &[IrType::I32]).unwrap();
    f.ret(&v).unwrap();
    f.finish().unwrap();
    let unused = b.finish();

    let mut archive = Archive::new();
    archive.add("add.o", compile(&add_module(), &target, AllocatorKind::Irc));
    archive.add("unused.o", compile(&unused, &target, AllocatorKind::Irc));
    let inputs = vec![
        LinkInput::Object {
            name: "main.o".to_string(),
            object: compile(&main_module(), &target, AllocatorKind::Irc),
        },
        LinkInput::Archive {
            name: "libadd.a".to_string(),
            archive,
        },
    ];
    let image = Linker::new(&target.link_target(), LinkOptions::default())
        .link(inputs)
        .unwrap();
    assert!(image.symbol("add").is_some());
    assert_eq!(image.symbol("unused"), None);

    let mut sim = Simulator::new(&image).unwrap();
    assert_eq!(sim.call("main", &i32_sig(2), &[10, 11]).unwrap(), vec![42]);
}

#[test]
fn test_builds_are_reproducible() {
    for target in targets() {
        let build = || {
            let image = link(
                &target,
                vec![
                    ("main.o", compile(&main_module(), &target, AllocatorKind::Irc)),
                    ("lib.o", compile(&add_module(), &target, AllocatorKind::Irc)),
                ],
            );
            image.to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }
}

#[test]
fn test_wide_arithmetic_on_riscv32() {
    let mut b = IrBuilder::new("wide");
    let sig = Signature::new(vec![IrType::I64, IrType::I64], vec![IrType::I64]);
    let ops = [
        ("mul", BinaryOp::Mul),
        ("udiv", BinaryOp::UDiv),
        ("urem", BinaryOp::URem),
        ("sdiv", BinaryOp::SDiv),
        ("srem", BinaryOp::SRem),
    ];
    for (name, op) in ops {
        let mut f = b.function(name, sig.clone(), Linkage::External);
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let v = f.binary(op, p[0], p[1]).unwrap();
        f.ret(&[v]).unwrap();
        f.finish().unwrap();
    }
    let module = b.finish();

    let target = TargetDescription::riscv32();
    let cases: [(i64, i64); 7] = [
        (6, 7),
        (-100, 7),
        (100, -7),
        (-100, -7),
        (0x1234_5678_9ABC_DEF0, -3),
        (i64::MAX, 0x1_0000_0001),
        (-0x7FFF_FFFF_FFFF, -0x1_0000),
    ];
    for allocator in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
        let image = link(&target, vec![("wide.o", compile(&module, &target, allocator))]);
        let mut sim = Simulator::new(&image).unwrap();
        for (a, b) in cases {
            let args = [a as u64, b as u64];
            let (ua, ub) = (a as u64, b as u64);
            assert_eq!(sim.call("mul", &sig, &args).unwrap(), vec![a.wrapping_mul(b) as u64]);
            assert_eq!(sim.call("udiv", &sig, &args).unwrap(), vec![ua / ub], "{ua} / {ub}");
            assert_eq!(sim.call("urem", &sig, &args).unwrap(), vec![ua % ub], "{ua} % {ub}");
            assert_eq!(sim.call("sdiv", &sig, &args).unwrap(), vec![(a / b) as u64], "{a} / {b}");
            assert_eq!(sim.call("srem", &sig, &args).unwrap(), vec![(a % b) as u64], "{a} % {b}");
        }
    }
}

#[test]
fn test_float_to_i64_is_unsupported_on_riscv32() {
    let mut b = IrBuilder::new("conv");
    let mut f = b.function(
        "conv",
        Signature::new(vec![IrType::F64], vec![IrType::I64]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.cast(CastOp::FpToSi, p[0], IrType::I64).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let err = compile_module(&module, &TargetDescription::riscv32(), &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompilerError::UnsupportedOperation { .. }));
    compile_module(&module, &TargetDescription::x86_64(), &CompileOptions::default()).unwrap();
}

#[test]
fn test_unknown_symbol_and_arity_are_reported() {
    let target = TargetDescription::x86_64();
    let image = link(&target, vec![("add.o", compile(&add_module(), &target, AllocatorKind::Irc))]);
    let mut sim = Simulator::new(&image).unwrap();
    assert_eq!(
        sim.call("sub", &i32_sig(2), &[1, 2]),
        Err(SimError::UnknownSymbol("sub".to_string()))
    );
    assert_eq!(
        sim.call("add", &i32_sig(2), &[1]),
        Err(SimError::Arity { expected: 2, got: 1 })
    );
}

/// Functions exercising control flow, calls, memory and floats
fn program() -> Module {
    let mut b = IrBuilder::new("program");
    b.add_global(GlobalVariable {
        name: "counter".to_string(),
        linkage: Linkage::Internal,
        init: GlobalInit::Zeroed(4),
        align: 4,
        constant: false,
    })
    .unwrap();
    b.add_global(GlobalVariable {
        name: "table".to_string(),
        linkage: Linkage::External,
        init: GlobalInit::Data(
            [3i64, -1, 40, 7]
                .iter()
                .map(|&value| DataItem::Int { ty: IrType::I32, value })
                .collect(),
        ),
        align: 4,
        constant: true,
    })
    .unwrap();

    // sum(n) = 0 + 1 + ... + (n - 1)
    let mut f = b.function("sum", i32_sig(1), Linkage::External);
    let n = f.params()[0];
    let (entry, head, body, exit) = (f.create_block(), f.create_block(), f.create_block(), f.create_block());
    f.switch_to_block(entry).unwrap();
    let zero = f.iconst(IrType::I32, 0).unwrap();
    f.jump(head).unwrap();
    f.switch_to_block(head).unwrap();
    let i = f.phi(IrType::I32).unwrap();
    let acc = f.phi(IrType::I32).unwrap();
    let more = f.icmp(IntCC::Slt, i, n).unwrap();
    f.branch(more, body, exit).unwrap();
    f.switch_to_block(body).unwrap();
    let acc2 = f.binary(BinaryOp::Add, acc, i).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let i2 = f.binary(BinaryOp::Add, i, one).unwrap();
    f.jump(head).unwrap();
    f.add_phi_incoming(i, entry, zero).unwrap();
    f.add_phi_incoming(i, body, i2).unwrap();
    f.add_phi_incoming(acc, entry, zero).unwrap();
    f.add_phi_incoming(acc, body, acc2).unwrap();
    f.switch_to_block(exit).unwrap();
    f.ret(&[acc]).unwrap();
    f.finish().unwrap();

    // fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
    let mut f = b.function("fib", i32_sig(1), Linkage::External);
    let n = f.params()[0];
    let (entry, base, rec) = (f.create_block(), f.create_block(), f.create_block());
    f.switch_to_block(entry).unwrap();
    let two = f.iconst(IrType::I32, 2).unwrap();
    let small = f.icmp(IntCC::Slt, n, two).unwrap();
    f.branch(small, base, rec).unwrap();
    f.switch_to_block(base).unwrap();
    f.ret(&[n]).unwrap();
    f.switch_to_block(rec).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let n1 = f.binary(BinaryOp::Sub, n, one).unwrap();
    let n2 = f.binary(BinaryOp::Sub, n, two).unwrap();
    let a = f.call("fib", &[n1], &[IrType::I32]).unwrap();
    let b2 = f.call("fib", &[n2], &[IrType::I32]).unwrap();
    let s = f.binary(BinaryOp::Add, a[0], b2[0]).unwrap();
    f.ret(&[s]).unwrap();
    f.finish().unwrap();

    // umax(a, b) through select
    let mut f = b.function("umax", i32_sig(2), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let gt = f.icmp(IntCC::Ugt, p[0], p[1]).unwrap();
    let m = f.select(gt, p[0], p[1]).unwrap();
    f.ret(&[m]).unwrap();
    f.finish().unwrap();

    // bump(k) = (counter += table[k & 3])
    let mut f = b.function("bump", i32_sig(1), Linkage::External);
    let k = f.params()[0];
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let three = f.iconst(IrType::I32, 3).unwrap();
    let idx = f.binary(BinaryOp::And, k, three).unwrap();
    let four = f.iconst(IrType::I32, 4).unwrap();
    let off = f.binary(BinaryOp::Mul, idx, four).unwrap();
    let table = f.global_addr("table").unwrap();
    let slot = f.ptradd(table, off).unwrap();
    let item = f.load(IrType::I32, slot).unwrap();
    let counter = f.global_addr("counter").unwrap();
    let old = f.load(IrType::I32, counter).unwrap();
    let new = f.binary(BinaryOp::Add, old, item).unwrap();
    f.store(new, counter).unwrap();
    f.ret(&[new]).unwrap();
    f.finish().unwrap();

    // poly(x, y) = x * y + x / y - 1.5
    let mut f = b.function(
        "poly",
        Signature::new(vec![IrType::F64, IrType::F64], vec![IrType::F64]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let prod = f.binary(BinaryOp::FMul, p[0], p[1]).unwrap();
    let quot = f.binary(BinaryOp::FDiv, p[0], p[1]).unwrap();
    let s = f.binary(BinaryOp::FAdd, prod, quot).unwrap();
    let c = f.fconst(IrType::F64, 1.5).unwrap();
    let r = f.binary(BinaryOp::FSub, s, c).unwrap();
    f.ret(&[r]).unwrap();
    f.finish().unwrap();

    // less(x, y) = x < y as i32
    let mut f = b.function(
        "less",
        Signature::new(vec![IrType::F64, IrType::F64], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let lt = f.fcmp(FloatCC::Lt, p[0], p[1]).unwrap();
    let v = f.cast(CastOp::Zext, lt, IrType::I32).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();

    // wrap8(a) = sext((i8) a + 100)
    let mut f = b.function("wrap8", i32_sig(1), Linkage::External);
    let a = f.params()[0];
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let narrow = f.cast(CastOp::Trunc, a, IrType::I8).unwrap();
    let hundred = f.iconst(IrType::I8, 100).unwrap();
    let sum = f.binary(BinaryOp::Add, narrow, hundred).unwrap();
    let wide = f.cast(CastOp::Sext, sum, IrType::I32).unwrap();
    f.ret(&[wide]).unwrap();
    f.finish().unwrap();

    // pressure(a, b): more live values than registers, across a call
    let mut f = b.function("pressure", i32_sig(2), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let mut live = Vec::new();
    for k in 1..=30 {
        let c = f.iconst(IrType::I32, k).unwrap();
        let t = f.binary(BinaryOp::Mul, p[0], c).unwrap();
        let u = f.binary(BinaryOp::Xor, t, p[1]).unwrap();
        live.push(u);
    }
    let called = f.call("umax", &[live[0], live[29]], &[IrType::I32]).unwrap();
    let mut acc = called[0];
    for (k, &v) in live.iter().enumerate() {
        let op = if k % 2 == 0 { BinaryOp::Add } else { BinaryOp::Sub };
        acc = f.binary(op, acc, v).unwrap();
    }
    f.ret(&[acc]).unwrap();
    f.finish().unwrap();

    b.finish()
}

fn f64_bits(v: f64) -> u64 {
    v.to_bits()
}

#[test]
fn test_simulators_agree_with_interpreter() {
    let module = program();
    let int_cases: &[(&str, &[&[u64]])] = &[
        ("sum", &[&[0], &[1], &[10], &[100]]),
        ("fib", &[&[0], &[1], &[12]]),
        ("umax", &[&[3, 9], &[0xFFFF_FFFF, 1], &[7, 7]]),
        ("bump", &[&[0], &[1], &[2], &[7]]),
        ("wrap8", &[&[0], &[27], &[28], &[0x1FF]]),
        ("pressure", &[&[1, 2], &[0xDEAD, 0xBEEF], &[0xFFFF_FFFF, 0x8000_0000]]),
    ];
    let float_cases: &[(&str, &[[f64; 2]])] = &[
        ("poly", &[[3.0, 2.0], [-1.25, 0.5], [1e10, -3.0]]),
        ("less", &[[1.0, 2.0], [2.0, 1.0], [f64::NAN, 1.0], [-0.0, 0.0]]),
    ];

    for target in targets() {
        for allocator in [AllocatorKind::Irc, AllocatorKind::LinearScan] {
            let image = link(&target, vec![("program.o", compile(&module, &target, allocator))]);
            let mut sim = Simulator::new(&image).unwrap();
            let mut interp = Interpreter::with_pointer_bits(&module, target.pointer_bits).unwrap();
            let context = format!("{} {allocator:?}", target.name);

            for (name, cases) in int_cases {
                let sig = &module.function(name).unwrap().signature;
                for args in cases.iter() {
                    let expected = interp.call(name, args).unwrap();
                    let got = sim.call(name, sig, args).unwrap();
                    assert_eq!(got, expected, "{context}: {name}{args:x?}");
                }
            }
            for (name, cases) in float_cases {
                let sig = &module.function(name).unwrap().signature;
                for [x, y] in cases.iter() {
                    let args = [f64_bits(*x), f64_bits(*y)];
                    let expected = interp.call(name, &args).unwrap();
                    let got = sim.call(name, sig, &args).unwrap();
                    assert_eq!(got, expected, "{context}: {name}({x}, {y})");
                }
            }
        }
    }
}

#[test]
fn test_runaway_code_hits_step_limit() {
    let mut b = IrBuilder::new("spin");
    let mut f = b.function("spin", i32_sig(0), Linkage::External);
    let (entry, lp) = (f.create_block(), f.create_block());
    f.switch_to_block(entry).unwrap();
    f.jump(lp).unwrap();
    f.switch_to_block(lp).unwrap();
    f.jump(lp).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    for target in targets() {
        let image = link(&target, vec![("spin.o", compile(&module, &target, AllocatorKind::Irc))]);
        let mut sim = Simulator::new(&image).unwrap();
        sim.set_step_limit(1000);
        assert_eq!(sim.call("spin", &i32_sig(0), &[]), Err(SimError::StepLimit(1000)));
    }
}
