//! Legalization keeps the meaning of a module: the interpreter must give the
//! same answers before and after

use super::*;
use pretty_assertions::assert_eq;
use rxc_ir::{verify_module, Interpreter, IrBuilder, Linkage, Signature};

fn binary_module(op: BinaryOp, ty: IrType) -> Module {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![ty, ty], vec![ty]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.binary(op, p[0], p[1]).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    b.finish()
}

fn compare_module(cc: IntCC) -> Module {
    let mut b = IrBuilder::new("m");
    let mut f = b.function(
        "f",
        Signature::new(vec![IrType::I64, IrType::I64], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let flag = f.icmp(cc, p[0], p[1]).unwrap();
    let v = f.cast(CastOp::Zext, flag, IrType::I32).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    b.finish()
}

fn legalized(module: &Module, target: &TargetDescription) -> Module {
    let mut copy = module.clone();
    legalize_module(&mut copy, target).unwrap();
    verify_module(&copy).unwrap();
    copy
}

fn split(args: &[u64]) -> Vec<u64> {
    args.iter().flat_map(|&a| [a & 0xFFFF_FFFF, a >> 32]).collect()
}

/// Run `f` on a 64-bit module and on its riscv32 legalization
fn check_wide(module: &Module, cases: &[(u64, u64)]) {
    let target = TargetDescription::riscv32();
    let legal = legalized(module, &target);
    let mut before = Interpreter::new(module).unwrap();
    let mut after = Interpreter::with_pointer_bits(&legal, 32).unwrap();
    for &(a, b) in cases {
        let expected = before.call("f", &[a, b]).unwrap();
        let got = after.call("f", &split(&[a, b])).unwrap();
        let joined = if got.len() == 2 { got[0] | got[1] << 32 } else { got[0] };
        assert_eq!(joined, expected[0], "f({a:#x}, {b:#x})");
    }
}

const CASES: &[(u64, u64)] = &[
    (3, 5),
    (u64::MAX, 2),
    (0x8000_0000_0000_0000, 0xFFFF_FFFF),
    (0x1234_5678_9ABC_DEF0, 0x0FED_CBA9_8765_4321),
    (0xFFFF_FFFF, 1),
    (0xFFFF_FFFF_0000_0001, 0xFFFF_FFFF_FFFF_FFFF),
];

const SHIFTS: &[(u64, u64)] = &[
    (0x8123_4567_89AB_CDEF, 0),
    (0x8123_4567_89AB_CDEF, 1),
    (0x8123_4567_89AB_CDEF, 31),
    (0x8123_4567_89AB_CDEF, 32),
    (0x8123_4567_89AB_CDEF, 33),
    (0x0123_4567_89AB_CDEF, 63),
    (0x7FFF_FFFF_FFFF_FFFF, 40),
];

#[test]
fn test_wide_arithmetic_on_riscv32() {
    for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::And, BinaryOp::Or, BinaryOp::Xor] {
        check_wide(&binary_module(op, IrType::I64), CASES);
    }
}

#[test]
fn test_wide_shifts_on_riscv32() {
    for op in [BinaryOp::Shl, BinaryOp::LShr, BinaryOp::AShr] {
        check_wide(&binary_module(op, IrType::I64), SHIFTS);
    }
}

#[test]
fn test_wide_compares_on_riscv32() {
    for cc in [
        IntCC::Eq,
        IntCC::Ne,
        IntCC::Slt,
        IntCC::Sle,
        IntCC::Sgt,
        IntCC::Sge,
        IntCC::Ult,
        IntCC::Ule,
        IntCC::Ugt,
        IntCC::Uge,
    ] {
        let mut cases = CASES.to_vec();
        cases.push((0x1_0000_0000, 0x1_0000_0000));
        cases.push((0x1_0000_0002, 0x1_0000_0001));
        check_wide(&compare_module(cc), &cases);
    }
}

#[test]
fn test_wide_division_calls_helper() {
    let cases: Vec<(u64, u64)> = CASES.iter().copied().filter(|&(_, b)| b != 0).collect();
    for op in [BinaryOp::UDiv, BinaryOp::URem] {
        check_wide(&binary_module(op, IrType::I64), &cases);
    }
    let signed = [(100u64, 7u64), ((-100i64) as u64, 7), (100, (-7i64) as u64), ((-100i64) as u64, (-7i64) as u64)];
    for op in [BinaryOp::SDiv, BinaryOp::SRem] {
        check_wide(&binary_module(op, IrType::I64), &signed);
    }
    let legal = legalized(&binary_module(BinaryOp::UDiv, IrType::I64), &TargetDescription::riscv32());
    assert!(legal.function(UDIV64).is_some());
    assert!(legal.function(UREM64).is_none());
}

#[test]
fn test_narrow_arithmetic_on_both_targets() {
    for target in [TargetDescription::riscv32(), TargetDescription::x86_64()] {
        for op in [BinaryOp::Add, BinaryOp::Mul, BinaryOp::SDiv, BinaryOp::LShr, BinaryOp::AShr] {
            let module = binary_module(op, IrType::I8);
            let legal = legalized(&module, &target);
            let mut before = Interpreter::new(&module).unwrap();
            let mut after = Interpreter::with_pointer_bits(&legal, target.pointer_bits).unwrap();
            for (a, b) in [(0x80u64, 3u64), (0x7F, 0x02), (0xF0, 0x05), (0x01, 0x07)] {
                assert_eq!(after.call("f", &[a, b]).unwrap(), before.call("f", &[a, b]).unwrap());
            }
        }
    }
}

#[test]
fn test_unsigned_conversion_on_x86_64() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![IrType::I64], vec![IrType::F64]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.cast(CastOp::UiToFp, p[0], IrType::F64).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let legal = legalized(&module, &TargetDescription::x86_64());
    let mut before = Interpreter::new(&module).unwrap();
    let mut after = Interpreter::new(&legal).unwrap();
    for x in [0u64, 1, 1 << 53, u64::MAX, 0x8000_0000_0000_0001, 0xFFFF_FFFF_FFFF_F7FF] {
        assert_eq!(after.call("f", &[x]).unwrap(), before.call("f", &[x]).unwrap(), "{x:#x}");
    }
}

#[test]
fn test_signed_conversion_from_halves_on_riscv32() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![IrType::I64], vec![IrType::F64]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.cast(CastOp::SiToFp, p[0], IrType::F64).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let legal = legalized(&module, &TargetDescription::riscv32());
    let mut before = Interpreter::new(&module).unwrap();
    let mut after = Interpreter::with_pointer_bits(&legal, 32).unwrap();
    for x in [0u64, 5, (-5i64) as u64, 1 << 40, (-(1i64 << 62)) as u64 + 12345] {
        assert_eq!(after.call("f", &split(&[x])).unwrap(), before.call("f", &[x]).unwrap(), "{x:#x}");
    }
}

#[test]
fn test_shape_after_legalization() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function(
        "f",
        Signature::new(vec![IrType::I1, IrType::I32], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    let then_block = f.create_block();
    let join = f.create_block();
    f.switch_to_block(entry).unwrap();
    f.branch(p[0], then_block, join).unwrap();
    f.switch_to_block(then_block).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let sum = f.binary(BinaryOp::Add, p[1], one).unwrap();
    f.jump(join).unwrap();
    f.switch_to_block(join).unwrap();
    let phi = f.phi(IrType::I32).unwrap();
    f.add_phi_incoming(phi, entry, p[1]).unwrap();
    f.add_phi_incoming(phi, then_block, sum).unwrap();
    f.ret(&[phi]).unwrap();
    f.finish().unwrap();
    let mut module = b.finish();

    legalize_module(&mut module, &TargetDescription::riscv32()).unwrap();
    verify_module(&module).unwrap();
    let func = &module.functions[0];
    // the entry -> join edge is critical
    assert_eq!(func.blocks().len(), 4);
    let term = func.terminator(func.blocks()[0]).unwrap();
    let InstKind::Branch { cond, .. } = *func.kind(term) else {
        panic!("entry must end in a branch")
    };
    let def = func.def_inst(cond).unwrap();
    assert!(matches!(func.kind(def), InstKind::Icmp { .. }));

    let mut interp = Interpreter::with_pointer_bits(&module, 32).unwrap();
    assert_eq!(interp.call("f", &[1, 41]).unwrap(), vec![42]);
    assert_eq!(interp.call("f", &[0, 41]).unwrap(), vec![41]);
}
