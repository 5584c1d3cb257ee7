use super::*;
use pretty_assertions::assert_eq;
use rxc_common::CompilerError;
use rxc_ir::{BinaryOp, IntCC, IrBuilder, IrType, Linkage, Module, Signature};
use rxc_target::{x86_64, Operand, PReg};

fn names(mf: &MachineFunction, target: &TargetDescription) -> Vec<Vec<&'static str>> {
    mf.blocks
        .iter()
        .map(|b| b.insts.iter().map(|i| target.opcode_name(i.opcode)).collect())
        .collect()
}

fn add_imm_module() -> Module {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![IrType::I32], vec![IrType::I32]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let five = f.iconst(IrType::I32, 5).unwrap();
    let sum = f.binary(BinaryOp::Add, p[0], five).unwrap();
    f.ret(&[sum]).unwrap();
    f.finish().unwrap();
    b.finish()
}

#[test]
fn test_immediates_fold_into_their_user() {
    let target = TargetDescription::riscv32();
    let module = add_imm_module();
    let mf = select_function(&module.functions[0], &target).unwrap();
    assert_eq!(names(&mf, &target), vec![vec!["mv", "addi", "mv", "ret"]]);
    let addi = &mf.blocks[0].insts[1];
    assert_eq!(addi.operands[2], Operand::Imm(5));
    let ret = &mf.blocks[0].insts[3];
    assert_eq!(ret.implicit_uses, vec![PReg(10)]);
}

#[test]
fn test_load_folds_constant_offset() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![IrType::Ptr], vec![IrType::I64]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let eight = f.iconst(IrType::I64, 8).unwrap();
    let addr = f.ptradd(p[0], eight).unwrap();
    let v = f.load(IrType::I64, addr).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let target = TargetDescription::x86_64();
    let mf = select_function(&module.functions[0], &target).unwrap();
    assert_eq!(names(&mf, &target), vec![vec!["movq", "movq(m)", "movq", "ret"]]);
    assert!(matches!(mf.blocks[0].insts[1].operands[1], Operand::Mem { offset: 8, .. }));
}

#[test]
fn test_branch_folds_compare() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function(
        "max",
        Signature::new(vec![IrType::I32, IrType::I32], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    let left = f.create_block();
    let right = f.create_block();
    f.switch_to_block(entry).unwrap();
    let gt = f.icmp(IntCC::Sgt, p[0], p[1]).unwrap();
    f.branch(gt, left, right).unwrap();
    f.switch_to_block(left).unwrap();
    f.ret(&[p[0]]).unwrap();
    f.switch_to_block(right).unwrap();
    f.ret(&[p[1]]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let target = TargetDescription::riscv32();
    let mf = select_function(&module.functions[0], &target).unwrap();
    let entry = &mf.blocks[0].insts;
    // sgt a, b  =>  blt b, a
    assert_eq!(target.opcode_name(entry[2].opcode), "blt");
    assert_eq!(entry[2].block_targets(), vec![1]);
    assert_eq!(target.opcode_name(entry[3].opcode), "j");
    assert_eq!(mf.successors(0), vec![1, 2]);
}

#[test]
fn test_call_lowering_follows_the_abi() {
    let mut b = IrBuilder::new("m");
    b.declare_function("g", Signature::new(vec![IrType::I64; 7], vec![IrType::I64]));
    let mut f = b.function("f", Signature::new(vec![IrType::I64], vec![IrType::I64]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let args = vec![p[0]; 7];
    let r = f.call("g", &args, &[IrType::I64]).unwrap();
    f.ret(&r).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let target = TargetDescription::x86_64();
    let mf = select_function(module.function("f").unwrap(), &target).unwrap();
    assert!(mf.has_calls);
    assert_eq!(mf.outgoing, 16);
    let call = mf.blocks[0]
        .insts
        .iter()
        .find(|i| target.opcode_name(i.opcode) == "call")
        .unwrap();
    assert_eq!(call.implicit_uses.len(), 6);
    assert!(call.clobbers.contains(&x86_64::RAX));
    let stores = mf.blocks[0]
        .insts
        .iter()
        .filter(|i| matches!(i.operands.get(1), Some(Operand::Mem { base: Reg::Phys(x86_64::RSP), offset: 0 })))
        .count();
    assert_eq!(stores, 1);
}

#[test]
fn test_float_constants_are_pooled_once() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![], vec![IrType::F64]), Linkage::External);
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let x = f.fconst(IrType::F64, 1.5).unwrap();
    let y = f.fconst(IrType::F64, 1.5).unwrap();
    let z = f.binary(BinaryOp::FAdd, x, y).unwrap();
    f.ret(&[z]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let target = TargetDescription::riscv32();
    let mf = select_function(&module.functions[0], &target).unwrap();
    assert_eq!(mf.constants.len(), 1);
    assert_eq!(mf.constants[0].symbol, "f.cst0");
    assert_eq!(mf.constants[0].bytes, 1.5f64.to_le_bytes().to_vec());
    let ret = mf.blocks[0].insts.last().unwrap();
    assert_eq!(ret.implicit_uses, vec![PReg(42)]);
}

#[test]
fn test_missing_rule_is_unsupported() {
    // riscv32 selects no `select`; legalization would have expanded it
    let mut b = IrBuilder::new("m");
    let mut f = b.function(
        "f",
        Signature::new(vec![IrType::I1, IrType::I32, IrType::I32], vec![IrType::I32]),
        Linkage::External,
    );
    let p = f.params();
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let v = f.select(p[0], p[1], p[2]).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let err = select_function(&module.functions[0], &TargetDescription::riscv32()).unwrap_err();
    assert_eq!(err, CompilerError::unsupported("riscv32", "select i32"));
}

#[test]
fn test_phi_inputs_are_copied_before_the_jump() {
    let mut b = IrBuilder::new("m");
    let mut f = b.function("f", Signature::new(vec![IrType::I32], vec![IrType::I32]), Linkage::External);
    let p = f.params();
    let entry = f.create_block();
    let join = f.create_block();
    f.switch_to_block(entry).unwrap();
    f.jump(join).unwrap();
    f.switch_to_block(join).unwrap();
    let phi = f.phi(IrType::I32).unwrap();
    f.add_phi_incoming(phi, entry, p[0]).unwrap();
    f.ret(&[phi]).unwrap();
    f.finish().unwrap();
    let module = b.finish();

    let target = TargetDescription::riscv32();
    let mf = select_function(&module.functions[0], &target).unwrap();
    assert_eq!(names(&mf, &target)[0], vec!["mv", "mv", "mv", "j"]);
    assert_eq!(mf.blocks[0].insts[3].block_targets(), vec![1]);
}
