use super::*;
use pretty_assertions::assert_eq;
use rxc_ir::{
    BinaryOp, CastOp, Function, InstKind, IntCC, Interpreter, IrBuilder, IrType, Linkage, Module, Signature,
};

fn sig(params: &[IrType], rets: &[IrType]) -> Signature {
    Signature::new(params.to_vec(), rets.to_vec())
}

/// sum(n) with its induction variable and accumulator kept in stack slots
fn build_sum_in_memory() -> Module {
    let mut b = IrBuilder::new("slots");
    let mut f = b.function("sum", sig(&[IrType::I32], &[IrType::I32]), Linkage::External);
    let n = f.params()[0];
    let entry = f.create_block();
    let header = f.create_block();
    let body = f.create_block();
    let exit = f.create_block();

    f.switch_to_block(entry).unwrap();
    let i_slot = f.alloca(4, 4).unwrap();
    let acc_slot = f.alloca(4, 4).unwrap();
    let zero = f.iconst(IrType::I32, 0).unwrap();
    f.store(zero, i_slot).unwrap();
    f.store(zero, acc_slot).unwrap();
    f.jump(header).unwrap();

    f.switch_to_block(header).unwrap();
    let i = f.load(IrType::I32, i_slot).unwrap();
    let more = f.icmp(IntCC::Slt, i, n).unwrap();
    f.branch(more, body, exit).unwrap();

    f.switch_to_block(body).unwrap();
    let acc = f.load(IrType::I32, acc_slot).unwrap();
    let i = f.load(IrType::I32, i_slot).unwrap();
    let acc2 = f.binary(BinaryOp::Add, acc, i).unwrap();
    f.store(acc2, acc_slot).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let i2 = f.binary(BinaryOp::Add, i, one).unwrap();
    f.store(i2, i_slot).unwrap();
    f.jump(header).unwrap();

    f.switch_to_block(exit).unwrap();
    let result = f.load(IrType::I32, acc_slot).unwrap();
    f.ret(&[result]).unwrap();
    f.finish().unwrap();
    b.finish()
}

/// pick() = if 1 < 2 { 10 } else { 20 }
fn build_constant_branch() -> Module {
    let mut b = IrBuilder::new("branches");
    let mut f = b.function("pick", sig(&[], &[IrType::I32]), Linkage::External);
    let entry = f.create_block();
    let yes = f.create_block();
    let no = f.create_block();
    f.switch_to_block(entry).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let two = f.iconst(IrType::I32, 2).unwrap();
    let c = f.icmp(IntCC::Slt, one, two).unwrap();
    f.branch(c, yes, no).unwrap();
    f.switch_to_block(yes).unwrap();
    let ten = f.iconst(IrType::I32, 10).unwrap();
    f.ret(&[ten]).unwrap();
    f.switch_to_block(no).unwrap();
    let twenty = f.iconst(IrType::I32, 20).unwrap();
    f.ret(&[twenty]).unwrap();
    f.finish().unwrap();
    b.finish()
}

/// scale(x) = x * 8 + 0
fn build_scale() -> Module {
    let mut b = IrBuilder::new("algebra");
    let mut f = b.function("scale", sig(&[IrType::I32], &[IrType::I32]), Linkage::External);
    let x = f.params()[0];
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let eight = f.iconst(IrType::I32, 8).unwrap();
    let zero = f.iconst(IrType::I32, 0).unwrap();
    let m = f.binary(BinaryOp::Mul, eight, x).unwrap();
    let r = f.binary(BinaryOp::Add, m, zero).unwrap();
    f.ret(&[r]).unwrap();
    f.finish().unwrap();
    b.finish()
}

fn run(module: &Module, name: &str, args: &[u64]) -> Vec<u64> {
    Interpreter::new(module).unwrap().call(name, args).unwrap()
}

fn count(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.all_insts().into_iter().filter(|&i| pred(func.kind(i))).count()
}

fn all_passes() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(Mem2Reg),
        Box::new(ConstFold),
        Box::new(InstCombine),
        Box::new(SimplifyCfg),
        Box::new(DeadCodeElimination),
    ]
}

#[test]
fn test_mem2reg_promotes_loop_slots() {
    let mut m = build_sum_in_memory();
    assert!(Mem2Reg.run(&mut m));
    verify_module(&m).unwrap();
    let f = &m.functions[0];
    assert_eq!(count(f, |k| matches!(k, InstKind::Alloca { .. } | InstKind::Load { .. } | InstKind::Store { .. })), 0);
    assert!(count(f, InstKind::is_phi) >= 2);
    assert_eq!(run(&m, "sum", &[10]), vec![45]);
    assert_eq!(run(&m, "sum", &[0]), vec![0]);
}

#[test]
fn test_mem2reg_skips_escaping_slot() {
    let mut b = IrBuilder::new("escape");
    b.declare_function("sink", sig(&[IrType::Ptr], &[]));
    let mut f = b.function("f", sig(&[], &[IrType::I32]), Linkage::External);
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let slot = f.alloca(4, 4).unwrap();
    let seven = f.iconst(IrType::I32, 7).unwrap();
    f.store(seven, slot).unwrap();
    f.call("sink", &[slot], &[]).unwrap();
    let v = f.load(IrType::I32, slot).unwrap();
    f.ret(&[v]).unwrap();
    f.finish().unwrap();
    let mut m = b.finish();

    assert!(!Mem2Reg.run(&mut m));
    assert_eq!(count(m.function("f").unwrap(), |k| matches!(k, InstKind::Alloca { .. })), 1);
}

#[test]
fn test_constfold_turns_constant_branch_into_jump() {
    let mut m = build_constant_branch();
    assert!(ConstFold.run(&mut m));
    verify_module(&m).unwrap();
    let f = &m.functions[0];
    let entry = f.entry_block().unwrap();
    let term = f.terminator(entry).unwrap();
    assert!(matches!(f.kind(term), InstKind::Jump { dest } if *dest == f.blocks()[1]));

    assert!(SimplifyCfg.run(&mut m));
    verify_module(&m).unwrap();
    assert_eq!(m.functions[0].blocks().len(), 1);
    assert_eq!(run(&m, "pick", &[]), vec![10]);
}

#[test]
fn test_constfold_mixes_integer_and_float_constants() {
    let mut b = IrBuilder::new("mixed");
    let mut f = b.function("f", sig(&[], &[IrType::F64]), Linkage::External);
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let x = f.fconst(IrType::F64, 1.5).unwrap();
    let y = f.fconst(IrType::F64, 2.25).unwrap();
    let sum = f.binary(BinaryOp::FAdd, x, y).unwrap();
    let seven = f.iconst(IrType::I32, 7).unwrap();
    let widened = f.cast(CastOp::SiToFp, seven, IrType::F64).unwrap();
    let total = f.binary(BinaryOp::FAdd, sum, widened).unwrap();
    f.ret(&[total]).unwrap();
    f.finish().unwrap();
    let mut m = b.finish();

    assert!(ConstFold.run(&mut m));
    verify_module(&m).unwrap();
    let f = &m.functions[0];
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { .. } | InstKind::Cast { .. })), 0);
    assert_eq!(run(&m, "f", &[]), vec![10.75f64.to_bits()]);
    assert!(!ConstFold.run(&mut m));
}

#[test]
fn test_instcombine_strength_reduces_multiply() {
    let mut m = build_scale();
    assert!(InstCombine.run(&mut m));
    DeadCodeElimination.run(&mut m);
    verify_module(&m).unwrap();
    let f = &m.functions[0];
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { op: BinaryOp::Mul, .. })), 0);
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { op: BinaryOp::Add, .. })), 0);
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { op: BinaryOp::Shl, .. })), 1);
    assert_eq!(run(&m, "scale", &[5]), vec![40]);
    assert_eq!(run(&m, "scale", &[0x2000_0001]), vec![8]);
}

#[test]
fn test_simplifycfg_merges_jump_chain() {
    let mut b = IrBuilder::new("chain");
    let mut f = b.function("chain", sig(&[IrType::I32], &[IrType::I32]), Linkage::External);
    let x = f.params()[0];
    let blocks: Vec<_> = (0..4).map(|_| f.create_block()).collect();
    for w in blocks.windows(2) {
        f.switch_to_block(w[0]).unwrap();
        f.jump(w[1]).unwrap();
    }
    f.switch_to_block(blocks[3]).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    let r = f.binary(BinaryOp::Add, x, one).unwrap();
    f.ret(&[r]).unwrap();
    let orphan = f.create_block();
    f.switch_to_block(orphan).unwrap();
    f.ret(&[x]).unwrap();
    f.finish().unwrap();
    let mut m = b.finish();

    assert!(SimplifyCfg.run(&mut m));
    verify_module(&m).unwrap();
    assert_eq!(m.functions[0].blocks().len(), 1);
    assert_eq!(run(&m, "chain", &[41]), vec![42]);
}

#[test]
fn test_dce_keeps_side_effects() {
    let mut b = IrBuilder::new("dce");
    b.declare_function("effect", sig(&[], &[IrType::I32]));
    let mut f = b.function("f", sig(&[IrType::I32], &[]), Linkage::External);
    let x = f.params()[0];
    let entry = f.create_block();
    f.switch_to_block(entry).unwrap();
    let one = f.iconst(IrType::I32, 1).unwrap();
    f.binary(BinaryOp::Add, x, one).unwrap();
    f.binary(BinaryOp::SDiv, x, one).unwrap();
    f.call("effect", &[], &[IrType::I32]).unwrap();
    f.ret(&[]).unwrap();
    f.finish().unwrap();
    let mut m = b.finish();

    assert!(DeadCodeElimination.run(&mut m));
    let f = m.function("f").unwrap();
    // the add goes; the trapping divide and the call stay
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { op: BinaryOp::Add, .. })), 0);
    assert_eq!(count(f, |k| matches!(k, InstKind::Binary { op: BinaryOp::SDiv, .. })), 1);
    assert_eq!(count(f, |k| matches!(k, InstKind::Call { .. })), 1);
}

#[test]
fn test_every_pass_is_idempotent() {
    for pass in all_passes() {
        for build in [build_sum_in_memory, build_constant_branch, build_scale] {
            let mut once = build();
            pass.run(&mut once);
            let mut twice = once.clone();
            let changed = pass.run(&mut twice);
            assert!(!changed, "pass '{}' changed its own output", pass.name());
            assert_eq!(once, twice);
        }
    }
}

#[test]
fn test_pipeline_rejects_dependency_order() {
    let mut pm = PassManager::new(Schedule::Once);
    pm.add(Box::new(DeadCodeElimination)).add(Box::new(ConstFold));
    let err = pm.validate().unwrap_err();
    assert_eq!(
        err,
        CompilerError::PipelineOrder {
            pass: "dce".to_string(),
            dependency: "constfold".to_string(),
        }
    );
    let mut m = build_scale();
    assert!(pm.run(&mut m).is_err());
}

#[test]
fn test_standard_pipeline_preserves_semantics() {
    for level in 0..=3 {
        let pm = PassManager::for_level(level);
        pm.validate().unwrap();
        let mut m = build_sum_in_memory();
        let mut pm_verified = PassManager::for_level(level);
        pm_verified.set_verify_each(true);
        pm_verified.run(&mut m).unwrap();
        assert_eq!(run(&m, "sum", &[7]), vec![21]);
        assert!(!pm.run(&mut m).unwrap() || level == 1);
    }
    assert_eq!(PassManager::for_level(0).pass_names(), Vec::<&str>::new());
    assert_eq!(
        PassManager::for_level(2).pass_names(),
        vec!["mem2reg", "constfold", "instcombine", "simplifycfg", "dce"]
    );
}
